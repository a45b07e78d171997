//! Drives the driver through its C entry points against an in-process
//! server, the way an ODBC application would.

#![allow(dead_code)]

use std::ptr;
use std::sync::Arc;

use whisker::testing::MockServer;
use whisker::*;

pub struct Env {
    pub henv: SQLHENV,
    pub server: MockServer,
    pub dsns: Arc<MemoryDsnStore>,
}

impl Env {
    pub fn new(server: MockServer) -> Self {
        let mut henv: SQLHENV = ptr::null_mut();
        assert_eq!(SQLAllocHandle(SQL_HANDLE_ENV, ptr::null_mut(), &mut henv), SQL_SUCCESS);
        assert_eq!(
            SQLSetEnvAttr(henv, SQL_ATTR_ODBC_VERSION, SQL_OV_ODBC3 as usize as SQLPOINTER, 0),
            SQL_SUCCESS
        );
        let dsns = Arc::new(MemoryDsnStore::new());
        let rc = unsafe { configure_environment(henv, Arc::new(server.clone()), dsns.clone()) };
        assert_eq!(rc, SQL_SUCCESS);
        Env { henv, server, dsns }
    }

    pub fn dbc(&self) -> SQLHDBC {
        let mut hdbc: SQLHDBC = ptr::null_mut();
        assert_eq!(SQLAllocHandle(SQL_HANDLE_DBC, self.henv, &mut hdbc), SQL_SUCCESS);
        hdbc
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        SQLFreeHandle(SQL_HANDLE_ENV, self.henv);
    }
}

/// A connected handle pair; disconnects and frees on drop.
pub struct Conn {
    pub env: Env,
    pub hdbc: SQLHDBC,
}

impl Conn {
    pub fn open(conn_str: &str) -> Self {
        Self::open_on(MockServer::new(), conn_str)
    }

    pub fn open_on(server: MockServer, conn_str: &str) -> Self {
        let env = Env::new(server);
        let hdbc = env.dbc();
        let rc = driver_connect(hdbc, conn_str);
        assert!(sql_succeeded(rc), "connect failed: {}", sqlstate(SQL_HANDLE_DBC, hdbc));
        env.server.clear_log();
        Conn { env, hdbc }
    }

    pub fn server(&self) -> &MockServer {
        &self.env.server
    }

    pub fn stmt(&self) -> SQLHSTMT {
        let mut hstmt: SQLHSTMT = ptr::null_mut();
        assert_eq!(SQLAllocHandle(SQL_HANDLE_STMT, self.hdbc, &mut hstmt), SQL_SUCCESS);
        hstmt
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        SQLDisconnect(self.hdbc);
        SQLFreeHandle(SQL_HANDLE_DBC, self.hdbc);
    }
}

pub fn driver_connect(hdbc: SQLHDBC, conn_str: &str) -> SQLRETURN {
    let mut out = [0u8; 512];
    let mut out_len: SQLSMALLINT = 0;
    SQLDriverConnect(
        hdbc,
        ptr::null_mut(),
        conn_str.as_ptr(),
        conn_str.len() as SQLSMALLINT,
        out.as_mut_ptr(),
        out.len() as SQLSMALLINT,
        &mut out_len,
        SQL_DRIVER_NOPROMPT,
    )
}

pub fn exec(hstmt: SQLHSTMT, sql: &str) -> SQLRETURN {
    exec_bytes(hstmt, sql.as_bytes())
}

pub fn exec_bytes(hstmt: SQLHSTMT, sql: &[u8]) -> SQLRETURN {
    SQLExecDirect(hstmt, sql.as_ptr(), sql.len() as SQLINTEGER)
}

pub fn prepare(hstmt: SQLHSTMT, sql: &str) -> SQLRETURN {
    SQLPrepare(hstmt, sql.as_ptr(), sql.len() as SQLINTEGER)
}

/// SQLSTATE of the first diagnostic record, or an empty string.
pub fn sqlstate(handle_type: SQLSMALLINT, handle: SQLHANDLE) -> String {
    diag(handle_type, handle, 1).map(|(state, _)| state).unwrap_or_default()
}

pub fn diag(handle_type: SQLSMALLINT, handle: SQLHANDLE, rec: SQLSMALLINT) -> Option<(String, String)> {
    let mut state = [0u8; 6];
    let mut native: SQLINTEGER = 0;
    let mut msg = [0u8; 512];
    let mut len: SQLSMALLINT = 0;
    let rc = SQLGetDiagRec(
        handle_type,
        handle,
        rec,
        state.as_mut_ptr(),
        &mut native,
        msg.as_mut_ptr(),
        msg.len() as SQLSMALLINT,
        &mut len,
    );
    if !sql_succeeded(rc) {
        return None;
    }
    Some((
        String::from_utf8_lossy(&state[..5]).into_owned(),
        String::from_utf8_lossy(&msg[..len as usize]).into_owned(),
    ))
}

pub fn stmt_state(hstmt: SQLHSTMT) -> String {
    sqlstate(SQL_HANDLE_STMT, hstmt)
}

/// The whole value of a column of the current row as bytes.
pub fn get_bytes(hstmt: SQLHSTMT, column: SQLUSMALLINT) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 4096];
    let mut ind: SQLLEN = 0;
    let rc = SQLGetData(
        hstmt,
        column,
        SQL_C_BINARY,
        buf.as_mut_ptr() as SQLPOINTER,
        buf.len() as SQLLEN,
        &mut ind,
    );
    assert_eq!(rc, SQL_SUCCESS, "SQLGetData: {}", stmt_state(hstmt));
    if ind == SQL_NULL_DATA {
        return None;
    }
    buf.truncate(ind as usize);
    Some(buf)
}

pub fn get_string(hstmt: SQLHSTMT, column: SQLUSMALLINT) -> Option<String> {
    get_bytes(hstmt, column).map(|b| String::from_utf8_lossy(&b).into_owned())
}

pub fn get_i64(hstmt: SQLHSTMT, column: SQLUSMALLINT) -> i64 {
    let mut value: i64 = 0;
    let mut ind: SQLLEN = 0;
    let rc = SQLGetData(
        hstmt,
        column,
        SQL_C_SBIGINT,
        &mut value as *mut i64 as SQLPOINTER,
        0,
        &mut ind,
    );
    assert_eq!(rc, SQL_SUCCESS, "SQLGetData: {}", stmt_state(hstmt));
    value
}

pub fn row_count(hstmt: SQLHSTMT) -> SQLLEN {
    let mut count: SQLLEN = 0;
    assert_eq!(SQLRowCount(hstmt, &mut count), SQL_SUCCESS);
    count
}

/// Passes an integer attribute value the way ODBC does, in the pointer.
pub fn int_attr(value: usize) -> SQLPOINTER {
    value as SQLPOINTER
}
