mod common;

use std::ptr;
use std::time::{Duration, Instant};

use common::*;
use whisker::testing::{MockServer, Reply};
use whisker::*;

#[test]
fn driver_connect_writes_back_the_completed_string() {
    let env = Env::new(MockServer::new());
    let hdbc = env.dbc();
    let conn_str = "SERVER=db1;UID=root;PWD=secret;DATABASE=test;CHARSET=utf8";

    let mut out = [0u8; 256];
    let mut out_len: SQLSMALLINT = 0;
    let rc = SQLDriverConnect(
        hdbc,
        ptr::null_mut(),
        conn_str.as_ptr(),
        conn_str.len() as SQLSMALLINT,
        out.as_mut_ptr(),
        out.len() as SQLSMALLINT,
        &mut out_len,
        SQL_DRIVER_NOPROMPT,
    );
    assert_eq!(rc, SQL_SUCCESS);
    let expected = "UID=root;PWD=secret;DATABASE=test;PORT=3306;CHARSET=utf8";
    assert_eq!(out_len as usize, expected.len());
    assert_eq!(&out[..expected.len()], expected.as_bytes());
    assert_eq!(out[expected.len()], 0);

    let handshake = env.server.handshakes().pop().unwrap();
    assert_eq!(handshake.host, "db1");
    assert_eq!(handshake.database.as_deref(), Some("test"));
    assert_eq!(handshake.charset, "utf8");
    assert_eq!(env.server.open_sessions(), 1);

    assert_eq!(SQLDisconnect(hdbc), SQL_SUCCESS);
    assert_eq!(env.server.open_sessions(), 0);
    assert_eq!(SQLFreeHandle(SQL_HANDLE_DBC, hdbc), SQL_SUCCESS);
}

#[test]
fn truncated_output_string_reports_full_length() {
    let env = Env::new(MockServer::new());
    let hdbc = env.dbc();
    let conn_str = "SERVER=db1;UID=root;DATABASE=test";
    let expected = "UID=root;DATABASE=test;PORT=3306;CHARSET=latin1";

    let mut out = [0xAAu8; 10];
    let mut out_len: SQLSMALLINT = 0;
    let rc = SQLDriverConnect(
        hdbc,
        ptr::null_mut(),
        conn_str.as_ptr(),
        conn_str.len() as SQLSMALLINT,
        out.as_mut_ptr(),
        out.len() as SQLSMALLINT,
        &mut out_len,
        SQL_DRIVER_NOPROMPT,
    );
    assert_eq!(rc, SQL_SUCCESS_WITH_INFO);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "01004");
    assert_eq!(out_len as usize, expected.len());
    assert_eq!(&out[..9], &expected.as_bytes()[..9]);
    assert_eq!(out[9], 0);

    // The connection itself was made.
    assert_eq!(env.server.open_sessions(), 1);
    assert_eq!(SQLDisconnect(hdbc), SQL_SUCCESS);
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn dsn_defaults_fill_in_missing_keys() {
    let env = Env::new(MockServer::new());
    let mut stored = ConnectionAttributes::new();
    stored.set("SERVER", "dsnhost");
    stored.set("DATABASE", "shop");
    stored.set("UID", "nobody");
    env.dsns.insert("orders", stored);

    let hdbc = env.dbc();
    let (dsn, uid, pwd) = ("ORDERS", "bob", "pw");
    let rc = SQLConnect(
        hdbc,
        dsn.as_ptr(),
        dsn.len() as SQLSMALLINT,
        uid.as_ptr(),
        uid.len() as SQLSMALLINT,
        pwd.as_ptr(),
        pwd.len() as SQLSMALLINT,
    );
    assert_eq!(rc, SQL_SUCCESS);
    let handshake = env.server.handshakes().pop().unwrap();
    assert_eq!(handshake.host, "dsnhost");
    assert_eq!(handshake.user, "bob");
    assert_eq!(handshake.password, "pw");
    assert_eq!(handshake.database.as_deref(), Some("shop"));

    SQLDisconnect(hdbc);
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn unknown_dsn_without_endpoint_is_not_found() {
    let env = Env::new(MockServer::new());
    let hdbc = env.dbc();
    assert_eq!(driver_connect(hdbc, "DSN=nowhere"), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "IM002");
    assert!(env.server.handshakes().is_empty());
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn bad_credentials_and_refused_connections() {
    let server = MockServer::new().with_user("root", "right");
    let env = Env::new(server);
    let hdbc = env.dbc();

    assert_eq!(driver_connect(hdbc, "SERVER=h;UID=root;PWD=wrong"), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "28000");
    let (_, message) = diag(SQL_HANDLE_DBC, hdbc, 1).unwrap();
    assert!(message.starts_with("[whisker]"), "{message}");

    env.server.set_refusing(true);
    assert_eq!(driver_connect(hdbc, "SERVER=h;UID=root;PWD=right"), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "08001");

    env.server.set_refusing(false);
    assert_eq!(driver_connect(hdbc, "SERVER=h;UID=root;PWD=right"), SQL_SUCCESS);
    assert_eq!(driver_connect(hdbc, "SERVER=h;UID=root;PWD=right"), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "08002");

    SQLDisconnect(hdbc);
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn connection_timeout_is_returned_verbatim() {
    let env = Env::new(MockServer::new());
    let hdbc = env.dbc();
    for value in [0u32, 17, 3600] {
        let rc = SQLSetConnectAttr(hdbc, SQL_ATTR_CONNECTION_TIMEOUT, int_attr(value as usize), 0);
        assert_eq!(rc, SQL_SUCCESS);
        let mut got: SQLUINTEGER = 99;
        let rc = SQLGetConnectAttr(
            hdbc,
            SQL_ATTR_CONNECTION_TIMEOUT,
            &mut got as *mut SQLUINTEGER as SQLPOINTER,
            0,
            ptr::null_mut(),
        );
        assert_eq!(rc, SQL_SUCCESS);
        assert_eq!(got, value);
    }
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn login_timeout_round_trips_and_is_enforced() {
    let server = MockServer::new();
    server.set_handshake_delay(Duration::from_secs(5));
    let env = Env::new(server);
    let hdbc = env.dbc();

    assert_eq!(SQLSetConnectAttr(hdbc, SQL_ATTR_LOGIN_TIMEOUT, int_attr(1), 0), SQL_SUCCESS);
    let mut got: SQLUINTEGER = 0;
    SQLGetConnectAttr(
        hdbc,
        SQL_ATTR_LOGIN_TIMEOUT,
        &mut got as *mut SQLUINTEGER as SQLPOINTER,
        0,
        ptr::null_mut(),
    );
    assert_eq!(got, 1);

    let started = Instant::now();
    assert_eq!(driver_connect(hdbc, "SERVER=slow"), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "HYT00");
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(env.server.open_sessions(), 0);
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn invalid_isolation_level_is_rejected() {
    let env = Env::new(MockServer::new());
    let hdbc = env.dbc();
    assert_eq!(SQLSetConnectAttr(hdbc, SQL_ATTR_TXN_ISOLATION, int_attr(999), 0), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "HY024");

    // Set before connecting: applied once the session exists.
    let rc = SQLSetConnectAttr(
        hdbc,
        SQL_ATTR_TXN_ISOLATION,
        int_attr(SQL_TXN_READ_COMMITTED as usize),
        0,
    );
    assert_eq!(rc, SQL_SUCCESS);
    assert_eq!(driver_connect(hdbc, "SERVER=h"), SQL_SUCCESS);
    assert!(env
        .server
        .queries()
        .contains(&"SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED".to_string()));

    assert_eq!(SQLSetConnectAttr(hdbc, SQL_ATTR_TXN_ISOLATION, int_attr(999), 0), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "HY024");
    let mut got: SQLUINTEGER = 0;
    SQLGetConnectAttr(
        hdbc,
        SQL_ATTR_TXN_ISOLATION,
        &mut got as *mut SQLUINTEGER as SQLPOINTER,
        0,
        ptr::null_mut(),
    );
    assert_eq!(got, SQL_TXN_READ_COMMITTED);

    SQLDisconnect(hdbc);
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn failing_init_statement_aborts_the_connect() {
    let server = MockServer::new();
    server.on("CALL SETUP", Reply::syntax_error());
    let env = Env::new(server);
    let hdbc = env.dbc();

    assert_eq!(driver_connect(hdbc, "SERVER=h;INITSTMT={CALL setup()}"), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "08004");
    assert_eq!(env.server.open_sessions(), 0);

    env.server.clear_log();
    assert_eq!(driver_connect(hdbc, "SERVER=h;INITSTMT={ set NAMES utf8 }"), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "08004");
    assert!(env.server.queries().is_empty());
    assert_eq!(env.server.open_sessions(), 0);

    assert_eq!(driver_connect(hdbc, "SERVER=h;INITSTMT={SET @a=1; }"), SQL_SUCCESS);
    assert_eq!(env.server.queries(), vec!["SET @a=1;".to_string()]);

    SQLDisconnect(hdbc);
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn reconnecting_the_same_handle_many_times() {
    let env = Env::new(MockServer::new());
    let hdbc = env.dbc();
    for _ in 0..20 {
        assert_eq!(driver_connect(hdbc, "SERVER=h;UID=u"), SQL_SUCCESS);
        let mut hstmt: SQLHSTMT = ptr::null_mut();
        assert_eq!(SQLAllocHandle(SQL_HANDLE_STMT, hdbc, &mut hstmt), SQL_SUCCESS);
        assert_eq!(exec(hstmt, "SELECT 1"), SQL_SUCCESS);
        assert_eq!(SQLFreeHandle(SQL_HANDLE_STMT, hstmt), SQL_SUCCESS);
        assert_eq!(SQLDisconnect(hdbc), SQL_SUCCESS);
    }
    assert_eq!(env.server.handshakes().len(), 20);
    assert_eq!(env.server.open_sessions(), 0);
    assert_eq!(SQLDisconnect(hdbc), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "08003");
    assert_eq!(SQLFreeHandle(SQL_HANDLE_DBC, hdbc), SQL_SUCCESS);
}

#[test]
fn statements_go_stale_after_disconnect() {
    let env = Env::new(MockServer::new());
    let hdbc = env.dbc();
    assert_eq!(driver_connect(hdbc, "SERVER=h"), SQL_SUCCESS);
    let mut hstmt: SQLHSTMT = ptr::null_mut();
    assert_eq!(SQLAllocHandle(SQL_HANDLE_STMT, hdbc, &mut hstmt), SQL_SUCCESS);
    assert_eq!(exec(hstmt, "SELECT 1"), SQL_SUCCESS);

    assert_eq!(SQLDisconnect(hdbc), SQL_SUCCESS);
    assert_eq!(exec(hstmt, "SELECT 1"), SQL_ERROR);
    assert_eq!(stmt_state(hstmt), "08003");

    // A new session does not revive statements of the old one.
    assert_eq!(driver_connect(hdbc, "SERVER=h"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_ERROR);
    assert_eq!(stmt_state(hstmt), "08003");
    assert_eq!(SQLFreeHandle(SQL_HANDLE_STMT, hstmt), SQL_SUCCESS);

    assert_eq!(SQLFreeHandle(SQL_HANDLE_DBC, hdbc), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "HY010");
    SQLDisconnect(hdbc);
    assert_eq!(SQLFreeHandle(SQL_HANDLE_DBC, hdbc), SQL_SUCCESS);
}

#[test]
fn statement_allocation_needs_a_connection() {
    let env = Env::new(MockServer::new());
    let hdbc = env.dbc();
    let mut hstmt: SQLHSTMT = ptr::null_mut();
    assert_eq!(SQLAllocHandle(SQL_HANDLE_STMT, hdbc, &mut hstmt), SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, hdbc), "08003");
    assert!(hstmt.is_null());
    SQLFreeHandle(SQL_HANDLE_DBC, hdbc);
}

#[test]
fn distributed_transactions_are_unsupported() {
    let conn = Conn::open("SERVER=h");
    let rc = SQLSetConnectAttr(conn.hdbc, SQL_ATTR_ENLIST_IN_DTC, int_attr(1), 0);
    assert_eq!(rc, SQL_ERROR);
    assert_eq!(sqlstate(SQL_HANDLE_DBC, conn.hdbc), "HYC00");
}

#[test]
fn autocommit_catalog_and_transactions() {
    let conn = Conn::open("SERVER=h");
    let hdbc = conn.hdbc;

    let rc = SQLSetConnectAttr(hdbc, SQL_ATTR_AUTOCOMMIT, int_attr(SQL_AUTOCOMMIT_OFF), 0);
    assert_eq!(rc, SQL_SUCCESS);
    let db = "sales";
    let rc = SQLSetConnectAttr(
        hdbc,
        SQL_ATTR_CURRENT_CATALOG,
        db.as_ptr() as SQLPOINTER,
        db.len() as SQLINTEGER,
    );
    assert_eq!(rc, SQL_SUCCESS);
    assert_eq!(SQLEndTran(SQL_HANDLE_DBC, hdbc, SQL_COMMIT), SQL_SUCCESS);
    assert_eq!(SQLEndTran(SQL_HANDLE_DBC, hdbc, SQL_ROLLBACK), SQL_SUCCESS);
    assert_eq!(
        conn.server().queries(),
        vec!["SET AUTOCOMMIT=0", "USE `sales`", "COMMIT", "ROLLBACK"]
    );

    let mut name = [0u8; 32];
    let mut len: SQLINTEGER = 0;
    let rc = SQLGetConnectAttr(
        hdbc,
        SQL_ATTR_CURRENT_CATALOG,
        name.as_mut_ptr() as SQLPOINTER,
        name.len() as SQLINTEGER,
        &mut len,
    );
    assert_eq!(rc, SQL_SUCCESS);
    assert_eq!(&name[..len as usize], b"sales");
}

#[test]
fn driver_information() {
    let conn = Conn::open("SERVER=h;OPTION=32");
    let mut name = [0u8; 64];
    let mut len: SQLSMALLINT = 0;
    let rc = SQLGetInfo(
        conn.hdbc,
        SQL_DRIVER_NAME,
        name.as_mut_ptr() as SQLPOINTER,
        name.len() as SQLSMALLINT,
        &mut len,
    );
    assert_eq!(rc, SQL_SUCCESS);
    assert_eq!(&name[..len as usize], b"libwhisker.so");

    let mut mask: SQLUINTEGER = 0;
    let rc = SQLGetInfo(
        conn.hdbc,
        SQL_SCROLL_OPTIONS,
        &mut mask as *mut SQLUINTEGER as SQLPOINTER,
        0,
        ptr::null_mut(),
    );
    assert_eq!(rc, SQL_SUCCESS);
    // OPTION=32 enables dynamic cursors.
    assert_eq!(mask, SQL_SO_FORWARD_ONLY | SQL_SO_STATIC | SQL_SO_DYNAMIC);

    let mut behavior: SQLUSMALLINT = 0;
    SQLGetInfo(
        conn.hdbc,
        SQL_CURSOR_COMMIT_BEHAVIOR,
        &mut behavior as *mut SQLUSMALLINT as SQLPOINTER,
        0,
        ptr::null_mut(),
    );
    assert_eq!(behavior, SQL_CB_PRESERVE);
}
