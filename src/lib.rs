#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

mod attr;
mod buffer;
mod catalog;
mod charset;
mod connect;
mod connstr;
mod cursor;
mod diagnostics;
mod error;
mod execute;
mod fetch;
mod handle;
mod logging;
mod params;
pub mod protocol;
mod runtime;
mod sql;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use connstr::{ConnectionAttributes, OptionFlags};
pub use error::DriverError;
pub use params::SqlNumericStruct;
pub use protocol::{
    register_dsn_store, register_protocol, DsnStore, MemoryDsnStore, Protocol, ServerError,
    Session,
};
pub use types::*;

use std::sync::Arc;

use error::Result;
use handle::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Resolves a statement handle and runs `f` with the statement locked.
/// Diagnostics of the previous call are discarded first.
unsafe fn with_stmt(
    hstmt: SQLHSTMT,
    f: impl FnOnce(&StmtHandle, &ConnectionCell, &StatementCell, &mut Statement) -> Result<Outcome>,
) -> SQLRETURN {
    let Some(handle) = Handle::from_raw(hstmt) else {
        return SQL_INVALID_HANDLE;
    };
    let Some(stmt_handle) = handle.as_stmt() else {
        return SQL_INVALID_HANDLE;
    };
    handle.diagnostics.lock().clear();
    let result = stmt_handle.resolve().and_then(|(conn, cell)| {
        let mut stmt = cell.inner.lock();
        f(stmt_handle, &conn, &cell, &mut stmt)
    });
    handle.finish(result)
}

unsafe fn with_dbc(hdbc: SQLHDBC, f: impl FnOnce(&Arc<ConnectionCell>) -> Result<Outcome>) -> SQLRETURN {
    let Some(handle) = Handle::from_raw(hdbc) else {
        return SQL_INVALID_HANDLE;
    };
    let Some(conn) = handle.as_dbc() else {
        return SQL_INVALID_HANDLE;
    };
    handle.diagnostics.lock().clear();
    handle.finish(f(conn))
}

unsafe fn with_env(henv: SQLHENV, f: impl FnOnce(&Arc<EnvCell>) -> Result<Outcome>) -> SQLRETURN {
    let Some(handle) = Handle::from_raw(henv) else {
        return SQL_INVALID_HANDLE;
    };
    let Some(env) = handle.as_env() else {
        return SQL_INVALID_HANDLE;
    };
    handle.diagnostics.lock().clear();
    handle.finish(f(env))
}

unsafe fn with_desc(hdesc: SQLHDESC, f: impl FnOnce(&SharedDescriptor) -> Result<Outcome>) -> SQLRETURN {
    let Some(handle) = Handle::from_raw(hdesc) else {
        return SQL_INVALID_HANDLE;
    };
    let Some(desc) = handle.as_desc() else {
        return SQL_INVALID_HANDLE;
    };
    handle.diagnostics.lock().clear();
    handle.finish(f(desc))
}

/// An optional ANSI argument; a null pointer means "not given".
unsafe fn opt_bytes(ptr: *const SQLCHAR, len: SQLSMALLINT) -> Option<Vec<u8>> {
    (!ptr.is_null()).then(|| buffer::read_bytes(ptr, len as SQLLEN))
}

unsafe fn opt_string(ptr: *const SQLCHAR, len: SQLSMALLINT) -> Option<String> {
    opt_bytes(ptr, len).map(|b| String::from_utf8_lossy(&b).into_owned())
}

/// Points an environment at a protocol and DSN store other than the
/// process-wide ones. Connections allocated afterwards use them.
pub unsafe fn configure_environment(
    henv: SQLHENV,
    protocol: Arc<dyn Protocol>,
    dsn_store: Arc<dyn DsnStore>,
) -> SQLRETURN {
    with_env(henv, |env| {
        *env.protocol.write() = Some(protocol);
        *env.dsn_store.write() = dsn_store;
        Ok(Outcome::Success)
    })
}

// ── Handle Management ───────────────────────────────────────────────

unsafe fn alloc_handle_impl(
    handle_type: SQLSMALLINT,
    input_handle: SQLHANDLE,
    output_handle: *mut SQLHANDLE,
) -> SQLRETURN {
    if output_handle.is_null() {
        return SQL_ERROR;
    }
    *output_handle = std::ptr::null_mut();

    if handle_type == SQL_HANDLE_ENV {
        logging::init();
        tracing::debug!("allocating environment");
        *output_handle = Handle::new(HandleKind::Env(Arc::new(EnvCell::new()))).into_raw();
        return SQL_SUCCESS;
    }

    let Some(parent) = Handle::from_raw(input_handle) else {
        return SQL_INVALID_HANDLE;
    };
    parent.diagnostics.lock().clear();
    match (handle_type, &parent.kind) {
        (SQL_HANDLE_DBC, HandleKind::Env(env)) => {
            let conn = ConnectionCell::new(Arc::clone(env));
            *output_handle = Handle::new(HandleKind::Dbc(Arc::new(conn))).into_raw();
            SQL_SUCCESS
        }
        (SQL_HANDLE_STMT, HandleKind::Dbc(conn)) => {
            let result = alloc_statement(conn).map(|stmt| {
                *output_handle = stmt.into_raw();
                Outcome::Success
            });
            parent.finish(result)
        }
        (SQL_HANDLE_DESC, HandleKind::Dbc(_)) => parent.finish(Err(DriverError::OptionalFeature(
            "explicitly allocated descriptors",
        ))),
        _ => SQL_INVALID_HANDLE,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLAllocHandle(
    handle_type: SQLSMALLINT,
    input_handle: SQLHANDLE,
    output_handle: *mut SQLHANDLE,
) -> SQLRETURN {
    unsafe { alloc_handle_impl(handle_type, input_handle, output_handle) }
}

unsafe fn free_statement(hstmt: SQLHSTMT) -> SQLRETURN {
    let Some(handle) = Handle::from_raw(hstmt) else {
        return SQL_INVALID_HANDLE;
    };
    let Some(stmt_handle) = handle.as_stmt() else {
        return SQL_INVALID_HANDLE;
    };
    // A stale statement has nothing left on the connection; only the handle
    // itself is released.
    if let Ok((conn, cell)) = stmt_handle.resolve() {
        {
            let mut stmt = cell.inner.lock();
            if let Err(err) = execute::close_cursor(&conn, &mut stmt) {
                tracing::warn!(error = %err, "closing cursor of a freed statement");
            }
        }
        conn.statements.lock().remove(stmt_handle.key);
    }
    Handle::free_raw(hstmt);
    SQL_SUCCESS
}

unsafe fn free_handle_impl(handle_type: SQLSMALLINT, raw: SQLHANDLE) -> SQLRETURN {
    let Some(handle) = Handle::from_raw(raw) else {
        return SQL_INVALID_HANDLE;
    };
    if handle.handle_type() != handle_type {
        return SQL_INVALID_HANDLE;
    }
    match &handle.kind {
        HandleKind::Env(_) => {
            Handle::free_raw(raw);
            SQL_SUCCESS
        }
        HandleKind::Dbc(conn) => {
            if conn.inner.lock().is_connected() {
                handle.diagnostics.lock().clear();
                return handle.finish(Err(DriverError::FunctionSequence("connection is still open")));
            }
            Handle::free_raw(raw);
            SQL_SUCCESS
        }
        HandleKind::Stmt(_) => free_statement(raw),
        // Implicit descriptors live and die with their statement.
        HandleKind::Desc(_) => handle.finish(Err(DriverError::FunctionSequence(
            "implicit descriptors cannot be freed",
        ))),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLFreeHandle(handle_type: SQLSMALLINT, handle: SQLHANDLE) -> SQLRETURN {
    unsafe { free_handle_impl(handle_type, handle) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLFreeStmt(hstmt: SQLHSTMT, option: SQLUSMALLINT) -> SQLRETURN {
    if option == SQL_DROP {
        return unsafe { free_handle_impl(SQL_HANDLE_STMT, hstmt) };
    }
    unsafe {
        with_stmt(hstmt, |_, conn, _, stmt| {
            match option {
                SQL_CLOSE => execute::close_cursor(conn, stmt)?,
                SQL_UNBIND => stmt.ard.lock().clear(),
                SQL_RESET_PARAMS => stmt.apd.lock().clear(),
                _ => return Err(DriverError::OptionalFeature("SQLFreeStmt option")),
            }
            Ok(Outcome::Success)
        })
    }
}

// ── ODBC 2.x allocation ─────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLAllocEnv(phenv: *mut SQLHENV) -> SQLRETURN {
    unsafe { alloc_handle_impl(SQL_HANDLE_ENV, std::ptr::null_mut(), phenv) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLAllocConnect(henv: SQLHENV, phdbc: *mut SQLHDBC) -> SQLRETURN {
    unsafe { alloc_handle_impl(SQL_HANDLE_DBC, henv, phdbc) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLAllocStmt(hdbc: SQLHDBC, phstmt: *mut SQLHSTMT) -> SQLRETURN {
    unsafe { alloc_handle_impl(SQL_HANDLE_STMT, hdbc, phstmt) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLFreeEnv(henv: SQLHENV) -> SQLRETURN {
    unsafe { free_handle_impl(SQL_HANDLE_ENV, henv) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLFreeConnect(hdbc: SQLHDBC) -> SQLRETURN {
    unsafe { free_handle_impl(SQL_HANDLE_DBC, hdbc) }
}

// ── Environment ─────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLSetEnvAttr(
    henv: SQLHENV,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
    _string_length: SQLINTEGER,
) -> SQLRETURN {
    unsafe { with_env(henv, |env| attr::set_env_attr(env, attribute, value)) }
}

// ── Connection ──────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLConnect(
    hdbc: SQLHDBC,
    server_name: *const SQLCHAR,
    name_length1: SQLSMALLINT,
    user_name: *const SQLCHAR,
    name_length2: SQLSMALLINT,
    authentication: *const SQLCHAR,
    name_length3: SQLSMALLINT,
) -> SQLRETURN {
    unsafe {
        with_dbc(hdbc, |conn| {
            let dsn = opt_string(server_name, name_length1).unwrap_or_default();
            let uid = opt_string(user_name, name_length2);
            let pwd = opt_string(authentication, name_length3);
            connect::connect_dsn(conn, &dsn, uid, pwd)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLDriverConnect(
    hdbc: SQLHDBC,
    _hwnd: SQLHWND,
    conn_str_in: *const SQLCHAR,
    conn_str_in_len: SQLSMALLINT,
    conn_str_out: *mut SQLCHAR,
    conn_str_out_max: SQLSMALLINT,
    conn_str_out_len: *mut SQLSMALLINT,
    _driver_completion: SQLUSMALLINT,
) -> SQLRETURN {
    unsafe {
        with_dbc(hdbc, |conn| {
            let raw = buffer::read_bytes(conn_str_in, conn_str_in_len as SQLLEN);
            let conn_str = String::from_utf8_lossy(&raw);
            connect::driver_connect(conn, &conn_str, conn_str_out, conn_str_out_max, conn_str_out_len)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLDisconnect(hdbc: SQLHDBC) -> SQLRETURN {
    unsafe { with_dbc(hdbc, |conn| connect::disconnect(conn)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLSetConnectAttr(
    hdbc: SQLHDBC,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
    string_length: SQLINTEGER,
) -> SQLRETURN {
    unsafe { with_dbc(hdbc, |conn| attr::set_connect_attr(conn, attribute, value, string_length)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLGetConnectAttr(
    hdbc: SQLHDBC,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
    buffer_length: SQLINTEGER,
    string_length: *mut SQLINTEGER,
) -> SQLRETURN {
    unsafe {
        with_dbc(hdbc, |conn| {
            attr::get_connect_attr(conn, attribute, value, buffer_length, string_length)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLGetInfo(
    hdbc: SQLHDBC,
    info_type: SQLUSMALLINT,
    info_value: SQLPOINTER,
    buffer_length: SQLSMALLINT,
    string_length: *mut SQLSMALLINT,
) -> SQLRETURN {
    unsafe {
        with_dbc(hdbc, |conn| {
            attr::get_info(conn, info_type, info_value, buffer_length, string_length)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLNativeSql(
    hdbc: SQLHDBC,
    in_statement: *const SQLCHAR,
    text_length1: SQLINTEGER,
    out_statement: *mut SQLCHAR,
    buffer_length: SQLINTEGER,
    text_length2: *mut SQLINTEGER,
) -> SQLRETURN {
    unsafe {
        with_dbc(hdbc, |conn| {
            let text = buffer::read_bytes(in_statement, text_length1 as SQLLEN);
            execute::native_sql(conn, &text, out_statement, buffer_length, text_length2)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLEndTran(
    handle_type: SQLSMALLINT,
    handle: SQLHANDLE,
    completion_type: SQLSMALLINT,
) -> SQLRETURN {
    match handle_type {
        SQL_HANDLE_DBC => unsafe { with_dbc(handle, |conn| connect::end_tran(conn, completion_type)) },
        SQL_HANDLE_ENV => unsafe {
            with_env(handle, |_| {
                Err(DriverError::OptionalFeature("environment-wide transactions"))
            })
        },
        _ => SQL_INVALID_HANDLE,
    }
}

// ── Statement attributes ────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLSetStmtAttr(
    hstmt: SQLHSTMT,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
    _string_length: SQLINTEGER,
) -> SQLRETURN {
    unsafe { with_stmt(hstmt, |_, conn, _, stmt| attr::set_stmt_attr(conn, stmt, attribute, value)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLGetStmtAttr(
    hstmt: SQLHSTMT,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
    _buffer_length: SQLINTEGER,
    string_length: *mut SQLINTEGER,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |handle, _, _, stmt| {
            attr::get_stmt_attr(handle, stmt, attribute, value, string_length)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLSetStmtOption(hstmt: SQLHSTMT, option: SQLUSMALLINT, value: SQLULEN) -> SQLRETURN {
    SQLSetStmtAttr(hstmt, option as SQLINTEGER, value as SQLPOINTER, 0)
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLGetStmtOption(hstmt: SQLHSTMT, option: SQLUSMALLINT, value: SQLPOINTER) -> SQLRETURN {
    SQLGetStmtAttr(hstmt, option as SQLINTEGER, value, 0, std::ptr::null_mut())
}

// ── Descriptors ─────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLSetDescField(
    hdesc: SQLHDESC,
    rec_number: SQLSMALLINT,
    field_identifier: SQLSMALLINT,
    value: SQLPOINTER,
    _buffer_length: SQLINTEGER,
) -> SQLRETURN {
    unsafe { with_desc(hdesc, |desc| attr::set_desc_field(desc, rec_number, field_identifier, value)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLGetDescField(
    hdesc: SQLHDESC,
    rec_number: SQLSMALLINT,
    field_identifier: SQLSMALLINT,
    value: SQLPOINTER,
    _buffer_length: SQLINTEGER,
    string_length: *mut SQLINTEGER,
) -> SQLRETURN {
    unsafe {
        with_desc(hdesc, |desc| {
            attr::get_desc_field(desc, rec_number, field_identifier, value, string_length)
        })
    }
}

// ── Execution ───────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLPrepare(
    hstmt: SQLHSTMT,
    statement_text: *const SQLCHAR,
    text_length: SQLINTEGER,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, conn, _, stmt| {
            let text = buffer::read_bytes(statement_text, text_length as SQLLEN);
            execute::prepare(conn, stmt, text)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLBindParameter(
    hstmt: SQLHSTMT,
    param_number: SQLUSMALLINT,
    input_output_type: SQLSMALLINT,
    value_type: SQLSMALLINT,
    parameter_type: SQLSMALLINT,
    column_size: SQLULEN,
    decimal_digits: SQLSMALLINT,
    parameter_value: SQLPOINTER,
    buffer_length: SQLLEN,
    str_len_or_ind: *mut SQLLEN,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, _, _, stmt| {
            params::bind_parameter(
                &mut stmt.apd.lock(),
                param_number,
                input_output_type,
                value_type,
                parameter_type,
                column_size,
                decimal_digits,
                parameter_value,
                buffer_length,
                str_len_or_ind,
            )?;
            Ok(Outcome::Success)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLNumParams(hstmt: SQLHSTMT, param_count: *mut SQLSMALLINT) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, _, _, stmt| {
            let n = execute::num_params(stmt)?;
            if !param_count.is_null() {
                *param_count = n as SQLSMALLINT;
            }
            Ok(Outcome::Success)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLExecute(hstmt: SQLHSTMT) -> SQLRETURN {
    unsafe { with_stmt(hstmt, |_, conn, cell, stmt| execute::execute(conn, cell, stmt)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLExecDirect(
    hstmt: SQLHSTMT,
    statement_text: *const SQLCHAR,
    text_length: SQLINTEGER,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, conn, cell, stmt| {
            let text = buffer::read_bytes(statement_text, text_length as SQLLEN);
            execute::exec_direct(conn, cell, stmt, text)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLExecDirectW(
    hstmt: SQLHSTMT,
    statement_text: *const SQLWCHAR,
    text_length: SQLINTEGER,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, conn, cell, stmt| {
            let text = buffer::read_wide(statement_text, text_length as SQLLEN);
            let charset = conn.inner.lock().charset;
            let encoded = charset.encode(&text).into_owned();
            execute::exec_direct(conn, cell, stmt, encoded)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLParamData(hstmt: SQLHSTMT, value: *mut SQLPOINTER) -> SQLRETURN {
    unsafe { with_stmt(hstmt, |_, conn, cell, stmt| execute::param_data(conn, cell, stmt, value)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLPutData(hstmt: SQLHSTMT, data: SQLPOINTER, str_len_or_ind: SQLLEN) -> SQLRETURN {
    unsafe { with_stmt(hstmt, |_, _, _, stmt| execute::put_data(stmt, data, str_len_or_ind)) }
}

/// Never takes the statement lock before firing, so it can interrupt an
/// execution blocked on another thread.
#[unsafe(no_mangle)]
pub extern "C" fn SQLCancel(hstmt: SQLHSTMT) -> SQLRETURN {
    let Some(handle) = (unsafe { Handle::from_raw(hstmt) }) else {
        return SQL_INVALID_HANDLE;
    };
    let Some(stmt_handle) = handle.as_stmt() else {
        return SQL_INVALID_HANDLE;
    };
    handle.diagnostics.lock().clear();
    let result = stmt_handle.resolve().and_then(|(_, cell)| execute::cancel(&cell));
    handle.finish(result)
}

// ── Results ─────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLNumResultCols(hstmt: SQLHSTMT, column_count: *mut SQLSMALLINT) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, _, _, stmt| {
            if !column_count.is_null() {
                *column_count = fetch::num_result_cols(stmt) as SQLSMALLINT;
            }
            Ok(Outcome::Success)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLDescribeCol(
    hstmt: SQLHSTMT,
    column_number: SQLUSMALLINT,
    column_name: *mut SQLCHAR,
    buffer_length: SQLSMALLINT,
    name_length: *mut SQLSMALLINT,
    data_type: *mut SQLSMALLINT,
    column_size: *mut SQLULEN,
    decimal_digits: *mut SQLSMALLINT,
    nullable: *mut SQLSMALLINT,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, _, _, stmt| {
            fetch::describe_col(
                stmt,
                column_number,
                column_name,
                buffer_length,
                name_length,
                data_type,
                column_size,
                decimal_digits,
                nullable,
            )
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLBindCol(
    hstmt: SQLHSTMT,
    column_number: SQLUSMALLINT,
    target_type: SQLSMALLINT,
    target_value: SQLPOINTER,
    buffer_length: SQLLEN,
    str_len_or_ind: *mut SQLLEN,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, _, _, stmt| {
            fetch::bind_col(stmt, column_number, target_type, target_value, buffer_length, str_len_or_ind)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLFetch(hstmt: SQLHSTMT) -> SQLRETURN {
    unsafe { with_stmt(hstmt, |_, conn, cell, stmt| fetch::fetch(conn, cell, stmt)) }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLFetchScroll(
    hstmt: SQLHSTMT,
    fetch_orientation: SQLSMALLINT,
    fetch_offset: SQLLEN,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, conn, cell, stmt| {
            fetch::fetch_scroll(conn, cell, stmt, fetch_orientation, fetch_offset)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLGetData(
    hstmt: SQLHSTMT,
    column_number: SQLUSMALLINT,
    target_type: SQLSMALLINT,
    target_value: SQLPOINTER,
    buffer_length: SQLLEN,
    str_len_or_ind: *mut SQLLEN,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, _, _, stmt| {
            fetch::get_data(stmt, column_number, target_type, target_value, buffer_length, str_len_or_ind)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLRowCount(hstmt: SQLHSTMT, row_count: *mut SQLLEN) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, _, _, stmt| {
            if !row_count.is_null() {
                *row_count = fetch::row_count(stmt);
            }
            Ok(Outcome::Success)
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn SQLCloseCursor(hstmt: SQLHSTMT) -> SQLRETURN {
    unsafe { with_stmt(hstmt, |_, conn, _, stmt| execute::close_cursor_checked(conn, stmt)) }
}

// ── Catalog ─────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLColumns(
    hstmt: SQLHSTMT,
    catalog_name: *const SQLCHAR,
    name_length1: SQLSMALLINT,
    _schema_name: *const SQLCHAR,
    _name_length2: SQLSMALLINT,
    table_name: *const SQLCHAR,
    name_length3: SQLSMALLINT,
    column_name: *const SQLCHAR,
    name_length4: SQLSMALLINT,
) -> SQLRETURN {
    unsafe {
        with_stmt(hstmt, |_, conn, _, stmt| {
            let catalog = opt_bytes(catalog_name, name_length1);
            let table = opt_bytes(table_name, name_length3);
            let column = opt_bytes(column_name, name_length4);
            catalog::columns(conn, stmt, catalog.as_deref(), table.as_deref(), column.as_deref())
        })
    }
}

// ── Diagnostics ─────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn SQLGetDiagRec(
    handle_type: SQLSMALLINT,
    handle: SQLHANDLE,
    rec_number: SQLSMALLINT,
    sql_state: *mut SQLCHAR,
    native_error: *mut SQLINTEGER,
    message_text: *mut SQLCHAR,
    buffer_length: SQLSMALLINT,
    text_length: *mut SQLSMALLINT,
) -> SQLRETURN {
    let Some(handle) = (unsafe { Handle::from_raw(handle) }) else {
        return SQL_INVALID_HANDLE;
    };
    if handle.handle_type() != handle_type {
        return SQL_INVALID_HANDLE;
    }
    let diags = handle.diagnostics.lock();
    unsafe {
        diagnostics::get_diag_rec(
            &diags,
            rec_number,
            sql_state,
            native_error,
            message_text,
            buffer_length,
            text_length,
        )
    }
}
