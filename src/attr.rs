//! Environment, connection, statement and descriptor attributes, and
//! `SQLGetInfo`.

use crate::buffer;
use crate::cursor::{self, CursorType};
use crate::error::{DriverError, Result};
use crate::execute;
use crate::handle::*;
use crate::types::*;

pub const DRIVER_NAME: &str = "libwhisker.so";
pub const DRIVER_VERSION: &str = "01.00.0000";

pub fn set_env_attr(env: &EnvCell, attribute: SQLINTEGER, value: SQLPOINTER) -> Result<Outcome> {
    match attribute {
        SQL_ATTR_ODBC_VERSION => {
            *env.odbc_version.lock() = value as usize as SQLINTEGER;
        }
        other => tracing::debug!(attribute = other, "ignoring environment attribute"),
    }
    Ok(Outcome::Success)
}

/// The statement that puts a session at `level`.
pub fn isolation_statement(level: SQLUINTEGER) -> Result<String> {
    let name = match level {
        SQL_TXN_SERIALIZABLE => "SERIALIZABLE",
        SQL_TXN_REPEATABLE_READ => "REPEATABLE READ",
        SQL_TXN_READ_COMMITTED => "READ COMMITTED",
        SQL_TXN_READ_UNCOMMITTED => "READ UNCOMMITTED",
        other => {
            return Err(DriverError::InvalidAttributeValue(format!(
                "transaction isolation level {other}"
            )))
        }
    };
    Ok(format!("SET SESSION TRANSACTION ISOLATION LEVEL {name}"))
}

/// # Safety
/// String-valued attributes read `len` bytes (or up to NUL) from `value`.
pub unsafe fn set_connect_attr(
    cell: &ConnectionCell,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
    len: SQLINTEGER,
) -> Result<Outcome> {
    let mut conn = cell.inner.lock();
    let number = value as usize;
    match attribute {
        SQL_ATTR_LOGIN_TIMEOUT => conn.login_timeout = number as SQLUINTEGER,
        SQL_ATTR_CONNECTION_TIMEOUT => conn.connection_timeout = number as SQLUINTEGER,
        SQL_ATTR_TXN_ISOLATION => {
            let level = number as SQLUINTEGER;
            let stmt = isolation_statement(level)?;
            if conn.is_connected() {
                execute::run_internal(&mut conn, stmt.as_bytes())?;
            }
            conn.isolation = Some(level);
        }
        SQL_ATTR_AUTOCOMMIT => {
            let on = number != SQL_AUTOCOMMIT_OFF;
            if conn.is_connected() && on != conn.autocommit {
                let stmt: &[u8] = if on { b"SET AUTOCOMMIT=1" } else { b"SET AUTOCOMMIT=0" };
                execute::run_internal(&mut conn, stmt)?;
            }
            conn.autocommit = on;
        }
        SQL_ATTR_CURRENT_CATALOG => {
            let raw = buffer::read_bytes(value as *const SQLCHAR, len as SQLLEN);
            let name = conn.charset.decode(&raw).into_owned();
            if conn.is_connected() {
                let stmt = format!("USE `{}`", name.replace('`', "``"));
                execute::run_internal(&mut conn, stmt.as_bytes())?;
            }
            conn.catalog = Some(name);
        }
        SQL_ATTR_ENLIST_IN_DTC => {
            return Err(DriverError::OptionalFeature("distributed transactions"));
        }
        SQL_ATTR_ACCESS_MODE | SQL_ATTR_TRACE | SQL_ATTR_TRACEFILE | SQL_ATTR_ODBC_CURSORS
        | SQL_ATTR_QUIET_MODE | SQL_ATTR_PACKET_SIZE => {}
        other => tracing::debug!(attribute = other, "ignoring connection attribute"),
    }
    Ok(Outcome::Success)
}

/// # Safety
/// `value` must be large enough for the attribute's type.
pub unsafe fn get_connect_attr(
    cell: &ConnectionCell,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
    buffer_length: SQLINTEGER,
    out_len: *mut SQLINTEGER,
) -> Result<Outcome> {
    let conn = cell.inner.lock();
    let number: SQLUINTEGER = match attribute {
        SQL_ATTR_LOGIN_TIMEOUT => conn.login_timeout,
        SQL_ATTR_CONNECTION_TIMEOUT => conn.connection_timeout,
        SQL_ATTR_TXN_ISOLATION => conn.isolation.unwrap_or(SQL_TXN_REPEATABLE_READ),
        SQL_ATTR_AUTOCOMMIT => conn.autocommit as SQLUINTEGER,
        SQL_ATTR_CONNECTION_DEAD if conn.is_connected() => SQL_CD_FALSE,
        SQL_ATTR_CONNECTION_DEAD => SQL_CD_TRUE,
        SQL_ATTR_CURRENT_CATALOG => {
            if buffer_length < 0 {
                return Err(DriverError::InvalidBufferLength);
            }
            let name = conn.catalog.as_deref().unwrap_or_default();
            let encoded = conn.charset.encode(name);
            buffer::write_len_i32(out_len, encoded.len());
            if buffer::write_bytes(&encoded, value as *mut SQLCHAR, buffer_length as usize) {
                return Ok(Outcome::info(DriverError::DataTruncated));
            }
            return Ok(Outcome::Success);
        }
        SQL_ATTR_ODBC_CURSORS | SQL_ATTR_ACCESS_MODE | SQL_ATTR_TRACE | SQL_ATTR_QUIET_MODE
        | SQL_ATTR_PACKET_SIZE => 0,
        _ => return Err(DriverError::OptionalFeature("connection attribute")),
    };
    if !value.is_null() {
        (value as *mut SQLUINTEGER).write_unaligned(number);
    }
    buffer::write_len_i32(out_len, std::mem::size_of::<SQLUINTEGER>());
    Ok(Outcome::Success)
}

/// `SQLSetStmtAttr`. Unsupported cursor types are replaced through the
/// cursor table and reported with 01S02.
pub fn set_stmt_attr(
    conn_cell: &ConnectionCell,
    stmt: &mut Statement,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
) -> Result<Outcome> {
    let number = value as usize as SQLULEN;
    match attribute {
        SQL_ATTR_CURSOR_TYPE => {
            let requested = CursorType::from_attr(number).ok_or_else(|| {
                DriverError::InvalidAttributeValue(format!("cursor type {number}"))
            })?;
            let options = conn_cell.inner.lock().options;
            let granted = cursor::effective(options, requested);
            stmt.cursor_type = granted;
            if granted != requested {
                tracing::debug!(?requested, ?granted, "cursor type substituted");
                return Ok(Outcome::info(DriverError::OptionValueChanged(format!(
                    "cursor type {requested:?} replaced by {granted:?}"
                ))));
            }
        }
        SQL_ATTR_MAX_ROWS => stmt.max_rows = number,
        SQL_ATTR_QUERY_TIMEOUT => stmt.query_timeout = number,
        SQL_ATTR_CONCURRENCY if number != SQL_CONCUR_READ_ONLY => {
            return Ok(Outcome::info(DriverError::OptionValueChanged(
                "only read-only concurrency is supported".to_string(),
            )));
        }
        SQL_ATTR_ROW_ARRAY_SIZE | SQL_ATTR_PARAMSET_SIZE if number != 1 => {
            return Ok(Outcome::info(DriverError::OptionValueChanged(
                "array size fixed at 1".to_string(),
            )));
        }
        SQL_ATTR_APP_PARAM_DESC | SQL_ATTR_APP_ROW_DESC => {
            return Err(DriverError::OptionalFeature("explicitly allocated descriptors"));
        }
        SQL_ATTR_IMP_PARAM_DESC | SQL_ATTR_IMP_ROW_DESC => {
            return Err(DriverError::InvalidAttributeValue(
                "implementation descriptors are read-only".to_string(),
            ));
        }
        _ => {}
    }
    Ok(Outcome::Success)
}

/// # Safety
/// `value` must be large enough for the attribute's type.
pub unsafe fn get_stmt_attr(
    handle: &StmtHandle,
    stmt: &Statement,
    attribute: SQLINTEGER,
    value: SQLPOINTER,
    out_len: *mut SQLINTEGER,
) -> Result<Outcome> {
    let number: SQLULEN = match attribute {
        SQL_ATTR_APP_PARAM_DESC | SQL_ATTR_APP_ROW_DESC => {
            let h: &Handle = if attribute == SQL_ATTR_APP_PARAM_DESC {
                &handle.apd
            } else {
                &handle.ard
            };
            if !value.is_null() {
                (value as *mut SQLHANDLE).write_unaligned(h as *const Handle as SQLHANDLE);
            }
            buffer::write_len_i32(out_len, std::mem::size_of::<SQLHANDLE>());
            return Ok(Outcome::Success);
        }
        SQL_ATTR_CURSOR_TYPE => stmt.cursor_type.as_attr(),
        SQL_ATTR_MAX_ROWS => stmt.max_rows,
        SQL_ATTR_QUERY_TIMEOUT => stmt.query_timeout,
        SQL_ATTR_CONCURRENCY => SQL_CONCUR_READ_ONLY,
        SQL_ATTR_ROW_ARRAY_SIZE | SQL_ATTR_PARAMSET_SIZE => 1,
        SQL_ATTR_NOSCAN | SQL_ATTR_MAX_LENGTH => 0,
        _ => return Err(DriverError::OptionalFeature("statement attribute")),
    };
    if !value.is_null() {
        (value as *mut SQLULEN).write_unaligned(number);
    }
    buffer::write_len_i32(out_len, std::mem::size_of::<SQLULEN>());
    Ok(Outcome::Success)
}

/// # Safety
/// Pointer-valued fields are stored as given and dereferenced at execute
/// or fetch time.
pub unsafe fn set_desc_field(
    desc: &SharedDescriptor,
    record: SQLSMALLINT,
    field: SQLSMALLINT,
    value: SQLPOINTER,
) -> Result<Outcome> {
    let mut desc = desc.lock();
    let number = value as usize;
    if field == SQL_DESC_COUNT {
        if number == 0 {
            desc.clear();
        } else {
            desc.record_mut(number)?;
            while desc.count() > number {
                let last = desc.count();
                desc.unbind(last);
            }
        }
        return Ok(Outcome::Success);
    }
    if field == SQL_DESC_ALLOC_TYPE {
        return Err(DriverError::InvalidAttributeValue(
            "SQL_DESC_ALLOC_TYPE is read-only".to_string(),
        ));
    }
    let index = usize::try_from(record).map_err(|_| DriverError::InvalidDescriptorIndex(0))?;
    let rec = desc.record_mut(index)?;
    match field {
        SQL_DESC_TYPE | SQL_DESC_CONCISE_TYPE => rec.c_type = number as SQLSMALLINT,
        SQL_DESC_DATA_PTR => rec.data_ptr = value,
        SQL_DESC_INDICATOR_PTR => rec.indicator_ptr = value as *mut SQLLEN,
        SQL_DESC_OCTET_LENGTH_PTR => rec.octet_length_ptr = value as *mut SQLLEN,
        SQL_DESC_OCTET_LENGTH => rec.buffer_length = value as SQLLEN,
        SQL_DESC_LENGTH | SQL_DESC_PRECISION => rec.column_size = number,
        SQL_DESC_SCALE => rec.decimal_digits = number as SQLSMALLINT,
        SQL_DESC_PARAMETER_TYPE => rec.io_type = number as SQLSMALLINT,
        _ => return Err(DriverError::OptionalFeature("descriptor field")),
    }
    Ok(Outcome::Success)
}

/// # Safety
/// `value` must be large enough for the field's type.
pub unsafe fn get_desc_field(
    desc: &SharedDescriptor,
    record: SQLSMALLINT,
    field: SQLSMALLINT,
    value: SQLPOINTER,
    out_len: *mut SQLINTEGER,
) -> Result<Outcome> {
    unsafe fn put<T>(value: SQLPOINTER, out_len: *mut SQLINTEGER, v: T) -> Result<Outcome> {
        if !value.is_null() {
            (value as *mut T).write_unaligned(v);
        }
        buffer::write_len_i32(out_len, std::mem::size_of::<T>());
        Ok(Outcome::Success)
    }

    let desc = desc.lock();
    match field {
        SQL_DESC_COUNT => return put(value, out_len, desc.count() as SQLSMALLINT),
        SQL_DESC_ALLOC_TYPE => return put(value, out_len, SQL_DESC_ALLOC_AUTO),
        _ => {}
    }
    let index = usize::try_from(record).map_err(|_| DriverError::InvalidDescriptorIndex(0))?;
    if index == 0 {
        return Err(DriverError::InvalidDescriptorIndex(0));
    }
    let Some(rec) = desc.record(index) else {
        return Ok(Outcome::NoData);
    };
    match field {
        SQL_DESC_TYPE | SQL_DESC_CONCISE_TYPE => put(value, out_len, rec.c_type),
        SQL_DESC_DATA_PTR => put(value, out_len, rec.data_ptr),
        SQL_DESC_INDICATOR_PTR => put(value, out_len, rec.indicator_ptr),
        SQL_DESC_OCTET_LENGTH_PTR => put(value, out_len, rec.octet_length_ptr),
        SQL_DESC_OCTET_LENGTH => put(value, out_len, rec.buffer_length),
        SQL_DESC_LENGTH | SQL_DESC_PRECISION => put(value, out_len, rec.column_size),
        SQL_DESC_SCALE => put(value, out_len, rec.decimal_digits),
        SQL_DESC_PARAMETER_TYPE => put(value, out_len, rec.io_type),
        _ => Err(DriverError::OptionalFeature("descriptor field")),
    }
}

/// # Safety
/// `info_value` must hold `buffer_length` bytes for string types, or the
/// fixed size of numeric ones.
pub unsafe fn get_info(
    cell: &ConnectionCell,
    info_type: SQLUSMALLINT,
    info_value: SQLPOINTER,
    buffer_length: SQLSMALLINT,
    string_length: *mut SQLSMALLINT,
) -> Result<Outcome> {
    let write_str = |s: &str| -> Result<Outcome> {
        if buffer_length < 0 {
            return Err(DriverError::InvalidBufferLength);
        }
        buffer::write_len_i16(string_length, s.len());
        if buffer::write_bytes(s.as_bytes(), info_value as *mut SQLCHAR, buffer_length as usize) {
            return Ok(Outcome::info(DriverError::DataTruncated));
        }
        Ok(Outcome::Success)
    };
    let write_u16 = |v: SQLUSMALLINT| -> Result<Outcome> {
        if !info_value.is_null() {
            (info_value as *mut SQLUSMALLINT).write_unaligned(v);
        }
        buffer::write_len_i16(string_length, 2);
        Ok(Outcome::Success)
    };
    let write_u32 = |v: SQLUINTEGER| -> Result<Outcome> {
        if !info_value.is_null() {
            (info_value as *mut SQLUINTEGER).write_unaligned(v);
        }
        buffer::write_len_i16(string_length, 4);
        Ok(Outcome::Success)
    };

    let conn = cell.inner.lock();
    let attr = |key: &str| conn.attrs.get(key).unwrap_or_default().to_string();
    match info_type {
        SQL_DRIVER_NAME => write_str(DRIVER_NAME),
        SQL_DRIVER_VER => write_str(DRIVER_VERSION),
        SQL_DRIVER_ODBC_VER => write_str("03.80"),
        SQL_DBMS_NAME => write_str("MySQL"),
        SQL_DBMS_VER => {
            let version = conn.session.as_ref().map(|s| s.info().version.clone()).unwrap_or_default();
            write_str(&version)
        }
        SQL_DATA_SOURCE_NAME => write_str(&attr("DSN")),
        SQL_SERVER_NAME => write_str(&attr("SERVER")),
        SQL_USER_NAME => write_str(&attr("UID")),
        SQL_DATABASE_NAME => write_str(conn.catalog.as_deref().unwrap_or_default()),
        SQL_IDENTIFIER_QUOTE_CHAR => write_str("`"),
        SQL_NEED_LONG_DATA_LEN => write_str("N"),
        SQL_MULT_RESULT_SETS => write_str("N"),
        SQL_SCROLL_OPTIONS => write_u32(cursor::scroll_options(conn.options)),
        SQL_GETDATA_EXTENSIONS => write_u32(SQL_GD_ANY_COLUMN | SQL_GD_ANY_ORDER | SQL_GD_BOUND),
        SQL_TXN_ISOLATION_OPTION => write_u32(
            SQL_TXN_READ_UNCOMMITTED
                | SQL_TXN_READ_COMMITTED
                | SQL_TXN_REPEATABLE_READ
                | SQL_TXN_SERIALIZABLE,
        ),
        SQL_DEFAULT_TXN_ISOLATION => write_u32(SQL_TXN_REPEATABLE_READ),
        SQL_CURSOR_COMMIT_BEHAVIOR | SQL_CURSOR_ROLLBACK_BEHAVIOR => write_u16(SQL_CB_PRESERVE),
        SQL_TXN_CAPABLE => write_u16(SQL_TC_DDL_COMMIT),
        _ => Err(DriverError::OptionalFeature("information type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::ptr;
    use std::sync::Arc;

    #[test]
    fn isolation_levels_map_to_server_names() {
        assert!(isolation_statement(SQL_TXN_SERIALIZABLE).unwrap().ends_with("SERIALIZABLE"));
        assert!(isolation_statement(SQL_TXN_READ_UNCOMMITTED)
            .unwrap()
            .ends_with("READ UNCOMMITTED"));
        let err = isolation_statement(999).unwrap_err();
        assert_eq!(err.sqlstate(), "HY024");
    }

    #[test]
    fn indicator_pointer_is_set_independently() {
        let desc: SharedDescriptor = Arc::new(Mutex::new(Descriptor::new(DescKind::Apd)));
        let mut len: SQLLEN = 19283;
        let mut ind: SQLLEN = SQL_NULL_DATA;
        {
            let mut d = desc.lock();
            let rec = d.record_mut(1).unwrap();
            rec.octet_length_ptr = &mut len;
            rec.indicator_ptr = &mut len;
        }
        unsafe {
            set_desc_field(&desc, 1, SQL_DESC_INDICATOR_PTR, &mut ind as *mut SQLLEN as SQLPOINTER)
                .unwrap();
        }
        let d = desc.lock();
        let rec = d.record(1).unwrap();
        assert_eq!(rec.indicator_ptr, &mut ind as *mut SQLLEN);
        assert_eq!(rec.octet_length_ptr, &mut len as *mut SQLLEN);
    }

    #[test]
    fn count_field_grows_and_shrinks() {
        let desc: SharedDescriptor = Arc::new(Mutex::new(Descriptor::new(DescKind::Ard)));
        unsafe {
            set_desc_field(&desc, 0, SQL_DESC_COUNT, 3usize as SQLPOINTER).unwrap();
            assert_eq!(desc.lock().count(), 3);
            set_desc_field(&desc, 0, SQL_DESC_COUNT, ptr::null_mut()).unwrap();
        }
        assert_eq!(desc.lock().count(), 0);

        let mut count: SQLSMALLINT = -1;
        unsafe {
            get_desc_field(&desc, 0, SQL_DESC_COUNT, &mut count as *mut _ as SQLPOINTER, ptr::null_mut())
                .unwrap();
        }
        assert_eq!(count, 0);
    }
}
