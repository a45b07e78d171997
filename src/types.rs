//! ODBC type aliases and constants, as laid out in `sql.h` / `sqlext.h`.

#![allow(dead_code)]

use std::os::raw::c_void;

pub type SQLCHAR = u8;
pub type SQLWCHAR = u16;
pub type SQLSMALLINT = i16;
pub type SQLUSMALLINT = u16;
pub type SQLINTEGER = i32;
pub type SQLUINTEGER = u32;
pub type SQLLEN = isize;
pub type SQLULEN = usize;
pub type SQLRETURN = i16;
pub type SQLPOINTER = *mut c_void;
pub type SQLHANDLE = *mut c_void;
pub type SQLHENV = SQLHANDLE;
pub type SQLHDBC = SQLHANDLE;
pub type SQLHSTMT = SQLHANDLE;
pub type SQLHDESC = SQLHANDLE;
pub type SQLHWND = *mut c_void;

// ── Return codes ────────────────────────────────────────────────────

pub const SQL_SUCCESS: SQLRETURN = 0;
pub const SQL_SUCCESS_WITH_INFO: SQLRETURN = 1;
pub const SQL_STILL_EXECUTING: SQLRETURN = 2;
pub const SQL_NEED_DATA: SQLRETURN = 99;
pub const SQL_NO_DATA: SQLRETURN = 100;
pub const SQL_ERROR: SQLRETURN = -1;
pub const SQL_INVALID_HANDLE: SQLRETURN = -2;

pub fn sql_succeeded(rc: SQLRETURN) -> bool {
    rc == SQL_SUCCESS || rc == SQL_SUCCESS_WITH_INFO
}

// ── Lengths and indicators ──────────────────────────────────────────

pub const SQL_NTS: SQLLEN = -3;
pub const SQL_NULL_DATA: SQLLEN = -1;
pub const SQL_DATA_AT_EXEC: SQLLEN = -2;
pub const SQL_NO_TOTAL: SQLLEN = -4;
pub const SQL_LEN_DATA_AT_EXEC_OFFSET: SQLLEN = -100;

pub const fn sql_len_data_at_exec(length: SQLLEN) -> SQLLEN {
    SQL_LEN_DATA_AT_EXEC_OFFSET - length
}

pub const SQL_MAX_MESSAGE_LENGTH: SQLSMALLINT = 512;

pub const SQL_IS_POINTER: SQLINTEGER = -4;
pub const SQL_IS_UINTEGER: SQLINTEGER = -5;
pub const SQL_IS_INTEGER: SQLINTEGER = -6;
pub const SQL_IS_USMALLINT: SQLINTEGER = -7;
pub const SQL_IS_SMALLINT: SQLINTEGER = -8;

// ── Handles ─────────────────────────────────────────────────────────

pub const SQL_HANDLE_ENV: SQLSMALLINT = 1;
pub const SQL_HANDLE_DBC: SQLSMALLINT = 2;
pub const SQL_HANDLE_STMT: SQLSMALLINT = 3;
pub const SQL_HANDLE_DESC: SQLSMALLINT = 4;

pub const SQL_CLOSE: SQLUSMALLINT = 0;
pub const SQL_DROP: SQLUSMALLINT = 1;
pub const SQL_UNBIND: SQLUSMALLINT = 2;
pub const SQL_RESET_PARAMS: SQLUSMALLINT = 3;

pub const SQL_COMMIT: SQLSMALLINT = 0;
pub const SQL_ROLLBACK: SQLSMALLINT = 1;

pub const SQL_DRIVER_NOPROMPT: SQLUSMALLINT = 0;
pub const SQL_DRIVER_COMPLETE: SQLUSMALLINT = 1;
pub const SQL_DRIVER_PROMPT: SQLUSMALLINT = 2;
pub const SQL_DRIVER_COMPLETE_REQUIRED: SQLUSMALLINT = 3;

// ── Environment attributes ──────────────────────────────────────────

pub const SQL_ATTR_ODBC_VERSION: SQLINTEGER = 200;
pub const SQL_OV_ODBC2: SQLINTEGER = 2;
pub const SQL_OV_ODBC3: SQLINTEGER = 3;

// ── Connection attributes ───────────────────────────────────────────

pub const SQL_ATTR_ACCESS_MODE: SQLINTEGER = 101;
pub const SQL_ATTR_AUTOCOMMIT: SQLINTEGER = 102;
pub const SQL_ATTR_LOGIN_TIMEOUT: SQLINTEGER = 103;
pub const SQL_ATTR_TRACE: SQLINTEGER = 104;
pub const SQL_ATTR_TRACEFILE: SQLINTEGER = 105;
pub const SQL_ATTR_TXN_ISOLATION: SQLINTEGER = 108;
pub const SQL_ATTR_CURRENT_CATALOG: SQLINTEGER = 109;
pub const SQL_ATTR_ODBC_CURSORS: SQLINTEGER = 110;
pub const SQL_ATTR_QUIET_MODE: SQLINTEGER = 111;
pub const SQL_ATTR_PACKET_SIZE: SQLINTEGER = 112;
pub const SQL_ATTR_CONNECTION_TIMEOUT: SQLINTEGER = 113;
pub const SQL_ATTR_ENLIST_IN_DTC: SQLINTEGER = 1207;
pub const SQL_ATTR_CONNECTION_DEAD: SQLINTEGER = 1209;

pub const SQL_AUTOCOMMIT_OFF: SQLULEN = 0;
pub const SQL_AUTOCOMMIT_ON: SQLULEN = 1;

pub const SQL_CD_TRUE: SQLUINTEGER = 1;
pub const SQL_CD_FALSE: SQLUINTEGER = 0;

pub const SQL_TXN_READ_UNCOMMITTED: SQLUINTEGER = 1;
pub const SQL_TXN_READ_COMMITTED: SQLUINTEGER = 2;
pub const SQL_TXN_REPEATABLE_READ: SQLUINTEGER = 4;
pub const SQL_TXN_SERIALIZABLE: SQLUINTEGER = 8;

// ── Statement attributes ────────────────────────────────────────────

pub const SQL_ATTR_QUERY_TIMEOUT: SQLINTEGER = 0;
pub const SQL_ATTR_MAX_ROWS: SQLINTEGER = 1;
pub const SQL_ATTR_NOSCAN: SQLINTEGER = 2;
pub const SQL_ATTR_MAX_LENGTH: SQLINTEGER = 3;
pub const SQL_ATTR_CURSOR_TYPE: SQLINTEGER = 6;
pub const SQL_ATTR_CONCURRENCY: SQLINTEGER = 7;
pub const SQL_ATTR_ROW_ARRAY_SIZE: SQLINTEGER = 27;
pub const SQL_ATTR_PARAMSET_SIZE: SQLINTEGER = 22;
pub const SQL_ATTR_APP_ROW_DESC: SQLINTEGER = 10010;
pub const SQL_ATTR_APP_PARAM_DESC: SQLINTEGER = 10011;
pub const SQL_ATTR_IMP_ROW_DESC: SQLINTEGER = 10012;
pub const SQL_ATTR_IMP_PARAM_DESC: SQLINTEGER = 10013;

pub const SQL_CURSOR_FORWARD_ONLY: SQLULEN = 0;
pub const SQL_CURSOR_KEYSET_DRIVEN: SQLULEN = 1;
pub const SQL_CURSOR_DYNAMIC: SQLULEN = 2;
pub const SQL_CURSOR_STATIC: SQLULEN = 3;

pub const SQL_CONCUR_READ_ONLY: SQLULEN = 1;

// ── Info types ──────────────────────────────────────────────────────

pub const SQL_DATA_SOURCE_NAME: SQLUSMALLINT = 2;
pub const SQL_DRIVER_NAME: SQLUSMALLINT = 6;
pub const SQL_DRIVER_VER: SQLUSMALLINT = 7;
pub const SQL_SERVER_NAME: SQLUSMALLINT = 13;
pub const SQL_DATABASE_NAME: SQLUSMALLINT = 16;
pub const SQL_DBMS_NAME: SQLUSMALLINT = 17;
pub const SQL_DBMS_VER: SQLUSMALLINT = 18;
pub const SQL_CURSOR_COMMIT_BEHAVIOR: SQLUSMALLINT = 23;
pub const SQL_CURSOR_ROLLBACK_BEHAVIOR: SQLUSMALLINT = 24;
pub const SQL_DEFAULT_TXN_ISOLATION: SQLUSMALLINT = 26;
pub const SQL_IDENTIFIER_QUOTE_CHAR: SQLUSMALLINT = 29;
pub const SQL_MULT_RESULT_SETS: SQLUSMALLINT = 36;
pub const SQL_SCROLL_OPTIONS: SQLUSMALLINT = 44;
pub const SQL_TXN_CAPABLE: SQLUSMALLINT = 46;
pub const SQL_USER_NAME: SQLUSMALLINT = 47;
pub const SQL_TXN_ISOLATION_OPTION: SQLUSMALLINT = 72;
pub const SQL_DRIVER_ODBC_VER: SQLUSMALLINT = 77;
pub const SQL_GETDATA_EXTENSIONS: SQLUSMALLINT = 81;
pub const SQL_NEED_LONG_DATA_LEN: SQLUSMALLINT = 111;

pub const SQL_SO_FORWARD_ONLY: SQLUINTEGER = 0x01;
pub const SQL_SO_KEYSET_DRIVEN: SQLUINTEGER = 0x02;
pub const SQL_SO_DYNAMIC: SQLUINTEGER = 0x04;
pub const SQL_SO_MIXED: SQLUINTEGER = 0x08;
pub const SQL_SO_STATIC: SQLUINTEGER = 0x10;

pub const SQL_CB_PRESERVE: SQLUSMALLINT = 2;
pub const SQL_TC_DDL_COMMIT: SQLUSMALLINT = 2;

pub const SQL_GD_ANY_COLUMN: SQLUINTEGER = 1;
pub const SQL_GD_ANY_ORDER: SQLUINTEGER = 2;
pub const SQL_GD_BOUND: SQLUINTEGER = 8;

// ── Descriptor fields ───────────────────────────────────────────────

pub const SQL_DESC_CONCISE_TYPE: SQLSMALLINT = 2;
pub const SQL_DESC_PARAMETER_TYPE: SQLSMALLINT = 33;
pub const SQL_DESC_COUNT: SQLSMALLINT = 1001;
pub const SQL_DESC_TYPE: SQLSMALLINT = 1002;
pub const SQL_DESC_LENGTH: SQLSMALLINT = 1003;
pub const SQL_DESC_OCTET_LENGTH_PTR: SQLSMALLINT = 1004;
pub const SQL_DESC_PRECISION: SQLSMALLINT = 1005;
pub const SQL_DESC_SCALE: SQLSMALLINT = 1006;
pub const SQL_DESC_INDICATOR_PTR: SQLSMALLINT = 1009;
pub const SQL_DESC_DATA_PTR: SQLSMALLINT = 1010;
pub const SQL_DESC_OCTET_LENGTH: SQLSMALLINT = 1013;
pub const SQL_DESC_ALLOC_TYPE: SQLSMALLINT = 1099;

pub const SQL_DESC_ALLOC_AUTO: SQLSMALLINT = 1;
pub const SQL_DESC_ALLOC_USER: SQLSMALLINT = 2;

// ── Parameters ──────────────────────────────────────────────────────

pub const SQL_PARAM_INPUT: SQLSMALLINT = 1;
pub const SQL_PARAM_INPUT_OUTPUT: SQLSMALLINT = 2;
pub const SQL_PARAM_OUTPUT: SQLSMALLINT = 4;

// ── Fetch orientation ───────────────────────────────────────────────

pub const SQL_FETCH_NEXT: SQLSMALLINT = 1;
pub const SQL_FETCH_FIRST: SQLSMALLINT = 2;
pub const SQL_FETCH_LAST: SQLSMALLINT = 3;
pub const SQL_FETCH_PRIOR: SQLSMALLINT = 4;
pub const SQL_FETCH_ABSOLUTE: SQLSMALLINT = 5;
pub const SQL_FETCH_RELATIVE: SQLSMALLINT = 6;

// ── Nullability ─────────────────────────────────────────────────────

pub const SQL_NO_NULLS: SQLSMALLINT = 0;
pub const SQL_NULLABLE: SQLSMALLINT = 1;
pub const SQL_NULLABLE_UNKNOWN: SQLSMALLINT = 2;

// ── SQL data types ──────────────────────────────────────────────────

pub const SQL_UNKNOWN_TYPE: SQLSMALLINT = 0;
pub const SQL_CHAR: SQLSMALLINT = 1;
pub const SQL_NUMERIC: SQLSMALLINT = 2;
pub const SQL_DECIMAL: SQLSMALLINT = 3;
pub const SQL_INTEGER: SQLSMALLINT = 4;
pub const SQL_SMALLINT: SQLSMALLINT = 5;
pub const SQL_FLOAT: SQLSMALLINT = 6;
pub const SQL_REAL: SQLSMALLINT = 7;
pub const SQL_DOUBLE: SQLSMALLINT = 8;
pub const SQL_DATE: SQLSMALLINT = 9;
pub const SQL_TIME: SQLSMALLINT = 10;
pub const SQL_TIMESTAMP: SQLSMALLINT = 11;
pub const SQL_VARCHAR: SQLSMALLINT = 12;
pub const SQL_TYPE_DATE: SQLSMALLINT = 91;
pub const SQL_TYPE_TIME: SQLSMALLINT = 92;
pub const SQL_TYPE_TIMESTAMP: SQLSMALLINT = 93;
pub const SQL_LONGVARCHAR: SQLSMALLINT = -1;
pub const SQL_BINARY: SQLSMALLINT = -2;
pub const SQL_VARBINARY: SQLSMALLINT = -3;
pub const SQL_LONGVARBINARY: SQLSMALLINT = -4;
pub const SQL_BIGINT: SQLSMALLINT = -5;
pub const SQL_TINYINT: SQLSMALLINT = -6;
pub const SQL_BIT: SQLSMALLINT = -7;
pub const SQL_WCHAR: SQLSMALLINT = -8;
pub const SQL_WVARCHAR: SQLSMALLINT = -9;
pub const SQL_WLONGVARCHAR: SQLSMALLINT = -10;
pub const SQL_GUID: SQLSMALLINT = -11;

// ── C data types ────────────────────────────────────────────────────

pub const SQL_C_CHAR: SQLSMALLINT = 1;
pub const SQL_C_NUMERIC: SQLSMALLINT = 2;
pub const SQL_C_LONG: SQLSMALLINT = 4;
pub const SQL_C_SHORT: SQLSMALLINT = 5;
pub const SQL_C_FLOAT: SQLSMALLINT = 7;
pub const SQL_C_DOUBLE: SQLSMALLINT = 8;
pub const SQL_C_DATE: SQLSMALLINT = 9;
pub const SQL_C_TIME: SQLSMALLINT = 10;
pub const SQL_C_TIMESTAMP: SQLSMALLINT = 11;
pub const SQL_C_TYPE_DATE: SQLSMALLINT = 91;
pub const SQL_C_TYPE_TIME: SQLSMALLINT = 92;
pub const SQL_C_TYPE_TIMESTAMP: SQLSMALLINT = 93;
pub const SQL_C_DEFAULT: SQLSMALLINT = 99;
pub const SQL_C_BINARY: SQLSMALLINT = -2;
pub const SQL_C_BIT: SQLSMALLINT = -7;
pub const SQL_C_TINYINT: SQLSMALLINT = -6;
pub const SQL_C_WCHAR: SQLSMALLINT = -8;
pub const SQL_C_SSHORT: SQLSMALLINT = -15;
pub const SQL_C_SLONG: SQLSMALLINT = -16;
pub const SQL_C_USHORT: SQLSMALLINT = -17;
pub const SQL_C_ULONG: SQLSMALLINT = -18;
pub const SQL_C_SBIGINT: SQLSMALLINT = -25;
pub const SQL_C_STINYINT: SQLSMALLINT = -26;
pub const SQL_C_UBIGINT: SQLSMALLINT = -27;
pub const SQL_C_UTINYINT: SQLSMALLINT = -28;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SqlDateStruct {
    pub year: SQLSMALLINT,
    pub month: SQLUSMALLINT,
    pub day: SQLUSMALLINT,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SqlTimeStruct {
    pub hour: SQLUSMALLINT,
    pub minute: SQLUSMALLINT,
    pub second: SQLUSMALLINT,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SqlTimestampStruct {
    pub year: SQLSMALLINT,
    pub month: SQLUSMALLINT,
    pub day: SQLUSMALLINT,
    pub hour: SQLUSMALLINT,
    pub minute: SQLUSMALLINT,
    pub second: SQLUSMALLINT,
    pub fraction: SQLUINTEGER,
}
