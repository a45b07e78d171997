//! Outbound marshalling: bound parameter buffers to SQL literals.
//!
//! Buffers are read when the statement executes, never when they are
//! bound, so an application may rebind by rewriting its variables.

use std::collections::HashMap;
use std::ffi::CStr;
use std::fmt::Write as _;

use crate::charset::Charset;
use crate::error::{DriverError, Result};
use crate::handle::{DescRecord, Descriptor};
use crate::types::*;

/// Packed `SQL_NUMERIC_STRUCT`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SqlNumericStruct {
    pub precision: SQLCHAR,
    pub scale: i8,
    /// 1 positive, 0 negative.
    pub sign: SQLCHAR,
    pub val: [SQLCHAR; 16],
}

pub fn check_c_type(c_type: SQLSMALLINT) -> Result<()> {
    match c_type {
        SQL_C_CHAR | SQL_C_WCHAR | SQL_C_BINARY | SQL_C_BIT | SQL_C_TINYINT | SQL_C_STINYINT
        | SQL_C_UTINYINT | SQL_C_SHORT | SQL_C_SSHORT | SQL_C_USHORT | SQL_C_LONG | SQL_C_SLONG
        | SQL_C_ULONG | SQL_C_SBIGINT | SQL_C_UBIGINT | SQL_C_FLOAT | SQL_C_DOUBLE
        | SQL_C_NUMERIC | SQL_C_DATE | SQL_C_TIME | SQL_C_TIMESTAMP | SQL_C_TYPE_DATE
        | SQL_C_TYPE_TIME | SQL_C_TYPE_TIMESTAMP | SQL_C_DEFAULT => Ok(()),
        other => Err(DriverError::InvalidCType(other)),
    }
}

pub fn check_sql_type(sql_type: SQLSMALLINT) -> Result<()> {
    match sql_type {
        SQL_CHAR | SQL_VARCHAR | SQL_LONGVARCHAR | SQL_WCHAR | SQL_WVARCHAR | SQL_WLONGVARCHAR
        | SQL_BINARY | SQL_VARBINARY | SQL_LONGVARBINARY | SQL_BIT | SQL_TINYINT | SQL_SMALLINT
        | SQL_INTEGER | SQL_BIGINT | SQL_REAL | SQL_FLOAT | SQL_DOUBLE | SQL_DECIMAL
        | SQL_NUMERIC | SQL_DATE | SQL_TIME | SQL_TIMESTAMP | SQL_TYPE_DATE | SQL_TYPE_TIME
        | SQL_TYPE_TIMESTAMP | SQL_GUID => Ok(()),
        other => Err(DriverError::InvalidSqlType(other)),
    }
}

/// `SQLBindParameter`. Only the pointers are recorded; nothing is read
/// until the statement executes.
#[allow(clippy::too_many_arguments)]
pub fn bind_parameter(
    apd: &mut Descriptor,
    number: SQLUSMALLINT,
    io_type: SQLSMALLINT,
    c_type: SQLSMALLINT,
    sql_type: SQLSMALLINT,
    column_size: SQLULEN,
    decimal_digits: SQLSMALLINT,
    value: SQLPOINTER,
    buffer_length: SQLLEN,
    ind: *mut SQLLEN,
) -> Result<()> {
    if number == 0 {
        return Err(DriverError::InvalidDescriptorIndex(0));
    }
    check_c_type(c_type)?;
    check_sql_type(sql_type)?;
    if io_type != SQL_PARAM_INPUT {
        return Err(DriverError::OptionalFeature("output parameters"));
    }
    if buffer_length < 0 {
        return Err(DriverError::InvalidBufferLength);
    }
    let rec = apd.record_mut(number as usize)?;
    *rec = DescRecord {
        c_type,
        sql_type,
        io_type,
        column_size,
        decimal_digits,
        data_ptr: value,
        buffer_length,
        octet_length_ptr: ind,
        indicator_ptr: ind,
    };
    Ok(())
}

/// The C type `SQL_C_DEFAULT` stands for, given the SQL type.
pub fn default_c_type(sql_type: SQLSMALLINT) -> SQLSMALLINT {
    match sql_type {
        SQL_BIT => SQL_C_BIT,
        SQL_TINYINT => SQL_C_STINYINT,
        SQL_SMALLINT => SQL_C_SSHORT,
        SQL_INTEGER => SQL_C_SLONG,
        SQL_BIGINT => SQL_C_SBIGINT,
        SQL_REAL => SQL_C_FLOAT,
        SQL_FLOAT | SQL_DOUBLE => SQL_C_DOUBLE,
        SQL_TYPE_DATE | SQL_DATE => SQL_C_TYPE_DATE,
        SQL_TYPE_TIME | SQL_TIME => SQL_C_TYPE_TIME,
        SQL_TYPE_TIMESTAMP | SQL_TIMESTAMP => SQL_C_TYPE_TIMESTAMP,
        SQL_BINARY | SQL_VARBINARY | SQL_LONGVARBINARY => SQL_C_BINARY,
        SQL_WCHAR | SQL_WVARCHAR | SQL_WLONGVARCHAR => SQL_C_WCHAR,
        _ => SQL_C_CHAR,
    }
}

fn effective_c_type(rec: &DescRecord) -> SQLSMALLINT {
    if rec.c_type == SQL_C_DEFAULT {
        default_c_type(rec.sql_type)
    } else {
        rec.c_type
    }
}

/// Size of a fixed-length C type; `None` for character and binary types.
pub fn fixed_size(c_type: SQLSMALLINT) -> Option<usize> {
    Some(match c_type {
        SQL_C_BIT | SQL_C_TINYINT | SQL_C_STINYINT | SQL_C_UTINYINT => 1,
        SQL_C_SHORT | SQL_C_SSHORT | SQL_C_USHORT => 2,
        SQL_C_LONG | SQL_C_SLONG | SQL_C_ULONG | SQL_C_FLOAT => 4,
        SQL_C_SBIGINT | SQL_C_UBIGINT | SQL_C_DOUBLE => 8,
        SQL_C_NUMERIC => std::mem::size_of::<SqlNumericStruct>(),
        SQL_C_DATE | SQL_C_TYPE_DATE => std::mem::size_of::<SqlDateStruct>(),
        SQL_C_TIME | SQL_C_TYPE_TIME => std::mem::size_of::<SqlTimeStruct>(),
        SQL_C_TIMESTAMP | SQL_C_TYPE_TIMESTAMP => std::mem::size_of::<SqlTimestampStruct>(),
        _ => return None,
    })
}

/// A binding whose length says its value arrives through `SQLPutData`.
pub unsafe fn is_data_at_exec(rec: &DescRecord) -> bool {
    if !rec.indicator_ptr.is_null() && *rec.indicator_ptr == SQL_NULL_DATA {
        return false;
    }
    if rec.octet_length_ptr.is_null() {
        return false;
    }
    let len = *rec.octet_length_ptr;
    len == SQL_DATA_AT_EXEC || len <= SQL_LEN_DATA_AT_EXEC_OFFSET
}

/// Bytes of one `SQLPutData` chunk.
pub unsafe fn chunk_bytes(rec: &DescRecord, data: SQLPOINTER, len: SQLLEN) -> Result<Vec<u8>> {
    if data.is_null() {
        return if len == 0 { Ok(Vec::new()) } else { Err(DriverError::InvalidBufferLength) };
    }
    let c_type = effective_c_type(rec);
    let count = match (fixed_size(c_type), len) {
        (Some(size), _) => size,
        (None, SQL_NTS) if c_type == SQL_C_WCHAR => wide_len(data as *const SQLWCHAR, None) * 2,
        (None, SQL_NTS) => CStr::from_ptr(data as *const std::os::raw::c_char).to_bytes().len(),
        (None, n) if n >= 0 => n as usize,
        _ => return Err(DriverError::InvalidBufferLength),
    };
    Ok(std::slice::from_raw_parts(data as *const u8, count).to_vec())
}

unsafe fn wide_len(ptr: *const SQLWCHAR, max_units: Option<usize>) -> usize {
    let mut n = 0;
    while max_units.map_or(true, |m| n < m) && *ptr.add(n) != 0 {
        n += 1;
    }
    n
}

unsafe fn narrow_len(ptr: *const u8, max: Option<usize>) -> usize {
    let mut n = 0;
    while max.map_or(true, |m| n < m) && *ptr.add(n) != 0 {
        n += 1;
    }
    n
}

/// Literals for parameters `1..=count`, in marker order.
pub fn literals(
    apd: &Descriptor,
    count: usize,
    charset: &Charset,
    deferred: &HashMap<usize, Option<Vec<u8>>>,
) -> Result<Vec<Vec<u8>>> {
    (1..=count)
        .map(|number| {
            let rec = apd.record(number).ok_or(DriverError::CountFieldIncorrect {
                expected: count,
                bound: apd.count(),
            })?;
            match deferred.get(&number) {
                Some(None) => Ok(b"NULL".to_vec()),
                Some(Some(bytes)) => unsafe { deferred_literal(rec, bytes, charset) },
                None => unsafe { literal(rec, charset) },
            }
        })
        .collect()
}

unsafe fn deferred_literal(rec: &DescRecord, bytes: &[u8], charset: &Charset) -> Result<Vec<u8>> {
    let mut len = bytes.len() as SQLLEN;
    let view = DescRecord {
        data_ptr: bytes.as_ptr() as SQLPOINTER,
        buffer_length: bytes.len() as SQLLEN,
        octet_length_ptr: &mut len,
        indicator_ptr: std::ptr::null_mut(),
        ..*rec
    };
    literal(&view, charset)
}

fn quote(text: &[u8], charset: &Charset) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 2);
    out.push(b'\'');
    charset.escape_into(text, &mut out);
    out.push(b'\'');
    out
}

/// Renders one bound parameter as a SQL literal.
pub unsafe fn literal(rec: &DescRecord, charset: &Charset) -> Result<Vec<u8>> {
    if !rec.indicator_ptr.is_null() && *rec.indicator_ptr == SQL_NULL_DATA {
        return Ok(b"NULL".to_vec());
    }
    let octet_len = (!rec.octet_length_ptr.is_null()).then(|| *rec.octet_length_ptr);
    // The length only signals NULL when no separate indicator was set.
    let shared = rec.indicator_ptr.is_null() || rec.indicator_ptr == rec.octet_length_ptr;
    if (shared && octet_len == Some(SQL_NULL_DATA)) || rec.data_ptr.is_null() {
        return Ok(b"NULL".to_vec());
    }
    let ptr = rec.data_ptr as *const u8;
    let buffer_max = (rec.buffer_length > 0).then_some(rec.buffer_length as usize);

    let text = match effective_c_type(rec) {
        SQL_C_CHAR => {
            let len = match octet_len {
                Some(n) if n >= 0 => n as usize,
                Some(SQL_NTS) | None => narrow_len(ptr, buffer_max),
                Some(_) => return Err(DriverError::InvalidBufferLength),
            };
            return Ok(quote(std::slice::from_raw_parts(ptr, len), charset));
        }
        SQL_C_WCHAR => {
            let wide = rec.data_ptr as *const SQLWCHAR;
            let units = match octet_len {
                Some(n) if n >= 0 => n as usize / 2,
                Some(SQL_NTS) | None => wide_len(wide, buffer_max.map(|b| b / 2)),
                Some(_) => return Err(DriverError::InvalidBufferLength),
            };
            let text = String::from_utf16_lossy(std::slice::from_raw_parts(wide, units));
            return Ok(quote(&charset.encode(&text), charset));
        }
        SQL_C_BINARY => {
            let len = match octet_len {
                Some(n) if n >= 0 => n as usize,
                _ => buffer_max.unwrap_or(0),
            };
            let bytes = std::slice::from_raw_parts(ptr, len);
            if bytes.is_empty() {
                return Ok(b"''".to_vec());
            }
            let mut out = String::with_capacity(2 + bytes.len() * 2);
            out.push_str("0x");
            for b in bytes {
                let _ = write!(out, "{b:02X}");
            }
            out
        }
        SQL_C_BIT => u8::from(std::ptr::read_unaligned(ptr) != 0).to_string(),
        SQL_C_TINYINT | SQL_C_STINYINT => std::ptr::read_unaligned(ptr as *const i8).to_string(),
        SQL_C_UTINYINT => std::ptr::read_unaligned(ptr).to_string(),
        SQL_C_SHORT | SQL_C_SSHORT => std::ptr::read_unaligned(ptr as *const i16).to_string(),
        SQL_C_USHORT => std::ptr::read_unaligned(ptr as *const u16).to_string(),
        SQL_C_LONG | SQL_C_SLONG => std::ptr::read_unaligned(ptr as *const i32).to_string(),
        SQL_C_ULONG => std::ptr::read_unaligned(ptr as *const u32).to_string(),
        SQL_C_SBIGINT => std::ptr::read_unaligned(ptr as *const i64).to_string(),
        SQL_C_UBIGINT => std::ptr::read_unaligned(ptr as *const u64).to_string(),
        SQL_C_FLOAT => finite(f64::from(std::ptr::read_unaligned(ptr as *const f32)))?,
        SQL_C_DOUBLE => finite(std::ptr::read_unaligned(ptr as *const f64))?,
        SQL_C_NUMERIC => numeric_text(&std::ptr::read_unaligned(ptr as *const SqlNumericStruct)),
        SQL_C_DATE | SQL_C_TYPE_DATE => {
            let d = std::ptr::read_unaligned(ptr as *const SqlDateStruct);
            format!("'{:04}-{:02}-{:02}'", d.year, d.month, d.day)
        }
        SQL_C_TIME | SQL_C_TYPE_TIME => {
            let t = std::ptr::read_unaligned(ptr as *const SqlTimeStruct);
            format!("'{:02}:{:02}:{:02}'", t.hour, t.minute, t.second)
        }
        SQL_C_TIMESTAMP | SQL_C_TYPE_TIMESTAMP => {
            let ts = std::ptr::read_unaligned(ptr as *const SqlTimestampStruct);
            let mut out = format!(
                "'{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                ts.year, ts.month, ts.day, ts.hour, ts.minute, ts.second
            );
            if ts.fraction > 0 {
                let _ = write!(out, ".{:06}", ts.fraction / 1000);
            }
            out.push('\'');
            out
        }
        other => return Err(DriverError::InvalidCType(other)),
    };
    Ok(text.into_bytes())
}

fn finite(v: f64) -> Result<String> {
    if v.is_finite() {
        Ok(v.to_string())
    } else {
        Err(DriverError::NumericOutOfRange(v.to_string()))
    }
}

fn numeric_text(n: &SqlNumericStruct) -> String {
    let digits = u128::from_le_bytes(n.val).to_string();
    let scale = n.scale.max(0) as usize;
    let mut out = String::new();
    if n.sign == 0 && digits != "0" {
        out.push('-');
    }
    if scale == 0 {
        out.push_str(&digits);
    } else if digits.len() <= scale {
        out.push_str("0.");
        out.push_str(&"0".repeat(scale - digits.len()));
        out.push_str(&digits);
    } else {
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        out.push_str(int_part);
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DescKind;

    fn bound<T>(c_type: SQLSMALLINT, value: &mut T) -> DescRecord {
        DescRecord {
            c_type,
            data_ptr: value as *mut T as SQLPOINTER,
            ..DescRecord::default()
        }
    }

    #[test]
    fn fixed_types_render_as_plain_literals() {
        let cs = Charset::latin1();
        let mut n = -42i32;
        assert_eq!(unsafe { literal(&bound(SQL_C_LONG, &mut n), &cs) }.unwrap(), b"-42");
        let mut big = u64::MAX;
        assert_eq!(
            unsafe { literal(&bound(SQL_C_UBIGINT, &mut big), &cs) }.unwrap(),
            b"18446744073709551615"
        );
        let mut f = f64::INFINITY;
        assert!(matches!(
            unsafe { literal(&bound(SQL_C_DOUBLE, &mut f), &cs) },
            Err(DriverError::NumericOutOfRange(_))
        ));
    }

    #[test]
    fn separate_indicator_null_wins_over_octet_length() {
        let cs = Charset::latin1();
        let mut v = 40i32;
        let mut octets: SQLLEN = 19283;
        let mut ind: SQLLEN = SQL_NULL_DATA;
        let mut rec = bound(SQL_C_LONG, &mut v);
        rec.octet_length_ptr = &mut octets;
        assert_eq!(unsafe { literal(&rec, &cs) }.unwrap(), b"40");
        rec.indicator_ptr = &mut ind;
        assert_eq!(unsafe { literal(&rec, &cs) }.unwrap(), b"NULL");
        assert!(!unsafe { is_data_at_exec(&rec) });
    }

    #[test]
    fn separate_non_null_indicator_overrides_a_null_length() {
        let cs = Charset::latin1();
        let mut v = 7i32;
        let mut octets: SQLLEN = SQL_NULL_DATA;
        let mut ind: SQLLEN = 0;
        let mut rec = bound(SQL_C_LONG, &mut v);
        rec.octet_length_ptr = &mut octets;
        assert_eq!(unsafe { literal(&rec, &cs) }.unwrap(), b"NULL");
        rec.indicator_ptr = &mut ind;
        assert_eq!(unsafe { literal(&rec, &cs) }.unwrap(), b"7");
        rec.indicator_ptr = &mut octets;
        assert_eq!(unsafe { literal(&rec, &cs) }.unwrap(), b"NULL");
    }

    #[test]
    fn char_without_length_stops_at_nul_or_buffer_end() {
        let gbk = Charset::lookup("gbk").unwrap();
        let mut buf = *b"\xef\xbb\xbf\x27\xbf\x10\0";
        let mut rec = bound(SQL_C_CHAR, &mut buf);
        rec.buffer_length = buf.len() as SQLLEN;
        assert_eq!(
            unsafe { literal(&rec, &gbk) }.unwrap(),
            b"'\xef\xbb\\\xbf\\'\\\xbf\x10'".to_vec()
        );

        let mut unterminated = *b"abcdef";
        let mut rec = bound(SQL_C_CHAR, &mut unterminated);
        rec.buffer_length = 3;
        assert_eq!(unsafe { literal(&rec, &gbk) }.unwrap(), b"'abc'");
    }

    #[test]
    fn wide_text_is_encoded_into_the_connection_charset() {
        let big5 = Charset::lookup("big5").unwrap();
        let mut wide: Vec<u16> = "中'".encode_utf16().chain([0]).collect();
        let mut rec = bound(SQL_C_WCHAR, &mut wide[0]);
        rec.data_ptr = wide.as_mut_ptr() as SQLPOINTER;
        assert_eq!(unsafe { literal(&rec, &big5) }.unwrap(), b"'\xa4\xa4\\''".to_vec());
    }

    #[test]
    fn binary_numeric_and_timestamp() {
        let cs = Charset::latin1();
        let mut bytes = [0xDEu8, 0xAD];
        let mut rec = bound(SQL_C_BINARY, &mut bytes);
        rec.buffer_length = 2;
        assert_eq!(unsafe { literal(&rec, &cs) }.unwrap(), b"0xDEAD");

        let mut val = [0u8; 16];
        val[..2].copy_from_slice(&12345u16.to_le_bytes());
        let mut num = SqlNumericStruct { precision: 5, scale: 3, sign: 0, val };
        assert_eq!(unsafe { literal(&bound(SQL_C_NUMERIC, &mut num), &cs) }.unwrap(), b"-12.345");

        let mut ts = SqlTimestampStruct {
            year: 2024,
            month: 2,
            day: 29,
            hour: 23,
            minute: 5,
            second: 9,
            fraction: 120_000_000,
        };
        assert_eq!(
            unsafe { literal(&bound(SQL_C_TYPE_TIMESTAMP, &mut ts), &cs) }.unwrap(),
            b"'2024-02-29 23:05:09.120000'"
        );
    }

    #[test]
    fn data_at_exec_lengths() {
        let mut marker: u8 = 1;
        let mut len = sql_len_data_at_exec(0);
        let mut rec = bound(SQL_C_CHAR, &mut marker);
        rec.octet_length_ptr = &mut len;
        rec.indicator_ptr = &mut len;
        assert!(unsafe { is_data_at_exec(&rec) });
        len = SQL_DATA_AT_EXEC;
        assert!(unsafe { is_data_at_exec(&rec) });
        len = 1;
        assert!(!unsafe { is_data_at_exec(&rec) });
    }

    #[test]
    fn binding_overwrites_and_validates() {
        let mut apd = Descriptor::new(DescKind::Apd);
        let mut a = 1i32;
        let mut b = 2i32;
        let null = std::ptr::null_mut();
        let ptr_a = &mut a as *mut i32 as SQLPOINTER;
        let ptr_b = &mut b as *mut i32 as SQLPOINTER;

        bind_parameter(&mut apd, 2, SQL_PARAM_INPUT, SQL_C_SLONG, SQL_INTEGER, 0, 0, ptr_a, 0, null)
            .unwrap();
        bind_parameter(&mut apd, 2, SQL_PARAM_INPUT, SQL_C_SLONG, SQL_INTEGER, 0, 0, ptr_b, 0, null)
            .unwrap();
        assert_eq!(apd.count(), 2);
        assert_eq!(apd.record(2).unwrap().data_ptr, ptr_b);
        assert!(!apd.record(1).unwrap().is_bound());

        let err = bind_parameter(&mut apd, 0, SQL_PARAM_INPUT, SQL_C_SLONG, SQL_INTEGER, 0, 0, ptr_a, 0, null)
            .unwrap_err();
        assert_eq!(err.sqlstate(), "07009");
        let err = bind_parameter(&mut apd, 1, SQL_PARAM_INPUT, 1234, SQL_INTEGER, 0, 0, ptr_a, 0, null)
            .unwrap_err();
        assert_eq!(err.sqlstate(), "HY003");
        let err = bind_parameter(&mut apd, 1, SQL_PARAM_INPUT, SQL_C_SLONG, 1234, 0, 0, ptr_a, 0, null)
            .unwrap_err();
        assert_eq!(err.sqlstate(), "HY004");
    }

    #[test]
    fn type_checks() {
        assert!(check_c_type(SQL_C_WCHAR).is_ok());
        assert_eq!(check_c_type(1234).unwrap_err().sqlstate(), "HY003");
        assert!(check_sql_type(SQL_TYPE_TIMESTAMP).is_ok());
        assert_eq!(check_sql_type(1234).unwrap_err().sqlstate(), "HY004");
    }
}
