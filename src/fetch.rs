//! Inbound marshalling: text protocol values into application buffers.

use std::ptr;

use tokio_util::sync::CancellationToken;

use crate::buffer;
use crate::charset::Charset;
use crate::error::{DriverError, Result};
use crate::handle::*;
use crate::params::{self, SqlNumericStruct};
use crate::protocol::{ColumnMeta, NativeType, Row};
use crate::runtime;
use crate::types::*;

/// Column description as the application sees it. Character sizes are in
/// characters of the column's own charset.
pub fn describe(meta: &ColumnMeta) -> ColumnDesc {
    let binary = meta.is_binary();
    let decimals = meta.decimals as SQLSMALLINT;
    let (column_size, decimal_digits): (SQLULEN, SQLSMALLINT) = match meta.native_type {
        NativeType::VarChar | NativeType::String | NativeType::Blob => {
            let mbmaxlen = if binary {
                1
            } else {
                Charset::lookup(&meta.charset).map_or(1, |c| c.max_bytes_per_char())
            };
            (meta.length as usize / mbmaxlen, 0)
        }
        NativeType::Bit => (meta.length.max(1) as usize, 0),
        NativeType::Tiny => (3, 0),
        NativeType::Short => (5, 0),
        NativeType::Year => (4, 0),
        NativeType::Long => (10, 0),
        NativeType::LongLong => (19, 0),
        NativeType::Float => (7, decimals),
        NativeType::Double => (15, decimals),
        NativeType::Decimal => {
            // Server length counts the sign and the decimal point.
            let point = usize::from(meta.decimals > 0);
            ((meta.length as usize).saturating_sub(1 + point).max(1), decimals)
        }
        NativeType::Date => (10, 0),
        NativeType::Time => (8, 0),
        NativeType::DateTime | NativeType::Timestamp if meta.decimals > 0 => {
            (20 + meta.decimals as usize, decimals)
        }
        NativeType::DateTime | NativeType::Timestamp => (19, 0),
    };
    ColumnDesc {
        meta: meta.clone(),
        sql_type: meta.native_type.sql_type(binary),
        column_size,
        decimal_digits,
        nullable: if meta.nullable { SQL_NULLABLE } else { SQL_NO_NULLS },
    }
}

pub fn num_result_cols(stmt: &Statement) -> usize {
    stmt.result.as_ref().map_or(0, |r| r.columns.len())
}

pub fn row_count(stmt: &Statement) -> SQLLEN {
    stmt.row_count
}

/// # Safety
/// Output pointers must be null or valid for writes of their type; `name`
/// must hold `name_max` bytes.
#[allow(clippy::too_many_arguments)]
pub unsafe fn describe_col(
    stmt: &Statement,
    column: SQLUSMALLINT,
    name: *mut SQLCHAR,
    name_max: SQLSMALLINT,
    name_len: *mut SQLSMALLINT,
    data_type: *mut SQLSMALLINT,
    column_size: *mut SQLULEN,
    decimal_digits: *mut SQLSMALLINT,
    nullable: *mut SQLSMALLINT,
) -> Result<Outcome> {
    let result = stmt
        .result
        .as_ref()
        .ok_or(DriverError::FunctionSequence("statement has no result set"))?;
    let col = column_at(result, column)?;
    if name_max < 0 {
        return Err(DriverError::InvalidBufferLength);
    }
    let truncated = buffer::write_bytes(col.meta.name.as_bytes(), name, name_max as usize);
    buffer::write_len_i16(name_len, col.meta.name.len());
    if !data_type.is_null() {
        *data_type = col.sql_type;
    }
    if !column_size.is_null() {
        *column_size = col.column_size;
    }
    if !decimal_digits.is_null() {
        *decimal_digits = col.decimal_digits;
    }
    if !nullable.is_null() {
        *nullable = col.nullable;
    }
    if truncated {
        return Ok(Outcome::info(DriverError::DataTruncated));
    }
    Ok(Outcome::Success)
}

fn column_at(result: &ResultSet, column: SQLUSMALLINT) -> Result<&ColumnDesc> {
    (column as usize)
        .checked_sub(1)
        .and_then(|i| result.columns.get(i))
        .ok_or(DriverError::InvalidDescriptorIndex(column as usize))
}

/// `SQLBindCol`. A null buffer with a null indicator unbinds the column.
pub fn bind_col(
    stmt: &Statement,
    column: SQLUSMALLINT,
    c_type: SQLSMALLINT,
    target: SQLPOINTER,
    buffer_length: SQLLEN,
    ind: *mut SQLLEN,
) -> Result<Outcome> {
    if column == 0 {
        return Err(DriverError::InvalidDescriptorIndex(0));
    }
    if buffer_length < 0 {
        return Err(DriverError::InvalidBufferLength);
    }
    let mut ard = stmt.ard.lock();
    if target.is_null() && ind.is_null() {
        ard.unbind(column as usize);
        return Ok(Outcome::Success);
    }
    params::check_c_type(c_type)?;
    let rec = ard.record_mut(column as usize)?;
    rec.c_type = c_type;
    rec.data_ptr = target;
    rec.buffer_length = buffer_length;
    rec.octet_length_ptr = ind;
    rec.indicator_ptr = ind;
    Ok(Outcome::Success)
}

/// # Safety
/// Every bound column buffer must still be valid.
pub unsafe fn fetch(
    conn_cell: &ConnectionCell,
    cell: &StatementCell,
    stmt: &mut Statement,
) -> Result<Outcome> {
    fetch_scroll(conn_cell, cell, stmt, SQL_FETCH_NEXT, 0)
}

/// # Safety
/// As for [`fetch`].
pub unsafe fn fetch_scroll(
    conn_cell: &ConnectionCell,
    cell: &StatementCell,
    stmt: &mut Statement,
    orientation: SQLSMALLINT,
    offset: SQLLEN,
) -> Result<Outcome> {
    let key = stmt.key;
    let scrollable = stmt.cursor_type.is_scrollable();
    let result = stmt.result.as_mut().ok_or(DriverError::InvalidCursorState)?;

    let row = match &mut result.source {
        RowSource::Materialized(rows) => {
            let len = rows.len() as isize;
            let next = match orientation {
                SQL_FETCH_NEXT => result.position + 1,
                _ if !scrollable => return Err(DriverError::FetchTypeOutOfRange),
                SQL_FETCH_PRIOR => result.position - 1,
                SQL_FETCH_FIRST => 0,
                SQL_FETCH_LAST => len - 1,
                SQL_FETCH_ABSOLUTE if offset > 0 => offset - 1,
                SQL_FETCH_ABSOLUTE if offset < 0 => len + offset,
                SQL_FETCH_ABSOLUTE => -1,
                SQL_FETCH_RELATIVE => result.position + offset,
                _ => return Err(DriverError::FetchTypeOutOfRange),
            };
            if next < 0 {
                result.position = -1;
                None
            } else if next >= len {
                result.position = len;
                None
            } else {
                result.position = next;
                Some(rows[next as usize].clone())
            }
        }
        RowSource::Streaming { exhausted } => {
            if orientation != SQL_FETCH_NEXT {
                return Err(DriverError::FetchTypeOutOfRange);
            }
            if *exhausted {
                None
            } else {
                match next_streamed(conn_cell, cell, key) {
                    Ok(row) => {
                        *exhausted = row.is_none();
                        row
                    }
                    Err(StreamError::Ended(err)) => {
                        *exhausted = true;
                        return Err(err);
                    }
                    Err(StreamError::Pending(err)) => return Err(err),
                }
            }
        }
    };

    if row.is_none() {
        result.set_current(None);
        return Ok(Outcome::NoData);
    }
    result.set_current(row);

    let ard = stmt.ard.lock();
    let mut warnings = Vec::new();
    for (idx, col) in result.columns.iter().enumerate() {
        let Some(rec) = ard.record(idx + 1).filter(|r| r.is_bound()) else {
            continue;
        };
        let value = result
            .current
            .as_ref()
            .and_then(|r| r.get(idx))
            .and_then(|v| v.as_deref());
        let target = Target {
            c_type: rec.c_type,
            ptr: rec.data_ptr,
            buffer_length: rec.buffer_length,
            len_ptr: rec.octet_length_ptr,
            ind_ptr: rec.indicator_ptr,
        };
        if let (Outcome::Info(w), _) = deliver(col, value, &result.charset, &target, None)? {
            warnings.extend(w);
        }
    }
    Ok(Outcome::with_warnings(warnings))
}

/// Why a streamed read failed: `Ended` when the result set is gone from
/// the wire, `Pending` when nothing was read and the stream is intact.
enum StreamError {
    Ended(DriverError),
    Pending(DriverError),
}

/// Next row of a streamed result: from the parked buffer if another
/// statement moved it there, otherwise off the wire. The read is armed
/// before the connection lock is taken so `SQLCancel` reaches it while it
/// waits for the lock too.
fn next_streamed(
    conn_cell: &ConnectionCell,
    cell: &StatementCell,
    key: StmtKey,
) -> std::result::Result<Option<Row>, StreamError> {
    let armed = cell.arm();
    read_streamed(conn_cell, key, &armed.token)
}

fn read_streamed(
    conn_cell: &ConnectionCell,
    key: StmtKey,
    token: &CancellationToken,
) -> std::result::Result<Option<Row>, StreamError> {
    let mut guard = conn_cell.inner.lock();
    let conn = &mut *guard;
    if token.is_cancelled() {
        return Err(StreamError::Pending(DriverError::Cancelled));
    }
    if let Some(rows) = conn.parked.get_mut(&key) {
        let row = rows.pop_front();
        if row.is_none() {
            conn.parked.remove(&key);
        }
        return Ok(row);
    }
    if conn.streaming != Some(key) {
        return Ok(None);
    }
    let session = conn.session().map_err(StreamError::Pending)?;
    let read = runtime::block_on(session.next_row(token))
        .map_err(StreamError::Pending)?
        .map_err(DriverError::from);
    match read {
        Ok(row) => {
            if row.is_none() {
                conn.streaming = None;
            }
            Ok(row)
        }
        Err(err) => {
            // A failed read ends the result set on the wire.
            conn.streaming = None;
            if matches!(err, DriverError::Cancelled) {
                tracing::info!("streamed fetch cancelled");
            }
            Err(StreamError::Ended(err))
        }
    }
}

/// `SQLGetData` on the current row. Character and binary values are
/// returned in chunks across calls; the column remembers how far it got.
///
/// # Safety
/// `target` must hold `buffer_length` bytes (or the fixed size of
/// `c_type`); `ind` must be null or valid for writes.
pub unsafe fn get_data(
    stmt: &mut Statement,
    column: SQLUSMALLINT,
    c_type: SQLSMALLINT,
    target: SQLPOINTER,
    buffer_length: SQLLEN,
    ind: *mut SQLLEN,
) -> Result<Outcome> {
    params::check_c_type(c_type)?;
    if buffer_length < 0 {
        return Err(DriverError::InvalidBufferLength);
    }
    let result = stmt.result.as_mut().ok_or(DriverError::InvalidCursorState)?;
    column_at(result, column)?;
    let idx = column as usize - 1;
    let row = result.current.as_ref().ok_or(DriverError::InvalidCursorState)?;
    let value = row.get(idx).and_then(|v| v.as_deref());
    let out = Target {
        c_type,
        ptr: target,
        buffer_length,
        len_ptr: ind,
        ind_ptr: ind,
    };
    let (outcome, consumed) = deliver(
        &result.columns[idx],
        value,
        &result.charset,
        &out,
        result.consumed[idx],
    )?;
    result.consumed[idx] = consumed;
    Ok(outcome)
}

struct Target {
    c_type: SQLSMALLINT,
    ptr: SQLPOINTER,
    buffer_length: SQLLEN,
    len_ptr: *mut SQLLEN,
    ind_ptr: *mut SQLLEN,
}

/// Converts one value into `out`. `consumed` is how much of it earlier calls
/// already returned; the new position comes back with the outcome.
unsafe fn deliver(
    col: &ColumnDesc,
    value: Option<&[u8]>,
    charset: &Charset,
    out: &Target,
    consumed: Option<usize>,
) -> Result<(Outcome, Option<usize>)> {
    let Some(bytes) = value else {
        if consumed.is_some() {
            return Ok((Outcome::NoData, consumed));
        }
        if out.ind_ptr.is_null() {
            return Err(DriverError::IndicatorRequired);
        }
        *out.ind_ptr = SQL_NULL_DATA;
        return Ok((Outcome::Success, Some(0)));
    };
    if !out.ind_ptr.is_null() && out.ind_ptr != out.len_ptr {
        *out.ind_ptr = 0;
    }
    let c_type = if out.c_type == SQL_C_DEFAULT {
        params::default_c_type(col.sql_type)
    } else {
        out.c_type
    };
    match c_type {
        SQL_C_CHAR => chunk(bytes, consumed, out, 1),
        SQL_C_BINARY => chunk(bytes, consumed, out, 0),
        SQL_C_WCHAR => {
            // Binary values are widened byte for byte, whatever the session charset.
            let source = if col.meta.is_binary() { Charset::binary() } else { *charset };
            let wide: Vec<u8> = source
                .decode(bytes)
                .encode_utf16()
                .flat_map(u16::to_ne_bytes)
                .collect();
            chunk(&wide, consumed, out, 2)
        }
        _ => {
            if consumed.is_some() {
                return Ok((Outcome::NoData, consumed));
            }
            let size = convert_fixed(col, bytes, c_type, out.ptr)?;
            buffer::write_len(out.len_ptr, size as SQLLEN);
            Ok((Outcome::Success, Some(size)))
        }
    }
}

/// Copies the next piece of `data`, leaving room for a `terminator`-byte
/// NUL. Wide data (`terminator` 2) is only split on whole code units.
unsafe fn chunk(
    data: &[u8],
    consumed: Option<usize>,
    out: &Target,
    terminator: usize,
) -> Result<(Outcome, Option<usize>)> {
    let offset = consumed.unwrap_or(0);
    if consumed.is_some() && offset >= data.len() {
        return Ok((Outcome::NoData, consumed));
    }
    let remaining = &data[offset..];
    buffer::write_len(out.len_ptr, remaining.len() as SQLLEN);

    let capacity = out.buffer_length as usize;
    if out.ptr.is_null() || capacity == 0 {
        // Length query; nothing is consumed.
        if remaining.is_empty() {
            return Ok((Outcome::Success, Some(offset)));
        }
        return Ok((Outcome::info(DriverError::DataTruncated), consumed));
    }

    let mut room = capacity.saturating_sub(terminator);
    if terminator > 1 {
        room -= room % terminator;
    }
    let copy = remaining.len().min(room);
    let dst = out.ptr as *mut u8;
    ptr::copy_nonoverlapping(remaining.as_ptr(), dst, copy);
    if terminator > 0 && capacity >= terminator {
        ptr::write_bytes(dst.add(copy), 0, terminator);
    }
    let next = Some(offset + copy);
    if copy < remaining.len() {
        Ok((Outcome::info(DriverError::DataTruncated), next))
    } else {
        Ok((Outcome::Success, next))
    }
}

unsafe fn put<T>(target: SQLPOINTER, value: T) {
    if !target.is_null() {
        (target as *mut T).write_unaligned(value);
    }
}

fn narrow<T: TryFrom<i128>>(value: i128) -> Result<T> {
    T::try_from(value).map_err(|_| DriverError::NumericOutOfRange(value.to_string()))
}

/// Writes a fixed-size C value and returns its size.
unsafe fn convert_fixed(
    col: &ColumnDesc,
    bytes: &[u8],
    c_type: SQLSMALLINT,
    target: SQLPOINTER,
) -> Result<usize> {
    match c_type {
        SQL_C_BIT => {
            let v = integer(col, bytes)?;
            if !(0..=1).contains(&v) {
                return Err(DriverError::NumericOutOfRange(v.to_string()));
            }
            put(target, v as u8);
        }
        SQL_C_TINYINT | SQL_C_STINYINT => put(target, narrow::<i8>(integer(col, bytes)?)?),
        SQL_C_UTINYINT => put(target, narrow::<u8>(integer(col, bytes)?)?),
        SQL_C_SHORT | SQL_C_SSHORT => put(target, narrow::<i16>(integer(col, bytes)?)?),
        SQL_C_USHORT => put(target, narrow::<u16>(integer(col, bytes)?)?),
        SQL_C_LONG | SQL_C_SLONG => put(target, narrow::<i32>(integer(col, bytes)?)?),
        SQL_C_ULONG => put(target, narrow::<u32>(integer(col, bytes)?)?),
        SQL_C_SBIGINT => put(target, narrow::<i64>(integer(col, bytes)?)?),
        SQL_C_UBIGINT => put(target, narrow::<u64>(integer(col, bytes)?)?),
        SQL_C_FLOAT => {
            let v = float(col, bytes)?;
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                return Err(DriverError::NumericOutOfRange(v.to_string()));
            }
            put(target, v as f32);
        }
        SQL_C_DOUBLE => put(target, float(col, bytes)?),
        SQL_C_NUMERIC => put(target, numeric(text(bytes)?)?),
        SQL_C_DATE | SQL_C_TYPE_DATE => {
            let ts = temporal(text(bytes)?)?;
            put(
                target,
                SqlDateStruct {
                    year: ts.year,
                    month: ts.month,
                    day: ts.day,
                },
            );
        }
        SQL_C_TIME | SQL_C_TYPE_TIME => {
            let ts = temporal(text(bytes)?)?;
            put(
                target,
                SqlTimeStruct {
                    hour: ts.hour,
                    minute: ts.minute,
                    second: ts.second,
                },
            );
        }
        SQL_C_TIMESTAMP | SQL_C_TYPE_TIMESTAMP => put(target, temporal(text(bytes)?)?),
        other => return Err(DriverError::InvalidCType(other)),
    }
    params::fixed_size(c_type).ok_or(DriverError::InvalidCType(c_type))
}

fn text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map(str::trim)
        .map_err(|_| DriverError::InvalidCharacterValue(String::from_utf8_lossy(bytes).into_owned()))
}

/// BIT values travel as raw big-endian bytes, everything else as text.
fn integer(col: &ColumnDesc, bytes: &[u8]) -> Result<i128> {
    if col.meta.native_type == NativeType::Bit {
        if bytes.len() > 8 {
            return Err(DriverError::NumericOutOfRange(format!("{} byte bit value", bytes.len())));
        }
        return Ok(bytes.iter().fold(0i128, |acc, b| (acc << 8) | *b as i128));
    }
    let s = text(bytes)?;
    if let Ok(v) = s.parse::<i128>() {
        return Ok(v);
    }
    let f: f64 = s
        .parse()
        .map_err(|_| DriverError::InvalidCharacterValue(s.to_string()))?;
    if !f.is_finite() || f.abs() >= i128::MAX as f64 {
        return Err(DriverError::NumericOutOfRange(s.to_string()));
    }
    Ok(f.trunc() as i128)
}

fn float(col: &ColumnDesc, bytes: &[u8]) -> Result<f64> {
    if col.meta.native_type == NativeType::Bit {
        return integer(col, bytes).map(|v| v as f64);
    }
    let s = text(bytes)?;
    s.parse()
        .map_err(|_| DriverError::InvalidCharacterValue(s.to_string()))
}

fn numeric(s: &str) -> Result<SqlNumericStruct> {
    let invalid = || DriverError::InvalidCharacterValue(s.to_string());
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (0, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    let all = int_part.bytes().chain(frac_part.bytes());
    let mut value: u128 = 0;
    let mut precision = 0u32;
    for b in all {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as u128))
            .ok_or_else(|| DriverError::NumericOutOfRange(s.to_string()))?;
        if value > 0 {
            precision += 1;
        }
    }
    if precision > 38 {
        return Err(DriverError::NumericOutOfRange(s.to_string()));
    }
    Ok(SqlNumericStruct {
        precision: precision.max(1) as SQLCHAR,
        scale: frac_part.len() as i8,
        sign,
        val: value.to_le_bytes(),
    })
}

/// Parses `YYYY-MM-DD`, `HH:MM:SS[.ffffff]` or both separated by a space.
fn temporal(s: &str) -> Result<SqlTimestampStruct> {
    let invalid = || DriverError::InvalidCharacterValue(s.to_string());
    let (date, time) = match s.split_once([' ', 'T']) {
        Some((d, t)) => (Some(d), Some(t)),
        None if s.contains(':') => (None, Some(s)),
        None => (Some(s), None),
    };
    let mut ts = SqlTimestampStruct {
        year: 0,
        month: 0,
        day: 0,
        hour: 0,
        minute: 0,
        second: 0,
        fraction: 0,
    };
    if let Some(date) = date {
        let mut it = date.splitn(3, '-');
        ts.year = it.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
        ts.month = it.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
        ts.day = it.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
        if ts.month > 12 || ts.day > 31 {
            return Err(invalid());
        }
    }
    if let Some(time) = time {
        let (clock, fraction) = time.split_once('.').unwrap_or((time, ""));
        let mut it = clock.splitn(3, ':');
        ts.hour = it.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
        ts.minute = it.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
        ts.second = it.next().and_then(|v| v.parse().ok()).ok_or_else(invalid)?;
        if ts.minute > 59 || ts.second > 59 {
            return Err(invalid());
        }
        if !fraction.is_empty() {
            if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let digits: u32 = fraction.parse().map_err(|_| invalid())?;
            ts.fraction = digits * 10u32.pow(9 - fraction.len() as u32);
        }
    }
    Ok(ts)
}
