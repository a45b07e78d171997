//! Catalog functions answered from INFORMATION_SCHEMA.

use crate::error::Result;
use crate::execute;
use crate::fetch;
use crate::handle::*;
use crate::protocol::{ColumnMeta, NativeType, Row};
use crate::types::*;

/// Result columns of `SQLColumns`, in order.
fn columns_layout(charset: &str) -> Vec<ColumnMeta> {
    let text = |name: &str, chars: u32| ColumnMeta::varchar(name, chars, charset);
    let small = |name: &str| ColumnMeta::new(name, NativeType::Short, 5);
    let int = |name: &str| ColumnMeta::new(name, NativeType::Long, 10);
    vec![
        text("TABLE_CAT", 64),
        text("TABLE_SCHEM", 64),
        text("TABLE_NAME", 64).not_null(),
        text("COLUMN_NAME", 64).not_null(),
        small("DATA_TYPE").not_null(),
        text("TYPE_NAME", 64).not_null(),
        int("COLUMN_SIZE"),
        int("BUFFER_LENGTH"),
        small("DECIMAL_DIGITS"),
        small("NUM_PREC_RADIX"),
        small("NULLABLE").not_null(),
        text("REMARKS", 2048),
        text("COLUMN_DEF", 2048),
        small("SQL_DATA_TYPE").not_null(),
        small("SQL_DATETIME_SUB"),
        int("CHAR_OCTET_LENGTH"),
        int("ORDINAL_POSITION").not_null(),
        text("IS_NULLABLE", 3),
    ]
}

const COLUMNS_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE, \
     CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE, IS_NULLABLE, \
     COLUMN_DEFAULT, ORDINAL_POSITION, COLUMN_COMMENT, CHARACTER_SET_NAME \
     FROM INFORMATION_SCHEMA.COLUMNS WHERE ";

/// SQL type, fixed column size and fixed buffer length for a server type
/// name. Sizes of character and binary types come from the catalog.
fn type_info(name: &str) -> (SQLSMALLINT, Option<u64>, Option<u64>) {
    match name {
        "char" => (SQL_CHAR, None, None),
        "varchar" | "enum" | "set" => (SQL_VARCHAR, None, None),
        "tinytext" | "text" | "mediumtext" | "longtext" | "json" => (SQL_LONGVARCHAR, None, None),
        "binary" => (SQL_BINARY, None, None),
        "varbinary" => (SQL_VARBINARY, None, None),
        "tinyblob" | "blob" | "mediumblob" | "longblob" => (SQL_LONGVARBINARY, None, None),
        "bit" => (SQL_BIT, None, Some(1)),
        "tinyint" => (SQL_TINYINT, Some(3), Some(1)),
        "smallint" => (SQL_SMALLINT, Some(5), Some(2)),
        "year" => (SQL_SMALLINT, Some(4), Some(2)),
        "mediumint" | "int" | "integer" => (SQL_INTEGER, Some(10), Some(4)),
        "bigint" => (SQL_BIGINT, Some(19), Some(8)),
        "float" => (SQL_REAL, Some(7), Some(4)),
        "double" | "real" => (SQL_DOUBLE, Some(15), Some(8)),
        "decimal" | "numeric" => (SQL_DECIMAL, None, None),
        "date" => (SQL_TYPE_DATE, Some(10), Some(6)),
        "time" => (SQL_TYPE_TIME, Some(8), Some(6)),
        "datetime" | "timestamp" => (SQL_TYPE_TIMESTAMP, Some(19), Some(16)),
        _ => (SQL_VARCHAR, None, None),
    }
}

fn is_character(sql_type: SQLSMALLINT) -> bool {
    matches!(sql_type, SQL_CHAR | SQL_VARCHAR | SQL_LONGVARCHAR)
}

fn is_binary(sql_type: SQLSMALLINT) -> bool {
    matches!(sql_type, SQL_BINARY | SQL_VARBINARY | SQL_LONGVARBINARY)
}

fn field(row: &Row, index: usize) -> Option<&[u8]> {
    row.get(index).and_then(|v| v.as_deref())
}

fn number(row: &Row, index: usize) -> Option<u64> {
    field(row, index)
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.trim().parse().ok())
}

fn text(value: impl ToString) -> Option<Vec<u8>> {
    Some(value.to_string().into_bytes())
}

/// `SQLColumns`. Table and column arguments are search patterns; the
/// catalog defaults to the current database. BUFFER_LENGTH and
/// CHAR_OCTET_LENGTH of character columns count bytes in the connection
/// charset.
pub fn columns(
    conn_cell: &ConnectionCell,
    stmt: &mut Statement,
    catalog: Option<&[u8]>,
    table: Option<&[u8]>,
    column: Option<&[u8]>,
) -> Result<Outcome> {
    execute::close_cursor(conn_cell, stmt)?;
    let mut conn = conn_cell.inner.lock();
    let charset = conn.charset;

    let quoted = |value: &[u8]| {
        let mut out = b"'".to_vec();
        charset.escape_into(value, &mut out);
        out.push(b'\'');
        out
    };
    let mut query = COLUMNS_QUERY.as_bytes().to_vec();
    match catalog.filter(|c| !c.is_empty()) {
        Some(catalog) => {
            query.extend_from_slice(b"TABLE_SCHEMA = ");
            query.extend(quoted(catalog));
        }
        None => query.extend_from_slice(b"TABLE_SCHEMA = DATABASE()"),
    }
    if let Some(table) = table.filter(|t| !t.is_empty()) {
        query.extend_from_slice(b" AND TABLE_NAME LIKE ");
        query.extend(quoted(table));
    }
    if let Some(column) = column.filter(|c| !c.is_empty()) {
        query.extend_from_slice(b" AND COLUMN_NAME LIKE ");
        query.extend(quoted(column));
    }
    query.extend_from_slice(b" ORDER BY TABLE_NAME, ORDINAL_POSITION");

    let (_, found) = execute::query_internal(&mut conn, &query)?;
    drop(conn);
    tracing::debug!(columns = found.len(), "catalog columns");

    let mbmaxlen = charset.max_bytes_per_char() as u64;
    let rows: Vec<Row> = found.iter().map(|row| columns_row(row, mbmaxlen)).collect();

    let layout = columns_layout(charset.name());
    stmt.row_count = rows.len() as SQLLEN;
    stmt.result = Some(ResultSet::new(
        layout.iter().map(fetch::describe).collect(),
        RowSource::Materialized(rows),
        charset,
    ));
    stmt.state = StmtState::HasResults;
    Ok(Outcome::Success)
}

fn columns_row(row: &Row, mbmaxlen: u64) -> Row {
    let type_name = field(row, 3)
        .map(|v| String::from_utf8_lossy(v).to_ascii_lowercase())
        .unwrap_or_default();
    let (sql_type, fixed_size, fixed_buffer) = type_info(&type_name);
    let char_len = number(row, 4);
    let precision = number(row, 5);
    let scale = number(row, 6);
    let nullable = field(row, 7).is_some_and(|v| v.eq_ignore_ascii_case(b"YES"));

    let column_size = fixed_size.or(if is_character(sql_type) || is_binary(sql_type) {
        char_len
    } else {
        precision
    });
    let octets = if is_character(sql_type) {
        char_len.map(|n| n.saturating_mul(mbmaxlen))
    } else if is_binary(sql_type) {
        char_len
    } else {
        None
    };
    let buffer_length = fixed_buffer
        .or(octets)
        .or_else(|| (sql_type == SQL_DECIMAL).then(|| precision.unwrap_or(0) + 2));
    let (sql_data_type, datetime_sub) = match sql_type {
        SQL_TYPE_DATE => (9, Some(1)),
        SQL_TYPE_TIME => (9, Some(2)),
        SQL_TYPE_TIMESTAMP => (9, Some(3)),
        other => (other, None),
    };
    let numeric = precision.is_some() && !is_character(sql_type) && !is_binary(sql_type);

    vec![
        field(row, 0).map(<[u8]>::to_vec),
        None,
        field(row, 1).map(<[u8]>::to_vec),
        field(row, 2).map(<[u8]>::to_vec),
        text(sql_type),
        text(&type_name),
        column_size.and_then(text),
        buffer_length.and_then(text),
        if numeric { text(scale.unwrap_or(0)) } else { None },
        if numeric { text(10) } else { None },
        text(if nullable { SQL_NULLABLE } else { SQL_NO_NULLS }),
        Some(field(row, 10).map(<[u8]>::to_vec).unwrap_or_default()),
        field(row, 8).map(<[u8]>::to_vec),
        text(sql_data_type),
        datetime_sub.and_then(text),
        octets.and_then(text),
        field(row, 9).map(<[u8]>::to_vec),
        text(if nullable { "YES" } else { "NO" }),
    ]
}
