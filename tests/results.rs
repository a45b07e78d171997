mod common;

use std::ptr;

use common::*;
use whisker::protocol::ColumnMeta;
use whisker::testing::{MockServer, Reply};
use whisker::*;

const NO_CACHE: &str = "1048576";

/// Reads column 1 through a 4-byte buffer and checks every piece.
fn assert_chunked_abcdefghij(hstmt: SQLHSTMT) {
    let expected: [(&[u8], SQLLEN, SQLRETURN); 4] = [
        (b"abc", 10, SQL_SUCCESS_WITH_INFO),
        (b"def", 7, SQL_SUCCESS_WITH_INFO),
        (b"ghi", 4, SQL_SUCCESS_WITH_INFO),
        (b"j", 1, SQL_SUCCESS),
    ];
    for (piece, remaining, rc_expected) in expected {
        let mut buf = [0xAAu8; 4];
        let mut ind: SQLLEN = 0;
        let rc = SQLGetData(hstmt, 1, SQL_C_CHAR, buf.as_mut_ptr() as SQLPOINTER, 4, &mut ind);
        assert_eq!(rc, rc_expected);
        if rc == SQL_SUCCESS_WITH_INFO {
            assert_eq!(stmt_state(hstmt), "01004");
        }
        assert_eq!(ind, remaining);
        assert_eq!(&buf[..piece.len()], piece);
        assert_eq!(buf[piece.len()], 0);
    }
    let mut buf = [0u8; 4];
    let mut ind: SQLLEN = 0;
    let rc = SQLGetData(hstmt, 1, SQL_C_CHAR, buf.as_mut_ptr() as SQLPOINTER, 4, &mut ind);
    assert_eq!(rc, SQL_NO_DATA);
}

#[test]
fn get_data_returns_long_values_in_pieces() {
    let conn = Conn::open("SERVER=h");
    let hstmt = conn.stmt();
    assert_eq!(exec(hstmt, "SELECT 'abcdefghij'"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_chunked_abcdefghij(hstmt);
}

#[test]
fn get_data_pieces_from_a_streamed_big5_result() {
    let server = MockServer::new();
    server.on(
        "SELECT BODY",
        Reply::Rows {
            columns: vec![ColumnMeta::varchar("body", 10, "big5")],
            rows: vec![vec![Some(b"abcdefghij".to_vec())]],
        },
    );
    let conn = Conn::open_on(server, &format!("SERVER=h;CHARSET=big5;OPTION={NO_CACHE}"));
    let hstmt = conn.stmt();
    assert_eq!(exec(hstmt, "SELECT body FROM notes"), SQL_SUCCESS);
    assert_eq!(row_count(hstmt), -1);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_chunked_abcdefghij(hstmt);
    assert_eq!(SQLFetch(hstmt), SQL_NO_DATA);
}

#[test]
fn column_size_counts_characters_in_every_charset() {
    for (conn_charset, column_charset) in [
        ("latin1", "latin1"),
        ("big5", "big5"),
        ("utf8", "utf8"),
        ("latin1", "utf8"),
    ] {
        let server = MockServer::new();
        server.on(
            "SELECT NAME",
            Reply::Rows {
                columns: vec![ColumnMeta::varchar("name", 90, column_charset)],
                rows: vec![vec![Some(b"x".to_vec())]],
            },
        );
        let conn = Conn::open_on(server, &format!("SERVER=h;CHARSET={conn_charset}"));
        let hstmt = conn.stmt();
        assert_eq!(exec(hstmt, "SELECT name FROM t"), SQL_SUCCESS);

        let mut name = [0u8; 16];
        let mut name_len: SQLSMALLINT = 0;
        let mut data_type: SQLSMALLINT = 0;
        let mut size: SQLULEN = 0;
        let mut digits: SQLSMALLINT = -1;
        let mut nullable: SQLSMALLINT = -1;
        let rc = SQLDescribeCol(
            hstmt,
            1,
            name.as_mut_ptr(),
            name.len() as SQLSMALLINT,
            &mut name_len,
            &mut data_type,
            &mut size,
            &mut digits,
            &mut nullable,
        );
        assert_eq!(rc, SQL_SUCCESS);
        assert_eq!(&name[..name_len as usize], b"name");
        assert_eq!(data_type, SQL_VARCHAR);
        assert_eq!(size, 90, "{column_charset} column on a {conn_charset} connection");
        assert_eq!(digits, 0);
        assert_eq!(nullable, SQL_NULLABLE);
    }
}

#[test]
fn describe_and_fetch_need_a_result() {
    let conn = Conn::open("SERVER=h");
    let hstmt = conn.stmt();
    let mut size: SQLULEN = 0;
    let rc = SQLDescribeCol(
        hstmt,
        1,
        ptr::null_mut(),
        0,
        ptr::null_mut(),
        ptr::null_mut(),
        &mut size,
        ptr::null_mut(),
        ptr::null_mut(),
    );
    assert_eq!(rc, SQL_ERROR);
    assert_eq!(stmt_state(hstmt), "HY010");

    assert_eq!(SQLFetch(hstmt), SQL_ERROR);
    assert_eq!(stmt_state(hstmt), "24000");

    // An update leaves no cursor behind either.
    assert_eq!(exec(hstmt, "UPDATE t SET a = 1"), SQL_SUCCESS);
    let mut cols: SQLSMALLINT = -1;
    assert_eq!(SQLNumResultCols(hstmt, &mut cols), SQL_SUCCESS);
    assert_eq!(cols, 0);
    assert_eq!(SQLCloseCursor(hstmt), SQL_ERROR);
    assert_eq!(stmt_state(hstmt), "24000");

    assert_eq!(exec(hstmt, "SELECT 1"), SQL_SUCCESS);
    let rc = SQLDescribeCol(
        hstmt,
        2,
        ptr::null_mut(),
        0,
        ptr::null_mut(),
        ptr::null_mut(),
        &mut size,
        ptr::null_mut(),
        ptr::null_mut(),
    );
    assert_eq!(rc, SQL_ERROR);
    assert_eq!(stmt_state(hstmt), "07009");
    assert_eq!(SQLCloseCursor(hstmt), SQL_SUCCESS);
}

#[test]
fn indicator_set_through_the_row_descriptor() {
    let conn = Conn::open("SERVER=h");
    let hstmt = conn.stmt();

    let mut buf = [0x55u8; 16];
    let rc = SQLBindCol(hstmt, 1, SQL_C_CHAR, buf.as_mut_ptr() as SQLPOINTER, 16, ptr::null_mut());
    assert_eq!(rc, SQL_SUCCESS);

    let mut hdesc: SQLHDESC = ptr::null_mut();
    let rc = SQLGetStmtAttr(
        hstmt,
        SQL_ATTR_APP_ROW_DESC,
        &mut hdesc as *mut SQLHDESC as SQLPOINTER,
        0,
        ptr::null_mut(),
    );
    assert_eq!(rc, SQL_SUCCESS);
    assert!(!hdesc.is_null());

    let mut ind: SQLLEN = 0;
    let rc = SQLSetDescField(
        hdesc,
        1,
        SQL_DESC_INDICATOR_PTR,
        &mut ind as *mut SQLLEN as SQLPOINTER,
        0,
    );
    assert_eq!(rc, SQL_SUCCESS);

    assert_eq!(exec(hstmt, "SELECT NULL"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(ind, SQL_NULL_DATA);
    assert_eq!(buf, [0x55u8; 16]);

    // Non-null values clear it again.
    SQLFreeStmt(hstmt, SQL_CLOSE);
    assert_eq!(exec(hstmt, "SELECT 'ok'"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(ind, 0);
    assert_eq!(&buf[..3], b"ok\0");

    SQLFreeStmt(hstmt, SQL_UNBIND);
}

#[test]
fn null_without_an_indicator_is_an_error() {
    let conn = Conn::open("SERVER=h");
    let hstmt = conn.stmt();
    assert_eq!(exec(hstmt, "SELECT NULL"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    let mut buf = [0u8; 8];
    let rc = SQLGetData(hstmt, 1, SQL_C_CHAR, buf.as_mut_ptr() as SQLPOINTER, 8, ptr::null_mut());
    assert_eq!(rc, SQL_ERROR);
    assert_eq!(stmt_state(hstmt), "22002");
}

#[test]
fn bound_column_truncation_is_a_warning() {
    let conn = Conn::open("SERVER=h");
    let hstmt = conn.stmt();
    let mut buf = [0u8; 4];
    let mut ind: SQLLEN = 0;
    let rc = SQLBindCol(hstmt, 1, SQL_C_CHAR, buf.as_mut_ptr() as SQLPOINTER, 4, &mut ind);
    assert_eq!(rc, SQL_SUCCESS);

    assert_eq!(exec(hstmt, "SELECT 'abcdefghij'"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS_WITH_INFO);
    assert_eq!(stmt_state(hstmt), "01004");
    assert_eq!(&buf, b"abc\0");
    assert_eq!(ind, 10);
    SQLFreeStmt(hstmt, SQL_UNBIND);
}

#[test]
fn gbk_trailing_backslash_survives_a_round_trip() {
    let conn = Conn::open("SERVER=h;CHARSET=gbk");
    let hstmt = conn.stmt();
    let value = [0xBFu8, 0x5C, b'\'', b'a'];
    let mut len = value.len() as SQLLEN;
    assert_eq!(prepare(hstmt, "SELECT ?"), SQL_SUCCESS);
    let rc = SQLBindParameter(
        hstmt,
        1,
        SQL_PARAM_INPUT,
        SQL_C_CHAR,
        SQL_VARCHAR,
        4,
        0,
        value.as_ptr() as SQLPOINTER,
        value.len() as SQLLEN,
        &mut len,
    );
    assert_eq!(rc, SQL_SUCCESS);
    assert_eq!(SQLExecute(hstmt), SQL_SUCCESS);

    // 0xBF5C is one character; only the quote gets a backslash.
    let sent = conn.server().raw_queries().pop().unwrap();
    assert_eq!(sent, b"SELECT '\xBF\x5C\\'a'".to_vec());

    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(get_bytes(hstmt, 1), Some(value.to_vec()));
}

#[test]
fn big5_text_converts_to_wide_characters() {
    let zhong = encoding_rs::BIG5.encode("\u{4e2d}\u{6587}").0.into_owned();
    let server = MockServer::new();
    server.on(
        "SELECT TITLE",
        Reply::Rows {
            columns: vec![ColumnMeta::varchar("title", 2, "big5")],
            rows: vec![vec![Some(zhong.clone())]],
        },
    );
    let conn = Conn::open_on(server, "SERVER=h;CHARSET=big5");
    let hstmt = conn.stmt();
    assert_eq!(exec(hstmt, "SELECT title FROM books"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);

    let mut wide = [0u16; 8];
    let mut ind: SQLLEN = 0;
    let rc = SQLGetData(
        hstmt,
        1,
        SQL_C_WCHAR,
        wide.as_mut_ptr() as SQLPOINTER,
        (wide.len() * 2) as SQLLEN,
        &mut ind,
    );
    assert_eq!(rc, SQL_SUCCESS);
    assert_eq!(ind, 4);
    assert_eq!(&wide[..3], &[0x4e2d, 0x6587, 0]);
}

#[test]
fn streamed_rows_are_parked_when_another_statement_runs() {
    let server = MockServer::new();
    server.on("SELECT NAME FROM PEOPLE", Reply::column("name", &["ann", "bob", "cid"]));
    let conn = Conn::open_on(server, &format!("SERVER=h;OPTION={NO_CACHE}"));
    let first = conn.stmt();
    let second = conn.stmt();

    assert_eq!(exec(first, "SELECT name FROM people"), SQL_SUCCESS);
    assert_eq!(row_count(first), -1);
    assert_eq!(SQLFetch(first), SQL_SUCCESS);
    assert_eq!(get_string(first, 1).as_deref(), Some("ann"));

    assert_eq!(exec(second, "SELECT 2"), SQL_SUCCESS);
    assert_eq!(SQLFetch(second), SQL_SUCCESS);
    assert_eq!(get_i64(second, 1), 2);

    assert_eq!(SQLFetchScroll(first, SQL_FETCH_FIRST, 0), SQL_ERROR);
    assert_eq!(stmt_state(first), "HY106");

    assert_eq!(SQLFetch(first), SQL_SUCCESS);
    assert_eq!(get_string(first, 1).as_deref(), Some("bob"));
    assert_eq!(SQLFetch(first), SQL_SUCCESS);
    assert_eq!(get_string(first, 1).as_deref(), Some("cid"));
    assert_eq!(SQLFetch(first), SQL_NO_DATA);
    assert_eq!(
        conn.server().queries(),
        vec!["SELECT name FROM people", "SELECT 2"]
    );
}

#[test]
fn closing_a_streamed_cursor_frees_the_session() {
    let server = MockServer::new();
    server.on("SELECT NAME FROM PEOPLE", Reply::column("name", &["ann", "bob", "cid"]));
    let conn = Conn::open_on(server, &format!("SERVER=h;OPTION={NO_CACHE}"));
    let hstmt = conn.stmt();

    assert_eq!(exec(hstmt, "SELECT name FROM people"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(SQLCloseCursor(hstmt), SQL_SUCCESS);
    assert_eq!(exec(hstmt, "SELECT 1"), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(get_i64(hstmt, 1), 1);
}

#[test]
fn static_cursor_scrolls_in_every_direction() {
    let server = MockServer::new();
    server.on("SELECT ID FROM FIVE", Reply::column("id", &["1", "2", "3", "4", "5"]));
    let conn = Conn::open_on(server, "SERVER=h");
    let hstmt = conn.stmt();
    let rc = SQLSetStmtAttr(hstmt, SQL_ATTR_CURSOR_TYPE, int_attr(SQL_CURSOR_STATIC), 0);
    assert_eq!(rc, SQL_SUCCESS);
    assert_eq!(exec(hstmt, "SELECT id FROM five"), SQL_SUCCESS);
    assert_eq!(row_count(hstmt), 5);

    let at = |orientation, offset| {
        let rc = SQLFetchScroll(hstmt, orientation, offset);
        if rc == SQL_NO_DATA {
            return None;
        }
        assert_eq!(rc, SQL_SUCCESS);
        get_string(hstmt, 1)
    };
    assert_eq!(at(SQL_FETCH_LAST, 0).as_deref(), Some("5"));
    assert_eq!(at(SQL_FETCH_PRIOR, 0).as_deref(), Some("4"));
    assert_eq!(at(SQL_FETCH_FIRST, 0).as_deref(), Some("1"));
    assert_eq!(at(SQL_FETCH_PRIOR, 0), None);
    assert_eq!(at(SQL_FETCH_NEXT, 0).as_deref(), Some("1"));
    assert_eq!(at(SQL_FETCH_ABSOLUTE, 3).as_deref(), Some("3"));
    assert_eq!(at(SQL_FETCH_RELATIVE, 1).as_deref(), Some("4"));
    assert_eq!(at(SQL_FETCH_ABSOLUTE, -2).as_deref(), Some("4"));
    assert_eq!(at(SQL_FETCH_RELATIVE, 5), None);
    assert_eq!(at(SQL_FETCH_PRIOR, 0).as_deref(), Some("5"));
}

#[test]
fn forward_only_cursor_rejects_scrolling() {
    let conn = Conn::open("SERVER=h");
    let hstmt = conn.stmt();
    assert_eq!(exec(hstmt, "SELECT 1"), SQL_SUCCESS);
    assert_eq!(SQLFetchScroll(hstmt, SQL_FETCH_FIRST, 0), SQL_ERROR);
    assert_eq!(stmt_state(hstmt), "HY106");
    assert_eq!(SQLFetchScroll(hstmt, SQL_FETCH_NEXT, 0), SQL_SUCCESS);
    assert_eq!(get_i64(hstmt, 1), 1);
}

#[test]
fn max_rows_limits_a_materialized_result() {
    let server = MockServer::new();
    server.on("SELECT ID FROM FIVE", Reply::column("id", &["1", "2", "3", "4", "5"]));
    let conn = Conn::open_on(server, "SERVER=h");
    let hstmt = conn.stmt();
    assert_eq!(SQLSetStmtAttr(hstmt, SQL_ATTR_MAX_ROWS, int_attr(2), 0), SQL_SUCCESS);
    assert_eq!(exec(hstmt, "SELECT id FROM five"), SQL_SUCCESS);
    assert_eq!(row_count(hstmt), 2);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(SQLFetch(hstmt), SQL_NO_DATA);
}

#[test]
fn columns_reports_octet_lengths_in_the_connection_charset() {
    let server = MockServer::new();
    let names = [
        "TABLE_SCHEMA", "TABLE_NAME", "COLUMN_NAME", "DATA_TYPE", "CHARACTER_MAXIMUM_LENGTH",
        "NUMERIC_PRECISION", "NUMERIC_SCALE", "IS_NULLABLE", "COLUMN_DEFAULT", "ORDINAL_POSITION",
        "COLUMN_COMMENT", "CHARACTER_SET_NAME",
    ];
    let value = |s: &str| Some(s.as_bytes().to_vec());
    server.on(
        "SELECT TABLE_SCHEMA",
        Reply::Rows {
            columns: names.iter().map(|n| ColumnMeta::varchar(*n, 64, "utf8")).collect(),
            rows: vec![
                vec![
                    value("test"), value("t"), value("name"), value("varchar"), value("30"),
                    None, None, value("YES"), None, value("1"), value(""), value("utf8"),
                ],
                vec![
                    value("test"), value("t"), value("id"), value("int"), None,
                    value("10"), value("0"), value("NO"), None, value("2"), value(""), None,
                ],
            ],
        },
    );
    let conn = Conn::open_on(server, "SERVER=h;CHARSET=utf8");
    let hstmt = conn.stmt();
    let table = "t";
    let rc = SQLColumns(
        hstmt,
        ptr::null(),
        0,
        ptr::null(),
        0,
        table.as_ptr(),
        table.len() as SQLSMALLINT,
        ptr::null(),
        0,
    );
    assert_eq!(rc, SQL_SUCCESS);

    let query = conn.server().queries().pop().unwrap();
    assert!(query.contains("TABLE_SCHEMA = DATABASE()"), "{query}");
    assert!(query.contains("TABLE_NAME LIKE 't'"), "{query}");

    let mut cols: SQLSMALLINT = 0;
    assert_eq!(SQLNumResultCols(hstmt, &mut cols), SQL_SUCCESS);
    assert_eq!(cols, 18);
    assert_eq!(row_count(hstmt), 2);

    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(get_string(hstmt, 4).as_deref(), Some("name"));
    assert_eq!(get_i64(hstmt, 5), SQL_VARCHAR as i64);
    assert_eq!(get_i64(hstmt, 7), 30);
    assert_eq!(get_i64(hstmt, 8), 90);
    assert_eq!(get_i64(hstmt, 16), 90);
    assert_eq!(get_string(hstmt, 18).as_deref(), Some("YES"));

    assert_eq!(SQLFetch(hstmt), SQL_SUCCESS);
    assert_eq!(get_string(hstmt, 4).as_deref(), Some("id"));
    assert_eq!(get_i64(hstmt, 5), SQL_INTEGER as i64);
    assert_eq!(get_i64(hstmt, 7), 10);
    assert_eq!(get_i64(hstmt, 8), 4);
    assert_eq!(get_string(hstmt, 16), None);
    assert_eq!(get_i64(hstmt, 17), 2);
    assert_eq!(SQLFetch(hstmt), SQL_NO_DATA);
}
