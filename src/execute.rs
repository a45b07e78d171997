use std::collections::{HashMap, VecDeque};

use tokio_util::sync::CancellationToken;

use crate::buffer;
use crate::charset::Charset;
use crate::connstr::OptionFlags;
use crate::cursor::{self, CursorType};
use crate::error::{DriverError, Result};
use crate::fetch;
use crate::handle::*;
use crate::params;
use crate::protocol::{ColumnMeta, QueryHeader, Row, ServerError, Session};
use crate::runtime;
use crate::sql;
use crate::types::*;

/// What the last part of an executed batch left behind.
enum Executed {
    Affected(u64),
    Rows(Vec<ColumnMeta>, Vec<Row>),
    Stream(Vec<ColumnMeta>),
}

async fn drain(
    session: &mut dyn Session,
    cancel: &CancellationToken,
) -> std::result::Result<VecDeque<Row>, ServerError> {
    let mut rows = VecDeque::new();
    while let Some(row) = session.next_row(cancel).await? {
        rows.push_back(row);
    }
    Ok(rows)
}

/// Moves the unread rows of a streaming statement into the connection's
/// parked buffer so the session is free for another exchange.
pub fn park_stream(conn: &mut Connection, requester: Option<StmtKey>) -> Result<()> {
    let Some(owner) = conn.streaming else {
        return Ok(());
    };
    if Some(owner) == requester {
        return Ok(());
    }
    conn.streaming = None;
    let session = conn.session()?;
    let rows = runtime::block_on(drain(session.as_mut(), &CancellationToken::new()))??;
    tracing::debug!(rows = rows.len(), "parked unread rows of a streaming result");
    conn.parked.insert(owner, rows);
    Ok(())
}

/// Runs a driver-issued statement and discards any result rows.
pub fn run_internal(conn: &mut Connection, text: &[u8]) -> Result<()> {
    park_stream(conn, None)?;
    let session = conn.session()?;
    runtime::block_on(async {
        let token = CancellationToken::new();
        if let QueryHeader::ResultSet { .. } = session.query(text, &token).await? {
            drain(session.as_mut(), &token).await?;
        }
        Ok::<_, ServerError>(())
    })??;
    Ok(())
}

/// Runs a driver-issued query and returns its rows.
pub fn query_internal(conn: &mut Connection, text: &[u8]) -> Result<(Vec<ColumnMeta>, Vec<Row>)> {
    park_stream(conn, None)?;
    let session = conn.session()?;
    let result = runtime::block_on(async {
        let token = CancellationToken::new();
        match session.query(text, &token).await? {
            QueryHeader::ResultSet { columns } => {
                let rows = drain(session.as_mut(), &token).await?;
                Ok::<_, ServerError>((columns, rows.into()))
            }
            QueryHeader::Affected { .. } => Ok((Vec::new(), Vec::new())),
        }
    })??;
    Ok(result)
}

/// Closes the open cursor, if any. Unread streamed rows are discarded.
pub fn close_cursor(conn_cell: &ConnectionCell, stmt: &mut Statement) -> Result<()> {
    let Some(result) = stmt.result.take() else {
        return Ok(());
    };
    if result.is_streaming() {
        let mut conn = conn_cell.inner.lock();
        conn.parked.remove(&stmt.key);
        if conn.streaming == Some(stmt.key) {
            conn.streaming = None;
            let session = conn.session()?;
            runtime::block_on(drain(session.as_mut(), &CancellationToken::new()))??;
        }
    }
    if stmt.state == StmtState::HasResults {
        stmt.state = StmtState::Closed;
    }
    Ok(())
}

/// `SQLCloseCursor`: unlike `SQLFreeStmt(SQL_CLOSE)` it requires an open
/// cursor.
pub fn close_cursor_checked(conn_cell: &ConnectionCell, stmt: &mut Statement) -> Result<Outcome> {
    if stmt.result.is_none() {
        return Err(DriverError::InvalidCursorState);
    }
    close_cursor(conn_cell, stmt)?;
    Ok(Outcome::Success)
}

pub fn prepare(conn_cell: &ConnectionCell, stmt: &mut Statement, text: Vec<u8>) -> Result<Outcome> {
    if stmt.state == StmtState::NeedData {
        return Err(DriverError::FunctionSequence("data-at-execution in progress"));
    }
    close_cursor(conn_cell, stmt)?;
    let charset = conn_cell.inner.lock().charset;
    let markers = sql::placeholders(&text, &charset);
    tracing::trace!(markers = markers.len(), "prepared statement");
    stmt.prepared = Some(Prepared { text, markers });
    stmt.state = StmtState::Prepared;
    stmt.row_count = -1;
    Ok(Outcome::Success)
}

pub fn exec_direct(
    conn_cell: &ConnectionCell,
    cell: &StatementCell,
    stmt: &mut Statement,
    text: Vec<u8>,
) -> Result<Outcome> {
    let armed = cell.arm();
    prepare(conn_cell, stmt, text)?;
    execute_armed(conn_cell, stmt, &armed.token)
}

pub fn execute(conn_cell: &ConnectionCell, cell: &StatementCell, stmt: &mut Statement) -> Result<Outcome> {
    let armed = cell.arm();
    execute_armed(conn_cell, stmt, &armed.token)
}

/// Runs under a token armed by the caller before any connection lock is
/// taken, so a cancel that arrives while the call waits for the connection
/// is not lost.
fn execute_armed(
    conn_cell: &ConnectionCell,
    stmt: &mut Statement,
    token: &CancellationToken,
) -> Result<Outcome> {
    if stmt.state == StmtState::NeedData {
        return Err(DriverError::FunctionSequence("data-at-execution in progress"));
    }
    let expected = match &stmt.prepared {
        Some(prepared) => prepared.markers.len(),
        None => return Err(DriverError::FunctionSequence("no statement prepared")),
    };
    close_cursor(conn_cell, stmt)?;

    let pending = {
        let apd = stmt.apd.lock();
        let mut pending = VecDeque::new();
        for number in 1..=expected {
            let rec = apd
                .record(number)
                .filter(|r| r.is_bound())
                .ok_or(DriverError::CountFieldIncorrect {
                    expected,
                    bound: apd.count().min(expected),
                })?;
            if unsafe { params::is_data_at_exec(rec) } {
                pending.push_back(number);
            }
        }
        pending
    };

    if !pending.is_empty() {
        tracing::debug!(params = pending.len(), "waiting for data-at-execution parameters");
        stmt.dae = Some(DataAtExec {
            pending,
            ..DataAtExec::default()
        });
        stmt.state = StmtState::NeedData;
        return Ok(Outcome::NeedData);
    }
    run(conn_cell, stmt, &HashMap::new(), token)
}

/// `SQLParamData`: hands out the next deferred parameter's data pointer, or
/// runs the statement once every deferred value has been supplied.
pub unsafe fn param_data(
    conn_cell: &ConnectionCell,
    cell: &StatementCell,
    stmt: &mut Statement,
    value_out: *mut SQLPOINTER,
) -> Result<Outcome> {
    if stmt.state != StmtState::NeedData {
        return Err(DriverError::FunctionSequence("no data-at-execution parameter pending"));
    }
    let armed = cell.arm();
    let next = match stmt.dae.as_mut() {
        Some(dae) => {
            let next = dae.pending.pop_front();
            dae.current = next;
            next
        }
        None => return Err(DriverError::FunctionSequence("no data-at-execution parameter pending")),
    };
    if let Some(number) = next {
        if !value_out.is_null() {
            *value_out = stmt
                .apd
                .lock()
                .record(number)
                .map(|r| r.data_ptr)
                .unwrap_or(std::ptr::null_mut());
        }
        return Ok(Outcome::NeedData);
    }

    let collected = stmt.dae.take().map(|d| d.collected).unwrap_or_default();
    stmt.state = StmtState::Prepared;
    run(conn_cell, stmt, &collected, &armed.token)
}

/// `SQLPutData`: appends a chunk to the parameter selected by the last
/// `SQLParamData`.
pub unsafe fn put_data(stmt: &mut Statement, data: SQLPOINTER, len: SQLLEN) -> Result<Outcome> {
    let number = match (stmt.state, stmt.dae.as_ref().and_then(|d| d.current)) {
        (StmtState::NeedData, Some(number)) => number,
        _ => return Err(DriverError::FunctionSequence("no parameter selected by SQLParamData")),
    };
    let rec = stmt
        .apd
        .lock()
        .record(number)
        .copied()
        .ok_or(DriverError::InvalidDescriptorIndex(number))?;
    let Some(dae) = stmt.dae.as_mut() else {
        return Err(DriverError::FunctionSequence("no parameter selected by SQLParamData"));
    };
    let slot = dae.collected.entry(number).or_insert_with(|| Some(Vec::new()));
    if len == SQL_NULL_DATA {
        *slot = None;
        return Ok(Outcome::Success);
    }
    let chunk = params::chunk_bytes(&rec, data, len)?;
    match slot {
        Some(bytes) => bytes.extend_from_slice(&chunk),
        None => *slot = Some(chunk),
    }
    Ok(Outcome::Success)
}

/// `SQLCancel`. An execution in flight is interrupted through its token and
/// fails with HY008 on its own thread; a statement waiting for deferred data
/// drops it.
pub fn cancel(cell: &StatementCell) -> Result<Outcome> {
    if cell.fire() {
        tracing::info!("cancel requested for executing statement");
        return Ok(Outcome::Success);
    }
    if let Some(mut stmt) = cell.inner.try_lock() {
        if stmt.state == StmtState::NeedData {
            stmt.dae = None;
            stmt.prepared = None;
            stmt.state = StmtState::Allocated;
        }
    }
    Ok(Outcome::Success)
}

fn run(
    conn_cell: &ConnectionCell,
    stmt: &mut Statement,
    deferred: &HashMap<usize, Option<Vec<u8>>>,
    token: &CancellationToken,
) -> Result<Outcome> {
    let Some(prepared) = stmt.prepared.clone() else {
        return Err(DriverError::FunctionSequence("no statement prepared"));
    };
    let mut conn = conn_cell.inner.lock();
    if !conn.is_connected() {
        return Err(DriverError::StaleHandle);
    }
    if token.is_cancelled() {
        tracing::info!("statement cancelled before it reached the server");
        stmt.row_count = -1;
        return Err(DriverError::Cancelled);
    }
    let charset = conn.charset;
    let options = conn.options;

    let literals = {
        let apd = stmt.apd.lock();
        params::literals(&apd, prepared.markers.len(), &charset, deferred)?
    };
    let text = sql::substitute(&prepared.text, &prepared.markers, &literals);
    let text = sql::native_sql(&text, &charset);
    let parts = batch_parts(&text, &charset, options)?;

    park_stream(&mut conn, Some(stmt.key))?;
    let stream = options.contains(OptionFlags::NO_CACHE)
        && cursor::effective(options, stmt.cursor_type) == CursorType::ForwardOnly;

    tracing::debug!(
        parts = parts.len(),
        keyword = sql::first_keyword(&text, &charset).as_deref().unwrap_or(""),
        stream,
        "executing statement"
    );
    stmt.state = StmtState::Executing;
    let session = conn.session()?;
    let result = runtime::block_on(run_parts(session.as_mut(), &parts, token, stream));

    let executed = match result.and_then(|r| r.map_err(DriverError::from)) {
        Ok(executed) => executed,
        Err(err) => {
            if matches!(err, DriverError::Cancelled) {
                tracing::info!("statement cancelled");
            }
            stmt.state = StmtState::Prepared;
            stmt.row_count = -1;
            return Err(err);
        }
    };

    match executed {
        Executed::Affected(rows) => {
            stmt.row_count = rows as SQLLEN;
            stmt.state = StmtState::Prepared;
        }
        Executed::Rows(columns, mut rows) => {
            if stmt.max_rows > 0 {
                rows.truncate(stmt.max_rows);
            }
            stmt.row_count = rows.len() as SQLLEN;
            stmt.result = Some(ResultSet::new(
                columns.iter().map(fetch::describe).collect(),
                RowSource::Materialized(rows),
                charset,
            ));
            stmt.state = StmtState::HasResults;
        }
        Executed::Stream(columns) => {
            conn.streaming = Some(stmt.key);
            stmt.row_count = -1;
            stmt.result = Some(ResultSet::new(
                columns.iter().map(fetch::describe).collect(),
                RowSource::Streaming { exhausted: false },
                charset,
            ));
            stmt.state = StmtState::HasResults;
        }
    }
    Ok(Outcome::Success)
}

fn batch_parts<'a>(text: &'a [u8], charset: &Charset, options: OptionFlags) -> Result<Vec<&'a [u8]>> {
    let parts = if options.contains(OptionFlags::MULTI_STATEMENTS) {
        sql::split_batch(text, charset)
    } else {
        vec![text]
    };
    if parts.iter().any(|part| sql::is_set_names(part, charset)) {
        return Err(DriverError::ReservedStatement("SET NAMES"));
    }
    Ok(parts)
}

async fn run_parts(
    session: &mut dyn Session,
    parts: &[&[u8]],
    cancel: &CancellationToken,
    stream: bool,
) -> std::result::Result<Executed, ServerError> {
    let mut last = Executed::Affected(0);
    for (i, part) in parts.iter().enumerate() {
        let is_last = i + 1 == parts.len();
        last = match session.query(part, cancel).await? {
            QueryHeader::Affected { rows, .. } => Executed::Affected(rows),
            QueryHeader::ResultSet { columns } if is_last && stream => Executed::Stream(columns),
            QueryHeader::ResultSet { columns } => {
                let rows = drain(session, cancel).await?;
                Executed::Rows(columns, rows.into())
            }
        };
    }
    Ok(last)
}

pub fn num_params(stmt: &Statement) -> Result<usize> {
    stmt.prepared
        .as_ref()
        .map(|p| p.markers.len())
        .ok_or(DriverError::FunctionSequence("no statement prepared"))
}

/// `SQLNativeSql`. The returned length is always the full translated
/// length, whether or not it fit.
pub unsafe fn native_sql(
    conn_cell: &ConnectionCell,
    text: &[u8],
    out: *mut SQLCHAR,
    out_max: SQLINTEGER,
    out_len: *mut SQLINTEGER,
) -> Result<Outcome> {
    if out_max < 0 {
        return Err(DriverError::InvalidBufferLength);
    }
    let charset = conn_cell.inner.lock().charset;
    let translated = sql::native_sql(text, &charset);
    buffer::write_len_i32(out_len, translated.len());
    if buffer::write_bytes(&translated, out, out_max as usize) {
        return Ok(Outcome::info(DriverError::DataTruncated));
    }
    Ok(Outcome::Success)
}
