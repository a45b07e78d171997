//! Connection establishment and teardown.

use std::time::Duration;

use crate::attr;
use crate::buffer;
use crate::charset;
use crate::connstr::{self, ConnectionAttributes};
use crate::error::{DriverError, Result};
use crate::execute;
use crate::handle::*;
use crate::protocol::HandshakeParams;
use crate::runtime;
use crate::sql;
use crate::types::*;

/// Opens a session for `attrs`. On any failure the connection is left
/// disconnected with no session.
pub fn connect(cell: &ConnectionCell, mut attrs: ConnectionAttributes) -> Result<Outcome> {
    let mut conn = cell.inner.lock();
    if conn.is_connected() {
        return Err(DriverError::ConnectionInUse);
    }

    let dsn = attrs.get("DSN").map(str::trim).filter(|d| !d.is_empty()).map(str::to_string);
    let has_endpoint = |a: &ConnectionAttributes| a.contains("SERVER") || a.contains("SOCKET");
    if let Some(dsn) = &dsn {
        let stored = cell.env.dsn_store.read().lookup(dsn);
        match stored {
            Some(defaults) => attrs.merge_defaults(&defaults),
            None if !has_endpoint(&attrs) => return Err(DriverError::DataSourceNotFound(dsn.clone())),
            None => {}
        }
    } else if !has_endpoint(&attrs) {
        return Err(DriverError::MalformedConnectionString(
            "one of DSN, SERVER or SOCKET is required".to_string(),
        ));
    }

    let charset = charset::negotiate(&attrs)?;
    let port = attrs.port()?;
    let options = attrs.option_flags();
    let protocol = cell
        .env
        .protocol
        .read()
        .clone()
        .ok_or_else(|| DriverError::Network("no wire protocol registered".to_string()))?;

    let database = conn
        .catalog
        .clone()
        .or_else(|| attrs.get("DATABASE").filter(|d| !d.is_empty()).map(str::to_string));
    let params = HandshakeParams {
        host: attrs
            .get("SERVER")
            .filter(|s| !s.is_empty())
            .unwrap_or("localhost")
            .to_string(),
        port,
        socket: attrs.get("SOCKET").filter(|s| !s.is_empty()).map(str::to_string),
        user: attrs.get("UID").unwrap_or_default().to_string(),
        password: attrs.get("PWD").unwrap_or_default().to_string(),
        database: database.clone(),
        charset: charset.name().to_string(),
        interactive: attrs.flag("INTERACTIVE"),
        found_rows: options.contains(connstr::OptionFlags::FOUND_ROWS),
    };

    let span = tracing::info_span!("connect", host = %params.host, port, charset = charset.name());
    let _enter = span.enter();

    let login_timeout = conn.login_timeout;
    let handshake = runtime::block_on(async {
        if login_timeout == 0 {
            return Some(protocol.handshake(&params).await);
        }
        tokio::time::timeout(
            Duration::from_secs(login_timeout as u64),
            protocol.handshake(&params),
        )
        .await
        .ok()
    })?;
    let session = match handshake {
        Some(result) => result.map_err(DriverError::from_connect)?,
        None => {
            tracing::warn!(seconds = login_timeout, "login timeout expired");
            return Err(DriverError::LoginTimeout);
        }
    };
    tracing::info!(
        server_version = %session.info().version,
        connection_id = session.info().connection_id,
        "connected"
    );

    attrs.set("PORT", port.to_string());
    attrs.set("CHARSET", charset.name());
    if let Some(db) = &database {
        attrs.set("DATABASE", db.clone());
    }
    conn.session = Some(session);
    conn.attrs = attrs;
    conn.charset = charset;
    conn.options = options;
    conn.catalog = database;

    if let Err(err) = apply_session_settings(&mut conn) {
        tracing::warn!(sqlstate = err.sqlstate(), error = %err, "session setup failed");
        close_session(&mut conn);
        return Err(err);
    }
    Ok(Outcome::Success)
}

/// Replays attributes set before connecting, then INITSTMT.
fn apply_session_settings(conn: &mut Connection) -> Result<()> {
    if let Some(level) = conn.isolation {
        let stmt = attr::isolation_statement(level)?;
        execute::run_internal(conn, stmt.as_bytes())?;
    }
    if !conn.autocommit {
        execute::run_internal(conn, b"SET AUTOCOMMIT=0")?;
    }
    let init = conn
        .attrs
        .get("INITSTMT")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if let Some(init) = init {
        if sql::is_set_names(init.as_bytes(), &conn.charset) {
            return Err(DriverError::InitStatement(
                "SET NAMES is not allowed in INITSTMT".to_string(),
            ));
        }
        tracing::debug!("running INITSTMT");
        execute::run_internal(conn, init.as_bytes())
            .map_err(|e| DriverError::InitStatement(e.to_string()))?;
    }
    Ok(())
}

fn close_session(conn: &mut Connection) {
    conn.streaming = None;
    conn.parked.clear();
    if let Some(mut session) = conn.session.take() {
        if let Err(err) = runtime::block_on(session.close()) {
            tracing::warn!(error = %err, "closing session");
        }
    }
}

/// `SQLConnect`: a DSN plus optional credentials overriding the stored ones.
pub fn connect_dsn(
    cell: &ConnectionCell,
    dsn: &str,
    uid: Option<String>,
    pwd: Option<String>,
) -> Result<Outcome> {
    let mut attrs = ConnectionAttributes::new();
    attrs.set("DSN", dsn);
    if let Some(uid) = uid {
        attrs.set("UID", uid);
    }
    if let Some(pwd) = pwd {
        attrs.set("PWD", pwd);
    }
    connect(cell, attrs)
}

/// `SQLDriverConnect`. Prompting is never done; the completed connection
/// string is written to `out`, reporting its full length even when it had
/// to be truncated.
///
/// # Safety
/// `out` must hold `out_max` bytes; `out_len` must be null or writable.
pub unsafe fn driver_connect(
    cell: &ConnectionCell,
    conn_str: &str,
    out: *mut SQLCHAR,
    out_max: SQLSMALLINT,
    out_len: *mut SQLSMALLINT,
) -> Result<Outcome> {
    if out_max < 0 {
        return Err(DriverError::InvalidBufferLength);
    }
    let attrs = connstr::parse(conn_str)?;
    connect(cell, attrs)?;
    let completed = cell.inner.lock().attrs.to_output_string();
    let written = connstr::write_output(&completed, out, out_max as usize);
    buffer::write_len_i16(out_len, written.required_len);
    if written.truncated {
        return Ok(Outcome::info(DriverError::DataTruncated));
    }
    Ok(Outcome::Success)
}

/// Closes the session and turns every statement of the connection stale.
pub fn disconnect(cell: &ConnectionCell) -> Result<Outcome> {
    let mut conn = cell.inner.lock();
    if !conn.is_connected() {
        return Err(DriverError::StaleHandle);
    }
    let dropped = cell.statements.lock().clear();
    close_session(&mut conn);
    tracing::info!(statements = dropped.len(), "disconnected");
    Ok(Outcome::Success)
}

/// `SQLEndTran` on one connection.
pub fn end_tran(cell: &ConnectionCell, completion: SQLSMALLINT) -> Result<Outcome> {
    let text: &[u8] = match completion {
        SQL_COMMIT => b"COMMIT",
        SQL_ROLLBACK => b"ROLLBACK",
        other => {
            return Err(DriverError::InvalidAttributeValue(format!(
                "completion type {other}"
            )))
        }
    };
    let mut conn = cell.inner.lock();
    if !conn.is_connected() {
        return Err(DriverError::StaleHandle);
    }
    execute::run_internal(&mut conn, text)?;
    Ok(Outcome::Success)
}
