//! Collaborators the driver consumes but does not implement: the server
//! protocol, the DSN registry and the byte transport underneath them.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::connstr::ConnectionAttributes;
use crate::types::*;

/// An error reported by the server or by the link to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{sqlstate}] ({code}) {message}")]
pub struct ServerError {
    pub code: u16,
    pub sqlstate: String,
    pub message: String,
}

impl ServerError {
    pub fn new(code: u16, sqlstate: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            sqlstate: sqlstate.to_string(),
            message: message.into(),
        }
    }

    pub fn link(err: io::Error) -> Self {
        Self::new(2013, "08S01", format!("lost connection to server: {err}"))
    }

    pub fn cancelled() -> Self {
        Self::new(1317, "HY008", "query execution was interrupted")
    }
}

/// Column types as the server reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeType {
    Bit,
    Tiny,
    Short,
    Long,
    LongLong,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    DateTime,
    Timestamp,
    Year,
    VarChar,
    String,
    Blob,
}

impl NativeType {
    /// The SQL type reported to applications. `binary` marks string and blob
    /// columns carrying the binary charset.
    pub fn sql_type(self, binary: bool) -> SQLSMALLINT {
        match self {
            NativeType::Bit => SQL_BIT,
            NativeType::Tiny => SQL_TINYINT,
            NativeType::Short | NativeType::Year => SQL_SMALLINT,
            NativeType::Long => SQL_INTEGER,
            NativeType::LongLong => SQL_BIGINT,
            NativeType::Float => SQL_REAL,
            NativeType::Double => SQL_DOUBLE,
            NativeType::Decimal => SQL_DECIMAL,
            NativeType::Date => SQL_TYPE_DATE,
            NativeType::Time => SQL_TYPE_TIME,
            NativeType::DateTime | NativeType::Timestamp => SQL_TYPE_TIMESTAMP,
            NativeType::VarChar if binary => SQL_VARBINARY,
            NativeType::VarChar => SQL_VARCHAR,
            NativeType::String if binary => SQL_BINARY,
            NativeType::String => SQL_CHAR,
            NativeType::Blob if binary => SQL_LONGVARBINARY,
            NativeType::Blob => SQL_LONGVARCHAR,
        }
    }

    pub fn is_character(self) -> bool {
        matches!(self, NativeType::VarChar | NativeType::String | NativeType::Blob)
    }
}

/// Result column metadata. `length` is in bytes of the column's own charset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub native_type: NativeType,
    pub length: u32,
    pub charset: String,
    pub decimals: u8,
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, native_type: NativeType, length: u32) -> Self {
        Self {
            name: name.into(),
            native_type,
            length,
            charset: "binary".to_string(),
            decimals: 0,
            nullable: true,
        }
    }

    /// A character column declared as `chars` characters wide in `charset`.
    pub fn varchar(name: impl Into<String>, chars: u32, charset: &str) -> Self {
        let mbmaxlen = crate::charset::Charset::lookup(charset)
            .map(|c| c.max_bytes_per_char() as u32)
            .unwrap_or(1);
        Self {
            charset: charset.to_string(),
            ..Self::new(name, NativeType::VarChar, chars * mbmaxlen)
        }
    }

    pub fn with_charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_string();
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn is_binary(&self) -> bool {
        self.charset.eq_ignore_ascii_case("binary")
    }
}

/// One row in the text protocol; `None` is SQL NULL.
pub type Row = Vec<Option<Vec<u8>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryHeader {
    Affected { rows: u64, last_insert_id: u64 },
    ResultSet { columns: Vec<ColumnMeta> },
}

#[derive(Debug, Clone, Default)]
pub struct HandshakeParams {
    pub host: String,
    pub port: u16,
    pub socket: Option<String>,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub charset: String,
    pub interactive: bool,
    pub found_rows: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub version: String,
    pub connection_id: u32,
}

/// An authenticated server session. One statement at a time; after a
/// `ResultSet` header, rows must be drained with `next_row` before the next
/// `query`.
#[async_trait]
pub trait Session: Send {
    fn info(&self) -> &ServerInfo;

    async fn query(
        &mut self,
        sql: &[u8],
        cancel: &CancellationToken,
    ) -> Result<QueryHeader, ServerError>;

    /// `Ok(None)` once the current result set is exhausted. A cancelled
    /// read ends the result set; the session then accepts the next `query`.
    async fn next_row(&mut self, cancel: &CancellationToken) -> Result<Option<Row>, ServerError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Protocol: Send + Sync {
    async fn handshake(&self, params: &HandshakeParams) -> Result<Box<dyn Session>, ServerError>;
}

pub trait DsnStore: Send + Sync {
    fn lookup(&self, dsn: &str) -> Option<ConnectionAttributes>;
}

/// DSN registry held in memory, keyed case-insensitively.
#[derive(Default)]
pub struct MemoryDsnStore {
    entries: RwLock<HashMap<String, ConnectionAttributes>>,
}

impl MemoryDsnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dsn: &str, attrs: ConnectionAttributes) {
        self.entries.write().insert(dsn.to_ascii_uppercase(), attrs);
    }
}

impl DsnStore for MemoryDsnStore {
    fn lookup(&self, dsn: &str) -> Option<ConnectionAttributes> {
        self.entries.read().get(&dsn.to_ascii_uppercase()).cloned()
    }
}

static PROTOCOL: Lazy<RwLock<Option<Arc<dyn Protocol>>>> = Lazy::new(|| RwLock::new(None));
static DSN_STORE: Lazy<RwLock<Arc<dyn DsnStore>>> =
    Lazy::new(|| RwLock::new(Arc::new(MemoryDsnStore::new())));

/// Sets the protocol picked up by environments allocated afterwards.
pub fn register_protocol(protocol: Arc<dyn Protocol>) {
    *PROTOCOL.write() = Some(protocol);
}

pub fn register_dsn_store(store: Arc<dyn DsnStore>) {
    *DSN_STORE.write() = store;
}

pub(crate) fn registered_protocol() -> Option<Arc<dyn Protocol>> {
    PROTOCOL.read().clone()
}

pub(crate) fn registered_dsn_store() -> Arc<dyn DsnStore> {
    DSN_STORE.read().clone()
}

/// A message-oriented byte link to the server.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, payload: &[u8]) -> Result<(), ServerError>;

    /// Waits for the next message. Cancellation is only honoured before a
    /// message starts arriving, so a cancelled receive never splits a frame.
    async fn receive(&mut self, cancel: &CancellationToken) -> Result<Vec<u8>, ServerError>;

    async fn close(&mut self);
}

const MAX_FRAME: usize = 0xFF_FFFF;

/// Length-prefixed framing over TCP: a 3-byte little-endian payload length
/// and a 1-byte sequence number precede every frame. Messages of
/// `MAX_FRAME` bytes or more span several frames, the last one shorter.
pub struct TcpTransport {
    stream: TcpStream,
    sequence: u8,
}

impl TcpTransport {
    pub async fn connect(host: &str, port: u16) -> Result<Self, ServerError> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            ServerError::new(2003, "08001", format!("can't connect to server on '{host}:{port}': {e}"))
        })?;
        stream.set_nodelay(true).map_err(ServerError::link)?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream, sequence: 0 }
    }

    /// Starts a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    async fn read_frame(&mut self) -> Result<(usize, Vec<u8>), ServerError> {
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(ServerError::link)?;
        let len = usize::from(header[0]) | usize::from(header[1]) << 8 | usize::from(header[2]) << 16;
        self.sequence = header[3].wrapping_add(1);
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(ServerError::link)?;
        Ok((len, payload))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, payload: &[u8]) -> Result<(), ServerError> {
        let mut last_len = 0;
        for chunk in payload.chunks(MAX_FRAME) {
            let len = chunk.len();
            let header = [len as u8, (len >> 8) as u8, (len >> 16) as u8, self.sequence];
            self.sequence = self.sequence.wrapping_add(1);
            self.stream.write_all(&header).await.map_err(ServerError::link)?;
            self.stream.write_all(chunk).await.map_err(ServerError::link)?;
            last_len = len;
        }
        if payload.is_empty() || last_len == MAX_FRAME {
            let header = [0, 0, 0, self.sequence];
            self.sequence = self.sequence.wrapping_add(1);
            self.stream.write_all(&header).await.map_err(ServerError::link)?;
        }
        self.stream.flush().await.map_err(ServerError::link)
    }

    async fn receive(&mut self, cancel: &CancellationToken) -> Result<Vec<u8>, ServerError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ServerError::cancelled()),
            ready = self.stream.readable() => ready.map_err(ServerError::link)?,
        }
        let mut message = Vec::new();
        loop {
            let (len, payload) = self.read_frame().await?;
            message.extend_from_slice(&payload);
            if len < MAX_FRAME {
                return Ok(message);
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
    }
}
