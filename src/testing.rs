//! In-process server for exercising the driver without a network.
//!
//! `MockServer` implements [`Protocol`]. Statements are answered by handlers
//! registered against a statement prefix; a bare `SELECT` of literals is
//! evaluated directly, and session statements (`SET`, `USE`, `COMMIT`, ...)
//! succeed. Every statement received is logged so tests can assert on what
//! actually reached the wire.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::charset::Charset;
use crate::protocol::{
    ColumnMeta, HandshakeParams, NativeType, Protocol, QueryHeader, Row, ServerError, ServerInfo,
    Session,
};

/// How the server answers one statement.
#[derive(Debug, Clone)]
pub enum Reply {
    Affected(u64),
    Rows { columns: Vec<ColumnMeta>, rows: Vec<Row> },
    Error(ServerError),
    /// Answers after a pause; a cancelled wait fails with 1317.
    Delayed(Duration, Box<Reply>),
    /// Sends the rows of the inner result one at a time, each after a
    /// pause. A cancelled wait ends the result set and fails with 1317.
    Paced(Duration, Box<Reply>),
}

impl Reply {
    /// A single-column result of text values.
    pub fn column(name: &str, values: &[&str]) -> Reply {
        let width = values.iter().map(|v| v.len()).max().unwrap_or(1) as u32;
        Reply::Rows {
            columns: vec![ColumnMeta::varchar(name, width, "latin1")],
            rows: values.iter().map(|v| vec![Some(v.as_bytes().to_vec())]).collect(),
        }
    }

    pub fn syntax_error() -> Reply {
        Reply::Error(ServerError::new(
            1064,
            "42000",
            "You have an error in your SQL syntax",
        ))
    }
}

type Handler = Arc<dyn Fn(&[u8]) -> Reply + Send + Sync>;

#[derive(Default)]
struct Shared {
    users: HashMap<String, String>,
    handlers: Vec<(Vec<u8>, Handler)>,
    queries: Vec<Vec<u8>>,
    handshakes: Vec<HandshakeParams>,
    handshake_delay: Option<Duration>,
    refusing: bool,
    next_connection_id: u32,
    open_sessions: usize,
}

#[derive(Clone, Default)]
pub struct MockServer {
    shared: Arc<Mutex<Shared>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts logins to known users. With no users registered any
    /// credentials are accepted.
    pub fn with_user(self, user: &str, password: &str) -> Self {
        self.shared
            .lock()
            .users
            .insert(user.to_string(), password.to_string());
        self
    }

    /// Answers statements starting with `prefix` (case-insensitive, leading
    /// whitespace ignored). Later registrations win.
    pub fn on(&self, prefix: &str, reply: Reply) {
        self.on_fn(prefix, move |_| reply.clone());
    }

    pub fn on_fn(&self, prefix: &str, handler: impl Fn(&[u8]) -> Reply + Send + Sync + 'static) {
        self.shared
            .lock()
            .handlers
            .push((prefix.as_bytes().to_ascii_uppercase(), Arc::new(handler)));
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        self.shared.lock().handshake_delay = Some(delay);
    }

    /// Makes every handshake fail as if nothing listened on the port.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.lock().refusing = refusing;
    }

    /// Statement texts received so far, lossily decoded.
    pub fn queries(&self) -> Vec<String> {
        self.shared
            .lock()
            .queries
            .iter()
            .map(|q| String::from_utf8_lossy(q).into_owned())
            .collect()
    }

    pub fn raw_queries(&self) -> Vec<Vec<u8>> {
        self.shared.lock().queries.clone()
    }

    pub fn handshakes(&self) -> Vec<HandshakeParams> {
        self.shared.lock().handshakes.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.lock().open_sessions
    }

    pub fn clear_log(&self) {
        self.shared.lock().queries.clear();
    }

    fn answer(&self, sql: &[u8], charset: &Charset) -> Reply {
        let upper = trim(sql).to_ascii_uppercase();
        let handler = self
            .shared
            .lock()
            .handlers
            .iter()
            .rev()
            .find(|(prefix, _)| upper.starts_with(prefix))
            .map(|(_, h)| Arc::clone(h));
        if let Some(handler) = handler {
            return handler(sql);
        }
        if let Some(reply) = select_literals(trim(sql), charset) {
            return reply;
        }
        const ACCEPTED: [&[u8]; 9] = [
            b"SET ", b"USE ", b"COMMIT", b"ROLLBACK", b"CREATE ", b"DROP ", b"INSERT ",
            b"UPDATE ", b"DELETE ",
        ];
        match ACCEPTED.iter().find(|p| upper.starts_with(p)) {
            Some(p) if p.starts_with(b"INSERT") => Reply::Affected(1),
            Some(_) => Reply::Affected(0),
            None => Reply::syntax_error(),
        }
    }
}

#[async_trait]
impl Protocol for MockServer {
    async fn handshake(&self, params: &HandshakeParams) -> Result<Box<dyn Session>, ServerError> {
        let delay = self.shared.lock().handshake_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut shared = self.shared.lock();
        shared.handshakes.push(params.clone());
        if shared.refusing {
            return Err(ServerError::new(
                2003,
                "HY000",
                format!("Can't connect to server on '{}'", params.host),
            ));
        }
        if !shared.users.is_empty()
            && shared.users.get(&params.user) != Some(&params.password)
        {
            return Err(ServerError::new(
                1045,
                "28000",
                format!("Access denied for user '{}'", params.user),
            ));
        }
        let charset = Charset::lookup(&params.charset).ok_or_else(|| {
            ServerError::new(1115, "42000", format!("Unknown character set: '{}'", params.charset))
        })?;
        shared.next_connection_id += 1;
        shared.open_sessions += 1;
        Ok(Box::new(MockSession {
            server: self.clone(),
            info: ServerInfo {
                version: "8.0.36-mock".to_string(),
                connection_id: shared.next_connection_id,
            },
            charset,
            pending: None,
            pace: None,
            closed: false,
        }))
    }
}

struct MockSession {
    server: MockServer,
    info: ServerInfo,
    charset: Charset,
    /// Rows of the current result not yet read.
    pending: Option<VecDeque<Row>>,
    /// Pause before each row of the current result.
    pace: Option<Duration>,
    closed: bool,
}

#[async_trait]
impl Session for MockSession {
    fn info(&self) -> &ServerInfo {
        &self.info
    }

    async fn query(
        &mut self,
        sql: &[u8],
        cancel: &CancellationToken,
    ) -> Result<QueryHeader, ServerError> {
        if self.closed {
            return Err(ServerError::new(2006, "08S01", "Server has gone away"));
        }
        if self.pending.is_some() {
            return Err(ServerError::new(
                2014,
                "HY000",
                "Commands out of sync; you can't run this command now",
            ));
        }
        self.server.shared.lock().queries.push(sql.to_vec());
        let mut reply = self.server.answer(sql, &self.charset);
        self.pace = None;
        loop {
            match reply {
                Reply::Delayed(delay, next) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ServerError::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    reply = *next;
                }
                Reply::Paced(pace, next) => {
                    self.pace = Some(pace);
                    reply = *next;
                }
                Reply::Affected(rows) => {
                    return Ok(QueryHeader::Affected {
                        rows,
                        last_insert_id: 0,
                    })
                }
                Reply::Rows { columns, rows } => {
                    self.pending = Some(rows.into());
                    return Ok(QueryHeader::ResultSet { columns });
                }
                Reply::Error(err) => return Err(err),
            }
        }
    }

    async fn next_row(&mut self, cancel: &CancellationToken) -> Result<Option<Row>, ServerError> {
        let Some(rows) = self.pending.as_ref() else {
            return Ok(None);
        };
        if let Some(pace) = self.pace.filter(|_| !rows.is_empty()) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.pending = None;
                    return Err(ServerError::cancelled());
                }
                _ = tokio::time::sleep(pace) => {}
            }
        }
        let Some(rows) = self.pending.as_mut() else {
            return Ok(None);
        };
        let row = rows.pop_front();
        if row.is_none() {
            self.pending = None;
        }
        Ok(row)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut shared = self.server.shared.lock();
            shared.open_sessions = shared.open_sessions.saturating_sub(1);
        }
    }
}

fn trim(sql: &[u8]) -> &[u8] {
    let start = sql.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(sql.len());
    let end = sql.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |e| e + 1);
    &sql[start..end]
}

/// Evaluates `SELECT literal[, literal...]` without a FROM clause.
fn select_literals(sql: &[u8], charset: &Charset) -> Option<Reply> {
    if sql.len() < 7 || !sql[..6].eq_ignore_ascii_case(b"SELECT") || !sql[6].is_ascii_whitespace() {
        return None;
    }
    let mut parser = Literals {
        src: sql,
        pos: 6,
        charset,
    };
    let mut columns = Vec::new();
    let mut row = Vec::new();
    loop {
        parser.skip_ws();
        let start = parser.pos;
        let (meta, value) = parser.literal()?;
        let name = String::from_utf8_lossy(&sql[start..parser.pos.min(start + 64)]).into_owned();
        columns.push(ColumnMeta { name, ..meta });
        row.push(value);
        parser.skip_ws();
        match parser.peek() {
            None => break,
            Some(b',') => parser.pos += 1,
            Some(_) => return None,
        }
    }
    Some(Reply::Rows {
        columns,
        rows: vec![row],
    })
}

struct Literals<'a> {
    src: &'a [u8],
    pos: usize,
    charset: &'a Charset,
}

impl Literals<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn literal(&mut self) -> Option<(ColumnMeta, Option<Vec<u8>>)> {
        let rest = &self.src[self.pos..];
        if rest.len() >= 4 && rest[..4].eq_ignore_ascii_case(b"NULL") {
            self.pos += 4;
            return Some((ColumnMeta::new("", NativeType::VarChar, 0), None));
        }
        match self.peek()? {
            b'\'' => {
                let bytes = self.quoted()?;
                let chars = self.charset.char_count(&bytes).max(1) as u32;
                Some((ColumnMeta::varchar("", chars, self.charset.name()), Some(bytes)))
            }
            b'0' if rest.get(1).is_some_and(|b| *b == b'x' || *b == b'X') => {
                let bytes = self.hex()?;
                Some((ColumnMeta::new("", NativeType::VarChar, bytes.len() as u32), Some(bytes)))
            }
            b'_' => self.introduced(),
            b'-' | b'+' | b'0'..=b'9' => self.number(),
            _ => None,
        }
    }

    /// Reads a quoted string in the session charset and unescapes it.
    fn quoted(&mut self) -> Option<Vec<u8>> {
        self.pos += 1;
        let start = self.pos;
        loop {
            let b = self.peek()?;
            let mb = self.charset.mb_len(&self.src[self.pos..]);
            if mb > 1 {
                self.pos += mb;
                continue;
            }
            match b {
                b'\\' => self.pos += 2,
                b'\'' if self.src.get(self.pos + 1) == Some(&b'\'') => self.pos += 2,
                b'\'' => break,
                _ => self.pos += 1,
            }
        }
        let raw = self.src.get(start..self.pos)?;
        self.pos += 1;
        let doubled = raw
            .windows(2)
            .any(|w| w == b"''")
            .then(|| raw.iter().fold(Vec::new(), |mut acc, b| {
                if !(*b == b'\'' && acc.last() == Some(&b'\'')) {
                    acc.push(*b);
                }
                acc
            }));
        Some(self.charset.unescape(doubled.as_deref().unwrap_or(raw)))
    }

    fn hex(&mut self) -> Option<Vec<u8>> {
        self.pos += 2;
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let digits = &self.src[start..self.pos];
        if digits.len() % 2 != 0 {
            return None;
        }
        digits
            .chunks(2)
            .map(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
            })
            .collect()
    }

    /// `_charset 0x...` or `_charset '...'`: converted into the session
    /// charset.
    fn introduced(&mut self) -> Option<(ColumnMeta, Option<Vec<u8>>)> {
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.src[start..self.pos]).ok()?;
        let source = Charset::lookup(name)?;
        self.skip_ws();
        let bytes = match self.peek()? {
            b'\'' => self.quoted()?,
            b'0' => self.hex()?,
            _ => return None,
        };
        let text = source.decode(&bytes);
        let converted = self.charset.encode(&text).into_owned();
        let chars = text.chars().count().max(1) as u32;
        Some((ColumnMeta::varchar("", chars, self.charset.name()), Some(converted)))
    }

    fn number(&mut self) -> Option<(ColumnMeta, Option<Vec<u8>>)> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'.') {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        let digits = text.iter().filter(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        let meta = match text.iter().position(|b| *b == b'.') {
            Some(point) => ColumnMeta::new("", NativeType::Decimal, text.len() as u32)
                .with_decimals((text.len() - point - 1) as u8),
            None => ColumnMeta::new("", NativeType::LongLong, text.len() as u32),
        };
        Some((meta.not_null(), Some(text.to_vec())))
    }
}
