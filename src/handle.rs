//! Handle objects behind the opaque pointers handed to applications.
//!
//! Every pointer is a `Box<Handle>`. Connections own their statements
//! through a generational arena; a statement handle keeps only a weak
//! reference to its connection and a key into that arena, so freeing or
//! disconnecting a connection turns every outstanding statement handle stale
//! instead of dangling.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::charset::Charset;
use crate::connstr::{ConnectionAttributes, OptionFlags};
use crate::cursor::CursorType;
use crate::diagnostics::Diagnostics;
use crate::error::{DriverError, Result};
use crate::protocol::{self, ColumnMeta, DsnStore, Protocol, Row, Session};
use crate::types::*;

/// What a driver operation produced, short of failing.
#[derive(Debug)]
pub enum Outcome {
    Success,
    /// Succeeded with one or more class 01 warnings.
    Info(Vec<DriverError>),
    NoData,
    NeedData,
}

impl Outcome {
    pub fn info(warning: DriverError) -> Self {
        Outcome::Info(vec![warning])
    }

    pub fn with_warnings(warnings: Vec<DriverError>) -> Self {
        if warnings.is_empty() {
            Outcome::Success
        } else {
            Outcome::Info(warnings)
        }
    }
}

// ── Arena ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtKey {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slots are reused; a key only resolves while its generation matches.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    pub fn insert_with(&mut self, make: impl FnOnce(StmtKey) -> T) -> StmtKey {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let key = StmtKey {
            index,
            generation: slot.generation,
        };
        slot.value = Some(make(key));
        key
    }

    pub fn get(&self, key: StmtKey) -> Option<&T> {
        self.slots
            .get(key.index as usize)
            .filter(|s| s.generation == key.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn remove(&mut self, key: StmtKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        Some(value)
    }

    /// Removes everything; all keys handed out so far stop resolving.
    pub fn clear(&mut self) -> Vec<T> {
        let mut drained = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                drained.push(value);
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Environment ─────────────────────────────────────────────────────

pub struct EnvCell {
    pub odbc_version: Mutex<SQLINTEGER>,
    pub protocol: RwLock<Option<Arc<dyn Protocol>>>,
    pub dsn_store: RwLock<Arc<dyn DsnStore>>,
}

impl EnvCell {
    pub fn new() -> Self {
        Self {
            odbc_version: Mutex::new(SQL_OV_ODBC3),
            protocol: RwLock::new(protocol::registered_protocol()),
            dsn_store: RwLock::new(protocol::registered_dsn_store()),
        }
    }
}

// ── Connection ──────────────────────────────────────────────────────

pub struct ConnectionCell {
    pub env: Arc<EnvCell>,
    pub inner: Mutex<Connection>,
    pub statements: Mutex<Arena<Arc<StatementCell>>>,
}

impl ConnectionCell {
    pub fn new(env: Arc<EnvCell>) -> Self {
        Self {
            env,
            inner: Mutex::new(Connection::default()),
            statements: Mutex::new(Arena::default()),
        }
    }

    pub fn statement(&self, key: StmtKey) -> Result<Arc<StatementCell>> {
        self.statements
            .lock()
            .get(key)
            .cloned()
            .ok_or(DriverError::StaleHandle)
    }
}

pub struct Connection {
    pub session: Option<Box<dyn Session>>,
    /// Attributes of the current (or last) connect, DSN defaults merged in.
    pub attrs: ConnectionAttributes,
    pub charset: Charset,
    pub options: OptionFlags,
    pub autocommit: bool,
    pub isolation: Option<SQLUINTEGER>,
    pub login_timeout: SQLUINTEGER,
    /// Stored and reported back, never enforced.
    pub connection_timeout: SQLUINTEGER,
    pub catalog: Option<String>,
    /// Statement whose result is still being streamed off the wire.
    pub streaming: Option<StmtKey>,
    /// Unread rows of streamed results, moved off the wire so another
    /// statement could use it.
    pub parked: HashMap<StmtKey, VecDeque<Row>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            session: None,
            attrs: ConnectionAttributes::new(),
            charset: Charset::latin1(),
            options: OptionFlags::empty(),
            autocommit: true,
            isolation: None,
            login_timeout: 0,
            connection_timeout: 0,
            catalog: None,
            streaming: None,
            parked: HashMap::new(),
        }
    }
}

impl Connection {
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&mut self) -> Result<&mut Box<dyn Session>> {
        self.session.as_mut().ok_or(DriverError::StaleHandle)
    }
}

// ── Descriptors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescKind {
    /// Application parameter descriptor.
    Apd,
    /// Application row descriptor.
    Ard,
}

/// One parameter or column binding. All pointers are application buffers.
#[derive(Debug, Clone, Copy)]
pub struct DescRecord {
    pub c_type: SQLSMALLINT,
    pub sql_type: SQLSMALLINT,
    pub io_type: SQLSMALLINT,
    pub column_size: SQLULEN,
    pub decimal_digits: SQLSMALLINT,
    pub data_ptr: SQLPOINTER,
    pub buffer_length: SQLLEN,
    pub octet_length_ptr: *mut SQLLEN,
    pub indicator_ptr: *mut SQLLEN,
}

impl Default for DescRecord {
    fn default() -> Self {
        Self {
            c_type: SQL_C_DEFAULT,
            sql_type: SQL_UNKNOWN_TYPE,
            io_type: SQL_PARAM_INPUT,
            column_size: 0,
            decimal_digits: 0,
            data_ptr: std::ptr::null_mut(),
            buffer_length: 0,
            octet_length_ptr: std::ptr::null_mut(),
            indicator_ptr: std::ptr::null_mut(),
        }
    }
}

impl DescRecord {
    pub fn is_bound(&self) -> bool {
        !self.data_ptr.is_null() || !self.indicator_ptr.is_null() || !self.octet_length_ptr.is_null()
    }
}

// The application owns the buffers and keeps them alive between calls.
unsafe impl Send for DescRecord {}

pub struct Descriptor {
    pub kind: DescKind,
    records: Vec<DescRecord>,
}

impl Descriptor {
    pub fn new(kind: DescKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
        }
    }

    /// Highest record number in use.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, number: usize) -> Option<&DescRecord> {
        number.checked_sub(1).and_then(|i| self.records.get(i))
    }

    /// Record `number` (1-based), growing the descriptor as needed.
    pub fn record_mut(&mut self, number: usize) -> Result<&mut DescRecord> {
        let idx = number
            .checked_sub(1)
            .ok_or(DriverError::InvalidDescriptorIndex(number))?;
        if idx >= self.records.len() {
            self.records.resize(idx + 1, DescRecord::default());
        }
        Ok(&mut self.records[idx])
    }

    pub fn unbind(&mut self, number: usize) {
        if number == self.records.len() {
            self.records.pop();
            while self.records.last().is_some_and(|r| !r.is_bound()) {
                self.records.pop();
            }
        } else if let Some(rec) = number.checked_sub(1).and_then(|i| self.records.get_mut(i)) {
            *rec = DescRecord::default();
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

pub type SharedDescriptor = Arc<Mutex<Descriptor>>;

// ── Statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtState {
    Allocated,
    Prepared,
    Executing,
    NeedData,
    HasResults,
    Closed,
}

/// Result column as reported to the application.
#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub meta: ColumnMeta,
    pub sql_type: SQLSMALLINT,
    /// In characters of the column's own charset.
    pub column_size: SQLULEN,
    pub decimal_digits: SQLSMALLINT,
    pub nullable: SQLSMALLINT,
}

pub enum RowSource {
    Materialized(Vec<Row>),
    /// Rows come off the wire (or out of the connection's parked buffer)
    /// one fetch at a time.
    Streaming { exhausted: bool },
}

pub struct ResultSet {
    pub columns: Vec<ColumnDesc>,
    /// Charset the values arrived in.
    pub charset: Charset,
    pub source: RowSource,
    /// Materialized: index of the current row, -1 before the first row,
    /// `len` after the last.
    pub position: isize,
    pub current: Option<Row>,
    /// Bytes of each column already returned by `SQLGetData` for the
    /// current row; `None` when the column has not been read yet.
    pub consumed: Vec<Option<usize>>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnDesc>, source: RowSource, charset: Charset) -> Self {
        let n = columns.len();
        Self {
            columns,
            charset,
            source,
            position: -1,
            current: None,
            consumed: vec![None; n],
        }
    }

    pub fn set_current(&mut self, row: Option<Row>) {
        self.current = row;
        self.consumed.iter_mut().for_each(|c| *c = None);
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.source, RowSource::Streaming { .. })
    }
}

/// Text and marker offsets recorded by `SQLPrepare`.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub text: Vec<u8>,
    pub markers: Vec<usize>,
}

/// Progress through data-at-execution parameters.
#[derive(Debug, Default)]
pub struct DataAtExec {
    /// Parameter numbers still owed, in order.
    pub pending: VecDeque<usize>,
    /// The parameter `SQLPutData` is currently filling.
    pub current: Option<usize>,
    pub collected: HashMap<usize, Option<Vec<u8>>>,
}

pub struct Statement {
    pub key: StmtKey,
    pub state: StmtState,
    pub prepared: Option<Prepared>,
    pub apd: SharedDescriptor,
    pub ard: SharedDescriptor,
    pub cursor_type: CursorType,
    pub max_rows: SQLULEN,
    pub query_timeout: SQLULEN,
    pub result: Option<ResultSet>,
    pub row_count: SQLLEN,
    pub dae: Option<DataAtExec>,
}

impl Statement {
    pub fn new(key: StmtKey, apd: SharedDescriptor, ard: SharedDescriptor) -> Self {
        Self {
            key,
            state: StmtState::Allocated,
            prepared: None,
            apd,
            ard,
            cursor_type: CursorType::ForwardOnly,
            max_rows: 0,
            query_timeout: 0,
            result: None,
            row_count: -1,
            dae: None,
        }
    }
}

pub struct StatementCell {
    pub inner: Mutex<Statement>,
    /// Token of the execution in flight; locked separately from `inner` so
    /// `SQLCancel` from another thread never waits on the executing one.
    pub cancel: Mutex<Option<CancellationToken>>,
}

impl StatementCell {
    pub fn new(statement: Statement) -> Self {
        Self {
            inner: Mutex::new(statement),
            cancel: Mutex::new(None),
        }
    }

    /// Installs a fresh token for an execution. The statement stays
    /// cancellable until the returned guard is dropped.
    pub fn arm(&self) -> Armed<'_> {
        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());
        Armed { cell: self, token }
    }

    /// Fires the in-flight token; false when nothing is executing.
    pub fn fire(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

pub struct Armed<'a> {
    cell: &'a StatementCell,
    pub token: CancellationToken,
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        *self.cell.cancel.lock() = None;
    }
}

// ── Opaque handles ──────────────────────────────────────────────────

pub struct StmtHandle {
    pub conn: Weak<ConnectionCell>,
    pub key: StmtKey,
    /// Implicit descriptors, exposed through `SQL_ATTR_APP_*_DESC`.
    pub apd: Box<Handle>,
    pub ard: Box<Handle>,
}

impl StmtHandle {
    pub fn connection(&self) -> Result<Arc<ConnectionCell>> {
        self.conn.upgrade().ok_or(DriverError::StaleHandle)
    }

    pub fn resolve(&self) -> Result<(Arc<ConnectionCell>, Arc<StatementCell>)> {
        let conn = self.connection()?;
        let stmt = conn.statement(self.key)?;
        Ok((conn, stmt))
    }
}

pub enum HandleKind {
    Env(Arc<EnvCell>),
    Dbc(Arc<ConnectionCell>),
    Stmt(StmtHandle),
    Desc(SharedDescriptor),
}

pub struct Handle {
    pub kind: HandleKind,
    pub diagnostics: Mutex<Diagnostics>,
}

impl Handle {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            diagnostics: Mutex::new(Diagnostics::default()),
        }
    }

    pub fn into_raw(self) -> SQLHANDLE {
        Box::into_raw(Box::new(self)) as SQLHANDLE
    }

    /// # Safety
    /// `ptr` must be null or come from `into_raw` and not have been freed.
    pub unsafe fn from_raw<'a>(ptr: SQLHANDLE) -> Option<&'a Handle> {
        (ptr as *const Handle).as_ref()
    }

    /// # Safety
    /// As for `from_raw`; the handle must not be used afterwards.
    pub unsafe fn free_raw(ptr: SQLHANDLE) {
        if !ptr.is_null() {
            drop(Box::from_raw(ptr as *mut Handle));
        }
    }

    pub fn handle_type(&self) -> SQLSMALLINT {
        match self.kind {
            HandleKind::Env(_) => SQL_HANDLE_ENV,
            HandleKind::Dbc(_) => SQL_HANDLE_DBC,
            HandleKind::Stmt(_) => SQL_HANDLE_STMT,
            HandleKind::Desc(_) => SQL_HANDLE_DESC,
        }
    }

    pub fn as_env(&self) -> Option<&Arc<EnvCell>> {
        match &self.kind {
            HandleKind::Env(env) => Some(env),
            _ => None,
        }
    }

    pub fn as_dbc(&self) -> Option<&Arc<ConnectionCell>> {
        match &self.kind {
            HandleKind::Dbc(conn) => Some(conn),
            _ => None,
        }
    }

    pub fn as_stmt(&self) -> Option<&StmtHandle> {
        match &self.kind {
            HandleKind::Stmt(stmt) => Some(stmt),
            _ => None,
        }
    }

    pub fn as_desc(&self) -> Option<&SharedDescriptor> {
        match &self.kind {
            HandleKind::Desc(desc) => Some(desc),
            _ => None,
        }
    }

    /// Turns an operation result into a return code, recording diagnostics.
    pub fn finish(&self, result: Result<Outcome>) -> SQLRETURN {
        let mut diags = self.diagnostics.lock();
        match result {
            Ok(Outcome::Success) => SQL_SUCCESS,
            Ok(Outcome::NoData) => SQL_NO_DATA,
            Ok(Outcome::NeedData) => SQL_NEED_DATA,
            Ok(Outcome::Info(warnings)) => {
                warnings.iter().for_each(|w| diags.push(w));
                SQL_SUCCESS_WITH_INFO
            }
            Err(err) => {
                tracing::debug!(sqlstate = err.sqlstate(), error = %err, "call failed");
                diags.push(&err);
                SQL_ERROR
            }
        }
    }
}

/// Allocates a statement on `conn` together with its implicit descriptors.
pub fn alloc_statement(conn: &Arc<ConnectionCell>) -> Result<Handle> {
    if !conn.inner.lock().is_connected() {
        return Err(DriverError::StaleHandle);
    }
    let apd: SharedDescriptor = Arc::new(Mutex::new(Descriptor::new(DescKind::Apd)));
    let ard: SharedDescriptor = Arc::new(Mutex::new(Descriptor::new(DescKind::Ard)));
    let key = conn.statements.lock().insert_with(|key| {
        Arc::new(StatementCell::new(Statement::new(
            key,
            Arc::clone(&apd),
            Arc::clone(&ard),
        )))
    });
    Ok(Handle::new(HandleKind::Stmt(StmtHandle {
        conn: Arc::downgrade(conn),
        key,
        apd: Box::new(Handle::new(HandleKind::Desc(apd))),
        ard: Box::new(Handle::new(HandleKind::Desc(ard))),
    })))
}
