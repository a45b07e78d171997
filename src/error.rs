use thiserror::Error;

use crate::protocol::ServerError;

pub type Result<T, E = DriverError> = std::result::Result<T, E>;

/// Every failure the driver can report through a diagnostic record.
///
/// The SQLSTATE for a variant is fixed; `Server` is the only variant that
/// carries a state chosen by the other side of the wire.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("Malformed connection string: {0}")]
    MalformedConnectionString(String),

    #[error("Access denied: {0}")]
    Authentication(String),

    #[error("Unable to connect: {0}")]
    Network(String),

    #[error("Communication link failure: {0}")]
    LinkFailure(String),

    #[error("Initial statement failed: {0}")]
    InitStatement(String),

    #[error("Invalid attribute value: {0}")]
    InvalidAttributeValue(String),

    #[error("Syntax error: {message}")]
    Syntax { native: i32, message: String },

    #[error("Integrity constraint violation: {message}")]
    ConstraintViolation { native: i32, message: String },

    #[error("Data at execution required for parameter {0}")]
    DeferredParameterRequired(u16),

    #[error("String data, right truncated")]
    DataTruncated,

    #[error("Connection does not exist")]
    StaleHandle,

    #[error("Operation canceled")]
    Cancelled,

    #[error("Option value changed: {0}")]
    OptionValueChanged(String),

    #[error("Function sequence error: {0}")]
    FunctionSequence(&'static str),

    #[error("Invalid cursor state")]
    InvalidCursorState,

    #[error("Invalid descriptor index {0}")]
    InvalidDescriptorIndex(usize),

    #[error("COUNT field incorrect: statement has {expected} parameters, {bound} bound")]
    CountFieldIncorrect { expected: usize, bound: usize },

    #[error("Invalid character value for cast specification: {0}")]
    InvalidCharacterValue(String),

    #[error("Numeric value out of range: {0}")]
    NumericOutOfRange(String),

    #[error("Indicator variable required but not supplied")]
    IndicatorRequired,

    #[error("Invalid string or buffer length")]
    InvalidBufferLength,

    #[error("Invalid application buffer type {0}")]
    InvalidCType(i16),

    #[error("Invalid SQL data type {0}")]
    InvalidSqlType(i16),

    #[error("Optional feature not implemented: {0}")]
    OptionalFeature(&'static str),

    #[error("Fetch type out of range")]
    FetchTypeOutOfRange,

    #[error("Login timeout expired")]
    LoginTimeout,

    #[error("{0} not allowed by driver")]
    ReservedStatement(&'static str),

    #[error("Driver runtime unavailable: {0}")]
    Runtime(String),

    #[error("Data source name not found: {0}")]
    DataSourceNotFound(String),

    #[error("Connection already open")]
    ConnectionInUse,

    #[error("{message}")]
    Server {
        sqlstate: String,
        native: i32,
        message: String,
    },
}

impl DriverError {
    pub fn sqlstate(&self) -> &str {
        match self {
            DriverError::MalformedConnectionString(_) => "HY000",
            DriverError::Authentication(_) => "28000",
            DriverError::Network(_) => "08001",
            DriverError::LinkFailure(_) => "08S01",
            DriverError::InitStatement(_) => "08004",
            DriverError::InvalidAttributeValue(_) => "HY024",
            DriverError::Syntax { .. } => "42000",
            DriverError::ConstraintViolation { .. } => "23000",
            DriverError::DeferredParameterRequired(_) => "HY000",
            DriverError::DataTruncated => "01004",
            DriverError::StaleHandle => "08003",
            DriverError::Cancelled => "HY008",
            DriverError::OptionValueChanged(_) => "01S02",
            DriverError::FunctionSequence(_) => "HY010",
            DriverError::InvalidCursorState => "24000",
            DriverError::InvalidDescriptorIndex(_) => "07009",
            DriverError::CountFieldIncorrect { .. } => "07002",
            DriverError::InvalidCharacterValue(_) => "22018",
            DriverError::NumericOutOfRange(_) => "22003",
            DriverError::IndicatorRequired => "22002",
            DriverError::InvalidBufferLength => "HY090",
            DriverError::InvalidCType(_) => "HY003",
            DriverError::InvalidSqlType(_) => "HY004",
            DriverError::OptionalFeature(_) => "HYC00",
            DriverError::FetchTypeOutOfRange => "HY106",
            DriverError::LoginTimeout => "HYT00",
            DriverError::ReservedStatement(_) => "HY000",
            DriverError::Runtime(_) => "HY000",
            DriverError::DataSourceNotFound(_) => "IM002",
            DriverError::ConnectionInUse => "08002",
            DriverError::Server { sqlstate, .. } => sqlstate,
        }
    }

    pub fn native_code(&self) -> i32 {
        match self {
            DriverError::Syntax { native, .. }
            | DriverError::ConstraintViolation { native, .. }
            | DriverError::Server { native, .. } => *native,
            _ => 0,
        }
    }

    /// Warnings accompany `SQL_SUCCESS_WITH_INFO` instead of failing the call.
    pub fn is_warning(&self) -> bool {
        self.sqlstate().starts_with("01")
    }

    /// Classifies an error raised by a failed connect attempt.
    pub fn from_connect(err: ServerError) -> Self {
        match err.sqlstate.as_str() {
            "28000" => DriverError::Authentication(err.message),
            "HYT00" => DriverError::LoginTimeout,
            s if s.starts_with("08") || s == "HY000" => DriverError::Network(err.message),
            _ => DriverError::from(err),
        }
    }
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        let native = i32::from(err.code);
        match err.sqlstate.get(..2) {
            Some("42") if err.sqlstate == "42000" => DriverError::Syntax {
                native,
                message: err.message,
            },
            Some("23") => DriverError::ConstraintViolation {
                native,
                message: err.message,
            },
            Some("08") => DriverError::LinkFailure(err.message),
            _ if err.sqlstate == "HY008" => DriverError::Cancelled,
            _ => DriverError::Server {
                sqlstate: err.sqlstate,
                native,
                message: err.message,
            },
        }
    }
}
