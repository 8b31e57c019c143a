//! Error types for the MSSQL MCP bridge.
//!
//! Every failure that leaves the pool manager or the executor is a
//! [`ServerError`]: a stable [`ErrorKind`] tag, a human-readable message, an
//! optional wrapped cause and a free-form detail map. Raw driver failures are
//! carried as [`DriverError`] until [`classify`] turns them into a kind.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Detail map attached to a structured error.
pub type Details = Map<String, Value>;

/// Stable error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Unknown,
    ConnectionError,
    ConnectionTimeout,
    QueryError,
    StoredProcedureError,
    SchemaError,
    ValidationError,
    PermissionError,
    DatabaseError,
    SqlParserError,
}

impl ErrorKind {
    /// Get the kind tag as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "Unknown",
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::ConnectionTimeout => "ConnectionTimeout",
            ErrorKind::QueryError => "QueryError",
            ErrorKind::StoredProcedureError => "StoredProcedureError",
            ErrorKind::SchemaError => "SchemaError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::PermissionError => "PermissionError",
            ErrorKind::DatabaseError => "DatabaseError",
            ErrorKind::SqlParserError => "SqlParserError",
        }
    }

    /// Whether this kind signals a broken connection or pool.
    pub fn is_connection(&self) -> bool {
        matches!(self, ErrorKind::ConnectionError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error surfaced by the core.
///
/// The kind is fixed at construction. Higher layers may add details with
/// [`ServerError::with_detail`]; a different kind means a new error that
/// keeps this one as its cause.
#[derive(Debug, Clone)]
pub struct ServerError {
    kind: ErrorKind,
    message: String,
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    details: Details,
}

impl ServerError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            details: Details::new(),
        }
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionError, msg)
    }

    /// Create a connection timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionTimeout, msg)
    }

    /// Create a schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaError, msg)
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, msg)
    }

    /// Create a permission error.
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionError, msg)
    }

    /// Create a SQL parser error.
    pub fn parser(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SqlParserError, msg)
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attach a detail entry. Existing keys are overwritten.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Look up a single detail entry.
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    /// Render the error as the JSON body returned to tool callers.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("kind".into(), Value::from(self.kind.as_str()));
        body.insert("message".into(), Value::from(self.message.clone()));
        body.insert("details".into(), Value::Object(self.details.clone()));
        if let Some(cause) = &self.cause {
            body.insert("cause".into(), Value::from(cause.to_string()));
        }
        Value::Object(body)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Raw failure reported by the database driver or the pool.
///
/// These never cross the executor or pool-manager boundary; use
/// [`ServerError::from_driver`] to classify them.
#[derive(Debug, Error)]
pub enum DriverError {
    /// TDS protocol, server or I/O error from tiberius.
    #[error(transparent)]
    Tds(#[from] tiberius::error::Error),

    /// The pool could not hand out or build a connection.
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Timed out waiting for a pooled connection.
    #[error("Timed out waiting for a pooled connection")]
    PoolTimeout,

    /// The request exceeded the configured request timeout.
    #[error("Request timeout after {} ms", .0.as_millis())]
    RequestTimeout(Duration),

    /// Anything else, described by its message.
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Create a driver error from a plain message.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// SQL Server error number, when the server reported one.
    pub fn sql_error_code(&self) -> Option<u32> {
        match self {
            DriverError::Tds(tiberius::error::Error::Server(token)) => Some(token.code()),
            _ => None,
        }
    }
}

impl From<bb8::RunError<bb8_tiberius::Error>> for DriverError {
    fn from(e: bb8::RunError<bb8_tiberius::Error>) -> Self {
        match e {
            bb8::RunError::User(inner) => DriverError::Pool(inner.to_string()),
            bb8::RunError::TimedOut => DriverError::PoolTimeout,
        }
    }
}

/// SQL Server error numbers that mean the login lacks a permission.
const PERMISSION_ERROR_CODES: &[u32] = &[229, 230, 262, 297, 300, 916];

/// SQL Server error numbers raised by constraint checks.
const CONSTRAINT_ERROR_CODES: &[u32] = &[515, 547, 2601, 2627];

/// SQL Server error numbers for a missing or unavailable database.
const DATABASE_ERROR_CODES: &[u32] = &[911, 4060];

/// Message fragments that indicate a broken connection.
const CONNECTION_MARKERS: &[&str] = &[
    "connection",
    "socket",
    "econnreset",
    "econnrefused",
    "broken pipe",
    "network",
    "not connected",
];

/// Classify a raw driver failure.
///
/// Typed signals (tiberius error variants and SQL Server error numbers) are
/// consulted first, then the message is sniffed. `fallback` is returned when
/// nothing matches. This is the only place that inspects driver errors.
pub fn classify(err: &DriverError, fallback: ErrorKind) -> ErrorKind {
    let code = err.sql_error_code();
    let message = err.to_string().to_lowercase();

    if code.is_some_and(|c| PERMISSION_ERROR_CODES.contains(&c)) || message.contains("permission")
    {
        return ErrorKind::PermissionError;
    }

    if code.is_some_and(|c| CONSTRAINT_ERROR_CODES.contains(&c)) || message.contains("constraint")
    {
        return ErrorKind::ValidationError;
    }

    if code.is_some_and(|c| DATABASE_ERROR_CODES.contains(&c))
        || message.contains("cannot open database")
        || (message.contains("database '") && message.contains("does not exist"))
    {
        return ErrorKind::DatabaseError;
    }

    if matches!(err, DriverError::PoolTimeout | DriverError::RequestTimeout(_))
        || message.contains("timeout")
        || message.contains("timed out")
    {
        return ErrorKind::ConnectionTimeout;
    }

    let typed_connection = matches!(
        err,
        DriverError::Pool(_)
            | DriverError::Tds(tiberius::error::Error::Io { .. })
            | DriverError::Tds(tiberius::error::Error::Tls(_))
            | DriverError::Tds(tiberius::error::Error::Routing { .. })
    );
    if typed_connection || CONNECTION_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorKind::ConnectionError;
    }

    fallback
}

impl ServerError {
    /// Classify a driver failure and wrap it as a structured error.
    pub fn from_driver(err: DriverError, fallback: ErrorKind, context: &str) -> Self {
        let kind = classify(&err, fallback);
        let mut error = ServerError::new(kind, format!("{}: {}", context, err));
        if let Some(code) = err.sql_error_code() {
            error = error.with_detail("sqlErrorCode", code);
        }
        error.with_cause(err)
    }
}
