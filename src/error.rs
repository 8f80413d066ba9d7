//! Error types for the load test harness.
//!
//! Defines [`LoadTestError`] for configuration and report I/O failures and
//! [`OperationError`] for the per-operation failures that generators count
//! and log during a run.

/// Errors that occur while loading run configuration or writing reports.
///
/// None of these can happen inside [`Orchestrator::run`](crate::engine::Orchestrator::run);
/// they surface only at the CLI boundary.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// Semantic validation failure (e.g. a zero intensity).
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// The config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },

    /// A duration string such as `"30m"` could not be parsed.
    #[error("Invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// The JSON report could not be serialized.
    #[error("Failed to serialize report: {0}")]
    ReportSerialize(#[from] serde_json::Error),

    /// The JSON report could not be written.
    #[error("Failed to write report '{path}': {source}")]
    ReportIo {
        source: std::io::Error,
        path: String,
    },
}

/// A single failed operation against one backend.
///
/// Generators never propagate these: each one is logged, counted against the
/// backend's `errors`, and the loop moves on.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// SQL statement, transaction or pool failure.
    #[error("SQL error: {message}")]
    Sql { message: String },

    /// Cache command failure.
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Function invocation was rejected or failed.
    #[error("Invoke error: {message}")]
    Invoke { message: String },

    /// HTTP response with a server-side error status.
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// The operation exceeded its timeout.
    #[error("Operation timed out")]
    Timeout,

    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("Connection error: {message}")]
    Connection { message: String },
}

impl OperationError {
    /// Returns the error category as a static string for per-backend counters.
    ///
    /// Categories: `"sql"`, `"cache"`, `"invoke"`, `"http"`, `"timeout"`,
    /// `"connection"`.
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Sql { .. } => "sql",
            Self::Cache { .. } => "cache",
            Self::Invoke { .. } => "invoke",
            Self::Http { .. } => "http",
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`OperationError`] variant.
    #[cfg(feature = "http")]
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
            }
        } else {
            Self::Connection {
                message: err.to_string(),
            }
        }
    }
}
