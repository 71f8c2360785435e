//! Unified error types for outpost.
//!
//! Display strings carry a stable code prefix so alerts and tool errors can be
//! matched on without parsing free text.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the outpost runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty record name).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Job rejected before execution started.
    #[error("INVALID_JOB: {0}")]
    InvalidJob(String),

    /// Runtime fault inside a compute worker.
    #[error("WORKER_FAULT: {0}")]
    WorkerFault(String),

    /// Cache namespace could not be created, read or written.
    #[error("CACHE_UNAVAILABLE: {0}")]
    CacheUnavailable(String),

    /// Live write or fetch could not reach the network.
    #[error("NETWORK_UNAVAILABLE: {0}")]
    NetworkUnavailable(String),

    /// Queued record failed after its retry budget.
    #[error("REPLAY_EXHAUSTED: record {id} failed after {attempts} attempts: {reason}")]
    ReplayExhausted { id: i64, attempts: u32, reason: String },

    /// A capability required by the operation is disabled.
    #[error("CAPABILITY_MISSING: {0}")]
    CapabilityMissing(String),

    /// The service agent is not running or dropped the request.
    #[error("AGENT_UNAVAILABLE: {0}")]
    AgentUnavailable(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// HTTP error response from the live path.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),
}

impl Error {
    /// Collapse storage-level failures into `CacheUnavailable`.
    ///
    /// Callers of the cache gateway only need to know that the cache cannot be
    /// used right now; other variants pass through untouched.
    pub fn into_cache_unavailable(self) -> Self {
        match self {
            Error::Database(e) => Error::CacheUnavailable(e.to_string()),
            Error::MigrationFailed(msg) => Error::CacheUnavailable(msg),
            other => other,
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_) | Error::HttpError(_) | Error::CacheUnavailable(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("malformed JSON: {err}"))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidJob(msg) => (-32602, msg.clone()),
            Error::WorkerFault(msg) => (-32020, msg.clone()),
            Error::CacheUnavailable(msg) => (-32021, msg.clone()),
            Error::NetworkUnavailable(msg) => (-32022, msg.clone()),
            Error::ReplayExhausted { .. } => (-32023, err.to_string()),
            Error::CapabilityMissing(msg) => (-32024, msg.clone()),
            Error::AgentUnavailable(msg) => (-32025, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::HttpError(msg) => (-32008, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
