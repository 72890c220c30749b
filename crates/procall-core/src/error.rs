//! Error types for the call core.
//!
//! `ProcallError` is the single error type surfaced to callers of the client
//! stub and to code that builds or serves a registry. Server-side handlers
//! report failures through [`HandlerError`](crate::registry::HandlerError),
//! which the dispatcher turns into a response status instead.

use crate::status::StatusCode;
use crate::value::Value;
use std::time::Duration;
use thiserror::Error;

/// Main error type for procall.
#[derive(Debug, Error)]
pub enum ProcallError {
    // Wire errors
    #[error("Malformed message: {context}")]
    Malformed { context: String },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    // Call outcomes reported by the peer
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("Call returned status {code}")]
    Status { code: StatusCode, results: Vec<Value> },

    // Local call outcomes
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    Disconnected,

    #[error("Too many pending calls ({pending}, limit {max})")]
    TooManyPending { pending: usize, max: usize },

    // Server-side programmer errors; these close the connection
    #[error("Invariant violated: {message}")]
    InvariantViolation { message: String },

    // Start-up errors
    #[error("Collection already registered: {name}")]
    DuplicateCollection { name: String },

    #[error("Function already registered: {collection}.{function}")]
    DuplicateFunction { collection: String, function: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for procall operations.
pub type Result<T> = std::result::Result<T, ProcallError>;

impl From<std::io::Error> for ProcallError {
    fn from(err: std::io::Error) -> Self {
        ProcallError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ProcallError {
    fn from(err: serde_json::Error) -> Self {
        ProcallError::Config {
            message: format!("JSON error: {}", err),
        }
    }
}

impl ProcallError {
    /// Shorthand for a decode-time structural violation.
    pub fn malformed(context: impl Into<String>) -> Self {
        ProcallError::Malformed {
            context: context.into(),
        }
    }

    /// Convert a non-Ok response into the matching structured error.
    ///
    /// The first result value is taken as the human-readable message when it
    /// is a string; custom status codes keep their full result list.
    pub fn from_response(status: StatusCode, results: Vec<Value>) -> Self {
        let message = match results.first() {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        match status {
            StatusCode::NotFound => ProcallError::NotFound { message },
            StatusCode::InvalidArguments => ProcallError::InvalidArguments { message },
            StatusCode::Malformed => ProcallError::Malformed { context: message },
            StatusCode::Error => ProcallError::Handler { message },
            StatusCode::Ok | StatusCode::Custom(_) => ProcallError::Status {
                code: status,
                results,
            },
        }
    }

    /// The status code this error would carry on the wire.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProcallError::Malformed { .. } | ProcallError::FrameTooLarge { .. } => {
                StatusCode::Malformed
            }
            ProcallError::NotFound { .. } => StatusCode::NotFound,
            ProcallError::InvalidArguments { .. } => StatusCode::InvalidArguments,
            ProcallError::Status { code, .. } => *code,
            _ => StatusCode::Error,
        }
    }

    /// Whether the failure happened locally, without a reply from the peer.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ProcallError::Timeout(_)
                | ProcallError::Disconnected
                | ProcallError::TooManyPending { .. }
                | ProcallError::Io { .. }
        )
    }
}
