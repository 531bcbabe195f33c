//! # Dispatch Error Types
//!
//! Structured error handling for the dispatch engine using thiserror
//! for typed error enums instead of `Box<dyn Error>` patterns.
//!
//! Three concerns are kept separate:
//! - [`DispatchError`] - top-level errors crossing loop/store boundaries
//! - [`ClientError`] - external HTTP client failures, with retryability
//! - [`TransitionError`] - illegal status state machine edges

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the dispatch engine
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("State transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No facility adapter registered for: {0}")]
    UnknownFacility(String),

    #[error("Sharing service {0} not found")]
    ServiceNotFound(i64),

    #[error("Submission request {0} not found")]
    RequestNotFound(i64),
}

impl DispatchError {
    /// Convenience constructor for database failures with operation context
    pub fn database(operation: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Database {
            operation: operation.into(),
            message: source.to_string(),
        }
    }
}

/// External service client failures
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited (HTTP 429)")]
    RateLimited,

    #[error("Authentication rejected (HTTP 401)")]
    Unauthorized,

    #[error("Rejected by remote validation: {0}")]
    RemoteValidation(String),

    #[error("Unexpected response: HTTP {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response body: {0}")]
    MalformedResponse(String),

    #[error("Retry budget exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl ClientError {
    /// Whether the failure is transient and eligible for a bounded retry.
    ///
    /// Rate limiting and transport-level failures (connection refused,
    /// timeouts) are retryable; every other response is terminal for the
    /// current attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Transport(_) | Self::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured timeout on the error
            Self::Transport(format!("request timed out: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Illegal status transitions, one per external system vocabulary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Illegal {system} transition from '{from}' on event '{event}'")]
    Illegal {
        system: &'static str,
        from: String,
        event: String,
    },
}

pub type Result<T> = std::result::Result<T, DispatchError>;
