//! Error types for the API client.

use leoscope_proto::{ApiError, ErrorCode};
use thiserror::Error;

/// Errors surfaced to API callers.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The coordinator rejected the call with a structured error.
    #[error("{} ({})", .0.message, .0.code)]
    Api(ApiError),

    /// Transport-layer failure (connection, timeout, decode).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Retry budget exhausted; wraps the final transport failure message.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Message of the final failure.
        last_error: String,
    },
}

impl ClientError {
    /// Create a structured API error.
    #[must_use]
    pub fn api(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Api(ApiError::new(code, message))
    }

    /// The structured code, when the coordinator produced one.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Api(body) => Some(body.code),
            Self::Transport(_) | Self::RetriesExhausted { .. } => None,
        }
    }

    /// Whether a retry with the same payload can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(body) => body.code.is_retryable(),
            Self::Transport(_) => true,
            Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
