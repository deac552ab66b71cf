//! Error types for the storage layer.

use leoscope_proto::RunStatus;
use thiserror::Error;

/// Errors raised by the metadata and artifact stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record with this id already exists with a different payload.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Run status update would move backward along the lifecycle DAG.
    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition {
        /// Current persisted status.
        from: RunStatus,
        /// Rejected target status.
        to: RunStatus,
    },

    /// Blob backend failure.
    #[error("artifact storage error: {0}")]
    Artifact(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
