//! Error types for the agent.

use thiserror::Error;

/// Errors raised by agent components.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Coordinator call failed.
    #[error("coordinator error: {0}")]
    Client(#[from] leoscope_client::ClientError),

    /// Container runtime failure.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Artifact storage failure.
    #[error("artifact error: {0}")]
    Store(#[from] leoscope_store::StoreError),

    /// Trigger or schedule evaluation failure.
    #[error(transparent)]
    Schedule(#[from] leoscope_schedule::ScheduleError),

    /// Server rendezvous failed or timed out.
    #[error("rendezvous failed: {0}")]
    Rendezvous(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create a runtime error.
    #[must_use]
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
