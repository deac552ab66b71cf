//! Error types for schedule algebra.

use thiserror::Error;

/// Errors raised while validating or evaluating schedules.
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Cron expression failed to parse.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron {
        /// The offending expression.
        expr: String,
        /// Parser detail.
        reason: String,
    },

    /// Trigger expression failed to parse.
    #[error("invalid trigger expression: {0}")]
    InvalidTrigger(String),

    /// Job record violates an admission invariant.
    #[error("invalid job: {0}")]
    InvalidJob(String),
}

/// Result type for schedule operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;
