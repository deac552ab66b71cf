//! Error types for the coordinator.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use thiserror::Error;

use leoscope_proto::{ApiError, ErrorCode, JobId};
use leoscope_schedule::ScheduleError;
use leoscope_store::StoreError;

/// Errors raised by coordinator operations.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Malformed input or violated invariant.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Missing or invalid credentials.
    #[error("unauthenticated: {0}")]
    Unauth(String),

    /// Valid credentials, insufficient role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Candidate occupancy overlaps an admitted job.
    #[error("conflicts with job {offender} at {instant}")]
    Conflict {
        /// Admitted job the candidate collided with.
        offender: JobId,
        /// First overlapping firing instant.
        instant: DateTime<Utc>,
    },

    /// Rescheduling found no free instant before the deadline.
    #[error("no free slot before the deadline")]
    NoSlot,

    /// Operation not applicable to this job kind.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Schedule validation failure.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoordinatorError {
    /// Create an invalid-input error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Create a forbidden error.
    #[must_use]
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Invalid(msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::new(ErrorCode::Invalid, msg),
            ),
            Self::Unauth(msg) => (
                StatusCode::UNAUTHORIZED,
                ApiError::new(ErrorCode::Unauth, msg),
            ),
            Self::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                ApiError::new(ErrorCode::Forbidden, msg),
            ),
            Self::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ApiError::new(ErrorCode::NotFound, msg),
            ),
            Self::Conflict { offender, instant } => (
                StatusCode::CONFLICT,
                ApiError::conflict(offender, instant),
            ),
            Self::NoSlot => (
                StatusCode::CONFLICT,
                ApiError::new(ErrorCode::NoSlot, "no free slot before the deadline"),
            ),
            Self::Unsupported(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new(ErrorCode::Unsupported, msg),
            ),
            Self::Schedule(err) => (
                StatusCode::BAD_REQUEST,
                ApiError::new(ErrorCode::Invalid, err.to_string()),
            ),
            Self::Store(err) => match err {
                StoreError::NotFound(msg) => (
                    StatusCode::NOT_FOUND,
                    ApiError::new(ErrorCode::NotFound, msg),
                ),
                StoreError::AlreadyExists(msg) => (
                    StatusCode::BAD_REQUEST,
                    ApiError::new(ErrorCode::Invalid, format!("{msg} already exists")),
                ),
                StoreError::InvalidTransition { from, to } => (
                    StatusCode::BAD_REQUEST,
                    ApiError::new(
                        ErrorCode::Invalid,
                        format!("run cannot move from {from} to {to}"),
                    ),
                ),
                other => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError::new(ErrorCode::Unavailable, other.to_string()),
                ),
            },
        };
        (status, Json(body)).into_response()
    }
}
