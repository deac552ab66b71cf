//! Error codes returned across the coordinator API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// Structured error vocabulary. Every non-2xx response body carries one of
/// these so clients can branch without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed input: bad cron or trigger syntax, violated record
    /// invariants, or a conflicting resubmission under an existing id.
    Invalid,
    /// Missing or invalid credentials.
    Unauth,
    /// Valid credentials, insufficient role.
    Forbidden,
    /// Referenced record does not exist.
    NotFound,
    /// Scheduling overlap with an admitted job.
    Conflict,
    /// Rescheduling found no free instant before the deadline.
    NoSlot,
    /// Operation not applicable to this job kind.
    Unsupported,
    /// Transport-layer failure; safe to retry.
    Unavailable,
}

impl ErrorCode {
    /// Code name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Unauth => "unauth",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::NoSlot => "no_slot",
            Self::Unsupported => "unsupported",
            Self::Unavailable => "unavailable",
        }
    }

    /// Parse from the wire representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "invalid" => Some(Self::Invalid),
            "unauth" => Some(Self::Unauth),
            "forbidden" => Some(Self::Forbidden),
            "not_found" => Some(Self::NotFound),
            "conflict" => Some(Self::Conflict),
            "no_slot" => Some(Self::NoSlot),
            "unsupported" => Some(Self::Unsupported),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }

    /// Whether a retry with the same payload can succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Structured code.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
    /// Admitted job the candidate collided with, for [`ErrorCode::Conflict`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_job_id: Option<JobId>,
    /// First overlapping firing instant, for [`ErrorCode::Conflict`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_instant: Option<DateTime<Utc>>,
}

impl ApiError {
    /// Create an error body with a message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            offending_job_id: None,
            conflict_instant: None,
        }
    }

    /// Create a conflict body naming the offending job and instant.
    #[must_use]
    pub fn conflict(offender: JobId, instant: DateTime<Utc>) -> Self {
        Self {
            code: ErrorCode::Conflict,
            message: format!("overlaps job {offender} at {instant}"),
            offending_job_id: Some(offender),
            conflict_instant: Some(instant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrip() {
        let codes = [
            ErrorCode::Invalid,
            ErrorCode::Unauth,
            ErrorCode::Forbidden,
            ErrorCode::NotFound,
            ErrorCode::Conflict,
            ErrorCode::NoSlot,
            ErrorCode::Unsupported,
            ErrorCode::Unavailable,
        ];
        for code in codes {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("bogus"), None);
    }

    #[test]
    fn only_transport_errors_retry() {
        assert!(ErrorCode::Unavailable.is_retryable());
        assert!(!ErrorCode::Conflict.is_retryable());
        assert!(!ErrorCode::Invalid.is_retryable());
    }

    #[test]
    fn conflict_body_carries_details() {
        let at = "2024-01-01T00:10:00Z".parse().unwrap();
        let err = ApiError::conflict(JobId::new("A"), at);
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.offending_job_id, Some(JobId::new("A")));
        assert_eq!(err.conflict_instant, Some(at));
    }
}
