//! Shared types for the LEOScope measurement testbed.
//!
//! Everything that crosses the coordinator/agent wire or lands in the
//! metadata store is defined here: record types, status enums, request and
//! response payloads, and the error code vocabulary. Both sides of the
//! system depend on this crate and nothing else in the workspace.

mod api;
mod error;
mod types;

pub use api::*;
pub use error::{ApiError, ErrorCode};
pub use types::*;

/// Metadata header names carried on every authenticated request.
pub mod headers {
    /// Caller user id.
    pub const USER_ID: &str = "x-userid";
    /// Static bearer token.
    pub const ACCESS_TOKEN: &str = "x-access-token";
    /// Signed token alternative to [`ACCESS_TOKEN`].
    pub const JWT: &str = "x-jwt";
}

/// Environment variables surfaced to experiment containers.
pub mod container_env {
    /// "1" when the container is the server half of a paired job.
    pub const SERVER: &str = "LEOTEST_SERVER";
    /// Firing instant, RFC 3339.
    pub const START_TIME: &str = "LEOTEST_START_TIME";
    /// Experiment length in seconds.
    pub const LENGTH: &str = "LEOTEST_LENGTH";
    /// Run id.
    pub const RUN_ID: &str = "LEOTEST_RUNID";
    /// Job id.
    pub const JOB_ID: &str = "LEOTEST_JOBID";
    /// Node id.
    pub const NODE_ID: &str = "LEOTEST_NODEID";
    /// Public IP of the paired server node, when resolved.
    pub const SERVER_IP: &str = "LEOTEST_SERVER_IP";
}

/// Container labels attached to every scheduler-owned container.
pub mod container_labels {
    /// Marks a container as owned by the testbed.
    pub const OWNED: &str = "leotest";
    /// Job id label.
    pub const JOB_ID: &str = "jobid";
    /// Run id label.
    pub const RUN_ID: &str = "runid";
    /// Node id label.
    pub const NODE_ID: &str = "nodeid";
    /// "true" when the job counts against node occupancy.
    pub const OVERHEAD: &str = "overhead";
}
