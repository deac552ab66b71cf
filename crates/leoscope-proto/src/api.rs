//! Request and response payloads for the coordinator API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Coords, NodeId, Role, TaskStatus, UserId};

/// Body for `register_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    /// Desired user id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Capability role.
    pub role: Role,
    /// Owning team.
    pub team: String,
}

/// Body for `modify_user`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifyUserRequest {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// New team.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

/// Credential returned exactly once at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialResponse {
    /// Id of the created record.
    pub id: String,
    /// Fresh bearer token. Not recoverable later.
    pub token: String,
}

/// Body for `register_node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    /// Desired node id; the node credential shares it.
    pub id: NodeId,
    /// Human-readable name.
    pub display_name: String,
    /// Terminal coordinates.
    pub coords: Coords,
    /// Free-form location description.
    pub location: String,
    /// Connectivity provider.
    pub provider: String,
    /// Publicly reachable address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

/// Body for `update_node`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeRequest {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// New coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coords: Option<Coords>,
    /// New location description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// New provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// New public address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

/// Query filter for `get_nodes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeFilter {
    /// Restrict to a single node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Restrict to a location substring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// When true, only nodes with a recent heartbeat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Heartbeat recency threshold in seconds (default 60).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_thres_s: Option<u32>,
}

/// Body for `report_heartbeat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Current public address of the node, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

/// Response to `report_heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Whether the heartbeat advanced `last_active_ts`.
    pub received: bool,
}

/// Generic acknowledgement for mutating calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// Always true on success.
    pub ok: bool,
}

impl Ack {
    /// Success acknowledgement.
    #[must_use]
    pub const fn ok() -> Self {
        Self { ok: true }
    }
}

/// Body for `reschedule_job_nearest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    /// Earliest acceptable firing instant.
    pub after: DateTime<Utc>,
}

/// Response to `reschedule_job_nearest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleResponse {
    /// New firing instant the job was moved to.
    pub start_ts: DateTime<Utc>,
}

/// Query filter for `get_jobs_*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    /// Jobs targeting this node (as client or paired server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Jobs owned by this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Query filter for `get_runs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    /// Runs of this job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<crate::JobId>,
    /// Runs on this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Runs owned by this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Query filter for `get_tasks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Tasks addressed to this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// A single task by id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<crate::TaskId>,
}

/// Body for `update_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    /// New task state.
    pub status: TaskStatus,
}

/// Body for `set_scavenger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetScavengerRequest {
    /// Desired scavenger state.
    pub active: bool,
}

/// Scavenger state of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScavengerState {
    /// Node in question.
    pub node_id: NodeId,
    /// Whether overhead containers are being killed on sight.
    pub active: bool,
}

/// Body for `update_global_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfigRequest {
    /// Replacement config document.
    pub config: serde_json::Value,
}

/// Body for `kernel_access`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelAccessRequest {
    /// User whose kernel-parameter access is being checked.
    pub target_user_id: UserId,
}

/// Decision returned by `kernel_access`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelAccessDecision {
    /// Target may touch kernel parameters.
    Allow,
    /// Target may not.
    Deny,
}

/// Response to `kernel_access`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelAccessResponse {
    /// The decision.
    pub decision: KernelAccessDecision,
}
