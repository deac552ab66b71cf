//! The metadata store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use leoscope_proto::{
    Job, JobId, Node, NodeFilter, NodeId, Run, RunFilter, RunId, Task, TaskFilter, TaskId,
    TaskStatus, User, UserId,
};

use crate::error::Result;

/// Outcome of applying a run record; see [`MetaStore::apply_run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunChange {
    /// The run did not exist and was inserted.
    Created,
    /// The run existed and moved forward along the DAG.
    Updated,
    /// The run already carried the requested status; nothing changed.
    NoOp,
}

/// Typed CRUD over the persisted collections.
///
/// Implementations must apply each method atomically; the coordinator
/// layers its own per-node serialisation for the admission critical
/// section on top.
#[async_trait]
pub trait MetaStore: Send + Sync {
    // --- users ---

    /// Insert a user. Fails if the id is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;

    /// Get a user by id.
    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;

    /// Replace a user record. Fails if it does not exist.
    async fn update_user(&self, user: &User) -> Result<()>;

    /// Delete a user. Fails if it does not exist.
    async fn delete_user(&self, id: &UserId) -> Result<()>;

    // --- nodes ---

    /// Insert a node. Fails if the id is taken.
    async fn insert_node(&self, node: &Node) -> Result<()>;

    /// Get a node by id.
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>>;

    /// Replace a node record. Fails if it does not exist.
    async fn update_node(&self, node: &Node) -> Result<()>;

    /// Delete a node. Fails if it does not exist.
    async fn delete_node(&self, id: &NodeId) -> Result<()>;

    /// List nodes matching the filter. `now` anchors the activity check.
    async fn list_nodes(&self, filter: &NodeFilter, now: DateTime<Utc>) -> Result<Vec<Node>>;

    /// Advance `last_active_ts` to `now` (never backward) and record the
    /// public address when provided. Returns whether the timestamp moved.
    async fn record_heartbeat(
        &self,
        id: &NodeId,
        public_ip: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Toggle the scavenger bit. Returns the updated node.
    async fn set_scavenger(&self, id: &NodeId, active: bool) -> Result<Node>;

    // --- jobs ---

    /// Insert a job. Fails if the id is taken.
    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Get a job by id.
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Replace a job record. Fails if it does not exist.
    async fn update_job(&self, job: &Job) -> Result<()>;

    /// Delete a job. Fails if it does not exist.
    async fn delete_job(&self, id: &JobId) -> Result<()>;

    /// Jobs targeting any of the given nodes, as client or paired server.
    async fn jobs_for_nodes(&self, nodes: &[NodeId]) -> Result<Vec<Job>>;

    /// Jobs owned by a user.
    async fn jobs_for_user(&self, user: &UserId) -> Result<Vec<Job>>;

    // --- runs ---

    /// Create or advance a run with compare-and-set on the status.
    ///
    /// A missing run is inserted as given. An existing run is updated only
    /// when the new status moves forward along the lifecycle DAG; equal
    /// status is a no-op, anything else is
    /// [`StoreError::InvalidTransition`](crate::StoreError::InvalidTransition).
    async fn apply_run(&self, run: &Run) -> Result<RunChange>;

    /// Get a run by id.
    async fn get_run(&self, id: &RunId) -> Result<Option<Run>>;

    /// List runs matching the filter, newest first.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>>;

    /// Whether any run exists for a job.
    async fn job_has_runs(&self, job: &JobId) -> Result<bool>;

    // --- tasks ---

    /// Insert a rendezvous task. Fails if the id is taken.
    async fn insert_task(&self, task: &Task) -> Result<()>;

    /// Get a task by id.
    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>>;

    /// List live tasks matching the filter; entries past their ttl at
    /// `now` are treated as dead and omitted.
    async fn list_tasks(&self, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Update a task's status. Returns the updated task.
    async fn update_task_status(&self, id: &TaskId, status: TaskStatus) -> Result<Task>;

    // --- config ---

    /// The global config document. Defaults to an empty object.
    async fn get_config(&self) -> Result<serde_json::Value>;

    /// Replace the global config document.
    async fn set_config(&self, config: serde_json::Value) -> Result<()>;
}
