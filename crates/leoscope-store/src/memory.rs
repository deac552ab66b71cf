//! In-memory metadata store.
//!
//! Backs single-process deployments and tests. Data is lost when the
//! process exits.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use leoscope_proto::{
    Job, JobId, Node, NodeFilter, NodeId, Run, RunFilter, RunId, Task, TaskFilter, TaskId,
    TaskStatus, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::meta::{MetaStore, RunChange};

const DEFAULT_ACTIVE_THRES_SECS: u32 = 60;

/// In-memory [`MetaStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    users: RwLock<HashMap<UserId, User>>,
    nodes: RwLock<HashMap<NodeId, Node>>,
    jobs: RwLock<HashMap<JobId, Job>>,
    runs: RwLock<HashMap<RunId, Run>>,
    tasks: RwLock<HashMap<TaskId, Task>>,
    config: RwLock<serde_json::Value>,
}

impl MemoryMetaStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RwLock::new(serde_json::Value::Object(serde_json::Map::new())),
            ..Self::default()
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::internal("lock poisoned")
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().map_err(poisoned)?;
        if users.contains_key(&user.id) {
            return Err(StoreError::AlreadyExists(format!("user {}", user.id)));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.users.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().map_err(poisoned)?;
        match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("user {}", user.id))),
        }
    }

    async fn delete_user(&self, id: &UserId) -> Result<()> {
        let mut users = self.users.write().map_err(poisoned)?;
        users
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    async fn insert_node(&self, node: &Node) -> Result<()> {
        let mut nodes = self.nodes.write().map_err(poisoned)?;
        if nodes.contains_key(&node.id) {
            return Err(StoreError::AlreadyExists(format!("node {}", node.id)));
        }
        nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>> {
        Ok(self.nodes.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn update_node(&self, node: &Node) -> Result<()> {
        let mut nodes = self.nodes.write().map_err(poisoned)?;
        match nodes.get_mut(&node.id) {
            Some(existing) => {
                *existing = node.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("node {}", node.id))),
        }
    }

    async fn delete_node(&self, id: &NodeId) -> Result<()> {
        let mut nodes = self.nodes.write().map_err(poisoned)?;
        nodes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("node {id}")))
    }

    async fn list_nodes(&self, filter: &NodeFilter, now: DateTime<Utc>) -> Result<Vec<Node>> {
        let nodes = self.nodes.read().map_err(poisoned)?;
        let thres = i64::from(filter.active_thres_s.unwrap_or(DEFAULT_ACTIVE_THRES_SECS));

        let mut results: Vec<_> = nodes
            .values()
            .filter(|n| {
                if let Some(id) = &filter.node_id {
                    if &n.id != id {
                        return false;
                    }
                }
                if let Some(location) = &filter.location {
                    if !n.location.contains(location.as_str()) {
                        return false;
                    }
                }
                if let Some(active) = filter.active {
                    let recent = now - n.last_active_ts <= chrono::Duration::seconds(thres);
                    if recent != active {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    async fn record_heartbeat(
        &self,
        id: &NodeId,
        public_ip: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut nodes = self.nodes.write().map_err(poisoned)?;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;

        if let Some(ip) = public_ip {
            node.public_ip = Some(ip);
        }
        if now > node.last_active_ts {
            node.last_active_ts = now;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn set_scavenger(&self, id: &NodeId, active: bool) -> Result<Node> {
        let mut nodes = self.nodes.write().map_err(poisoned)?;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
        node.scavenger_active = active;
        Ok(node.clone())
    }

    async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(format!("job {}", job.id)));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("job {}", job.id))),
        }
    }

    async fn delete_job(&self, id: &JobId) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        jobs.remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    async fn jobs_for_nodes(&self, targets: &[NodeId]) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut results: Vec<_> = jobs
            .values()
            .filter(|j| {
                targets.contains(&j.node_id)
                    || j.paired_server_node_id
                        .as_ref()
                        .is_some_and(|peer| targets.contains(peer))
            })
            .cloned()
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    async fn jobs_for_user(&self, user: &UserId) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut results: Vec<_> = jobs
            .values()
            .filter(|j| &j.owner_id == user)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    async fn apply_run(&self, run: &Run) -> Result<RunChange> {
        let mut runs = self.runs.write().map_err(poisoned)?;
        match runs.get_mut(&run.id) {
            None => {
                runs.insert(run.id.clone(), run.clone());
                Ok(RunChange::Created)
            }
            Some(existing) if existing.status == run.status => Ok(RunChange::NoOp),
            Some(existing) => {
                if !existing.status.can_transition_to(run.status) {
                    return Err(StoreError::InvalidTransition {
                        from: existing.status,
                        to: run.status,
                    });
                }
                *existing = run.clone();
                Ok(RunChange::Updated)
            }
        }
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<Run>> {
        Ok(self.runs.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let runs = self.runs.read().map_err(poisoned)?;
        let mut results: Vec<_> = runs
            .values()
            .filter(|r| {
                if let Some(job_id) = &filter.job_id {
                    if &r.job_id != job_id {
                        return false;
                    }
                }
                if let Some(node_id) = &filter.node_id {
                    if &r.node_id != node_id {
                        return false;
                    }
                }
                if let Some(user_id) = &filter.user_id {
                    if &r.owner_id != user_id {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        results.sort_by(|a, b| b.start_ts.cmp(&a.start_ts));
        Ok(results)
    }

    async fn job_has_runs(&self, job: &JobId) -> Result<bool> {
        let runs = self.runs.read().map_err(poisoned)?;
        Ok(runs.values().any(|r| &r.job_id == job))
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(format!("task {}", task.id)));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().map_err(poisoned)?;
        let mut results: Vec<_> = tasks
            .values()
            .filter(|t| {
                if t.is_dead(now) {
                    return false;
                }
                if let Some(node_id) = &filter.node_id {
                    if &t.node_id != node_id {
                        return false;
                    }
                }
                if let Some(task_id) = &filter.task_id {
                    if &t.id != task_id {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_ts.cmp(&b.created_ts));
        Ok(results)
    }

    async fn update_task_status(&self, id: &TaskId, status: TaskStatus) -> Result<Task> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        task.status = status;
        Ok(task.clone())
    }

    async fn get_config(&self) -> Result<serde_json::Value> {
        Ok(self.config.read().map_err(poisoned)?.clone())
    }

    async fn set_config(&self, config: serde_json::Value) -> Result<()> {
        *self.config.write().map_err(poisoned)? = config;
        Ok(())
    }
}
