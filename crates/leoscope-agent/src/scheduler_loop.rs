//! The node scheduler loop.
//!
//! Every tick: pull the admitted jobs for this node, refresh the local
//! timer table, serve pending rendezvous tasks for paired jobs, react to
//! scavenger mode, and send a heartbeat. Each iteration runs in its own
//! task so a panic cannot wedge the loop, and the scavenger step always
//! runs after timer materialisation inside one iteration so a freshly
//! admitted job cannot race its own preemption.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use leoscope_client::ApiClient;
use leoscope_proto::{
    container_labels, HeartbeatRequest, Job, JobId, NodeId, Run, RunFilter, RunId, RunStatus,
    Schedule, TaskFilter, TaskId, TaskStatus,
};

use crate::dispatch::{FiringHandler, LocalDispatcher};
use crate::error::Result;
use crate::executor::{ExecutionRegistry, Executor};
use crate::runtime::ContainerRuntime;

const SCAVENGER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// The per-node scheduling loop.
pub struct NodeScheduler {
    client: Arc<ApiClient>,
    runtime: Arc<dyn ContainerRuntime>,
    executor: Arc<Executor>,
    dispatcher: LocalDispatcher,
    registry: ExecutionRegistry,
    node_id: NodeId,
    poll_interval: Duration,
    serving_tasks: DashMap<TaskId, ()>,
}

impl NodeScheduler {
    /// Create the scheduler.
    pub fn new(
        client: Arc<ApiClient>,
        runtime: Arc<dyn ContainerRuntime>,
        executor: Arc<Executor>,
        registry: ExecutionRegistry,
        node_id: NodeId,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            runtime,
            executor,
            dispatcher: LocalDispatcher::new(),
            registry,
            node_id,
            poll_interval,
            serving_tasks: DashMap::new(),
        }
    }

    /// Run until shutdown. Recovers orphaned containers first, then ticks.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.recover_orphans().await;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("scheduler loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let this = self.clone();
                    // An iteration crash must not wedge the loop.
                    let outcome = tokio::spawn(async move { this.iteration().await }).await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(error = %err, "scheduler iteration failed"),
                        Err(join) if join.is_panic() => {
                            error!("scheduler iteration panicked");
                        }
                        Err(_) => {}
                    }
                }
            }
        }
    }

    /// One loop iteration, steps in spec order.
    pub async fn iteration(self: &Arc<Self>) -> Result<()> {
        let jobs = self.client.get_jobs_by_node(&self.node_id).await?;

        // Materialise local timers for jobs where this node is the client.
        let mut live = HashSet::new();
        for job in jobs.iter().filter(|j| j.node_id == self.node_id) {
            if self.handle_missed_one_shot(job).await? {
                continue;
            }
            live.insert(job.id.clone());
            self.dispatcher.upsert(job, self.firing_handler());
        }
        self.dispatcher.prune(&live);

        // Serve the server half of paired jobs addressed to this node.
        self.serve_rendezvous_tasks(&jobs).await?;

        // Scavenger reaction, after materialisation by design of the tick.
        let scavenger = self.client.get_scavenger(&self.node_id).await?;
        if scavenger.active {
            self.scavenger_sweep().await?;
        }

        if let Err(err) = self
            .client
            .report_heartbeat(&self.node_id, &HeartbeatRequest::default())
            .await
        {
            warn!(error = %err, "heartbeat failed");
        }
        Ok(())
    }

    /// A one-shot whose start slipped into the past without producing a
    /// run is pushed to the nearest free slot. Returns true when the job
    /// was handed back to the coordinator instead of being timed locally.
    async fn handle_missed_one_shot(&self, job: &Job) -> Result<bool> {
        if !matches!(job.schedule, Schedule::Atq) || job.window.start >= Utc::now() {
            return Ok(false);
        }
        let runs = self
            .client
            .get_runs(&RunFilter {
                job_id: Some(job.id.clone()),
                ..Default::default()
            })
            .await?;
        if !runs.is_empty() {
            return Ok(true);
        }

        match self
            .client
            .reschedule_job_nearest(&job.id, self.reschedule_after())
            .await
        {
            Ok(moved) => {
                info!(job = %job.id, start = %moved.start_ts, "missed one-shot rescheduled");
            }
            Err(err) => {
                // Past the deadline or fully booked; the job is abandoned.
                debug!(job = %job.id, error = %err, "missed one-shot not reschedulable");
            }
        }
        Ok(true)
    }

    /// Earliest instant a rescheduled one-shot may land on. Two poll
    /// periods ahead, so the moved start is still in the future when the
    /// next iteration materialises its timer.
    fn reschedule_after(&self) -> chrono::DateTime<Utc> {
        let lead = i64::try_from(self.poll_interval.as_millis() * 2).unwrap_or(i64::MAX);
        Utc::now() + chrono::Duration::milliseconds(lead)
    }

    fn firing_handler(self: &Arc<Self>) -> FiringHandler {
        let this = self.clone();
        Arc::new(move |job, fired_at| {
            let this = this.clone();
            tokio::spawn(async move {
                this.executor.execute(job, fired_at, &this.registry).await;
            });
        })
    }

    async fn serve_rendezvous_tasks(self: &Arc<Self>, jobs: &[Job]) -> Result<()> {
        let tasks = self
            .client
            .get_tasks(&TaskFilter {
                node_id: Some(self.node_id.clone()),
                ..Default::default()
            })
            .await?;

        for task in tasks {
            if task.status != TaskStatus::Pending || self.serving_tasks.contains_key(&task.id) {
                continue;
            }
            let Some(job) = jobs.iter().find(|j| j.id == task.job_id).cloned() else {
                warn!(task = %task.id, job = %task.job_id, "rendezvous task for unknown job");
                continue;
            };

            self.serving_tasks.insert(task.id.clone(), ());
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.executor.run_server_side(&job, &task).await {
                    warn!(task = %task.id, error = %err, "server-side setup failed");
                }
                this.serving_tasks.remove(&task.id);
            });
        }
        Ok(())
    }

    /// Kill every overhead container on sight, abort their runs, and push
    /// preempted one-shots to their next free slot.
    async fn scavenger_sweep(&self) -> Result<()> {
        // Executions with a live executor observe their cancel token and
        // abort themselves within the stop timeout.
        let cancelled = self.registry.cancel_overhead();
        let mut affected: Vec<JobId> = cancelled.into_iter().map(|(_, job)| job).collect();

        // Orphaned overhead containers (no executor attached) are stopped
        // directly and their runs aborted here.
        let containers = self
            .runtime
            .list(&[
                (container_labels::OWNED, "true"),
                (container_labels::OVERHEAD, "true"),
            ])
            .await?;

        for container in containers {
            let run_id = container
                .labels
                .get(container_labels::RUN_ID)
                .map(|id| RunId::new(id.as_str()));
            if let Some(run_id) = &run_id {
                if self.registry.contains(run_id) {
                    continue;
                }
            }

            info!(container = %container.id, "scavenger stopping overhead container");
            let _ = self.runtime.stop(&container.id, SCAVENGER_STOP_TIMEOUT).await;
            let _ = self.runtime.remove(&container.id).await;

            let Some(job_id) = container
                .labels
                .get(container_labels::JOB_ID)
                .map(|id| JobId::new(id.as_str()))
            else {
                continue;
            };
            if let Some(run_id) = run_id {
                self.abort_run(&job_id, &run_id).await;
            }
            affected.push(job_id);
        }

        // Preempted one-shots still inside their deadline get a new slot.
        affected.sort();
        affected.dedup();
        for job_id in affected {
            let Ok(job) = self.client.get_job(&job_id).await else {
                continue;
            };
            if !matches!(job.schedule, Schedule::Atq) || job.window.end <= Utc::now() {
                continue;
            }
            match self
                .client
                .reschedule_job_nearest(&job_id, self.reschedule_after())
                .await
            {
                Ok(moved) => {
                    info!(job = %job_id, start = %moved.start_ts, "preempted one-shot rescheduled");
                }
                Err(err) => debug!(job = %job_id, error = %err, "preempted one-shot not reschedulable"),
            }
        }
        Ok(())
    }

    async fn abort_run(&self, job_id: &JobId, run_id: &RunId) {
        let runs = match self
            .client
            .get_runs(&RunFilter {
                job_id: Some(job_id.clone()),
                ..Default::default()
            })
            .await
        {
            Ok(runs) => runs,
            Err(err) => {
                warn!(run = %run_id, error = %err, "failed to load run for abort");
                return;
            }
        };
        let Some(run) = runs.into_iter().find(|r| &r.id == run_id) else {
            return;
        };
        if run.status.is_terminal() {
            return;
        }

        let aborted = Run {
            status: RunStatus::Aborted,
            status_message: "stopped by scavenger".to_owned(),
            end_ts: Some(Utc::now()),
            ..run
        };
        if let Err(err) = self.client.update_run(&aborted).await {
            warn!(run = %run_id, error = %err, "failed to abort run");
        }
    }

    /// Re-attach supervision for containers left behind by a previous
    /// agent process.
    async fn recover_orphans(&self) {
        let containers = match self
            .runtime
            .list(&[
                (container_labels::OWNED, "true"),
                (container_labels::NODE_ID, self.node_id.as_str()),
            ])
            .await
        {
            Ok(containers) => containers,
            Err(err) => {
                warn!(error = %err, "orphan scan failed");
                return;
            }
        };

        for container in containers {
            info!(container = %container.id, running = container.running, "found orphaned container");
            let executor = self.executor.clone();
            tokio::spawn(async move {
                if let Err(err) = executor.resume(&container).await {
                    warn!(container = %container.id, error = %err, "orphan recovery failed");
                }
            });
        }
    }
}
