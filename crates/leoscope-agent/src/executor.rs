//! Per-run lifecycle execution.
//!
//! Each firing runs: report SCHEDULED, evaluate the trigger, materialise
//! config (DEPLOYING), wait for a paired server when one is declared,
//! launch and supervise the container (RUNNING) under a wall-clock
//! ceiling, then archive and upload the working directory (UPLOADING) and
//! report the terminal state. A scavenger cancel at any point stops the
//! container within the stop timeout and leaves the run ABORTED.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leoscope_client::ApiClient;
use leoscope_proto::{
    container_env, container_labels, Job, JobId, NodeId, Run, RunId, RunStatus, Task, TaskFilter,
    TaskId, TaskKind, TaskStatus,
};
use leoscope_schedule::{EnvSnapshot, TriggerExpr};
use leoscope_store::ArtifactStore;

use crate::config::ExecutorConfig;
use crate::error::{AgentError, Result};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_ATTEMPTS: u32 = 3;

/// Live executions on this node, keyed by run id.
///
/// The scavenger sweep cancels overhead entries; each executor observes
/// its token and aborts.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRegistry {
    inner: Arc<DashMap<RunId, ExecutionEntry>>,
}

/// A registered in-flight execution.
#[derive(Debug, Clone)]
pub struct ExecutionEntry {
    /// Owning job.
    pub job_id: JobId,
    /// Whether the job counts against node occupancy.
    pub overhead: bool,
    /// Cancels the execution.
    pub cancel: CancellationToken,
}

impl ExecutionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an execution.
    pub fn register(&self, run_id: RunId, entry: ExecutionEntry) {
        self.inner.insert(run_id, entry);
    }

    /// Stop tracking an execution.
    pub fn deregister(&self, run_id: &RunId) {
        self.inner.remove(run_id);
    }

    /// Whether a run is currently tracked.
    #[must_use]
    pub fn contains(&self, run_id: &RunId) -> bool {
        self.inner.contains_key(run_id)
    }

    /// Cancel every overhead execution; returns the affected job ids.
    pub fn cancel_overhead(&self) -> Vec<(RunId, JobId)> {
        let mut cancelled = Vec::new();
        for entry in self.inner.iter() {
            if entry.overhead {
                entry.cancel.cancel();
                cancelled.push((entry.key().clone(), entry.job_id.clone()));
            }
        }
        cancelled
    }

    /// Number of tracked executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when nothing is executing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Outcome of container supervision.
enum Verdict {
    Exited(i64),
    TimedOut,
    Cancelled,
    Lost(String),
}

/// Runs firings to completion.
pub struct Executor {
    client: Arc<ApiClient>,
    runtime: Arc<dyn ContainerRuntime>,
    artifacts: Arc<ArtifactStore>,
    node_id: NodeId,
    snapshot: EnvSnapshot,
    config: ExecutorConfig,
}

impl Executor {
    /// Create an executor.
    pub fn new(
        client: Arc<ApiClient>,
        runtime: Arc<dyn ContainerRuntime>,
        artifacts: Arc<ArtifactStore>,
        node_id: NodeId,
        snapshot: EnvSnapshot,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            client,
            runtime,
            artifacts,
            node_id,
            snapshot,
            config,
        }
    }

    /// Execute one firing of a job. Registers itself for scavenger
    /// cancellation and always deregisters on the way out.
    pub async fn execute(&self, job: Job, fired_at: DateTime<Utc>, registry: &ExecutionRegistry) {
        let run_id = RunId::generate();
        let cancel = CancellationToken::new();
        registry.register(
            run_id.clone(),
            ExecutionEntry {
                job_id: job.id.clone(),
                overhead: job.overhead,
                cancel: cancel.clone(),
            },
        );

        let result = self.run_lifecycle(&job, fired_at, &run_id, &cancel).await;
        registry.deregister(&run_id);

        if let Err(err) = result {
            warn!(job = %job.id, run = %run_id, error = %err, "run aborted by internal error");
        }
    }

    async fn run_lifecycle(
        &self,
        job: &Job,
        fired_at: DateTime<Utc>,
        run_id: &RunId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut run = Run {
            id: run_id.clone(),
            job_id: job.id.clone(),
            node_id: self.node_id.clone(),
            owner_id: job.owner_id.clone(),
            status: RunStatus::Scheduled,
            start_ts: fired_at,
            end_ts: None,
            status_message: "firing".to_owned(),
            artifact_url: None,
        };
        self.client.update_run(&run).await?;

        // Trigger gate, evaluated just-in-time against the live snapshot.
        if let Some(trigger) = &job.trigger {
            let expr = TriggerExpr::parse(trigger)?;
            if !expr.eval(&self.snapshot.view()) {
                info!(job = %job.id, run = %run_id, trigger, "trigger false, skipping run");
                run.status = RunStatus::Skipped;
                run.status_message = format!("trigger '{trigger}' evaluated false");
                run.end_ts = Some(Utc::now());
                self.report_final(&run).await;
                return Ok(());
            }
        }

        run.status = RunStatus::Deploying;
        run.status_message = "materialising configuration".to_owned();
        self.client.update_run(&run).await?;

        // The coordinator is the source of truth for job config; fall back
        // to the copy from the poll when it is unreachable.
        let job = match self.client.get_job(&job.id).await {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(job = %job.id, error = %err, "config fetch failed, using polled copy");
                job.clone()
            }
        };

        let workdir = self.run_workdir(&job.id, run_id);
        tokio::fs::create_dir_all(&workdir).await?;
        tokio::fs::write(workdir.join("job.config"), &job.config).await?;
        let params = serde_json::to_vec_pretty(&job.params)
            .map_err(|e| AgentError::Config(format!("unserialisable params: {e}")))?;
        tokio::fs::write(workdir.join("params.json"), params).await?;

        // Paired jobs wait for the server peer before launching.
        let mut server_ip = None;
        if let Some(peer) = &job.paired_server_node_id {
            if job.node_id == self.node_id {
                match self.await_server(&job, run_id, peer, cancel).await {
                    Ok(ip) => server_ip = ip,
                    Err(err) => {
                        run.status = RunStatus::Failed;
                        run.status_message = format!("server rendezvous failed: {err}");
                        run.end_ts = Some(Utc::now());
                        self.report_final(&run).await;
                        remove_dir(&workdir).await;
                        return Ok(());
                    }
                }
            }
        }

        let spec = self.container_spec(&job, run_id, fired_at, &workdir, server_ip, false);
        let container_id = match self.runtime.launch(&spec).await {
            Ok(id) => id,
            Err(err) => {
                run.status = RunStatus::Failed;
                run.status_message = format!("container launch failed: {err}");
                run.end_ts = Some(Utc::now());
                self.report_final(&run).await;
                remove_dir(&workdir).await;
                return Ok(());
            }
        };

        run.status = RunStatus::Running;
        run.status_message = format!("container {container_id} started");
        // From here the run finishes locally even if the coordinator is
        // unreachable; the terminal report is retried at the end.
        self.report_best_effort(&run).await;

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(u64::from(job.length_secs))
            + self.config.grace();
        let verdict = self.supervise(&container_id, deadline, cancel).await;

        let (failed, message) = match verdict {
            Verdict::Cancelled => {
                self.stop_and_remove(&container_id).await;
                run.status = RunStatus::Aborted;
                run.status_message = "preempted by scavenger".to_owned();
                run.end_ts = Some(Utc::now());
                self.report_final(&run).await;
                remove_dir(&workdir).await;
                info!(job = %job.id, run = %run_id, "run aborted");
                return Ok(());
            }
            Verdict::TimedOut => {
                let _ = self.runtime.stop(&container_id, STOP_TIMEOUT).await;
                (true, "exceeded wall-clock ceiling".to_owned())
            }
            Verdict::Lost(err) => (true, format!("lost container: {err}")),
            Verdict::Exited(0) => (false, "experiment completed".to_owned()),
            Verdict::Exited(code) => (true, format!("experiment exited with code {code}")),
        };

        run.status = RunStatus::Uploading;
        run.status_message = "archiving results".to_owned();
        self.report_best_effort(&run).await;

        match self.runtime.logs(&container_id).await {
            Ok(logs) => {
                if let Err(err) = tokio::fs::write(workdir.join("container.log"), logs).await {
                    warn!(run = %run_id, error = %err, "failed to persist container logs");
                }
            }
            Err(err) => warn!(run = %run_id, error = %err, "failed to capture container logs"),
        }

        let uploaded = self.upload_workdir(&job, run_id, fired_at, &workdir).await;

        let _ = self.runtime.remove(&container_id).await;

        run.end_ts = Some(Utc::now());
        match uploaded {
            Ok(url) => {
                run.artifact_url = Some(url);
                run.status = if failed {
                    RunStatus::Failed
                } else {
                    RunStatus::Completed
                };
                run.status_message = message;
                self.report_final(&run).await;
                remove_dir(&workdir).await;
            }
            Err(err) => {
                // The archive stays on disk for manual collection.
                run.status = RunStatus::Failed;
                run.status_message = format!("{message}; upload failed: {err}");
                self.report_final(&run).await;
            }
        }

        info!(job = %job.id, run = %run_id, status = %run.status, "run finished");
        Ok(())
    }

    /// Execute the server half of a paired job in response to a
    /// rendezvous task: launch the server container, acknowledge the task,
    /// then supervise the container for the experiment length.
    pub async fn run_server_side(&self, job: &Job, task: &Task) -> Result<()> {
        let workdir = self.run_workdir(&job.id, &RunId::new(format!("srv-{}", task.run_id)));
        tokio::fs::create_dir_all(&workdir).await?;
        tokio::fs::write(workdir.join("job.config"), &job.config).await?;

        let spec = self.container_spec(job, &task.run_id, Utc::now(), &workdir, None, true);
        let container_id = match self.runtime.launch(&spec).await {
            Ok(id) => id,
            Err(err) => {
                let _ = self
                    .client
                    .update_task(&task.id, TaskStatus::Failed)
                    .await;
                return Err(err);
            }
        };

        self.client
            .update_task(&task.id, TaskStatus::Complete)
            .await?;
        info!(job = %job.id, task = %task.id, "server side ready");

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(u64::from(job.length_secs))
            + self.config.grace();
        let cancel = CancellationToken::new();
        let _ = self.supervise(&container_id, deadline, &cancel).await;

        self.stop_and_remove(&container_id).await;
        remove_dir(&workdir).await;
        Ok(())
    }

    /// Re-attach to a container found after a node restart: resume
    /// supervision when it is still running, otherwise mark the run
    /// failed. The container's labels carry the run and job ids.
    pub async fn resume(&self, container: &ContainerSummary) -> Result<()> {
        let Some(run_id) = container.labels.get(container_labels::RUN_ID) else {
            // Not one of ours in a recognisable state; clear it out.
            self.stop_and_remove(&container.id).await;
            return Ok(());
        };
        let run_id = RunId::new(run_id.as_str());
        let Some(job_id) = container.labels.get(container_labels::JOB_ID) else {
            self.stop_and_remove(&container.id).await;
            return Ok(());
        };
        let job_id = JobId::new(job_id.as_str());

        let job = self.client.get_job(&job_id).await?;
        let runs = self
            .client
            .get_runs(&leoscope_proto::RunFilter {
                job_id: Some(job_id.clone()),
                ..Default::default()
            })
            .await?;
        let Some(mut run) = runs.into_iter().find(|r| r.id == run_id) else {
            self.stop_and_remove(&container.id).await;
            return Ok(());
        };

        if container.running {
            info!(run = %run_id, container = %container.id, "resuming supervision of orphaned run");
            let elapsed = (Utc::now() - run.start_ts).to_std().unwrap_or_default();
            let budget = Duration::from_secs(u64::from(job.length_secs)) + self.config.grace();
            let deadline = tokio::time::Instant::now() + budget.saturating_sub(elapsed);
            let cancel = CancellationToken::new();
            let verdict = self.supervise(&container.id, deadline, &cancel).await;
            let failed = !matches!(verdict, Verdict::Exited(0));
            if matches!(verdict, Verdict::TimedOut) {
                let _ = self.runtime.stop(&container.id, STOP_TIMEOUT).await;
            }
            run.status = if failed {
                RunStatus::Failed
            } else {
                RunStatus::Completed
            };
            run.status_message = "finished after node restart".to_owned();
            run.end_ts = Some(Utc::now());

            let workdir = self.run_workdir(&job_id, &run_id);
            if workdir.exists() {
                if let Ok(logs) = self.runtime.logs(&container.id).await {
                    let _ = tokio::fs::write(workdir.join("container.log"), logs).await;
                }
                if let Ok(url) = self.upload_workdir(&job, &run_id, run.start_ts, &workdir).await {
                    run.artifact_url = Some(url);
                    remove_dir(&workdir).await;
                }
            }
            // COMPLETED is only reachable through UPLOADING.
            let mut uploading = run.clone();
            uploading.status = RunStatus::Uploading;
            self.report_best_effort(&uploading).await;
            self.report_final(&run).await;
            self.stop_and_remove(&container.id).await;
        } else {
            info!(run = %run_id, container = %container.id, "marking orphaned run failed");
            run.status = RunStatus::Failed;
            run.status_message = "node restarted mid-run".to_owned();
            run.end_ts = Some(Utc::now());
            self.report_final(&run).await;
            self.stop_and_remove(&container.id).await;
        }
        Ok(())
    }

    /// Build the container spec for a run.
    #[must_use]
    pub fn container_spec(
        &self,
        job: &Job,
        run_id: &RunId,
        fired_at: DateTime<Utc>,
        workdir: &Path,
        server_ip: Option<String>,
        server_side: bool,
    ) -> ContainerSpec {
        let mut env = vec![
            (
                container_env::SERVER.to_owned(),
                if server_side { "1" } else { "0" }.to_owned(),
            ),
            (
                container_env::START_TIME.to_owned(),
                fired_at.to_rfc3339(),
            ),
            (
                container_env::LENGTH.to_owned(),
                job.length_secs.to_string(),
            ),
            (container_env::RUN_ID.to_owned(), run_id.to_string()),
            (container_env::JOB_ID.to_owned(), job.id.to_string()),
            (container_env::NODE_ID.to_owned(), self.node_id.to_string()),
        ];
        if let Some(ip) = server_ip {
            env.push((container_env::SERVER_IP.to_owned(), ip));
        }

        let labels = vec![
            (container_labels::OWNED.to_owned(), "true".to_owned()),
            (container_labels::JOB_ID.to_owned(), job.id.to_string()),
            (container_labels::RUN_ID.to_owned(), run_id.to_string()),
            (
                container_labels::NODE_ID.to_owned(),
                self.node_id.to_string(),
            ),
            (
                container_labels::OVERHEAD.to_owned(),
                job.overhead.to_string(),
            ),
        ];

        let name = if server_side {
            format!("leotest-srv-{run_id}")
        } else {
            format!("leotest-{run_id}")
        };

        ContainerSpec {
            name,
            image: job.params.execute.clone(),
            env,
            labels,
            mounts: vec![(workdir.to_path_buf(), "/leotest".to_owned())],
        }
    }

    fn run_workdir(&self, job_id: &JobId, run_id: &RunId) -> PathBuf {
        self.config
            .workdir
            .join(job_id.as_str())
            .join(run_id.as_str())
    }

    async fn supervise(
        &self,
        container_id: &str,
        deadline: tokio::time::Instant,
        cancel: &CancellationToken,
    ) -> Verdict {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Verdict::Cancelled,
                () = tokio::time::sleep(self.config.poll_interval()) => {
                    match self.runtime.state(container_id).await {
                        Ok(ContainerState::Running) => {
                            if tokio::time::Instant::now() >= deadline {
                                return Verdict::TimedOut;
                            }
                        }
                        Ok(ContainerState::Exited(code)) => return Verdict::Exited(code),
                        Err(err) => return Verdict::Lost(err.to_string()),
                    }
                }
            }
        }
    }

    async fn await_server(
        &self,
        job: &Job,
        run_id: &RunId,
        peer: &NodeId,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let task = Task {
            id: TaskId::generate(),
            run_id: run_id.clone(),
            job_id: job.id.clone(),
            node_id: peer.clone(),
            kind: TaskKind::ServerSetup,
            status: TaskStatus::Pending,
            ttl_secs: job.length_secs,
            created_ts: Utc::now(),
        };
        self.client.schedule_task(&task).await?;

        let cap = Duration::from_secs(
            u64::from(job.length_secs).min(self.config.rendezvous_cap_secs),
        );
        let deadline = tokio::time::Instant::now() + cap;
        let filter = TaskFilter {
            task_id: Some(task.id.clone()),
            ..Default::default()
        };

        loop {
            let tasks = self.client.get_tasks(&filter).await?;
            match tasks.first().map(|t| t.status) {
                Some(TaskStatus::Complete) => break,
                Some(TaskStatus::Failed) => {
                    return Err(AgentError::Rendezvous("server setup failed".to_owned()))
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AgentError::Rendezvous(format!(
                    "timed out waiting for server setup on {peer}"
                )));
            }
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AgentError::Rendezvous("cancelled".to_owned()))
                }
                () = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        let node = self.client.get_node(peer).await?;
        Ok(node.public_ip)
    }

    async fn upload_workdir(
        &self,
        job: &Job,
        run_id: &RunId,
        fired_at: DateTime<Utc>,
        workdir: &Path,
    ) -> Result<String> {
        let archive = archive_directory(workdir.to_path_buf()).await?;

        let mut last_error = None;
        for attempt in 0..UPLOAD_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 << attempt)).await;
            }
            match self
                .artifacts
                .upload(&self.node_id, &job.id, fired_at, run_id, archive.clone())
                .await
            {
                Ok(url) => return Ok(url),
                Err(err) => {
                    warn!(run = %run_id, attempt = attempt + 1, error = %err, "upload failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .map(AgentError::Store)
            .unwrap_or_else(|| AgentError::runtime("upload never attempted")))
    }

    async fn stop_and_remove(&self, container_id: &str) {
        if let Err(err) = self.runtime.stop(container_id, STOP_TIMEOUT).await {
            warn!(container = %container_id, error = %err, "stop failed");
        }
        if let Err(err) = self.runtime.remove(container_id).await {
            warn!(container = %container_id, error = %err, "remove failed");
        }
    }

    async fn report_best_effort(&self, run: &Run) {
        if let Err(err) = self.client.update_run(run).await {
            warn!(run = %run.id, status = %run.status, error = %err, "run update deferred");
        }
    }

    /// Terminal updates are retried until they land; losing one would
    /// strand the run in a non-terminal state on the coordinator.
    async fn report_final(&self, run: &Run) {
        for attempt in 0..5 {
            match self.client.update_run(run).await {
                Ok(_) => return,
                Err(err) if err.is_retryable() => {
                    warn!(run = %run.id, attempt, error = %err, "terminal run update failed");
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                }
                Err(err) => {
                    warn!(run = %run.id, error = %err, "terminal run update rejected");
                    return;
                }
            }
        }
    }
}

async fn remove_dir(path: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(path).await {
        warn!(path = %path.display(), error = %err, "failed to clean working directory");
    }
}

/// Tar a directory into memory on the blocking pool.
async fn archive_directory(dir: PathBuf) -> Result<Bytes> {
    spawn_blocking(move || -> Result<Bytes> {
        let mut data = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut data);
            builder.follow_symlinks(false);
            builder.append_dir_all(".", &dir)?;
            builder.finish()?;
        }
        Ok(Bytes::from(data))
    })
    .await
    .map_err(|e| AgentError::runtime(format!("archive task panicked: {e}")))?
}
