//! Container runtime abstraction.
//!
//! The agent drives containers through this trait: the production
//! implementation shells out to the `docker` CLI, and [`FakeRuntime`]
//! backs tests without a daemon. Scheduler-owned containers are
//! identified solely by their labels.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::Command;
use tracing::debug;

use crate::error::{AgentError, Result};

/// Everything needed to launch an experiment container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment variables injected into the container.
    pub env: Vec<(String, String)>,
    /// Labels attached to the container.
    pub labels: Vec<(String, String)>,
    /// Host path to container path bind mounts.
    pub mounts: Vec<(PathBuf, String)>,
}

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Still running.
    Running,
    /// Exited with the given code.
    Exited(i64),
}

/// A container found by a label query.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    /// Runtime container id.
    pub id: String,
    /// Labels attached at launch.
    pub labels: HashMap<String, String>,
    /// Whether it is currently running.
    pub running: bool,
}

/// Launch, inspect, and reap containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a detached container; returns its runtime id.
    async fn launch(&self, spec: &ContainerSpec) -> Result<String>;

    /// Current state of a container.
    async fn state(&self, id: &str) -> Result<ContainerState>;

    /// Stop a container, allowing `timeout` for graceful shutdown.
    async fn stop(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Remove a container (force-stops if needed).
    async fn remove(&self, id: &str) -> Result<()>;

    /// Collected stdout/stderr of a container.
    async fn logs(&self, id: &str) -> Result<String>;

    /// Containers carrying every one of the given labels.
    async fn list(&self, label_filters: &[(&str, &str)]) -> Result<Vec<ContainerSummary>>;
}

/// Runtime backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Create a runtime driving the given docker binary.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(binary = %self.binary, ?args, "invoking container runtime");
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AgentError::runtime(format!("failed to spawn {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::runtime(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn launch(&self, spec: &ContainerSpec) -> Result<String> {
        let mut args: Vec<String> = vec![
            "run".to_owned(),
            "--detach".to_owned(),
            "--name".to_owned(),
            spec.name.clone(),
        ];
        for (key, value) in &spec.labels {
            args.push("--label".to_owned());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &spec.env {
            args.push("--env".to_owned());
            args.push(format!("{key}={value}"));
        }
        for (host, container) in &spec.mounts {
            args.push("--volume".to_owned());
            args.push(format!("{}:{container}", host.display()));
        }
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await
    }

    async fn state(&self, id: &str) -> Result<ContainerState> {
        let output = self
            .run(&[
                "inspect",
                "--format",
                "{{.State.Running}} {{.State.ExitCode}}",
                id,
            ])
            .await?;

        let mut parts = output.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("true"), _) => Ok(ContainerState::Running),
            (Some("false"), Some(code)) => {
                let code = code.parse::<i64>().map_err(|_| {
                    AgentError::runtime(format!("unparseable exit code '{code}' for {id}"))
                })?;
                Ok(ContainerState::Exited(code))
            }
            _ => Err(AgentError::runtime(format!(
                "unexpected inspect output '{output}' for {id}"
            ))),
        }
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().to_string();
        self.run(&["stop", "--time", &secs, id]).await.map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.run(&["rm", "--force", id]).await.map(|_| ())
    }

    async fn logs(&self, id: &str) -> Result<String> {
        self.run(&["logs", id]).await
    }

    async fn list(&self, label_filters: &[(&str, &str)]) -> Result<Vec<ContainerSummary>> {
        let mut args: Vec<String> = vec![
            "ps".to_owned(),
            "--all".to_owned(),
            "--format".to_owned(),
            "{{.ID}}".to_owned(),
        ];
        for (key, value) in label_filters {
            args.push("--filter".to_owned());
            args.push(format!("label={key}={value}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let ids = self.run(&arg_refs).await?;

        let mut containers = Vec::new();
        for id in ids.lines().filter(|l| !l.is_empty()) {
            let labels_json = self
                .run(&["inspect", "--format", "{{json .Config.Labels}}", id])
                .await?;
            let labels: HashMap<String, String> =
                serde_json::from_str(&labels_json).unwrap_or_default();
            let running = matches!(self.state(id).await?, ContainerState::Running);
            containers.push(ContainerSummary {
                id: id.to_owned(),
                labels,
                running,
            });
        }
        Ok(containers)
    }
}

/// In-process runtime for tests.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    containers: DashMap<String, FakeContainer>,
    counter: std::sync::atomic::AtomicU64,
    history: std::sync::Mutex<Vec<ContainerSpec>>,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    state: ContainerState,
    logs: String,
}

impl FakeRuntime {
    /// Create an empty fake runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a container as exited, as if the experiment finished.
    pub fn finish(&self, id: &str, exit_code: i64) {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.state = ContainerState::Exited(exit_code);
        }
    }

    /// Append to a container's log stream.
    pub fn push_logs(&self, id: &str, logs: &str) {
        if let Some(mut container) = self.containers.get_mut(id) {
            container.logs.push_str(logs);
        }
    }

    /// Ids of containers currently running.
    #[must_use]
    pub fn running_ids(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|entry| entry.state == ContainerState::Running)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Whether a container still exists (running or exited).
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.containers.contains_key(id)
    }

    /// Spec a container was launched with.
    #[must_use]
    pub fn spec_of(&self, id: &str) -> Option<ContainerSpec> {
        self.containers.get(id).map(|c| c.spec.clone())
    }

    /// Every spec ever launched, in order, including removed containers.
    #[must_use]
    pub fn launched(&self) -> Vec<ContainerSpec> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn launch(&self, spec: &ContainerSpec) -> Result<String> {
        let id = format!(
            "fake-{}",
            self.counter
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        );
        self.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                state: ContainerState::Running,
                logs: String::new(),
            },
        );
        if let Ok(mut history) = self.history.lock() {
            history.push(spec.clone());
        }
        Ok(id)
    }

    async fn state(&self, id: &str) -> Result<ContainerState> {
        self.containers
            .get(id)
            .map(|c| c.state)
            .ok_or_else(|| AgentError::runtime(format!("no such container: {id}")))
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<()> {
        let mut container = self
            .containers
            .get_mut(id)
            .ok_or_else(|| AgentError::runtime(format!("no such container: {id}")))?;
        if container.state == ContainerState::Running {
            container.state = ContainerState::Exited(137);
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AgentError::runtime(format!("no such container: {id}")))
    }

    async fn logs(&self, id: &str) -> Result<String> {
        self.containers
            .get(id)
            .map(|c| c.logs.clone())
            .ok_or_else(|| AgentError::runtime(format!("no such container: {id}")))
    }

    async fn list(&self, label_filters: &[(&str, &str)]) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .iter()
            .filter(|entry| {
                label_filters.iter().all(|(key, value)| {
                    entry
                        .spec
                        .labels
                        .iter()
                        .any(|(k, v)| k == key && v == value)
                })
            })
            .map(|entry| ContainerSummary {
                id: entry.key().clone(),
                labels: entry.spec.labels.iter().cloned().collect(),
                running: entry.state == ContainerState::Running,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, labels: &[(&str, &str)]) -> ContainerSpec {
        ContainerSpec {
            name: name.to_owned(),
            image: "leotest/iperf:latest".to_owned(),
            env: vec![],
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            mounts: vec![],
        }
    }

    #[tokio::test]
    async fn fake_runtime_lifecycle() {
        let runtime = FakeRuntime::new();
        let id = runtime
            .launch(&spec("c1", &[("leotest", "true")]))
            .await
            .unwrap();

        assert_eq!(runtime.state(&id).await.unwrap(), ContainerState::Running);

        runtime.finish(&id, 0);
        assert_eq!(runtime.state(&id).await.unwrap(), ContainerState::Exited(0));

        runtime.remove(&id).await.unwrap();
        assert!(runtime.state(&id).await.is_err());
    }

    #[tokio::test]
    async fn fake_runtime_list_filters_by_labels() {
        let runtime = FakeRuntime::new();
        runtime
            .launch(&spec("a", &[("leotest", "true"), ("overhead", "true")]))
            .await
            .unwrap();
        runtime
            .launch(&spec("b", &[("leotest", "true"), ("overhead", "false")]))
            .await
            .unwrap();
        runtime.launch(&spec("c", &[("other", "x")])).await.unwrap();

        let owned = runtime.list(&[("leotest", "true")]).await.unwrap();
        assert_eq!(owned.len(), 2);

        let overhead = runtime
            .list(&[("leotest", "true"), ("overhead", "true")])
            .await
            .unwrap();
        assert_eq!(overhead.len(), 1);
    }

    #[tokio::test]
    async fn fake_runtime_stop_sets_killed_exit() {
        let runtime = FakeRuntime::new();
        let id = runtime.launch(&spec("c1", &[])).await.unwrap();
        runtime.stop(&id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(
            runtime.state(&id).await.unwrap(),
            ContainerState::Exited(137)
        );
    }
}
