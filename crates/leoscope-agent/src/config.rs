//! Configuration types for the agent.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use leoscope_store::StorageConfig;

/// Agent configuration, loaded from `agent.toml` merged with
/// `LEOSCOPE_AGENT_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity of this node; also the credential user id.
    pub node_id: String,
    /// Coordinator endpoint and credential.
    pub coordinator: CoordinatorConfig,
    /// Scheduler loop configuration.
    pub scheduler: SchedulerConfig,
    /// Executor configuration.
    pub executor: ExecutorConfig,
    /// Artifact storage configuration.
    pub artifacts: StorageConfig,
    /// Environmental monitor endpoints.
    pub monitors: MonitorsConfig,
}

/// Coordinator endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Base URL of the coordinator API.
    pub url: String,
    /// Static bearer token for this node's credential.
    pub token: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8070".to_owned(),
            token: String::new(),
            timeout_secs: 5,
        }
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Poll period of the main loop in seconds.
    pub poll_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { poll_secs: 10 }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Working directory root; runs live under `<workdir>/<job>/<run>`.
    pub workdir: PathBuf,
    /// Container state poll interval in seconds.
    pub poll_secs: u64,
    /// Grace on top of the job length before the wall-clock stop.
    pub grace_secs: u64,
    /// Ceiling on the server rendezvous wait in seconds.
    pub rendezvous_cap_secs: u64,
    /// Docker binary to drive the container runtime with.
    pub docker_bin: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("/var/lib/leoscope/work"),
            poll_secs: 5,
            grace_secs: 30,
            rendezvous_cap_secs: 300,
            docker_bin: "docker".to_owned(),
        }
    }
}

impl ExecutorConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    /// Grace period as a [`Duration`].
    #[must_use]
    pub const fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// Monitor endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorEndpoint {
    /// HTTP endpoint returning a JSON observation document.
    pub url: String,
    /// Sampling cadence in seconds.
    pub interval_secs: u64,
}

/// Environmental monitor endpoints. Unset monitors are not started.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorsConfig {
    /// Satellite elevation source for this node's coordinates.
    pub satellite: Option<MonitorEndpoint>,
    /// Weather source.
    pub weather: Option<MonitorEndpoint>,
    /// Terminal telemetry source (e.g. the dish's local endpoint).
    pub terminal: Option<MonitorEndpoint>,
}
