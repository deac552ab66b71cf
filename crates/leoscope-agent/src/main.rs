//! LEOScope node agent binary.

use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use leoscope_agent::{
    spawn_monitor, AgentConfig, DockerCli, ExecutionRegistry, Executor, HttpJsonMonitor, Monitor,
    NodeScheduler,
};
use leoscope_client::{ApiClient, Credential};
use leoscope_proto::NodeId;
use leoscope_schedule::EnvSnapshot;
use leoscope_store::ArtifactStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("leoscope_agent=info".parse()?))
        .init();

    info!("LEOScope agent starting");

    let config: AgentConfig = Figment::new()
        .merge(Toml::file("agent.toml"))
        .merge(Env::prefixed("LEOSCOPE_AGENT_").split("__"))
        .extract()?;

    if config.node_id.is_empty() {
        return Err("node_id must be configured".into());
    }
    let node_id = NodeId::new(config.node_id.as_str());

    let client = Arc::new(ApiClient::with_timeout(
        config.coordinator.url.clone(),
        Credential::Static {
            user_id: config.node_id.clone(),
            token: config.coordinator.token.clone(),
        },
        Duration::from_secs(config.coordinator.timeout_secs),
    )?);

    // Global config and the node record are loaded up front; the node
    // record carries the coordinates the satellite monitor needs.
    let global_config = client.get_config().await?;
    info!(config = %global_config, "global config loaded");
    let node = client.get_node(&node_id).await?;
    info!(node = %node.id, lat = node.coords.lat, lon = node.coords.lon, "node record loaded");

    let snapshot = EnvSnapshot::new();
    let shutdown = CancellationToken::new();
    start_monitors(&config, &node, snapshot.clone(), shutdown.clone())?;

    let runtime = Arc::new(DockerCli::new(config.executor.docker_bin.clone()));
    let artifacts = Arc::new(ArtifactStore::new(&config.artifacts)?);
    let registry = ExecutionRegistry::new();
    let executor = Arc::new(Executor::new(
        client.clone(),
        runtime.clone(),
        artifacts,
        node_id.clone(),
        snapshot,
        config.executor.clone(),
    ));

    let scheduler = Arc::new(NodeScheduler::new(
        client,
        runtime,
        executor,
        registry,
        node_id,
        Duration::from_secs(config.scheduler.poll_secs),
    ));

    let loop_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(scheduler.run(loop_shutdown));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();
    let _ = scheduler_handle.await;
    Ok(())
}

fn start_monitors(
    config: &AgentConfig,
    node: &leoscope_proto::Node,
    snapshot: EnvSnapshot,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut monitors: Vec<Arc<dyn Monitor>> = Vec::new();

    if let Some(endpoint) = &config.monitors.satellite {
        let url = format!(
            "{}?lat={}&lon={}",
            endpoint.url, node.coords.lat, node.coords.lon
        );
        monitors.push(Arc::new(HttpJsonMonitor::new(
            "satellite",
            url,
            "satellite_",
            Duration::from_secs(endpoint.interval_secs),
        )?));
    }
    if let Some(endpoint) = &config.monitors.weather {
        monitors.push(Arc::new(HttpJsonMonitor::new(
            "weather",
            endpoint.url.clone(),
            "weather.",
            Duration::from_secs(endpoint.interval_secs),
        )?));
    }
    if let Some(endpoint) = &config.monitors.terminal {
        monitors.push(Arc::new(HttpJsonMonitor::new(
            "terminal",
            endpoint.url.clone(),
            "terminal.",
            Duration::from_secs(endpoint.interval_secs),
        )?));
    }

    if monitors.is_empty() {
        warn!("no monitors configured; triggers will fail closed");
    }
    for monitor in monitors {
        info!(monitor = monitor.name(), "starting monitor");
        spawn_monitor(monitor, snapshot.clone(), shutdown.clone());
    }
    Ok(())
}
