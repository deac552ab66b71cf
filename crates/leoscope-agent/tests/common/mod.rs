//! Shared harness for agent integration tests: an in-process coordinator
//! over a real TCP listener, plus agent components wired to a fake
//! container runtime and an in-memory blob store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use leoscope_agent::config::ExecutorConfig;
use leoscope_agent::{ExecutionRegistry, Executor, FakeRuntime, NodeScheduler};
use leoscope_client::{ApiClient, Credential, RetryPolicy};
use leoscope_coordinator::{auth, Admission, AppState, AuthLayer, AuthState};
use leoscope_proto::{Coords, Node, NodeId, Role, User, UserId};
use leoscope_schedule::EnvSnapshot;
use leoscope_store::{ArtifactStore, MemoryMetaStore, MetaStore, StorageConfig};

pub const NODE1_TOKEN: &str = "n1-token";
pub const NODE2_TOKEN: &str = "n2-token";
pub const ALICE_TOKEN: &str = "alice-token";

/// A live coordinator plus handles to its backing stores.
pub struct Coordinator {
    pub base_url: String,
    pub store: Arc<dyn MetaStore>,
    pub artifacts: Arc<ArtifactStore>,
}

/// Start a coordinator on an ephemeral port with the standard cast.
pub async fn start_coordinator() -> Coordinator {
    let store: Arc<dyn MetaStore> = Arc::new(MemoryMetaStore::new());
    seed_user(store.as_ref(), "admin", "admin-token", Role::Admin).await;
    seed_user(store.as_ref(), "alice", ALICE_TOKEN, Role::User).await;
    seed_user(store.as_ref(), "n1", NODE1_TOKEN, Role::Node).await;
    seed_user(store.as_ref(), "n2", NODE2_TOKEN, Role::Node).await;
    seed_node(store.as_ref(), "n1", Some("198.51.100.1")).await;
    seed_node(store.as_ref(), "n2", Some("203.0.113.7")).await;

    let artifacts = Arc::new(
        ArtifactStore::new(&StorageConfig {
            storage_type: "memory".to_owned(),
            path: String::new(),
        })
        .unwrap(),
    );

    let state = Arc::new(AppState {
        store: store.clone(),
        artifacts: artifacts.clone(),
        admission: Admission::new(),
    });
    let auth_layer = AuthLayer::new(Arc::new(AuthState {
        store: store.clone(),
        jwt_secret: None,
    }));
    let router = leoscope_coordinator::api::router(state, auth_layer);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Coordinator {
        base_url: format!("http://{addr}"),
        store,
        artifacts,
    }
}

async fn seed_user(store: &dyn MetaStore, id: &str, token: &str, role: Role) {
    store
        .insert_user(&User {
            id: UserId::new(id),
            name: id.to_owned(),
            role,
            team: "testing".to_owned(),
            token_hash: auth::hash_token(token),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn seed_node(store: &dyn MetaStore, id: &str, public_ip: Option<&str>) {
    store
        .insert_node(&Node {
            id: NodeId::new(id),
            display_name: format!("test node {id}"),
            coords: Coords {
                lat: 47.6,
                lon: -122.3,
            },
            location: "seattle".to_owned(),
            provider: "starlink".to_owned(),
            last_active_ts: Utc::now(),
            public_ip: public_ip.map(ToOwned::to_owned),
            scavenger_active: false,
        })
        .await
        .unwrap();
}

/// Agent-side components for one node.
pub struct AgentHarness {
    pub client: Arc<ApiClient>,
    pub runtime: Arc<FakeRuntime>,
    pub executor: Arc<Executor>,
    pub registry: ExecutionRegistry,
    pub scheduler: Arc<NodeScheduler>,
    pub snapshot: EnvSnapshot,
    _workdir: TempDir,
}

/// Build the agent stack for `node_id` against a running coordinator.
pub fn agent_for(coordinator: &Coordinator, node_id: &str, token: &str) -> AgentHarness {
    let client = Arc::new(
        ApiClient::with_timeout(
            coordinator.base_url.clone(),
            Credential::Static {
                user_id: node_id.to_owned(),
                token: token.to_owned(),
            },
            Duration::from_secs(2),
        )
        .unwrap()
        .with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        }),
    );

    let workdir = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let registry = ExecutionRegistry::new();
    let snapshot = EnvSnapshot::new();
    let executor = Arc::new(Executor::new(
        client.clone(),
        runtime.clone(),
        coordinator.artifacts.clone(),
        NodeId::new(node_id),
        snapshot.clone(),
        ExecutorConfig {
            workdir: workdir.path().to_path_buf(),
            poll_secs: 1,
            grace_secs: 2,
            rendezvous_cap_secs: 10,
            docker_bin: "docker".to_owned(),
        },
    ));
    let scheduler = Arc::new(NodeScheduler::new(
        client.clone(),
        runtime.clone(),
        executor.clone(),
        registry.clone(),
        NodeId::new(node_id),
        Duration::from_millis(500),
    ));

    AgentHarness {
        client,
        runtime,
        executor,
        registry,
        scheduler,
        snapshot,
        _workdir: workdir,
    }
}

/// Finish any container that appears on the runtime with the given exit
/// code, copying a line of logs in first. Runs until dropped.
pub fn auto_finish(runtime: Arc<FakeRuntime>, exit_code: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            for id in runtime.running_ids() {
                runtime.push_logs(&id, "experiment output\n");
                runtime.finish(&id, exit_code);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
}

/// Poll until `check` returns true or the timeout elapses.
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Poll the store until a run of `job_id` reaches `status`.
pub async fn wait_for_run_status(
    store: &Arc<dyn MetaStore>,
    job_id: &str,
    status: leoscope_proto::RunStatus,
    timeout: Duration,
) -> Option<leoscope_proto::Run> {
    let filter = leoscope_proto::RunFilter {
        job_id: Some(leoscope_proto::JobId::new(job_id)),
        ..Default::default()
    };
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        let runs = store.list_runs(&filter).await.unwrap();
        if let Some(run) = runs.into_iter().find(|r| r.status == status) {
            return Some(run);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}
