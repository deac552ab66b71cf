//! Test fixtures for coordinator integration tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use leoscope_coordinator::{auth, Admission, AppState, AuthLayer, AuthState};
use leoscope_proto::{
    Coords, Job, JobId, JobParams, Node, NodeId, Role, Run, RunId, RunStatus, Schedule, User,
    UserId, Window,
};
use leoscope_store::{ArtifactStore, MemoryMetaStore, MetaStore, StorageConfig};

/// Static test credentials, seeded directly into the store.
pub const ADMIN: (&str, &str) = ("admin", "admin-token");
pub const ALICE: (&str, &str) = ("alice", "alice-token");
pub const NODE1: (&str, &str) = ("n1", "n1-token");
pub const NODE2: (&str, &str) = ("n2", "n2-token");

/// A router over a fresh store with the standard cast of users and nodes.
pub async fn test_app() -> (axum::Router, Arc<dyn MetaStore>) {
    let store: Arc<dyn MetaStore> = Arc::new(MemoryMetaStore::new());

    seed_user(store.as_ref(), ADMIN, Role::Admin).await;
    seed_user(store.as_ref(), ALICE, Role::User).await;
    seed_user(store.as_ref(), NODE1, Role::Node).await;
    seed_user(store.as_ref(), NODE2, Role::Node).await;
    seed_node(store.as_ref(), "n1").await;
    seed_node(store.as_ref(), "n2").await;

    let artifacts = Arc::new(
        ArtifactStore::new(&StorageConfig {
            storage_type: "memory".to_owned(),
            path: String::new(),
        })
        .unwrap(),
    );

    let state = Arc::new(AppState {
        store: store.clone(),
        artifacts,
        admission: Admission::new(),
    });
    let auth_layer = AuthLayer::new(Arc::new(AuthState {
        store: store.clone(),
        jwt_secret: Some("test-jwt-secret".to_owned()),
    }));

    (leoscope_coordinator::api::router(state, auth_layer), store)
}

async fn seed_user(store: &dyn MetaStore, (id, token): (&str, &str), role: Role) {
    let user = User {
        id: UserId::new(id),
        name: id.to_owned(),
        role,
        team: "testing".to_owned(),
        token_hash: auth::hash_token(token),
        created_at: Utc::now(),
    };
    store.insert_user(&user).await.unwrap();
}

async fn seed_node(store: &dyn MetaStore, id: &str) {
    let node = Node {
        id: NodeId::new(id),
        display_name: format!("test node {id}"),
        coords: Coords {
            lat: 47.6,
            lon: -122.3,
        },
        location: "seattle".to_owned(),
        provider: "starlink".to_owned(),
        last_active_ts: Utc::now(),
        public_ip: Some("203.0.113.7".to_owned()),
        scavenger_active: false,
    };
    store.insert_node(&node).await.unwrap();
}

/// Timestamp helper anchored far in the future so one-shot admission
/// never trips the past-start check.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2124, 1, 1, h, m, 0).unwrap()
}

/// Builder for test jobs.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn cron(id: &str, expr: &str) -> Self {
        Self {
            job: Job {
                id: JobId::new(id),
                node_id: NodeId::new("n1"),
                owner_id: UserId::new("alice"),
                schedule: Schedule::Cron {
                    expr: expr.to_owned(),
                },
                window: Window::new(at(0, 0), at(1, 0)),
                length_secs: 300,
                overhead: true,
                paired_server_node_id: None,
                trigger: None,
                config: "interval_ms = 200".to_owned(),
                params: JobParams {
                    mode: "network".to_owned(),
                    deploy: String::new(),
                    execute: "leotest/iperf:latest".to_owned(),
                    finish: String::new(),
                },
            },
        }
    }

    pub fn atq(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, len: u32) -> Self {
        let mut builder = Self::cron(id, "* * * * *");
        builder.job.schedule = Schedule::Atq;
        builder.job.window = Window::new(start, end);
        builder.job.length_secs = len;
        builder
    }

    pub fn on_node(mut self, node: &str) -> Self {
        self.job.node_id = NodeId::new(node);
        self
    }

    pub fn paired_with(mut self, node: &str) -> Self {
        self.job.paired_server_node_id = Some(NodeId::new(node));
        self
    }

    pub fn overhead(mut self, overhead: bool) -> Self {
        self.job.overhead = overhead;
        self
    }

    pub fn trigger(mut self, expr: &str) -> Self {
        self.job.trigger = Some(expr.to_owned());
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

/// A run record for a job, as the executor would report it.
pub fn make_run(id: &str, job: &str, node: &str, status: RunStatus) -> Run {
    Run {
        id: RunId::new(id),
        job_id: JobId::new(job),
        node_id: NodeId::new(node),
        owner_id: UserId::new("alice"),
        status,
        start_ts: at(0, 10),
        end_ts: None,
        status_message: String::new(),
        artifact_url: None,
    }
}
