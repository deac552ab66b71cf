//! HTTP API handlers for the coordinator.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use leoscope_proto::{
    Ack, CredentialResponse, HeartbeatRequest, HeartbeatResponse, Job, JobFilter, JobId,
    KernelAccessDecision, KernelAccessRequest, KernelAccessResponse, ModifyUserRequest, Node,
    NodeFilter, NodeId, RegisterNodeRequest, RegisterUserRequest, RescheduleRequest,
    RescheduleResponse, Role, Run, RunFilter, ScavengerState, SetScavengerRequest, Task,
    TaskFilter, TaskId, TaskStatus, UpdateConfigRequest, UpdateNodeRequest, UpdateTaskRequest,
    User, UserId,
};
use leoscope_store::{ArtifactStore, MetaStore, StoreError};

use crate::admission::Admission;
use crate::auth::{self, AuthLayer, CallerIdentity};
use crate::error::{CoordinatorError, Result};

/// Shared application state.
pub struct AppState {
    /// Authoritative metadata store.
    pub store: Arc<dyn MetaStore>,
    /// Blob store for run archives.
    pub artifacts: Arc<ArtifactStore>,
    /// Per-node admission gate.
    pub admission: Admission,
}

/// Creates the full router: open health endpoint plus the authenticated
/// `/v1` API.
pub fn router(state: Arc<AppState>, auth: AuthLayer) -> Router {
    let api = Router::new()
        // Users
        .route("/users", post(register_user))
        .route("/users/{id}", axum::routing::patch(modify_user))
        .route("/users/{id}", delete(delete_user))
        // Nodes
        .route("/nodes", post(register_node))
        .route("/nodes", get(get_nodes))
        .route("/nodes/{id}", axum::routing::patch(update_node))
        .route("/nodes/{id}", delete(delete_node))
        .route("/nodes/{id}/heartbeat", post(report_heartbeat))
        .route("/nodes/{id}/scavenger", put(set_scavenger))
        .route("/nodes/{id}/scavenger", get(get_scavenger))
        // Jobs
        .route("/jobs", post(schedule_job))
        .route("/jobs", get(get_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}", delete(delete_job))
        .route("/jobs/{id}/reschedule", post(reschedule_job))
        // Runs
        .route("/runs", post(update_run))
        .route("/runs", get(get_runs))
        .route("/runs/scheduled", get(get_scheduled_runs))
        // Tasks
        .route("/tasks", post(schedule_task))
        .route("/tasks", get(get_tasks))
        .route("/tasks/{id}", post(update_task))
        // Config
        .route("/config", get(get_config))
        .route("/config", put(update_config))
        // Side services
        .route("/kernel-access", post(kernel_access))
        .route("/artifacts", get(download_artifact))
        .layer(auth)
        .with_state(state);

    Router::new().route("/health", get(health)).nest("/v1", api)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

fn require_admin(caller: &CallerIdentity) -> Result<()> {
    if caller.role.is_admin() {
        Ok(())
    } else {
        Err(CoordinatorError::forbidden("requires the admin role"))
    }
}

fn require_node(caller: &CallerIdentity) -> Result<()> {
    if caller.role.is_node() {
        Ok(())
    } else {
        Err(CoordinatorError::forbidden("requires a node credential"))
    }
}

fn require_self_node(caller: &CallerIdentity, node_id: &NodeId) -> Result<()> {
    require_node(caller)?;
    if caller.user_id.as_str() == node_id.as_str() {
        Ok(())
    } else {
        Err(CoordinatorError::forbidden(format!(
            "credential does not belong to node {node_id}"
        )))
    }
}

// --- users ---

async fn register_user(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<RegisterUserRequest>,
) -> Result<Json<CredentialResponse>> {
    require_admin(&caller)?;

    let token = auth::generate_token();
    let user = User {
        id: request.id.clone(),
        name: request.name,
        role: request.role,
        team: request.team,
        token_hash: auth::hash_token(&token),
        created_at: Utc::now(),
    };
    state.store.insert_user(&user).await?;

    info!(user = %user.id, role = %user.role, "user registered");
    Ok(Json(CredentialResponse {
        id: request.id.to_string(),
        token,
    }))
}

async fn modify_user(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<UserId>,
    Json(request): Json<ModifyUserRequest>,
) -> Result<Json<Ack>> {
    require_admin(&caller)?;

    let mut user = state
        .store
        .get_user(&id)
        .await?
        .ok_or_else(|| CoordinatorError::not_found(format!("user {id}")))?;

    if let Some(name) = request.name {
        user.name = name;
    }
    if let Some(role) = request.role {
        user.role = role;
    }
    if let Some(team) = request.team {
        user.team = team;
    }
    state.store.update_user(&user).await?;
    Ok(Json(Ack::ok()))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<UserId>,
) -> Result<Json<Ack>> {
    require_admin(&caller)?;
    state.store.delete_user(&id).await?;
    Ok(Json(Ack::ok()))
}

// --- nodes ---

async fn register_node(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<Json<CredentialResponse>> {
    require_admin(&caller)?;

    let token = auth::generate_token();
    let credential = User {
        id: UserId::new(request.id.as_str()),
        name: request.display_name.clone(),
        role: Role::Node,
        team: "nodes".to_owned(),
        token_hash: auth::hash_token(&token),
        created_at: Utc::now(),
    };
    let node = Node {
        id: request.id.clone(),
        display_name: request.display_name,
        coords: request.coords,
        location: request.location,
        provider: request.provider,
        last_active_ts: Utc::now(),
        public_ip: request.public_ip,
        scavenger_active: false,
    };

    state.store.insert_user(&credential).await?;
    if let Err(err) = state.store.insert_node(&node).await {
        // Roll back the credential so a retry sees a clean slate.
        let _ = state.store.delete_user(&credential.id).await;
        return Err(err.into());
    }

    info!(node = %node.id, "node registered");
    Ok(Json(CredentialResponse {
        id: request.id.to_string(),
        token,
    }))
}

async fn update_node(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<NodeId>,
    Json(request): Json<UpdateNodeRequest>,
) -> Result<Json<Ack>> {
    require_admin(&caller)?;

    let mut node = state
        .store
        .get_node(&id)
        .await?
        .ok_or_else(|| CoordinatorError::not_found(format!("node {id}")))?;

    if let Some(display_name) = request.display_name {
        node.display_name = display_name;
    }
    if let Some(coords) = request.coords {
        node.coords = coords;
    }
    if let Some(location) = request.location {
        node.location = location;
    }
    if let Some(provider) = request.provider {
        node.provider = provider;
    }
    if let Some(public_ip) = request.public_ip {
        node.public_ip = Some(public_ip);
    }
    state.store.update_node(&node).await?;
    Ok(Json(Ack::ok()))
}

async fn delete_node(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<NodeId>,
) -> Result<Json<Ack>> {
    require_admin(&caller)?;
    state.store.delete_node(&id).await?;
    // The node credential shares the id; drop it alongside.
    let _ = state.store.delete_user(&UserId::new(id.as_str())).await;
    Ok(Json(Ack::ok()))
}

async fn get_nodes(
    State(state): State<Arc<AppState>>,
    Extension(_caller): Extension<CallerIdentity>,
    Query(filter): Query<NodeFilter>,
) -> Result<Json<Vec<Node>>> {
    let nodes = state.store.list_nodes(&filter, Utc::now()).await?;
    Ok(Json(nodes))
}

async fn report_heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<NodeId>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>> {
    require_self_node(&caller, &id)?;
    let received = state
        .store
        .record_heartbeat(&id, request.public_ip, Utc::now())
        .await?;
    Ok(Json(HeartbeatResponse { received }))
}

async fn set_scavenger(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<NodeId>,
    Json(request): Json<SetScavengerRequest>,
) -> Result<Json<ScavengerState>> {
    require_admin(&caller)?;
    let node = state.store.set_scavenger(&id, request.active).await?;
    info!(node = %id, active = request.active, "scavenger toggled");
    Ok(Json(ScavengerState {
        node_id: node.id,
        active: node.scavenger_active,
    }))
}

async fn get_scavenger(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<NodeId>,
) -> Result<Json<ScavengerState>> {
    if !caller.role.is_admin() && !caller.role.is_node() {
        return Err(CoordinatorError::forbidden(
            "requires an admin or node credential",
        ));
    }
    let node = state
        .store
        .get_node(&id)
        .await?
        .ok_or_else(|| CoordinatorError::not_found(format!("node {id}")))?;
    Ok(Json(ScavengerState {
        node_id: node.id,
        active: node.scavenger_active,
    }))
}

// --- jobs ---

async fn schedule_job(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(mut job): Json<Job>,
) -> Result<Json<Ack>> {
    // Owner is always the authenticated caller.
    job.owner_id = caller.user_id.clone();

    for node in job.target_nodes() {
        if state.store.get_node(&node).await?.is_none() {
            return Err(CoordinatorError::not_found(format!("node {node}")));
        }
    }

    state
        .admission
        .admit(state.store.as_ref(), &job, Utc::now())
        .await?;
    info!(job = %job.id, node = %job.node_id, overhead = job.overhead, "job admitted");
    Ok(Json(Ack::ok()))
}

async fn reschedule_job(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<JobId>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<RescheduleResponse>> {
    let job = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| CoordinatorError::not_found(format!("job {id}")))?;

    let is_owner = caller.user_id == job.owner_id;
    let is_host_node = caller.role.is_node()
        && job
            .target_nodes()
            .iter()
            .any(|n| n.as_str() == caller.user_id.as_str());
    if !is_owner && !is_host_node && !caller.role.is_admin() {
        return Err(CoordinatorError::forbidden(
            "only the owner, the hosting node, or an admin may reschedule",
        ));
    }

    let start_ts = state
        .admission
        .reschedule_nearest(state.store.as_ref(), &job, request.after)
        .await?;
    Ok(Json(RescheduleResponse { start_ts }))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Extension(_caller): Extension<CallerIdentity>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>> {
    let job = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| CoordinatorError::not_found(format!("job {id}")))?;
    Ok(Json(job))
}

async fn get_jobs(
    State(state): State<Arc<AppState>>,
    Extension(_caller): Extension<CallerIdentity>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Vec<Job>>> {
    let jobs = match (&filter.node_id, &filter.user_id) {
        (Some(node_id), _) => state.store.jobs_for_nodes(&[node_id.clone()]).await?,
        (None, Some(user_id)) => state.store.jobs_for_user(user_id).await?,
        (None, None) => {
            return Err(CoordinatorError::invalid(
                "a node_id or user_id filter is required",
            ))
        }
    };
    Ok(Json(jobs))
}

async fn delete_job(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<JobId>,
) -> Result<Json<Ack>> {
    let job = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| CoordinatorError::not_found(format!("job {id}")))?;

    if caller.user_id != job.owner_id && !caller.role.is_admin() {
        return Err(CoordinatorError::forbidden(
            "only the owner or an admin may delete a job",
        ));
    }
    state.store.delete_job(&id).await?;
    info!(job = %id, "job deleted");
    Ok(Json(Ack::ok()))
}

// --- runs ---

async fn update_run(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(run): Json<Run>,
) -> Result<Json<Ack>> {
    // Only the node the run executes on may report it.
    require_self_node(&caller, &run.node_id)?;
    state.store.apply_run(&run).await?;
    Ok(Json(Ack::ok()))
}

async fn get_runs(
    State(state): State<Arc<AppState>>,
    Extension(_caller): Extension<CallerIdentity>,
    Query(filter): Query<RunFilter>,
) -> Result<Json<Vec<Run>>> {
    let runs = state.store.list_runs(&filter).await?;
    Ok(Json(runs))
}

async fn get_scheduled_runs(
    State(state): State<Arc<AppState>>,
    Extension(_caller): Extension<CallerIdentity>,
    Query(filter): Query<RunFilter>,
) -> Result<Json<Vec<Run>>> {
    let runs = state.store.list_runs(&filter).await?;
    Ok(Json(
        runs.into_iter()
            .filter(|r| !r.status.is_terminal())
            .collect(),
    ))
}

// --- tasks ---

async fn schedule_task(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(mut task): Json<Task>,
) -> Result<Json<Ack>> {
    require_node(&caller)?;
    task.status = TaskStatus::Pending;
    task.created_ts = Utc::now();

    match state.store.insert_task(&task).await {
        Ok(()) => Ok(Json(Ack::ok())),
        // Task ids are caller-assigned, so a replayed insert is a no-op.
        Err(StoreError::AlreadyExists(_)) => Ok(Json(Ack::ok())),
        Err(err) => Err(err.into()),
    }
}

async fn get_tasks(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<Task>>> {
    require_node(&caller)?;
    let tasks = state.store.list_tasks(&filter, Utc::now()).await?;
    Ok(Json(tasks))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<TaskId>,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<Json<Ack>> {
    require_node(&caller)?;
    state.store.update_task_status(&id, request.status).await?;
    Ok(Json(Ack::ok()))
}

// --- config ---

async fn get_config(
    State(state): State<Arc<AppState>>,
    Extension(_caller): Extension<CallerIdentity>,
) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.store.get_config().await?))
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<UpdateConfigRequest>,
) -> Result<Json<Ack>> {
    require_admin(&caller)?;
    state.store.set_config(request.config).await?;
    info!("global config updated");
    Ok(Json(Ack::ok()))
}

// --- side services ---

async fn kernel_access(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<KernelAccessRequest>,
) -> Result<Json<KernelAccessResponse>> {
    require_node(&caller)?;
    let decision = match state.store.get_user(&request.target_user_id).await? {
        Some(user) if user.role.kernel_access() => KernelAccessDecision::Allow,
        _ => KernelAccessDecision::Deny,
    };
    Ok(Json(KernelAccessResponse { decision }))
}

#[derive(Deserialize)]
struct ArtifactQuery {
    path: String,
}

async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Extension(_caller): Extension<CallerIdentity>,
    Query(query): Query<ArtifactQuery>,
) -> Result<impl IntoResponse> {
    let data = state.artifacts.download(&query.path).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-tar")],
        data,
    ))
}
