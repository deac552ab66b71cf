//! HTTP client for the coordinator API.
//!
//! Used by node agents and the CLI. Every call carries the caller's
//! credential headers and a per-call timeout. Transport failures are
//! retried with jittered exponential backoff inside a bounded retry
//! budget; domain errors are surfaced verbatim and never retried, which is
//! safe because mutators are idempotent by caller-assigned record id.

mod error;
mod retry;

pub use error::{ClientError, Result};
pub use retry::RetryPolicy;

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use leoscope_proto::{
    headers, Ack, ApiError, CredentialResponse, HeartbeatRequest, HeartbeatResponse, Job, JobFilter,
    JobId, KernelAccessRequest, KernelAccessResponse, ModifyUserRequest, Node, NodeFilter, NodeId,
    RegisterNodeRequest, RegisterUserRequest, RescheduleRequest, RescheduleResponse, Run,
    RunFilter, ScavengerState, SetScavengerRequest, Task, TaskFilter, TaskId, TaskStatus,
    UpdateConfigRequest, UpdateNodeRequest, UpdateTaskRequest, UserId,
};

/// Credential presented on every request.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Static bearer token.
    Static {
        /// Caller user id.
        user_id: String,
        /// Bearer token.
        token: String,
    },
    /// Signed token.
    Jwt {
        /// Caller user id.
        user_id: String,
        /// Encoded JWT.
        token: String,
    },
}

/// Typed client for the coordinator API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credential: Credential,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Create a client with the default 5-second call timeout.
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Result<Self> {
        Self::with_timeout(base_url, credential, Duration::from_secs(5))
    }

    /// Create a client with a custom per-call timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        credential: Credential,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Transport)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            credential,
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &self.credential {
            Credential::Static { user_id, token } => builder
                .header(headers::USER_ID, user_id)
                .header(headers::ACCESS_TOKEN, token),
            Credential::Jwt { user_id, token } => builder
                .header(headers::USER_ID, user_id)
                .header(headers::JWT, token),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.retry
            .run(|| async {
                let response = self
                    .request(reqwest::Method::GET, path)
                    .send()
                    .await
                    .map_err(ClientError::Transport)?;
                decode(response).await
            })
            .await
    }

    async fn get_json_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T> {
        self.retry
            .run(|| async {
                let response = self
                    .request(reqwest::Method::GET, path)
                    .query(query)
                    .send()
                    .await
                    .map_err(ClientError::Transport)?;
                decode(response).await
            })
            .await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.retry
            .run(|| async {
                let response = self
                    .request(method.clone(), path)
                    .json(body)
                    .send()
                    .await
                    .map_err(ClientError::Transport)?;
                decode(response).await
            })
            .await
    }

    async fn delete(&self, path: &str) -> Result<Ack> {
        self.retry
            .run(|| async {
                let response = self
                    .request(reqwest::Method::DELETE, path)
                    .send()
                    .await
                    .map_err(ClientError::Transport)?;
                decode(response).await
            })
            .await
    }

    // --- users ---

    /// Register a user; returns the fresh credential exactly once.
    pub async fn register_user(&self, request: &RegisterUserRequest) -> Result<CredentialResponse> {
        self.send_json(reqwest::Method::POST, "/v1/users", request)
            .await
    }

    /// Modify a user record.
    pub async fn modify_user(&self, id: &UserId, request: &ModifyUserRequest) -> Result<Ack> {
        self.send_json(reqwest::Method::PATCH, &format!("/v1/users/{id}"), request)
            .await
    }

    /// Delete a user.
    pub async fn delete_user(&self, id: &UserId) -> Result<Ack> {
        self.delete(&format!("/v1/users/{id}")).await
    }

    // --- nodes ---

    /// Register a node; returns the node credential exactly once.
    pub async fn register_node(&self, request: &RegisterNodeRequest) -> Result<CredentialResponse> {
        self.send_json(reqwest::Method::POST, "/v1/nodes", request)
            .await
    }

    /// Update a node record.
    pub async fn update_node(&self, id: &NodeId, request: &UpdateNodeRequest) -> Result<Ack> {
        self.send_json(reqwest::Method::PATCH, &format!("/v1/nodes/{id}"), request)
            .await
    }

    /// Delete a node.
    pub async fn delete_node(&self, id: &NodeId) -> Result<Ack> {
        self.delete(&format!("/v1/nodes/{id}")).await
    }

    /// List nodes matching a filter.
    pub async fn get_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        self.get_json_query("/v1/nodes", filter).await
    }

    /// Fetch a single node.
    pub async fn get_node(&self, id: &NodeId) -> Result<Node> {
        let filter = NodeFilter {
            node_id: Some(id.clone()),
            ..NodeFilter::default()
        };
        let nodes: Vec<Node> = self.get_json_query("/v1/nodes", &filter).await?;
        nodes
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::api(leoscope_proto::ErrorCode::NotFound, format!("node {id}")))
    }

    /// Report a heartbeat for this node.
    pub async fn report_heartbeat(
        &self,
        id: &NodeId,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/v1/nodes/{id}/heartbeat"),
            request,
        )
        .await
    }

    // --- jobs ---

    /// Submit a job for admission.
    pub async fn schedule_job(&self, job: &Job) -> Result<Ack> {
        self.send_json(reqwest::Method::POST, "/v1/jobs", job).await
    }

    /// Move a one-shot job to the nearest free slot at or after `after`.
    pub async fn reschedule_job_nearest(
        &self,
        id: &JobId,
        after: DateTime<Utc>,
    ) -> Result<RescheduleResponse> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/v1/jobs/{id}/reschedule"),
            &RescheduleRequest { after },
        )
        .await
    }

    /// Fetch a job by id.
    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        self.get_json(&format!("/v1/jobs/{id}")).await
    }

    /// Jobs targeting a node (as client or paired server).
    pub async fn get_jobs_by_node(&self, node_id: &NodeId) -> Result<Vec<Job>> {
        let filter = JobFilter {
            node_id: Some(node_id.clone()),
            ..JobFilter::default()
        };
        self.get_json_query("/v1/jobs", &filter).await
    }

    /// Jobs owned by a user.
    pub async fn get_jobs_by_user(&self, user_id: &UserId) -> Result<Vec<Job>> {
        let filter = JobFilter {
            user_id: Some(user_id.clone()),
            ..JobFilter::default()
        };
        self.get_json_query("/v1/jobs", &filter).await
    }

    /// Delete a job.
    pub async fn delete_job(&self, id: &JobId) -> Result<Ack> {
        self.delete(&format!("/v1/jobs/{id}")).await
    }

    // --- runs ---

    /// Create or advance a run record.
    pub async fn update_run(&self, run: &Run) -> Result<Ack> {
        self.send_json(reqwest::Method::POST, "/v1/runs", run).await
    }

    /// List runs matching a filter.
    pub async fn get_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        self.get_json_query("/v1/runs", filter).await
    }

    /// List runs that have not reached a terminal state yet.
    pub async fn get_scheduled_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        self.get_json_query("/v1/runs/scheduled", filter).await
    }

    // --- tasks ---

    /// Create a rendezvous task.
    pub async fn schedule_task(&self, task: &Task) -> Result<Ack> {
        self.send_json(reqwest::Method::POST, "/v1/tasks", task)
            .await
    }

    /// List live tasks matching a filter.
    pub async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.get_json_query("/v1/tasks", filter).await
    }

    /// Update a task's status.
    pub async fn update_task(&self, id: &TaskId, status: TaskStatus) -> Result<Ack> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/v1/tasks/{id}"),
            &UpdateTaskRequest { status },
        )
        .await
    }

    // --- scavenger ---

    /// Toggle scavenger mode on a node.
    pub async fn set_scavenger(&self, id: &NodeId, active: bool) -> Result<ScavengerState> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/v1/nodes/{id}/scavenger"),
            &SetScavengerRequest { active },
        )
        .await
    }

    /// Read the scavenger state of a node.
    pub async fn get_scavenger(&self, id: &NodeId) -> Result<ScavengerState> {
        self.get_json(&format!("/v1/nodes/{id}/scavenger")).await
    }

    // --- config ---

    /// Read the global config document.
    pub async fn get_config(&self) -> Result<serde_json::Value> {
        self.get_json("/v1/config").await
    }

    /// Replace the global config document.
    pub async fn update_config(&self, config: serde_json::Value) -> Result<Ack> {
        self.send_json(
            reqwest::Method::PUT,
            "/v1/config",
            &UpdateConfigRequest { config },
        )
        .await
    }

    // --- side services ---

    /// Ask whether a user may touch kernel parameters.
    pub async fn kernel_access(&self, target_user_id: &UserId) -> Result<KernelAccessResponse> {
        self.send_json(
            reqwest::Method::POST,
            "/v1/kernel-access",
            &KernelAccessRequest {
                target_user_id: target_user_id.clone(),
            },
        )
        .await
    }

    /// Download a run artifact archive by its blob path.
    pub async fn download_artifact(&self, artifact_url: &str) -> Result<bytes::Bytes> {
        self.retry
            .run(|| async {
                let response = self
                    .request(reqwest::Method::GET, "/v1/artifacts")
                    .query(&[("path", artifact_url)])
                    .send()
                    .await
                    .map_err(ClientError::Transport)?;
                if response.status().is_success() {
                    response.bytes().await.map_err(ClientError::Transport)
                } else {
                    Err(error_from(response).await)
                }
            })
            .await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    if response.status().is_success() {
        response.json().await.map_err(ClientError::Transport)
    } else {
        Err(error_from(response).await)
    }
}

async fn error_from(response: Response) -> ClientError {
    let status = response.status();
    match response.json::<ApiError>().await {
        Ok(body) => ClientError::Api(body),
        Err(_) => {
            let code = match status {
                StatusCode::UNAUTHORIZED => leoscope_proto::ErrorCode::Unauth,
                StatusCode::FORBIDDEN => leoscope_proto::ErrorCode::Forbidden,
                StatusCode::NOT_FOUND => leoscope_proto::ErrorCode::NotFound,
                StatusCode::CONFLICT => leoscope_proto::ErrorCode::Conflict,
                StatusCode::SERVICE_UNAVAILABLE => leoscope_proto::ErrorCode::Unavailable,
                _ => leoscope_proto::ErrorCode::Invalid,
            };
            ClientError::api(code, format!("HTTP {status}"))
        }
    }
}
