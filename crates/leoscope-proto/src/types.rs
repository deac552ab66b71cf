//! Record types persisted in the metadata store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an id from a string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a user.
    UserId
);
string_id!(
    /// Unique identifier for a measurement node.
    NodeId
);
string_id!(
    /// Globally unique, caller-assigned job identifier.
    JobId
);
string_id!(
    /// Unique identifier for a run.
    RunId
);
string_id!(
    /// Unique identifier for a rendezvous task.
    TaskId
);

impl RunId {
    /// Generate a fresh run id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl TaskId {
    /// Generate a fresh task id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Role attached to every credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Node with elevated (kernel parameter) access.
    NodePriv,
    /// User with elevated access.
    UserPriv,
    /// Measurement node agent.
    Node,
    /// Regular experimenter.
    User,
}

impl Role {
    /// Returns true for the administrator role.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Returns true for node-side credentials.
    #[must_use]
    pub const fn is_node(self) -> bool {
        matches!(self, Self::Node | Self::NodePriv)
    }

    /// Returns true when the role may touch kernel parameters.
    #[must_use]
    pub const fn kernel_access(self) -> bool {
        matches!(self, Self::Admin | Self::NodePriv)
    }

    /// Role name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::NodePriv => "node_priv",
            Self::UserPriv => "user_priv",
            Self::Node => "node",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered user or node credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Capability role.
    pub role: Role,
    /// Owning team.
    pub team: String,
    /// SHA-256 hex digest of the static bearer token. The token itself is
    /// returned exactly once at registration and never stored.
    pub token_hash: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

/// Geographic coordinates of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// A measurement node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id. The node's credential shares this id.
    pub id: NodeId,
    /// Human-readable name.
    pub display_name: String,
    /// Terminal coordinates.
    pub coords: Coords,
    /// Free-form location description.
    pub location: String,
    /// Connectivity provider (e.g. "starlink").
    pub provider: String,
    /// Advances monotonically on heartbeat.
    pub last_active_ts: DateTime<Utc>,
    /// Publicly reachable address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// When set, overhead containers on this node are killed on sight.
    pub scavenger_active: bool,
}

/// How a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Recurring job; fires at every match of a five-field cron expression
    /// inside the validity window.
    Cron {
        /// Cron expression (minute, hour, day-of-month, month, day-of-week).
        expr: String,
    },
    /// One-shot job; fires exactly once at the start of the validity window.
    Atq,
}

impl Schedule {
    /// Returns true for recurring jobs.
    #[must_use]
    pub const fn is_cron(&self) -> bool {
        matches!(self, Self::Cron { .. })
    }

    /// The cron expression, when recurring.
    #[must_use]
    pub fn cron_expr(&self) -> Option<&str> {
        match self {
            Self::Cron { expr } => Some(expr),
            Self::Atq => None,
        }
    }
}

/// Validity window of a job. `start` is inclusive; for one-shot jobs it is
/// also the firing instant, and `end` is the deadline after which the job is
/// abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Window start (and ATQ firing instant).
    pub start: DateTime<Utc>,
    /// Window end / one-shot deadline.
    pub end: DateTime<Utc>,
}

impl Window {
    /// Create a window.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Intersection with another window, if non-empty.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Self { start, end })
    }
}

/// Container images and mode for the run phases of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    /// Execution mode (opaque to the scheduler).
    pub mode: String,
    /// Deploy-phase image or command.
    pub deploy: String,
    /// Execute-phase container image.
    pub execute: String,
    /// Finish-phase image or command.
    pub finish: String,
}

/// An admitted experiment job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Caller-assigned, globally unique id.
    pub id: JobId,
    /// Node the experiment runs on (client side for paired jobs).
    pub node_id: NodeId,
    /// Submitting user.
    pub owner_id: UserId,
    /// Firing schedule.
    pub schedule: Schedule,
    /// Validity window.
    pub window: Window,
    /// Occupancy length of each firing, in seconds.
    pub length_secs: u32,
    /// Whether the job counts against node occupancy and is subject to the
    /// conflict rules and scavenger preemption.
    pub overhead: bool,
    /// Server peer for paired client/server experiments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired_server_node_id: Option<NodeId>,
    /// Environmental precondition, evaluated just before each firing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Opaque experiment configuration, materialised into the run directory.
    pub config: String,
    /// Container images for the run phases.
    pub params: JobParams,
}

impl Job {
    /// All nodes whose occupancy this job consumes.
    #[must_use]
    pub fn target_nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.node_id.clone()];
        if let Some(peer) = &self.paired_server_node_id {
            if peer != &self.node_id {
                nodes.push(peer.clone());
            }
        }
        nodes
    }
}

/// Run lifecycle states. Transitions form a forward-only DAG; see
/// [`RunStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run record created at the firing instant.
    Scheduled,
    /// Config materialised, working directory prepared.
    Deploying,
    /// Experiment container running.
    Running,
    /// Archiving and uploading results.
    Uploading,
    /// Finished and artifact persisted.
    Completed,
    /// Terminal failure in any phase.
    Failed,
    /// Preempted by the scavenger or an external cancel.
    Aborted,
    /// Trigger evaluated false at the firing instant.
    Skipped,
}

impl RunStatus {
    /// Returns true for states with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Aborted | Self::Skipped
        )
    }

    /// Position along the forward path, for terminal-free ordering.
    const fn phase(self) -> u8 {
        match self {
            Self::Scheduled => 0,
            Self::Deploying => 1,
            Self::Running => 2,
            Self::Uploading => 3,
            Self::Completed | Self::Failed | Self::Aborted | Self::Skipped => 4,
        }
    }

    /// Whether a transition to `next` moves forward along the DAG.
    ///
    /// Terminal states accept nothing. `Skipped` is only reachable before
    /// the container phase. Every non-terminal state may fail or abort.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Scheduled => false,
            Self::Skipped => matches!(self, Self::Scheduled | Self::Deploying),
            Self::Failed | Self::Aborted => true,
            Self::Completed => self == Self::Uploading,
            _ => next.phase() == self.phase() + 1,
        }
    }

    /// Status name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Deploying => "deploying",
            Self::Running => "running",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single firing of a job on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run id, assigned by the executor.
    pub id: RunId,
    /// Owning job.
    pub job_id: JobId,
    /// Node the run executes on.
    pub node_id: NodeId,
    /// Owner inherited from the job.
    pub owner_id: UserId,
    /// Lifecycle state.
    pub status: RunStatus,
    /// Firing instant.
    pub start_ts: DateTime<Utc>,
    /// When the run reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
    /// Human-readable detail for the current state.
    pub status_message: String,
    /// Blob path of the uploaded archive, once uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
}

/// Kind of a rendezvous task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Bring up the server half of a paired experiment.
    ServerSetup,
}

/// State of a rendezvous task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for the peer node to pick it up.
    Pending,
    /// Peer finished the setup.
    Complete,
    /// Peer could not complete the setup.
    Failed,
}

/// Client/server rendezvous entry. Dead once `created_ts + ttl_secs` has
/// passed; the coordinator filters dead entries on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: TaskId,
    /// Run on the client side that is waiting.
    pub run_id: RunId,
    /// Job both sides belong to.
    pub job_id: JobId,
    /// Node expected to act on the task (the server peer).
    pub node_id: NodeId,
    /// What the peer should do.
    pub kind: TaskKind,
    /// Current state.
    pub status: TaskStatus,
    /// Seconds until the entry is considered dead.
    pub ttl_secs: u32,
    /// Creation instant.
    pub created_ts: DateTime<Utc>,
}

impl Task {
    /// Whether the entry has outlived its ttl at `now`.
    #[must_use]
    pub fn is_dead(&self, now: DateTime<Utc>) -> bool {
        self.created_ts + chrono::Duration::seconds(i64::from(self.ttl_secs)) < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_status_forward_path() {
        use RunStatus::*;
        assert!(Scheduled.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Running));
        assert!(Running.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Completed));
    }

    #[test]
    fn run_status_no_backward_edges() {
        use RunStatus::*;
        assert!(!Running.can_transition_to(Deploying));
        assert!(!Uploading.can_transition_to(Running));
        assert!(!Deploying.can_transition_to(Scheduled));
    }

    #[test]
    fn run_status_terminal_states_are_final() {
        use RunStatus::*;
        for terminal in [Completed, Failed, Aborted, Skipped] {
            assert!(terminal.is_terminal());
            for next in [Scheduled, Deploying, Running, Uploading, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn run_status_skip_only_before_container() {
        use RunStatus::*;
        assert!(Scheduled.can_transition_to(Skipped));
        assert!(Deploying.can_transition_to(Skipped));
        assert!(!Running.can_transition_to(Skipped));
        assert!(!Uploading.can_transition_to(Skipped));
    }

    #[test]
    fn run_status_abort_from_any_active_state() {
        use RunStatus::*;
        for from in [Scheduled, Deploying, Running, Uploading] {
            assert!(from.can_transition_to(Aborted));
            assert!(from.can_transition_to(Failed));
        }
    }

    #[test]
    fn completed_only_after_upload() {
        use RunStatus::*;
        assert!(!Running.can_transition_to(Completed));
        assert!(!Scheduled.can_transition_to(Completed));
    }

    #[test]
    fn window_intersection() {
        let at = |h: u32| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
        let a = Window::new(at(0), at(4));
        let b = Window::new(at(2), at(6));
        let i = a.intersect(&b).unwrap();
        assert_eq!(i.start, at(2));
        assert_eq!(i.end, at(4));

        let c = Window::new(at(4), at(6));
        assert!(a.intersect(&c).is_none());
    }

    #[test]
    fn task_ttl_expiry() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let task = Task {
            id: TaskId::new("t1"),
            run_id: RunId::new("r1"),
            job_id: JobId::new("j1"),
            node_id: NodeId::new("n1"),
            kind: TaskKind::ServerSetup,
            status: TaskStatus::Pending,
            ttl_secs: 60,
            created_ts: created,
        };
        assert!(!task.is_dead(created + chrono::Duration::seconds(60)));
        assert!(task.is_dead(created + chrono::Duration::seconds(61)));
    }

    #[test]
    fn job_target_nodes_dedup() {
        let job = Job {
            id: JobId::new("j"),
            node_id: NodeId::new("n1"),
            owner_id: UserId::new("u"),
            schedule: Schedule::Atq,
            window: Window::new(Utc::now(), Utc::now() + chrono::Duration::hours(1)),
            length_secs: 60,
            overhead: true,
            paired_server_node_id: Some(NodeId::new("n1")),
            trigger: None,
            config: String::new(),
            params: JobParams {
                mode: "net".into(),
                deploy: String::new(),
                execute: "img".into(),
                finish: String::new(),
            },
        };
        assert_eq!(job.target_nodes(), vec![NodeId::new("n1")]);
    }
}
