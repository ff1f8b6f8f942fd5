//! Deployment — one versioned build-and-release attempt for a project.
//!
//! Deployments are append-only history: created by the orchestrator,
//! mutated only by the orchestrator and the log relay, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment lifecycle.
///
/// QUEUED → CLONING → BUILDING → PUSHING → DEPLOYING → LIVE, with FAILED
/// and CANCELLED reachable from any non-terminal state. No transition is
/// permitted out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Cloning,
    Building,
    Pushing,
    Deploying,
    Live,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Live | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Cloning => "cloning",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Pushing => "pushing",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Live => "live",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DeploymentStatus::Queued),
            "cloning" => Some(DeploymentStatus::Cloning),
            "building" => Some(DeploymentStatus::Building),
            "pushing" => Some(DeploymentStatus::Pushing),
            "deploying" => Some(DeploymentStatus::Deploying),
            "live" => Some(DeploymentStatus::Live),
            "failed" => Some(DeploymentStatus::Failed),
            "cancelled" => Some(DeploymentStatus::Cancelled),
            _ => None,
        }
    }

    /// Status strings excluded from the single-active-deployment check.
    /// Kept next to the enum so the storage layers and the SQL partial
    /// index agree.
    pub const TERMINAL_STRS: [&'static str; 3] = ["live", "failed", "cancelled"];
}

/// The closed set of states the build backend adapter reports. Backend
/// vocabulary (timeout reasons, internal errors) never leaves the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Queued,
    Building,
    Success,
    Failure,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    pub project_id: i64,
    /// Monotonically increasing per project, assigned `max + 1` at creation.
    pub version: i32,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    /// User identifier, or `webhook:<pusher>` for source-event triggers.
    pub triggered_by: String,
    pub status: DeploymentStatus,
    /// Opaque handle into the build backend, present once submission
    /// succeeded.
    pub backend_ref: Option<String>,
    /// Final persisted log transcript.
    pub log: Option<String>,
    pub error: Option<String>,
    pub service_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert shape for a deployment. Inserted in QUEUED.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub project_id: i64,
    pub version: i32,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub triggered_by: String,
}
