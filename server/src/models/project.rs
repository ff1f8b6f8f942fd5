//! Project — a hosted application bound to a source repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Selects the build template the backend materializes for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Node,
    Python,
    Static,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Node => "node",
            ProjectType::Python => "python",
            ProjectType::Static => "static",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node" => Some(ProjectType::Node),
            "python" => Some(ProjectType::Python),
            "static" => Some(ProjectType::Static),
            _ => None,
        }
    }
}

/// Project status mirrors the deployment lifecycle, plus the resting states
/// a project passes through between deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Idle,
    Building,
    Deployed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Idle => "idle",
            ProjectStatus::Building => "building",
            ProjectStatus::Deployed => "deployed",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(ProjectStatus::Idle),
            "building" => Some(ProjectStatus::Building),
            "deployed" => Some(ProjectStatus::Deployed),
            "failed" => Some(ProjectStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub owner_id: Uuid,
    pub name: String,
    /// DNS label the project is served under; also names the image and the
    /// running service.
    pub subdomain: String,
    pub repo_url: String,
    pub default_branch: String,
    pub project_type: ProjectType,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub port: i32,
    pub status: ProjectStatus,
    /// Webhook gate: inbound events are ignored unless enabled.
    pub webhook_enabled: bool,
    /// Auto-deploy gate: matched push events only trigger when set.
    pub auto_deploy: bool,
    pub service_name: Option<String>,
    pub last_deployed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Name of the running service, derived deterministically from the
    /// subdomain so repeated deploys update the same service.
    pub fn derived_service_name(&self) -> String {
        format!("{}-svc", self.subdomain)
    }
}

/// Insert shape for a project. CRUD surfaces live outside this component;
/// this exists for dev seeding and tests.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub owner_id: Uuid,
    pub name: String,
    pub subdomain: String,
    pub repo_url: String,
    pub default_branch: String,
    pub project_type: ProjectType,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub port: i32,
    pub webhook_enabled: bool,
    pub auto_deploy: bool,
}
