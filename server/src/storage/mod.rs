//! Durable storage seam.
//!
//! The store is the single source of truth for deployment status: there is
//! no in-process shared mutable state, so independent relay tasks polling
//! the same deployment converge through it. Both implementations enforce
//! the single-active-deployment invariant at insert time — Postgres with a
//! partial unique index, the in-memory store under its lock.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::deployment::{Deployment, DeploymentStatus, NewDeployment};
use crate::models::error::Error;
use crate::models::project::{NewProject, Project, ProjectStatus};

/// Partial update for a deployment. `None` fields are left untouched;
/// fields are only ever written forward, never cleared.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub backend_ref: Option<String>,
    pub log: Option<String>,
    pub error: Option<String>,
    pub service_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update for the project fields the orchestrator owns.
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub status: Option<ProjectStatus>,
    pub service_name: Option<String>,
    pub last_deployed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_project(&self, project: NewProject) -> Result<Project, Error>;

    async fn project(&self, id: i64) -> Result<Option<Project>, Error>;

    /// All projects whose configured default branch equals `branch`.
    async fn projects_by_branch(&self, branch: &str) -> Result<Vec<Project>, Error>;

    async fn update_project(&self, id: i64, patch: ProjectPatch) -> Result<(), Error>;

    /// Insert in QUEUED. Fails with `Error::Conflict` when the project
    /// already has a non-terminal deployment.
    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment, Error>;

    async fn deployment(&self, id: i64) -> Result<Option<Deployment>, Error>;

    /// The project's non-terminal deployment, if any.
    async fn active_deployment(&self, project_id: i64) -> Result<Option<Deployment>, Error>;

    /// Next version number for the project: `max(existing) + 1`, starting
    /// at 1.
    async fn next_version(&self, project_id: i64) -> Result<i32, Error>;

    async fn update_deployment(&self, id: i64, patch: DeploymentPatch)
        -> Result<Deployment, Error>;

    /// Deployments newest-first with the total count for the project.
    async fn list_deployments(
        &self,
        project_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Deployment>, i64), Error>;
}
