//! In-memory storage — backs dev mode (no `DATABASE_URL`) and unit tests.
//!
//! The whole store sits behind one async mutex, so check-and-insert is
//! serialized and the single-active-deployment invariant holds without a
//! database constraint.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::models::deployment::{Deployment, DeploymentStatus, NewDeployment};
use crate::models::error::Error;
use crate::models::project::{NewProject, Project, ProjectStatus};

use super::{DeploymentPatch, ProjectPatch, Storage};

#[derive(Default)]
struct Inner {
    projects: BTreeMap<i64, Project>,
    deployments: BTreeMap<i64, Deployment>,
    next_project_id: i64,
    next_deployment_id: i64,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(deployment: &mut Deployment, patch: DeploymentPatch) {
    if let Some(status) = patch.status {
        deployment.status = status;
    }
    if let Some(backend_ref) = patch.backend_ref {
        deployment.backend_ref = Some(backend_ref);
    }
    if let Some(log) = patch.log {
        deployment.log = Some(log);
    }
    if let Some(error) = patch.error {
        deployment.error = Some(error);
    }
    if let Some(service_url) = patch.service_url {
        deployment.service_url = Some(service_url);
    }
    if let Some(started_at) = patch.started_at {
        deployment.started_at = Some(started_at);
    }
    if let Some(completed_at) = patch.completed_at {
        deployment.completed_at = Some(completed_at);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_project(&self, project: NewProject) -> Result<Project, Error> {
        let mut inner = self.inner.lock().await;
        if inner
            .projects
            .values()
            .any(|p| p.subdomain == project.subdomain)
        {
            return Err(Error::Conflict(format!(
                "subdomain already taken: {}",
                project.subdomain
            )));
        }
        inner.next_project_id += 1;
        let record = Project {
            id: inner.next_project_id,
            owner_id: project.owner_id,
            name: project.name,
            subdomain: project.subdomain,
            repo_url: project.repo_url,
            default_branch: project.default_branch,
            project_type: project.project_type,
            build_command: project.build_command,
            start_command: project.start_command,
            port: project.port,
            status: ProjectStatus::Idle,
            webhook_enabled: project.webhook_enabled,
            auto_deploy: project.auto_deploy,
            service_name: None,
            last_deployed_at: None,
            created_at: Utc::now(),
        };
        inner.projects.insert(record.id, record.clone());
        Ok(record)
    }

    async fn project(&self, id: i64) -> Result<Option<Project>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.projects.get(&id).cloned())
    }

    async fn projects_by_branch(&self, branch: &str) -> Result<Vec<Project>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .projects
            .values()
            .filter(|p| p.default_branch == branch)
            .cloned()
            .collect())
    }

    async fn update_project(&self, id: i64, patch: ProjectPatch) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let project = inner
            .projects
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("project not found: {id}")))?;
        if let Some(status) = patch.status {
            project.status = status;
        }
        if let Some(service_name) = patch.service_name {
            project.service_name = Some(service_name);
        }
        if let Some(last_deployed_at) = patch.last_deployed_at {
            project.last_deployed_at = Some(last_deployed_at);
        }
        Ok(())
    }

    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment, Error> {
        let mut inner = self.inner.lock().await;
        let has_active = inner
            .deployments
            .values()
            .any(|d| d.project_id == deployment.project_id && !d.status.is_terminal());
        if has_active {
            return Err(Error::Conflict(format!(
                "project {} already has an active deployment",
                deployment.project_id
            )));
        }
        inner.next_deployment_id += 1;
        let record = Deployment {
            id: inner.next_deployment_id,
            project_id: deployment.project_id,
            version: deployment.version,
            branch: deployment.branch,
            commit_sha: deployment.commit_sha,
            commit_message: deployment.commit_message,
            triggered_by: deployment.triggered_by,
            status: DeploymentStatus::Queued,
            backend_ref: None,
            log: None,
            error: None,
            service_url: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        inner.deployments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn deployment(&self, id: i64) -> Result<Option<Deployment>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner.deployments.get(&id).cloned())
    }

    async fn active_deployment(&self, project_id: i64) -> Result<Option<Deployment>, Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .deployments
            .values()
            .find(|d| d.project_id == project_id && !d.status.is_terminal())
            .cloned())
    }

    async fn next_version(&self, project_id: i64) -> Result<i32, Error> {
        let inner = self.inner.lock().await;
        let max = inner
            .deployments
            .values()
            .filter(|d| d.project_id == project_id)
            .map(|d| d.version)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn update_deployment(
        &self,
        id: i64,
        patch: DeploymentPatch,
    ) -> Result<Deployment, Error> {
        let mut inner = self.inner.lock().await;
        let deployment = inner
            .deployments
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("deployment not found: {id}")))?;
        apply_patch(deployment, patch);
        Ok(deployment.clone())
    }

    async fn list_deployments(
        &self,
        project_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Deployment>, i64), Error> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Deployment> = inner
            .deployments
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        // Newest first; ids are assigned in creation order.
        all.sort_by(|a, b| b.id.cmp(&a.id));
        let total = all.len() as i64;
        let items = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((items, total))
    }
}
