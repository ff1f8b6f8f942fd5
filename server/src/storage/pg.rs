//! Postgres storage via diesel-async.
//!
//! The single-active-deployment invariant is enforced by the
//! `idx_deployments_one_active` partial unique index; a losing concurrent
//! insert surfaces as `Error::Conflict` through the diesel error mapping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::models::deployment::{Deployment, DeploymentStatus, NewDeployment};
use crate::models::error::Error;
use crate::models::project::{NewProject, Project, ProjectStatus, ProjectType};
use crate::schema::{deployments, projects};

use super::{DeploymentPatch, ProjectPatch, Storage};

pub struct PgStorage {
    pool: Pool<AsyncPgConnection>,
}

impl PgStorage {
    pub fn new(pool: Pool<AsyncPgConnection>) -> Self {
        Self { pool }
    }

    async fn conn(
        &self,
    ) -> Result<diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>, Error> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Storage(format!("connection pool: {e}")))
    }
}

// ── Row types ──

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = projects)]
struct ProjectRow {
    id: i64,
    owner_id: Uuid,
    name: String,
    subdomain: String,
    repo_url: String,
    default_branch: String,
    project_type: String,
    build_command: Option<String>,
    start_command: Option<String>,
    port: i32,
    status: String,
    webhook_enabled: bool,
    auto_deploy: bool,
    service_name: Option<String>,
    last_deployed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = Error;

    fn try_from(row: ProjectRow) -> Result<Self, Error> {
        let project_type = ProjectType::parse(&row.project_type)
            .ok_or_else(|| Error::Storage(format!("unknown project type: {}", row.project_type)))?;
        let status = ProjectStatus::parse(&row.status)
            .ok_or_else(|| Error::Storage(format!("unknown project status: {}", row.status)))?;
        Ok(Project {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            subdomain: row.subdomain,
            repo_url: row.repo_url,
            default_branch: row.default_branch,
            project_type,
            build_command: row.build_command,
            start_command: row.start_command,
            port: row.port,
            status,
            webhook_enabled: row.webhook_enabled,
            auto_deploy: row.auto_deploy,
            service_name: row.service_name,
            last_deployed_at: row.last_deployed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
struct NewProjectRow {
    owner_id: Uuid,
    name: String,
    subdomain: String,
    repo_url: String,
    default_branch: String,
    project_type: String,
    build_command: Option<String>,
    start_command: Option<String>,
    port: i32,
    status: String,
    webhook_enabled: bool,
    auto_deploy: bool,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = deployments)]
struct DeploymentRow {
    id: i64,
    project_id: i64,
    version: i32,
    branch: String,
    commit_sha: Option<String>,
    commit_message: Option<String>,
    triggered_by: String,
    status: String,
    backend_ref: Option<String>,
    log: Option<String>,
    error: Option<String>,
    service_url: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = Error;

    fn try_from(row: DeploymentRow) -> Result<Self, Error> {
        let status = DeploymentStatus::parse(&row.status)
            .ok_or_else(|| Error::Storage(format!("unknown deployment status: {}", row.status)))?;
        Ok(Deployment {
            id: row.id,
            project_id: row.project_id,
            version: row.version,
            branch: row.branch,
            commit_sha: row.commit_sha,
            commit_message: row.commit_message,
            triggered_by: row.triggered_by,
            status,
            backend_ref: row.backend_ref,
            log: row.log,
            error: row.error,
            service_url: row.service_url,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deployments)]
struct NewDeploymentRow {
    project_id: i64,
    version: i32,
    branch: String,
    commit_sha: Option<String>,
    commit_message: Option<String>,
    triggered_by: String,
    status: String,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = deployments)]
struct DeploymentChanges {
    status: Option<String>,
    backend_ref: Option<String>,
    log: Option<String>,
    error: Option<String>,
    service_url: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<DeploymentPatch> for DeploymentChanges {
    fn from(patch: DeploymentPatch) -> Self {
        Self {
            status: patch.status.map(|s| s.as_str().to_string()),
            backend_ref: patch.backend_ref,
            log: patch.log,
            error: patch.error,
            service_url: patch.service_url,
            started_at: patch.started_at,
            completed_at: patch.completed_at,
        }
    }
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = projects)]
struct ProjectChanges {
    status: Option<String>,
    service_name: Option<String>,
    last_deployed_at: Option<DateTime<Utc>>,
}

// ── Storage impl ──

#[async_trait]
impl Storage for PgStorage {
    async fn insert_project(&self, project: NewProject) -> Result<Project, Error> {
        let mut conn = self.conn().await?;
        let row = NewProjectRow {
            owner_id: project.owner_id,
            name: project.name,
            subdomain: project.subdomain,
            repo_url: project.repo_url,
            default_branch: project.default_branch,
            project_type: project.project_type.as_str().to_string(),
            build_command: project.build_command,
            start_command: project.start_command,
            port: project.port,
            status: ProjectStatus::Idle.as_str().to_string(),
            webhook_enabled: project.webhook_enabled,
            auto_deploy: project.auto_deploy,
        };
        let inserted: ProjectRow = diesel::insert_into(projects::table)
            .values(&row)
            .returning(ProjectRow::as_returning())
            .get_result(&mut conn)
            .await?;
        inserted.try_into()
    }

    async fn project(&self, id: i64) -> Result<Option<Project>, Error> {
        let mut conn = self.conn().await?;
        let row: Option<ProjectRow> = projects::table
            .find(id)
            .select(ProjectRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn projects_by_branch(&self, branch: &str) -> Result<Vec<Project>, Error> {
        let mut conn = self.conn().await?;
        let rows: Vec<ProjectRow> = projects::table
            .filter(projects::default_branch.eq(branch))
            .order(projects::id.asc())
            .select(ProjectRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_project(&self, id: i64, patch: ProjectPatch) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let changes = ProjectChanges {
            status: patch.status.map(|s| s.as_str().to_string()),
            service_name: patch.service_name,
            last_deployed_at: patch.last_deployed_at,
        };
        let updated = diesel::update(projects::table.find(id))
            .set(&changes)
            .execute(&mut conn)
            .await?;
        if updated == 0 {
            return Err(Error::NotFound(format!("project not found: {id}")));
        }
        Ok(())
    }

    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment, Error> {
        let mut conn = self.conn().await?;
        let row = NewDeploymentRow {
            project_id: deployment.project_id,
            version: deployment.version,
            branch: deployment.branch,
            commit_sha: deployment.commit_sha,
            commit_message: deployment.commit_message,
            triggered_by: deployment.triggered_by,
            status: DeploymentStatus::Queued.as_str().to_string(),
        };
        let inserted: DeploymentRow = diesel::insert_into(deployments::table)
            .values(&row)
            .returning(DeploymentRow::as_returning())
            .get_result(&mut conn)
            .await?;
        inserted.try_into()
    }

    async fn deployment(&self, id: i64) -> Result<Option<Deployment>, Error> {
        let mut conn = self.conn().await?;
        let row: Option<DeploymentRow> = deployments::table
            .find(id)
            .select(DeploymentRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn active_deployment(&self, project_id: i64) -> Result<Option<Deployment>, Error> {
        let mut conn = self.conn().await?;
        let row: Option<DeploymentRow> = deployments::table
            .filter(deployments::project_id.eq(project_id))
            .filter(deployments::status.ne_all(DeploymentStatus::TERMINAL_STRS))
            .select(DeploymentRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn next_version(&self, project_id: i64) -> Result<i32, Error> {
        use diesel::dsl::max;

        let mut conn = self.conn().await?;
        let current: Option<i32> = deployments::table
            .filter(deployments::project_id.eq(project_id))
            .select(max(deployments::version))
            .first(&mut conn)
            .await?;
        Ok(current.unwrap_or(0) + 1)
    }

    async fn update_deployment(
        &self,
        id: i64,
        patch: DeploymentPatch,
    ) -> Result<Deployment, Error> {
        let mut conn = self.conn().await?;
        let changes: DeploymentChanges = patch.into();
        let row: DeploymentRow = diesel::update(deployments::table.find(id))
            .set(&changes)
            .returning(DeploymentRow::as_returning())
            .get_result(&mut conn)
            .await?;
        row.try_into()
    }

    async fn list_deployments(
        &self,
        project_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Deployment>, i64), Error> {
        let mut conn = self.conn().await?;
        let total: i64 = deployments::table
            .filter(deployments::project_id.eq(project_id))
            .count()
            .get_result(&mut conn)
            .await?;
        let rows: Vec<DeploymentRow> = deployments::table
            .filter(deployments::project_id.eq(project_id))
            .order(deployments::id.desc())
            .offset(offset)
            .limit(limit)
            .select(DeploymentRow::as_select())
            .load(&mut conn)
            .await?;
        let items = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total))
    }
}
