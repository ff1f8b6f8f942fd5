//! Deployment orchestrator — owns the deployment lifecycle.
//!
//! Creation, version assignment, status transitions, cancellation, and the
//! single-active-deployment invariant all live here. State-mutating
//! operations are short request/response calls against storage; the only
//! suspension points are storage and backend network calls.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::models::deployment::{
    BackendStatus, Deployment, DeploymentStatus, NewDeployment,
};
use crate::models::error::Error;
use crate::models::project::{Project, ProjectStatus};
use crate::services::backend::{BackendError, BuildBackend};
use crate::storage::{DeploymentPatch, ProjectPatch, Storage};

/// Map a normalized backend status onto the deployment lifecycle. Used by
/// the log relay to drive `transition`.
pub fn map_backend_status(status: BackendStatus) -> DeploymentStatus {
    match status {
        BackendStatus::Queued => DeploymentStatus::Queued,
        BackendStatus::Building => DeploymentStatus::Building,
        BackendStatus::Success => DeploymentStatus::Live,
        BackendStatus::Failure => DeploymentStatus::Failed,
        BackendStatus::Cancelled => DeploymentStatus::Cancelled,
    }
}

/// Parameters for creating a deployment.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Defaults to the project's configured branch.
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub triggered_by: String,
}

/// Optional fields applied alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionExtras {
    pub log: Option<String>,
    pub error: Option<String>,
    pub service_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentPage {
    pub items: Vec<Deployment>,
    pub total: i64,
    pub page: i64,
    pub has_more: bool,
}

pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    backend: Arc<dyn BuildBackend>,
    /// Deployed projects are reachable at `https://{subdomain}.{base_domain}`.
    base_domain: String,
    page_size_max: i64,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        backend: Arc<dyn BuildBackend>,
        base_domain: String,
        page_size_max: i64,
    ) -> Self {
        Self {
            storage,
            backend,
            base_domain,
            page_size_max,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn backend(&self) -> &Arc<dyn BuildBackend> {
        &self.backend
    }

    fn service_url(&self, project: &Project) -> String {
        format!("https://{}.{}", project.subdomain, self.base_domain)
    }

    /// Create a deployment and submit it to the build backend.
    ///
    /// The active-deployment lookup here is check-then-act and not atomic
    /// against concurrent creators; storage closes the race with its
    /// uniqueness constraint, so the loser still gets `Error::Conflict`.
    /// A failed submission rolls the deployment forward to FAILED — it is
    /// never left QUEUED without a backend handle.
    pub async fn create(
        &self,
        project_id: i64,
        request: DeployRequest,
        actor: Option<Uuid>,
    ) -> Result<Deployment, Error> {
        let project = self
            .storage
            .project(project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project not found: {project_id}")))?;

        if let Some(actor) = actor {
            if actor != project.owner_id {
                return Err(Error::Forbidden(
                    "only the project owner may deploy".to_string(),
                ));
            }
        }

        if let Some(active) = self.storage.active_deployment(project_id).await? {
            return Err(Error::Conflict(format!(
                "deployment v{} is still {}",
                active.version,
                active.status.as_str()
            )));
        }

        let version = self.storage.next_version(project_id).await?;
        let branch = request
            .branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| project.default_branch.clone());

        let deployment = self
            .storage
            .insert_deployment(NewDeployment {
                project_id,
                version,
                branch,
                commit_sha: request.commit_sha,
                commit_message: request.commit_message,
                triggered_by: request.triggered_by,
            })
            .await?;

        crate::metrics::deployment_status_changed("queued");
        tracing::info!(
            deployment_id = deployment.id,
            project_id,
            version,
            branch = %deployment.branch,
            triggered_by = %deployment.triggered_by,
            "Deployment created"
        );

        self.storage
            .update_project(
                project_id,
                ProjectPatch {
                    status: Some(ProjectStatus::Building),
                    ..Default::default()
                },
            )
            .await?;

        match self.backend.submit(&project, &deployment).await {
            Ok(reference) => {
                let updated = self
                    .storage
                    .update_deployment(
                        deployment.id,
                        DeploymentPatch {
                            status: Some(DeploymentStatus::Cloning),
                            backend_ref: Some(reference),
                            started_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
                crate::metrics::deployment_status_changed("cloning");
                Ok(updated)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(te) = self
                    .transition(
                        deployment.id,
                        DeploymentStatus::Failed,
                        TransitionExtras {
                            error: Some(message.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    tracing::error!(
                        deployment_id = deployment.id,
                        error = %te,
                        "Failed to record submission failure"
                    );
                }
                match e {
                    BackendError::Auth(m) => Err(Error::BackendAuth(m)),
                    other => Err(Error::Submission(other.to_string())),
                }
            }
        }
    }

    /// Apply a status change plus optional fields.
    ///
    /// Terminal targets stamp a completion timestamp. LIVE and FAILED also
    /// update the owning project; CANCELLED leaves project status alone.
    pub async fn transition(
        &self,
        deployment_id: i64,
        status: DeploymentStatus,
        extras: TransitionExtras,
    ) -> Result<Deployment, Error> {
        let current = self
            .storage
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment not found: {deployment_id}")))?;

        if current.status.is_terminal() {
            return Err(Error::AlreadyTerminal(format!(
                "deployment {deployment_id} is already {}",
                current.status.as_str()
            )));
        }

        let project = self.storage.project(current.project_id).await?;

        let mut patch = DeploymentPatch {
            status: Some(status),
            log: extras.log,
            error: extras.error,
            service_url: extras.service_url,
            ..Default::default()
        };
        if status.is_terminal() {
            patch.completed_at = Some(Utc::now());
        }
        if status == DeploymentStatus::Live && patch.service_url.is_none() {
            patch.service_url = project.as_ref().map(|p| self.service_url(p));
        }

        let updated = self.storage.update_deployment(deployment_id, patch).await?;
        crate::metrics::deployment_status_changed(status.as_str());

        if let Some(completed_at) = updated.completed_at {
            let duration = completed_at - updated.created_at;
            crate::metrics::deployment_duration(duration.num_milliseconds().max(0) as u64);
        }

        match (status, project) {
            (DeploymentStatus::Live, Some(project)) => {
                self.storage
                    .update_project(
                        project.id,
                        ProjectPatch {
                            status: Some(ProjectStatus::Deployed),
                            service_name: Some(project.derived_service_name()),
                            last_deployed_at: Some(Utc::now()),
                        },
                    )
                    .await?;
            }
            (DeploymentStatus::Failed, Some(project)) => {
                self.storage
                    .update_project(
                        project.id,
                        ProjectPatch {
                            status: Some(ProjectStatus::Failed),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            (_, None) => {
                tracing::warn!(
                    deployment_id,
                    project_id = current.project_id,
                    "Owning project missing during transition"
                );
            }
            _ => {}
        }

        tracing::info!(
            deployment_id,
            from = current.status.as_str(),
            to = status.as_str(),
            "Deployment transitioned"
        );
        Ok(updated)
    }

    /// Cancel an active deployment.
    ///
    /// Backend cancellation is advisory: a rejection is logged and the
    /// deployment is still marked CANCELLED locally. Local and backend
    /// state may diverge until the next poll reconciles them — an accepted
    /// eventual-consistency window.
    pub async fn cancel(&self, deployment_id: i64, actor: Uuid) -> Result<Deployment, Error> {
        let deployment = self
            .storage
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment not found: {deployment_id}")))?;

        if let Some(project) = self.storage.project(deployment.project_id).await? {
            if project.owner_id != actor {
                return Err(Error::Forbidden(
                    "only the project owner may cancel".to_string(),
                ));
            }
        }

        if deployment.status.is_terminal() {
            return Err(Error::AlreadyTerminal(format!(
                "deployment {deployment_id} is already {}",
                deployment.status.as_str()
            )));
        }

        if let Some(reference) = &deployment.backend_ref {
            if let Err(e) = self.backend.cancel(reference).await {
                tracing::warn!(
                    deployment_id,
                    backend_ref = %reference,
                    error = %e,
                    "Backend cancellation rejected, marking cancelled locally"
                );
            }
        }

        self.transition(
            deployment_id,
            DeploymentStatus::Cancelled,
            TransitionExtras::default(),
        )
        .await
    }

    pub async fn get(&self, deployment_id: i64) -> Result<Deployment, Error> {
        self.storage
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment not found: {deployment_id}")))
    }

    /// Deployment history, newest first. Pure read.
    pub async fn list(
        &self,
        project_id: i64,
        page: i64,
        limit: i64,
    ) -> Result<DeploymentPage, Error> {
        if page < 1 {
            return Err(Error::Validation("page must be >= 1".to_string()));
        }
        if limit < 1 {
            return Err(Error::Validation("limit must be >= 1".to_string()));
        }
        let limit = limit.min(self.page_size_max);

        self.storage
            .project(project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project not found: {project_id}")))?;

        let (items, total) = self
            .storage
            .list_deployments(project_id, (page - 1) * limit, limit)
            .await?;

        Ok(DeploymentPage {
            items,
            total,
            page,
            has_more: page * limit < total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{NewProject, ProjectType};
    use crate::services::backend::testing::MockBackend;
    use crate::storage::memory::MemoryStorage;
    use std::sync::atomic::Ordering;

    fn new_project(owner: Uuid) -> NewProject {
        NewProject {
            owner_id: owner,
            name: "demo".to_string(),
            subdomain: "demo".to_string(),
            repo_url: "https://github.com/acme/demo".to_string(),
            default_branch: "main".to_string(),
            project_type: ProjectType::Node,
            build_command: None,
            start_command: None,
            port: 3000,
            webhook_enabled: true,
            auto_deploy: true,
        }
    }

    fn request(who: &str) -> DeployRequest {
        DeployRequest {
            branch: None,
            commit_sha: Some("abc123".to_string()),
            commit_message: None,
            triggered_by: who.to_string(),
        }
    }

    async fn setup(backend: MockBackend) -> (Arc<Orchestrator>, Project, Uuid, Arc<MockBackend>) {
        let owner = Uuid::new_v4();
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let project = storage.insert_project(new_project(owner)).await.unwrap();
        let backend = Arc::new(backend);
        let orchestrator = Arc::new(Orchestrator::new(
            storage,
            backend.clone(),
            "apps.example.com".to_string(),
            50,
        ));
        (orchestrator, project, owner, backend)
    }

    #[tokio::test]
    async fn create_assigns_increasing_versions() {
        let (orch, project, owner, _backend) = setup(MockBackend::new()).await;

        for expected in 1..=3 {
            let d = orch
                .create(project.id, request("tester"), Some(owner))
                .await
                .unwrap();
            assert_eq!(d.version, expected);
            assert_eq!(d.status, DeploymentStatus::Cloning);
            assert!(d.backend_ref.is_some());
            assert!(d.started_at.is_some());
            orch.transition(d.id, DeploymentStatus::Live, TransitionExtras::default())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn create_conflicts_while_active() {
        let (orch, project, owner, _backend) = setup(MockBackend::new()).await;

        orch.create(project.id, request("tester"), Some(owner))
            .await
            .unwrap();
        let err = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // The loser performed no mutation: still exactly one deployment.
        let page = orch.list(project.id, 1, 10).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn concurrent_creates_have_one_winner() {
        let (orch, project, owner, _backend) = setup(MockBackend::new()).await;

        let (a, b) = tokio::join!(
            orch.create(project.id, request("a"), Some(owner)),
            orch.create(project.id, request("b"), Some(owner)),
        );
        assert!(a.is_ok() != b.is_ok(), "exactly one creator must win");

        let storage = orch.storage();
        let active = storage.active_deployment(project.id).await.unwrap();
        assert!(active.is_some());
    }

    #[tokio::test]
    async fn non_owner_cannot_deploy() {
        let (orch, project, _, _backend) = setup(MockBackend::new()).await;
        let err = orch
            .create(project.id, request("intruder"), Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn submission_failure_rolls_forward_to_failed() {
        let backend = MockBackend {
            fail_submit: true,
            ..MockBackend::new()
        };
        let (orch, project, owner, _backend) = setup(backend).await;

        let err = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Submission(_)));

        // Never left QUEUED without a handle: rolled forward to FAILED.
        let page = orch.list(project.id, 1, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        let d = &page.items[0];
        assert_eq!(d.status, DeploymentStatus::Failed);
        assert!(d.error.as_deref().unwrap().contains("quota"));
        assert!(d.completed_at.is_some());

        let project = orch.storage().project(project.id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Failed);

        // A new deployment may now be created.
        orch.create(project.id, request("tester"), Some(owner))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn auth_failure_is_recorded_and_fatal() {
        let backend = MockBackend {
            fail_submit_auth: true,
            ..MockBackend::new()
        };
        let (orch, project, owner, _backend) = setup(backend).await;

        let err = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendAuth(_)));

        let page = orch.list(project.id, 1, 10).await.unwrap();
        assert_eq!(page.items[0].status, DeploymentStatus::Failed);
        assert!(page.items[0].error.as_deref().unwrap().contains("auth"));
    }

    #[tokio::test]
    async fn live_transition_updates_project_and_service_url() {
        let (orch, project, owner, _backend) = setup(MockBackend::new()).await;
        let d = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap();

        let live = orch
            .transition(d.id, DeploymentStatus::Live, TransitionExtras::default())
            .await
            .unwrap();
        assert_eq!(live.status, DeploymentStatus::Live);
        assert_eq!(
            live.service_url.as_deref(),
            Some("https://demo.apps.example.com")
        );
        assert!(live.completed_at.unwrap() >= live.created_at);

        let project = orch.storage().project(project.id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Deployed);
        assert_eq!(project.service_name.as_deref(), Some("demo-svc"));
        assert!(project.last_deployed_at.is_some());
    }

    #[tokio::test]
    async fn no_transition_out_of_terminal() {
        let (orch, project, owner, _backend) = setup(MockBackend::new()).await;
        let d = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap();
        orch.transition(d.id, DeploymentStatus::Live, TransitionExtras::default())
            .await
            .unwrap();

        let err = orch
            .transition(d.id, DeploymentStatus::Failed, TransitionExtras::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn cancel_live_deployment_is_rejected() {
        let (orch, project, owner, _backend) = setup(MockBackend::new()).await;
        let d = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap();
        orch.transition(d.id, DeploymentStatus::Live, TransitionExtras::default())
            .await
            .unwrap();

        let err = orch.cancel(d.id, owner).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyTerminal(_)));
        assert_eq!(
            orch.get(d.id).await.unwrap().status,
            DeploymentStatus::Live
        );
    }

    #[tokio::test]
    async fn cancel_marks_cancelled_even_when_backend_rejects() {
        let backend = MockBackend {
            fail_cancel: true,
            ..MockBackend::new()
        };
        let (orch, project, owner, _backend) = setup(backend).await;
        let d = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap();

        let cancelled = orch.cancel(d.id, owner).await.unwrap();
        assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());

        // Project status untouched by cancellation.
        let project = orch.storage().project(project.id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Building);
    }

    #[tokio::test]
    async fn cancel_requires_ownership() {
        let (orch, project, owner, _backend) = setup(MockBackend::new()).await;
        let d = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap();

        let err = orch.cancel(d.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn listing_paginates_newest_first() {
        let (orch, project, owner, _backend) = setup(MockBackend::new()).await;
        for _ in 0..5 {
            let d = orch
                .create(project.id, request("tester"), Some(owner))
                .await
                .unwrap();
            orch.transition(d.id, DeploymentStatus::Live, TransitionExtras::default())
                .await
                .unwrap();
        }

        let page = orch.list(project.id, 1, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items[0].version, 5);
        assert!(page.has_more);

        let last = orch.list(project.id, 3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].version, 1);
        assert!(!last.has_more);

        let err = orch.list(project.id, 0, 2).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn backend_status_mapping() {
        assert_eq!(
            map_backend_status(BackendStatus::Queued),
            DeploymentStatus::Queued
        );
        assert_eq!(
            map_backend_status(BackendStatus::Building),
            DeploymentStatus::Building
        );
        assert_eq!(
            map_backend_status(BackendStatus::Success),
            DeploymentStatus::Live
        );
        assert_eq!(
            map_backend_status(BackendStatus::Failure),
            DeploymentStatus::Failed
        );
        assert_eq!(
            map_backend_status(BackendStatus::Cancelled),
            DeploymentStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn cancel_calls_backend_when_reference_exists() {
        let (orch, project, owner, backend) = setup(MockBackend::new()).await;
        let d = orch
            .create(project.id, request("tester"), Some(owner))
            .await
            .unwrap();
        orch.cancel(d.id, owner).await.unwrap();

        assert_eq!(backend.submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.cancel_calls.load(Ordering::SeqCst), 1);
        let record = orch.get(d.id).await.unwrap();
        assert!(record.backend_ref.is_some());
        assert_eq!(record.status, DeploymentStatus::Cancelled);
    }
}
