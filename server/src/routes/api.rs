//! Deployment API handlers — manual trigger and cancel.
//!
//! Authentication happens at the gateway; it forwards the authenticated
//! user as `x-user-id`. Handlers here only enforce ownership.

use axum::http::HeaderMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::deployment::Deployment;
use crate::models::error::Error;
use crate::services::orchestrator::{DeployRequest, Orchestrator};

/// Body of a manual trigger. Everything is optional; an empty body deploys
/// the project's default branch.
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
}

/// The authenticated user forwarded by the gateway.
pub fn require_actor(headers: &HeaderMap) -> Result<Uuid, Error> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| Error::Unauthorized("missing or invalid x-user-id header".to_string()))
}

pub async fn trigger_deployment(
    orchestrator: &Orchestrator,
    project_id: i64,
    headers: &HeaderMap,
    request: TriggerRequest,
) -> Result<Deployment, Error> {
    let actor = require_actor(headers)?;
    if let Some(branch) = &request.branch {
        if branch.trim().is_empty() {
            return Err(Error::Validation("branch must not be empty".to_string()));
        }
    }

    let deploy = DeployRequest {
        branch: request.branch,
        commit_sha: request.commit_sha,
        commit_message: None,
        triggered_by: actor.to_string(),
    };
    orchestrator.create(project_id, deploy, Some(actor)).await
}

pub async fn cancel_deployment(
    orchestrator: &Orchestrator,
    deployment_id: i64,
    headers: &HeaderMap,
) -> Result<Deployment, Error> {
    let actor = require_actor(headers)?;
    orchestrator.cancel(deployment_id, actor).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{NewProject, ProjectType};
    use crate::services::backend::testing::MockBackend;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use std::sync::Arc;

    async fn setup() -> (Arc<Orchestrator>, i64, Uuid) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let owner = Uuid::new_v4();
        let project = storage
            .insert_project(NewProject {
                owner_id: owner,
                name: "app".to_string(),
                subdomain: "app".to_string(),
                repo_url: "acme/app".to_string(),
                default_branch: "main".to_string(),
                project_type: ProjectType::Node,
                build_command: None,
                start_command: None,
                port: 3000,
                webhook_enabled: true,
                auto_deploy: true,
            })
            .await
            .unwrap();
        let orchestrator = Arc::new(Orchestrator::new(
            storage,
            Arc::new(MockBackend::new()),
            "apps.example.com".to_string(),
            50,
        ));
        (orchestrator, project.id, owner)
    }

    fn headers_for(actor: Uuid) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", actor.to_string().parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn trigger_requires_identity() {
        let (orch, project_id, _) = setup().await;
        let err = trigger_deployment(&orch, project_id, &HeaderMap::new(), TriggerRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn trigger_defaults_to_project_branch() {
        let (orch, project_id, owner) = setup().await;
        let deployment = trigger_deployment(
            &orch,
            project_id,
            &headers_for(owner),
            TriggerRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(deployment.branch, "main");
        assert_eq!(deployment.triggered_by, owner.to_string());
    }

    #[tokio::test]
    async fn blank_branch_override_is_rejected() {
        let (orch, project_id, owner) = setup().await;
        let err = trigger_deployment(
            &orch,
            project_id,
            &headers_for(owner),
            TriggerRequest {
                branch: Some("  ".to_string()),
                commit_sha: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn non_owner_cannot_cancel() {
        let (orch, project_id, owner) = setup().await;
        let deployment = trigger_deployment(
            &orch,
            project_id,
            &headers_for(owner),
            TriggerRequest::default(),
        )
        .await
        .unwrap();

        let stranger = Uuid::new_v4();
        let err = cancel_deployment(&orch, deployment.id, &headers_for(stranger))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }
}
