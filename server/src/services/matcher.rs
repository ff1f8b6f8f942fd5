//! Repository matcher — maps a normalized push event onto configured
//! projects and triggers their deployments.

use serde::Serialize;

use crate::models::error::Error;
use crate::models::project::Project;
use crate::services::orchestrator::{DeployRequest, Orchestrator};
use crate::services::webhook_verify::{repos_match, PushEvent};
use crate::storage::Storage;

/// Aggregated outcome of one webhook delivery.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookSummary {
    pub triggered: usize,
    pub failed: usize,
    /// Names of the projects whose deployment was triggered.
    pub projects: Vec<String>,
}

/// Projects eligible for auto-deploy from this event: branch equality at
/// the store, then webhook + auto-deploy gates and repository equivalence.
/// Empty is a valid, non-error outcome.
pub async fn match_projects(
    storage: &dyn Storage,
    event: &PushEvent,
) -> Result<Vec<Project>, Error> {
    let candidates = storage.projects_by_branch(&event.branch).await?;
    Ok(candidates
        .into_iter()
        .filter(|p| {
            p.webhook_enabled && p.auto_deploy && repos_match(&p.repo_url, &event.repo_url)
        })
        .collect())
}

/// Trigger a deployment for every matched project.
///
/// Failures are isolated per project — one failed trigger never prevents
/// the others, and the caller reports counts instead of failing the whole
/// delivery.
pub async fn deploy_matches(
    orchestrator: &Orchestrator,
    event: &PushEvent,
) -> Result<WebhookSummary, Error> {
    let matches = match_projects(orchestrator.storage().as_ref(), event).await?;

    let mut summary = WebhookSummary {
        triggered: 0,
        failed: 0,
        projects: Vec::new(),
    };

    for project in matches {
        let request = DeployRequest {
            branch: Some(event.branch.clone()),
            commit_sha: Some(event.commit_sha.clone()),
            commit_message: event.commit_message.clone(),
            triggered_by: format!("webhook:{}", event.pusher),
        };
        match orchestrator.create(project.id, request, None).await {
            Ok(deployment) => {
                summary.triggered += 1;
                summary.projects.push(project.name.clone());
                tracing::info!(
                    project_id = project.id,
                    deployment_id = deployment.id,
                    branch = %event.branch,
                    "Deployment triggered from push webhook"
                );
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(
                    project_id = project.id,
                    error = %e,
                    "Webhook-triggered deployment failed"
                );
            }
        }
    }

    Ok(summary)
}
