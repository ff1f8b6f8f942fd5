//! Log relay — turns backend polling into a push-style event feed.
//!
//! One relay task runs per observing connection; there is no shared
//! broadcast buffer. Each task polls the backend for new log bytes and
//! status, forwards chunks in fetch order, and applies a transition only
//! when the normalized status differs from the last-known value. The
//! durable store is the single source of truth, so concurrent relays for
//! the same deployment converge independently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::error::Error;
use crate::services::orchestrator::{map_backend_status, Orchestrator, TransitionExtras};

/// Typed events forwarded to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A chunk of build output.
    Log(String),
    /// The deployment moved to a new status.
    Status(DeploymentStatus),
    /// Terminal marker; the stream closes after this.
    Complete(DeploymentStatus),
    /// Fatal relay error; the stream closes after this.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Fixed polling cadence, on the order of 1–3 seconds.
    pub poll_interval: Duration,
    /// Consecutive transient failures tolerated before giving up.
    pub max_failures: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_failures: 5,
        }
    }
}

/// Backoff for the next poll: the base interval, doubled per consecutive
/// failure, capped at 30s.
fn poll_delay(config: &RelayConfig, failures: u32) -> Duration {
    let backoff = config.poll_interval * 2u32.saturating_pow(failures.min(8));
    backoff.min(Duration::from_secs(30))
}

/// Run one relay for `deployment_id`, sending events into `tx` until the
/// deployment reaches a terminal state, the retry budget is exhausted, or
/// the observer goes away.
pub async fn run(
    orchestrator: Arc<Orchestrator>,
    deployment_id: i64,
    config: RelayConfig,
    tx: mpsc::Sender<RelayEvent>,
) {
    let deployment = match orchestrator.get(deployment_id).await {
        Ok(d) => d,
        Err(e) => {
            let _ = tx.send(RelayEvent::Error(e.to_string())).await;
            return;
        }
    };

    // Already finished: replay the stored transcript, no polling.
    if deployment.status.is_terminal() {
        if let Some(log) = &deployment.log {
            let _ = tx.send(RelayEvent::Log(log.clone())).await;
        }
        let _ = tx.send(RelayEvent::Status(deployment.status)).await;
        let _ = tx.send(RelayEvent::Complete(deployment.status)).await;
        return;
    }

    // Submission still in flight: nothing to poll against yet.
    let Some(reference) = deployment.backend_ref.clone() else {
        let _ = tx
            .send(RelayEvent::Log(
                "deployment accepted; waiting for build submission\n".to_string(),
            ))
            .await;
        return;
    };

    poll_loop(orchestrator, deployment, reference, config, tx).await;
}

async fn poll_loop(
    orchestrator: Arc<Orchestrator>,
    deployment: Deployment,
    reference: String,
    config: RelayConfig,
    tx: mpsc::Sender<RelayEvent>,
) {
    let deployment_id = deployment.id;
    let backend = orchestrator.backend().clone();

    let mut transcript = deployment.log.unwrap_or_default();
    let mut offset = transcript.len() as u64;
    let mut last_status = deployment.status;
    let mut failures: u32 = 0;

    loop {
        tokio::time::sleep(poll_delay(&config, failures)).await;
        if tx.is_closed() {
            tracing::debug!(deployment_id, "Observer gone, stopping relay");
            return;
        }

        let chunk = match backend.fetch_log_chunk(&reference, offset).await {
            Ok(c) => c,
            Err(e) => {
                failures += 1;
                crate::metrics::relay_poll_failure();
                if failures > config.max_failures {
                    let _ = tx
                        .send(RelayEvent::Error(format!("log stream lost: {e}")))
                        .await;
                    return;
                }
                tracing::debug!(deployment_id, failures, error = %e, "Log fetch failed, backing off");
                continue;
            }
        };

        if !chunk.is_empty() {
            let text = String::from_utf8_lossy(&chunk).into_owned();
            offset += chunk.len() as u64;
            transcript.push_str(&text);
            if tx.send(RelayEvent::Log(text)).await.is_err() {
                return;
            }
        }

        let backend_status = match backend.status(&reference).await {
            Ok(s) => s,
            Err(e) => {
                failures += 1;
                crate::metrics::relay_poll_failure();
                if failures > config.max_failures {
                    let _ = tx
                        .send(RelayEvent::Error(format!("status poll lost: {e}")))
                        .await;
                    return;
                }
                continue;
            }
        };
        failures = 0;

        let status = map_backend_status(backend_status);
        if status == last_status {
            continue;
        }

        if status.is_terminal() {
            // Drain whatever the backend flushed after the last chunk so the
            // persisted transcript is complete.
            if let Ok(tail) = backend.fetch_log_chunk(&reference, offset).await {
                if !tail.is_empty() {
                    let text = String::from_utf8_lossy(&tail).into_owned();
                    transcript.push_str(&text);
                    let _ = tx.send(RelayEvent::Log(text)).await;
                }
            }

            let extras = TransitionExtras {
                log: Some(transcript.clone()),
                ..Default::default()
            };
            match orchestrator.transition(deployment_id, status, extras).await {
                Ok(_) => {}
                Err(Error::AlreadyTerminal(_)) => {
                    // Another relay finalized first; the stored record wins.
                    tracing::debug!(deployment_id, "Deployment already finalized elsewhere");
                }
                Err(e) => {
                    tracing::error!(deployment_id, error = %e, "Final transition failed");
                    let _ = tx.send(RelayEvent::Error(e.to_string())).await;
                    return;
                }
            }

            let _ = tx.send(RelayEvent::Status(status)).await;
            let _ = tx.send(RelayEvent::Complete(status)).await;
            return;
        }

        match orchestrator
            .transition(deployment_id, status, TransitionExtras::default())
            .await
        {
            Ok(_) => {}
            Err(Error::AlreadyTerminal(_)) => {
                // Raced with a cancel or another relay's finalization; stop
                // polling and report what the store holds.
                match orchestrator.get(deployment_id).await {
                    Ok(d) => {
                        let _ = tx.send(RelayEvent::Status(d.status)).await;
                        let _ = tx.send(RelayEvent::Complete(d.status)).await;
                    }
                    Err(e) => {
                        let _ = tx.send(RelayEvent::Error(e.to_string())).await;
                    }
                }
                return;
            }
            Err(e) => {
                tracing::error!(deployment_id, error = %e, "Transition failed");
                let _ = tx.send(RelayEvent::Error(e.to_string())).await;
                return;
            }
        }

        if tx.send(RelayEvent::Status(status)).await.is_err() {
            return;
        }
        last_status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::BackendStatus;
    use crate::models::project::{NewProject, ProjectType};
    use crate::services::backend::testing::MockBackend;
    use crate::services::orchestrator::DeployRequest;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use uuid::Uuid;

    fn fast_config() -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(5),
            max_failures: 3,
        }
    }

    async fn setup(backend: MockBackend) -> (Arc<Orchestrator>, i64) {
        let owner = Uuid::new_v4();
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let project = storage
            .insert_project(NewProject {
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
            })
            .await
            .unwrap();
        let orchestrator = Arc::new(Orchestrator::new(
            storage,
            Arc::new(backend),
            "apps.example.com".to_string(),
            50,
        ));
        let deployment = orchestrator
            .create(
                project.id,
                DeployRequest {
                    branch: None,
                    commit_sha: None,
                    commit_message: None,
                    triggered_by: "tester".to_string(),
                },
                Some(owner),
            )
            .await
            .unwrap();
        (orchestrator, deployment.id)
    }

    async fn collect(mut rx: mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn relays_lifecycle_to_live() {
        let backend = MockBackend::scripted(
            vec![
                BackendStatus::Queued,
                BackendStatus::Building,
                BackendStatus::Success,
            ],
            vec!["cloning...\n", "compiling...\n", "done\n"],
        );
        let (orch, deployment_id) = setup(backend).await;

        let (tx, rx) = mpsc::channel(64);
        run(orch.clone(), deployment_id, fast_config(), tx).await;
        let events = collect(rx).await;

        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Status(s) => Some(*s),
                _ => None,
            })
            .collect();
        // Exactly one transition per distinct backend status.
        assert_eq!(
            statuses,
            vec![
                DeploymentStatus::Queued,
                DeploymentStatus::Building,
                DeploymentStatus::Live,
            ]
        );
        assert_eq!(
            events.last(),
            Some(&RelayEvent::Complete(DeploymentStatus::Live))
        );

        let forwarded: String = events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Log(c) => Some(c.as_str()),
                _ => None,
            })
            .collect();

        let stored = orch.get(deployment_id).await.unwrap();
        assert_eq!(stored.status, DeploymentStatus::Live);
        // Persisted transcript equals the concatenation of forwarded chunks.
        assert_eq!(stored.log.as_deref(), Some(forwarded.as_str()));
        assert_eq!(stored.log.as_deref(), Some("cloning...\ncompiling...\ndone\n"));
    }

    #[tokio::test]
    async fn terminal_deployment_replays_immediately() {
        let backend = MockBackend::scripted(vec![BackendStatus::Success], vec!["all done\n"]);
        let (orch, deployment_id) = setup(backend).await;

        // First observer drives the deployment to LIVE.
        let (tx, rx) = mpsc::channel(64);
        run(orch.clone(), deployment_id, fast_config(), tx).await;
        drop(collect(rx).await);

        // Second observer gets transcript + status + complete without polls.
        let (tx, rx) = mpsc::channel(64);
        run(orch.clone(), deployment_id, fast_config(), tx).await;
        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![
                RelayEvent::Log("all done\n".to_string()),
                RelayEvent::Status(DeploymentStatus::Live),
                RelayEvent::Complete(DeploymentStatus::Live),
            ]
        );
    }

    #[tokio::test]
    async fn failure_status_finalizes_as_failed() {
        let backend = MockBackend::scripted(
            vec![BackendStatus::Building, BackendStatus::Failure],
            vec!["compiling...\n", "error: kaboom\n"],
        );
        let (orch, deployment_id) = setup(backend).await;

        let (tx, rx) = mpsc::channel(64);
        run(orch.clone(), deployment_id, fast_config(), tx).await;
        let events = collect(rx).await;

        assert_eq!(
            events.last(),
            Some(&RelayEvent::Complete(DeploymentStatus::Failed))
        );
        let stored = orch.get(deployment_id).await.unwrap();
        assert_eq!(stored.status, DeploymentStatus::Failed);
        assert!(stored.log.as_deref().unwrap().contains("kaboom"));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_emit_error_without_finalizing() {
        // Empty status script: every poll is a transient failure.
        let backend = MockBackend::scripted(vec![], vec![]);
        let (orch, deployment_id) = setup(backend).await;

        let (tx, rx) = mpsc::channel(64);
        run(orch.clone(), deployment_id, fast_config(), tx).await;
        let events = collect(rx).await;

        assert!(matches!(events.last(), Some(RelayEvent::Error(_))));
        // Poll failures never mark the deployment failed.
        let stored = orch.get(deployment_id).await.unwrap();
        assert_eq!(stored.status, DeploymentStatus::Cloning);
    }

    #[tokio::test]
    async fn missing_deployment_reports_error() {
        let backend = MockBackend::new();
        let (orch, _) = setup(backend).await;

        let (tx, rx) = mpsc::channel(8);
        run(orch, 9999, fast_config(), tx).await;
        let events = collect(rx).await;
        assert!(matches!(events.as_slice(), [RelayEvent::Error(_)]));
    }
}
