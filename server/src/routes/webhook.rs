//! Source-control webhook ingress.
//!
//! Signature validation happens before the body is parsed; an unverifiable
//! delivery is rejected outright. Recognized push events fan out to every
//! matching project, and the response always reports counts so the sender
//! marks the delivery as handled.

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::Json;

use crate::config::OrchestratorConfig;
use crate::models::error::Error;
use crate::services::matcher::deploy_matches;
use crate::services::orchestrator::Orchestrator;
use crate::services::webhook_verify::{parse_push_event, validate_signature};

pub async fn handle_webhook(
    config: &OrchestratorConfig,
    orchestrator: &Orchestrator,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, Error> {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !validate_signature(&config.webhook_secret, &body, signature) {
        return Err(Error::Unauthorized("invalid webhook signature".to_string()));
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let delivery = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match event_type {
        "ping" => Ok(Json(serde_json::json!({ "message": "pong" }))),
        "push" => {
            let payload: serde_json::Value = serde_json::from_slice(&body)
                .map_err(|e| Error::Validation(format!("malformed webhook payload: {e}")))?;

            let Some(event) = parse_push_event(&payload) else {
                // Branch deletions and tag pushes land here.
                return Ok(Json(serde_json::json!({
                    "message": "push ignored: nothing to deploy"
                })));
            };

            tracing::info!(
                delivery,
                branch = %event.branch,
                repo = %event.repo_full_name,
                "Processing push webhook"
            );

            let summary = deploy_matches(orchestrator, &event).await?;
            Ok(Json(serde_json::json!({
                "triggered": summary.triggered,
                "failed": summary.failed,
                "projects": summary.projects,
            })))
        }
        other => Ok(Json(serde_json::json!({
            "message": format!("ignoring event: {other}")
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{NewProject, ProjectType};
    use crate::services::backend::testing::MockBackend;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::sync::Arc;
    use uuid::Uuid;

    const SECRET: &str = "hook-secret";

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            webhook_secret: SECRET.to_string(),
            ..OrchestratorConfig::default()
        }
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn headers(event: &str, signature: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("x-github-event", event.parse().unwrap());
        h.insert("x-hub-signature-256", signature.parse().unwrap());
        h
    }

    async fn orchestrator() -> Arc<Orchestrator> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage
            .insert_project(NewProject {
                owner_id: Uuid::new_v4(),
                name: "app".to_string(),
                subdomain: "app".to_string(),
                repo_url: "https://github.com/acme/app".to_string(),
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
        Arc::new(Orchestrator::new(
            storage,
            Arc::new(MockBackend::new()),
            "apps.example.com".to_string(),
            50,
        ))
    }

    fn push_body() -> Vec<u8> {
        serde_json::json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "repository": {
                "full_name": "acme/app",
                "clone_url": "https://github.com/acme/app.git",
            },
            "head_commit": { "message": "fix: widget" },
            "pusher": { "name": "jdoe" },
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_parsing() {
        let orch = orchestrator().await;
        let body = push_body();
        let err = handle_webhook(
            &config(),
            &orch,
            &headers("push", "sha256=deadbeef"),
            Bytes::from(body),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn signed_push_triggers_matching_project() {
        let orch = orchestrator().await;
        let body = push_body();
        let sig = sign(&body);
        let Json(response) =
            handle_webhook(&config(), &orch, &headers("push", &sig), Bytes::from(body))
                .await
                .unwrap();
        assert_eq!(response["triggered"], 1);
        assert_eq!(response["failed"], 0);
        assert_eq!(response["projects"][0], "app");
    }

    #[tokio::test]
    async fn non_push_events_are_acknowledged_without_side_effects() {
        let orch = orchestrator().await;
        let body = b"{}".to_vec();
        let sig = sign(&body);
        let Json(response) = handle_webhook(
            &config(),
            &orch,
            &headers("issue_comment", &sig),
            Bytes::from(body),
        )
        .await
        .unwrap();
        assert_eq!(response["message"], "ignoring event: issue_comment");
    }

    #[tokio::test]
    async fn branch_deletion_push_is_ignored() {
        let orch = orchestrator().await;
        let body = serde_json::json!({
            "ref": "refs/heads/old-branch",
            "after": "0000000000000000000000000000000000000000",
            "repository": { "full_name": "acme/app" },
        })
        .to_string()
        .into_bytes();
        let sig = sign(&body);
        let Json(response) =
            handle_webhook(&config(), &orch, &headers("push", &sig), Bytes::from(body))
                .await
                .unwrap();
        assert_eq!(response["message"], "push ignored: nothing to deploy");
    }
}
