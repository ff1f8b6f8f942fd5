//! Build backend adapter.
//!
//! Translates a (project, deployment) pair into a build submission against
//! the external build-and-deploy service and exposes status polling,
//! cancellation, and incremental log retrieval. The orchestrator and relay
//! only ever see the closed `BackendStatus` set and `BackendError` — never
//! backend vocabulary.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::deployment::{BackendStatus, Deployment};
use crate::models::project::{Project, ProjectType};

#[derive(Debug, Error)]
pub enum BackendError {
    /// Credentials could not be acquired. Fatal for the operation; the
    /// deployment is marked FAILED with this recorded.
    #[error("backend auth failed: {0}")]
    Auth(String),

    /// The backend rejected the build submission.
    #[error("submission rejected: {0}")]
    Submission(String),

    /// The backend rejected a cancellation (e.g. build already terminal).
    /// Callers treat this as non-fatal.
    #[error("cancellation rejected: {0}")]
    Cancel(String),

    /// A status or log poll failed; retried with backoff inside the relay.
    #[error("transient backend error: {0}")]
    Transient(String),
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Submit a build pipeline, returning the backend's opaque reference.
    async fn submit(
        &self,
        project: &Project,
        deployment: &Deployment,
    ) -> Result<String, BackendError>;

    /// Current backend-reported status, normalized into the closed set.
    async fn status(&self, reference: &str) -> Result<BackendStatus, BackendError>;

    /// Best-effort cancellation.
    async fn cancel(&self, reference: &str) -> Result<(), BackendError>;

    /// Log bytes beyond `offset`; empty means nothing new yet, not an
    /// error — logs lag behind build progress.
    async fn fetch_log_chunk(&self, reference: &str, offset: u64)
        -> Result<Vec<u8>, BackendError>;
}

/// Normalize a backend state string into the closed set.
///
/// Distinct failure reasons (timeout, internal error) all collapse to
/// FAILURE. Unrecognized states normalize to BUILDING — fail open to
/// "still running" rather than silently finalizing on an unknown code.
pub fn normalize_backend_state(raw: &str) -> BackendStatus {
    match raw.to_ascii_uppercase().as_str() {
        "QUEUED" | "PENDING" => BackendStatus::Queued,
        "WORKING" | "BUILDING" => BackendStatus::Building,
        "SUCCESS" => BackendStatus::Success,
        "FAILURE" | "TIMEOUT" | "INTERNAL_ERROR" => BackendStatus::Failure,
        "CANCELLED" | "CANCELED" => BackendStatus::Cancelled,
        other => {
            tracing::warn!(state = other, "Unrecognized backend state, treating as building");
            BackendStatus::Building
        }
    }
}

/// Build template selected by project type: builder image plus default
/// build/start commands, overridable per project.
fn build_template(project: &Project) -> (&'static str, String, String) {
    let (image, default_build, default_start) = match project.project_type {
        ProjectType::Node => ("node:20-alpine", "npm ci && npm run build", "npm start"),
        ProjectType::Python => (
            "python:3.12-slim",
            "pip install -r requirements.txt",
            "python main.py",
        ),
        ProjectType::Static => ("nginx:alpine", "true", "nginx -g 'daemon off;'"),
    };
    let build = project
        .build_command
        .clone()
        .unwrap_or_else(|| default_build.to_string());
    let start = project
        .start_command
        .clone()
        .unwrap_or_else(|| default_start.to_string());
    (image, build, start)
}

/// Endpoint and credential configuration for the HTTP backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub token_url: String,
    pub service_key: String,
    pub registry: String,
    pub namespace: String,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Production adapter talking to the build backend's REST API.
pub struct HttpBuildBackend {
    http: reqwest::Client,
    config: BackendConfig,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    state: String,
}

impl HttpBuildBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    /// Image tag for a deployment: `{registry}/{namespace}/{subdomain}:v{version}`.
    pub fn image_tag(&self, project: &Project, deployment: &Deployment) -> String {
        format!(
            "{}/{}/{}:v{}",
            self.config.registry, self.config.namespace, project.subdomain, deployment.version
        )
    }

    /// Acquire (or reuse) an access token. Scoped and retryable: one retry
    /// on a transient failure, then `BackendError::Auth`.
    async fn access_token(&self) -> Result<String, BackendError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() + Duration::seconds(30) {
                return Ok(token.value.clone());
            }
        }

        let mut last_err = String::new();
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
            let result = self
                .http
                .post(&self.config.token_url)
                .json(&serde_json::json!({ "key": self.config.service_key }))
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    let token: TokenResponse = resp
                        .json()
                        .await
                        .map_err(|e| BackendError::Auth(e.to_string()))?;
                    let expires_at = Utc::now() + Duration::seconds(token.expires_in);
                    *cached = Some(CachedToken {
                        value: token.access_token.clone(),
                        expires_at,
                    });
                    return Ok(token.access_token);
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = format!("token endpoint returned {}", resp.status());
                }
                Ok(resp) => {
                    // 4xx: bad key, no point retrying.
                    return Err(BackendError::Auth(format!(
                        "token endpoint returned {}",
                        resp.status()
                    )));
                }
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(BackendError::Auth(last_err))
    }

    fn builds_url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/namespaces/{}/builds{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.namespace,
            suffix
        )
    }

    /// The ordered pipeline submitted for a deployment: fetch source at the
    /// deployment's branch, materialize the template, build and publish an
    /// image, then roll out the service.
    fn build_steps(&self, project: &Project, deployment: &Deployment) -> serde_json::Value {
        let (builder_image, build_command, start_command) = build_template(project);
        let tag = self.image_tag(project, deployment);
        serde_json::json!([
            {
                "id": "fetch",
                "action": "git-fetch",
                "repo": project.repo_url,
                "branch": deployment.branch,
                "commit": deployment.commit_sha,
            },
            {
                "id": "prepare",
                "action": "template",
                "builder": builder_image,
                "build_command": build_command,
                "start_command": start_command,
            },
            {
                "id": "build",
                "action": "image-build",
                "tag": tag,
            },
            {
                "id": "push",
                "action": "image-push",
                "tag": tag,
            },
            {
                "id": "deploy",
                "action": "rollout",
                "service": project.derived_service_name(),
                "image": tag,
                "port": project.port,
                "env": { "PORT": project.port.to_string() },
            },
        ])
    }
}

#[async_trait]
impl BuildBackend for HttpBuildBackend {
    async fn submit(
        &self,
        project: &Project,
        deployment: &Deployment,
    ) -> Result<String, BackendError> {
        let token = self.access_token().await?;
        let body = serde_json::json!({
            "steps": self.build_steps(project, deployment),
            "tags": [format!("deployment-{}", deployment.id)],
        });

        let resp = self
            .http
            .post(self.builds_url(""))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Submission(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Submission(format!("{status}: {text}")));
        }

        let submitted: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Submission(e.to_string()))?;

        tracing::info!(
            deployment_id = deployment.id,
            backend_ref = %submitted.id,
            "Build submitted"
        );
        Ok(submitted.id)
    }

    async fn status(&self, reference: &str) -> Result<BackendStatus, BackendError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(self.builds_url(&format!("/{reference}")))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BackendError::Transient(format!(
                "status poll returned {}",
                resp.status()
            )));
        }

        let status: StatusResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        Ok(normalize_backend_state(&status.state))
    }

    async fn cancel(&self, reference: &str) -> Result<(), BackendError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .post(self.builds_url(&format!("/{reference}/cancel")))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| BackendError::Cancel(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BackendError::Cancel(format!(
                "cancel returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn fetch_log_chunk(
        &self,
        reference: &str,
        offset: u64,
    ) -> Result<Vec<u8>, BackendError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(self.builds_url(&format!("/{reference}/logs")))
            .query(&[("offset", offset)])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BackendError::Transient(format!(
                "log fetch returned {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
