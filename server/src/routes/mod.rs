//! HTTP routes — webhook ingress, deployment API, log stream.

pub mod api;
pub mod logs;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::OrchestratorConfig;
use crate::models::deployment::Deployment;
use crate::models::error::Error;
use crate::services::orchestrator::{DeploymentPage, Orchestrator};

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<OrchestratorConfig>,
}

/// Build the orchestrator's Axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Webhook ingress
        .route("/hooks/source", post(webhook_handler))
        // Deployment API
        .route(
            "/api/projects/{project_id}/deployments",
            post(trigger_handler).get(list_handler),
        )
        .route("/api/deployments/{deployment_id}", get(get_handler))
        .route("/api/deployments/{deployment_id}/cancel", post(cancel_handler))
        .route("/api/deployments/{deployment_id}/logs", get(logs::stream_logs))
        // Liveness
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, Error> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state.config, &state.orchestrator, &headers, body).await
}

// ── Deployment API ──

async fn trigger_handler(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<api::TriggerRequest>>,
) -> Result<(StatusCode, Json<Deployment>), Error> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    api::trigger_deployment(&state.orchestrator, project_id, &headers, request)
        .await
        .map(|d| (StatusCode::CREATED, Json(d)))
}

async fn cancel_handler(
    State(state): State<AppState>,
    Path(deployment_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Deployment>, Error> {
    api::cancel_deployment(&state.orchestrator, deployment_id, &headers)
        .await
        .map(Json)
}

async fn get_handler(
    State(state): State<AppState>,
    Path(deployment_id): Path<i64>,
) -> Result<Json<Deployment>, Error> {
    state.orchestrator.get(deployment_id).await.map(Json)
}

#[derive(serde::Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

async fn list_handler(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeploymentPage>, Error> {
    state
        .orchestrator
        .list(
            project_id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(state.config.default_page_size),
        )
        .await
        .map(Json)
}
