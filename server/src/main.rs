//! Slipway — deployment orchestrator.
//!
//! Turns source-control pushes and manual triggers into tracked,
//! cancellable deployments: it verifies webhooks, matches pushes onto
//! registered projects, submits builds to the backend, and relays build
//! logs to observers while the deployment moves through its lifecycle.

mod config;
mod metrics;
mod migration;
mod models;
mod routes;
mod schema;
mod services;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::services::backend::HttpBuildBackend;
use crate::services::orchestrator::Orchestrator;
use crate::storage::memory::MemoryStorage;
use crate::storage::pg::PgStorage;
use crate::storage::Storage;

#[derive(Parser)]
#[command(name = "slipway", about = "Slipway deployment orchestrator")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// PostgreSQL connection URL; in-memory storage when omitted
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Seed a demo project into in-memory storage
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let orchestrator_config = Arc::new(config::OrchestratorConfig::from_env());

    tracing::info!("Starting Slipway...");

    let storage: Arc<dyn Storage> = match &cli.database_url {
        Some(db_url) => {
            let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url.clone());
            let pool = Pool::builder(manager)
                .max_size(10)
                .build()
                .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

            {
                let mut conn = pool
                    .get()
                    .await
                    .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
                tracing::info!("Running database migration...");
                migration::run_migration(&mut conn).await?;
                tracing::info!("Database migration completed.");
            }

            Arc::new(PgStorage::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set -- using in-memory storage");
            let memory = Arc::new(MemoryStorage::new());
            if cli.seed_demo {
                seed_demo_project(memory.as_ref()).await?;
            }
            memory
        }
    };

    let backend = Arc::new(HttpBuildBackend::new(orchestrator_config.backend_config()));
    let orchestrator = Arc::new(Orchestrator::new(
        storage,
        backend,
        orchestrator_config.base_domain.clone(),
        orchestrator_config.page_size_max,
    ));

    let app = routes::router(routes::AppState {
        orchestrator,
        config: orchestrator_config,
    });

    // Initialize metrics
    metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Slipway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

/// Demo project for running against in-memory storage; its owner id is
/// logged so API calls can present it as `x-user-id`.
async fn seed_demo_project(storage: &dyn Storage) -> anyhow::Result<()> {
    use crate::models::project::{NewProject, ProjectType};

    let owner_id = uuid::Uuid::new_v4();
    let project = storage
        .insert_project(NewProject {
            owner_id,
            name: "demo".to_string(),
            subdomain: "demo".to_string(),
            repo_url: "https://github.com/slipway-dev/demo".to_string(),
            default_branch: "main".to_string(),
            project_type: ProjectType::Node,
            build_command: None,
            start_command: None,
            port: 3000,
            webhook_enabled: true,
            auto_deploy: true,
        })
        .await
        .map_err(|e| anyhow::anyhow!("demo seed failed: {e}"))?;
    tracing::info!(project_id = project.id, %owner_id, "Seeded demo project");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
