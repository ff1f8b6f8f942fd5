//! Embedded SQL migration for the orchestrator tables.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// Creates the projects and deployments tables.
///
/// `idx_deployments_one_active` is the load-bearing index: the application
/// level "check active, then insert" in `Orchestrator::create` is not atomic
/// against concurrent creators, so the single-active-deployment invariant is
/// enforced here and surfaces to the losing creator as a unique violation.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id              BIGSERIAL PRIMARY KEY,
    owner_id        UUID NOT NULL,
    name            VARCHAR(255) NOT NULL,
    subdomain       VARCHAR(63) NOT NULL UNIQUE,
    repo_url        VARCHAR(512) NOT NULL,
    default_branch  VARCHAR(255) NOT NULL DEFAULT 'main',
    project_type    VARCHAR(16) NOT NULL,
    build_command   VARCHAR(512),
    start_command   VARCHAR(512),
    port            INTEGER NOT NULL DEFAULT 3000,
    status          VARCHAR(16) NOT NULL DEFAULT 'idle',
    webhook_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    auto_deploy     BOOLEAN NOT NULL DEFAULT FALSE,
    service_name    VARCHAR(255),
    last_deployed_at TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_projects_branch ON projects (default_branch);
CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects (owner_id);

CREATE TABLE IF NOT EXISTS deployments (
    id              BIGSERIAL PRIMARY KEY,
    project_id      BIGINT NOT NULL REFERENCES projects(id),
    version         INTEGER NOT NULL,
    branch          VARCHAR(255) NOT NULL,
    commit_sha      VARCHAR(40),
    commit_message  TEXT,
    triggered_by    VARCHAR(255) NOT NULL,
    status          VARCHAR(16) NOT NULL DEFAULT 'queued',
    backend_ref     VARCHAR(255),
    log             TEXT,
    error           TEXT,
    service_url     VARCHAR(512),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at      TIMESTAMPTZ,
    completed_at    TIMESTAMPTZ,
    UNIQUE (project_id, version)
);

CREATE INDEX IF NOT EXISTS idx_deployments_project ON deployments (project_id);
CREATE INDEX IF NOT EXISTS idx_deployments_status ON deployments (status);
CREATE INDEX IF NOT EXISTS idx_deployments_created ON deployments (created_at DESC);

CREATE UNIQUE INDEX IF NOT EXISTS idx_deployments_one_active
    ON deployments (project_id)
    WHERE status NOT IN ('live', 'failed', 'cancelled');
"#;

/// Run the orchestrator migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("orchestrator migration failed: {e}"))?;
    Ok(())
}
