//! Diesel table definitions for the deployment orchestrator.
//!
//! Tables: projects, deployments. The `deployments` table additionally
//! carries a partial unique index (one non-terminal deployment per
//! project), created in `migration.rs`.

diesel::table! {
    projects (id) {
        id -> Int8,
        owner_id -> Uuid,
        name -> Varchar,
        subdomain -> Varchar,
        repo_url -> Varchar,
        default_branch -> Varchar,
        project_type -> Varchar,
        build_command -> Nullable<Varchar>,
        start_command -> Nullable<Varchar>,
        port -> Int4,
        status -> Varchar,
        webhook_enabled -> Bool,
        auto_deploy -> Bool,
        service_name -> Nullable<Varchar>,
        last_deployed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    deployments (id) {
        id -> Int8,
        project_id -> Int8,
        version -> Int4,
        branch -> Varchar,
        commit_sha -> Nullable<Varchar>,
        commit_message -> Nullable<Text>,
        triggered_by -> Varchar,
        status -> Varchar,
        backend_ref -> Nullable<Varchar>,
        log -> Nullable<Text>,
        error -> Nullable<Text>,
        service_url -> Nullable<Varchar>,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(deployments -> projects (project_id));

diesel::allow_tables_to_appear_in_same_query!(projects, deployments);
