//! Core services: webhook verification, repository matching, the build
//! backend adapter, the deployment orchestrator, and the log relay.

pub mod backend;
pub mod matcher;
pub mod orchestrator;
pub mod relay;
pub mod webhook_verify;
