//! Domain models for projects and deployments.

pub mod deployment;
pub mod error;
pub mod project;
