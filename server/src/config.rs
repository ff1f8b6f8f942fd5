//! Orchestrator configuration — loaded from environment variables.

use std::time::Duration;

use crate::services::backend::BackendConfig;
use crate::services::relay::RelayConfig;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Webhook secret for HMAC validation. Empty means every delivery is
    /// rejected.
    pub webhook_secret: String,
    /// Build backend API base URL.
    pub backend_url: String,
    /// Token endpoint for backend credentials.
    pub backend_token_url: String,
    /// Service key exchanged for backend access tokens.
    pub backend_key: String,
    /// Container registry images are pushed to.
    pub registry: String,
    /// Registry namespace for project images.
    pub namespace: String,
    /// Domain suffix for deployed project URLs.
    pub base_domain: String,
    /// Log relay polling cadence in seconds.
    pub poll_interval_secs: u64,
    /// Consecutive poll failures tolerated before a relay gives up.
    pub poll_max_failures: u32,
    /// Hard cap on deployment listing page size.
    pub page_size_max: i64,
    /// Page size applied when the caller does not ask for one.
    pub default_page_size: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            backend_url: "http://localhost:8090".to_string(),
            backend_token_url: "http://localhost:8090/token".to_string(),
            backend_key: String::new(),
            registry: "registry.local".to_string(),
            namespace: "slipway".to_string(),
            base_domain: "apps.localhost".to_string(),
            poll_interval_secs: 2,
            poll_max_failures: 5,
            page_size_max: 50,
            default_page_size: 20,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let webhook_secret = std::env::var("WEBHOOK_SECRET").unwrap_or_default();
        let backend_url =
            std::env::var("BUILD_BACKEND_URL").unwrap_or(defaults.backend_url);
        let backend_token_url =
            std::env::var("BUILD_BACKEND_TOKEN_URL").unwrap_or(defaults.backend_token_url);
        let backend_key = std::env::var("BUILD_BACKEND_KEY").unwrap_or_default();
        let registry = std::env::var("REGISTRY").unwrap_or(defaults.registry);
        let namespace = std::env::var("BACKEND_NAMESPACE").unwrap_or(defaults.namespace);
        let base_domain = std::env::var("BASE_DOMAIN").unwrap_or(defaults.base_domain);
        let poll_interval_secs = std::env::var("LOG_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.poll_interval_secs);
        let poll_max_failures = std::env::var("LOG_POLL_MAX_FAILURES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.poll_max_failures);
        let page_size_max = std::env::var("PAGE_SIZE_MAX")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.page_size_max);

        if webhook_secret.is_empty() {
            tracing::warn!("WEBHOOK_SECRET not set -- all webhook deliveries will be rejected");
        }
        if backend_key.is_empty() {
            tracing::warn!("BUILD_BACKEND_KEY not set -- build submissions will fail");
        }

        Self {
            webhook_secret,
            backend_url,
            backend_token_url,
            backend_key,
            registry,
            namespace,
            base_domain,
            poll_interval_secs,
            poll_max_failures,
            page_size_max,
            default_page_size: defaults.default_page_size,
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.backend_url.clone(),
            token_url: self.backend_token_url.clone(),
            service_key: self.backend_key.clone(),
            registry: self.registry.clone(),
            namespace: self.namespace.clone(),
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_failures: self.poll_max_failures,
        }
    }
}
