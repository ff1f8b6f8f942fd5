//! Prometheus metrics for deployment observability.

use metrics::{counter, gauge, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("deploy_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a deployment state transition.
pub fn deployment_status_changed(status: &str) {
    counter!("deploy_deployments_total", "status" => status.to_string()).increment(1);
}

/// Record end-to-end deployment duration.
pub fn deployment_duration(duration_ms: u64) {
    histogram!("deploy_deployment_duration_ms").record(duration_ms as f64);
}

/// Record a failed log relay poll.
pub fn relay_poll_failure() {
    counter!("deploy_relay_poll_failures_total").increment(1);
}

/// Set the number of log relays currently running.
pub fn active_relays(count: usize) {
    gauge!("deploy_active_relays").set(count as f64);
}
