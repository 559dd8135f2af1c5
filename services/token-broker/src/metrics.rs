//! Prometheus metrics exposition
//!
//! Counters for the broker's three operations, labeled by operation and
//! HTTP status. Rendered on `/metrics` from the handle returned here.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
///
/// The handle's `render()` method produces the Prometheus text exposition
/// format served on `/metrics`.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed broker request with operation and status labels.
pub fn record_request(op: &'static str, status: u16) {
    metrics::counter!("broker_requests_total", "op" => op, "status" => status.to_string())
        .increment(1);
}

/// Record a provider-side failure during a refresh or exchange.
pub fn record_provider_error(op: &'static str) {
    metrics::counter!("broker_provider_errors_total", "op" => op).increment(1);
}
