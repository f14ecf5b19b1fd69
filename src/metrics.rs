//! Prometheus metrics for parapet.
//!
//! Process-level observability, exposed at `/api/v1/metrics`. Durable
//! per-workflow counters live in the statistics recorder; these gauges and
//! counters reset with the process.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Render current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Record an execution entering the EXECUTING state.
pub fn record_execution_started(source: &str) {
    counter!(
        "parapet_executions_started_total",
        "source" => source.to_string()
    )
    .increment(1);
    gauge!("parapet_active_executions").increment(1.0);
}

/// Record an execution reaching a terminal status.
pub fn record_execution_finished(status: &str) {
    counter!(
        "parapet_executions_finished_total",
        "status" => status.to_string()
    )
    .increment(1);
    gauge!("parapet_active_executions").decrement(1.0);
}

/// Record an HTTP request handled by the API.
pub fn record_http_request(method: &str, status_code: u16) {
    counter!(
        "parapet_http_requests_total",
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration.
pub fn record_http_duration(duration: Duration, method: &str) {
    histogram!(
        "parapet_http_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}
