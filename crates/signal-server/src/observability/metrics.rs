//! Metrics definitions for the signal server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `signal_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: media RPC methods (10 values)
//! - `reason`: media RPC failure kinds (`timeout`, `no_responders`, `bus`, `remote`, `decode`)
//! - `event`: client request events (8 values plus `invalid`)
//! - `status`: `success` or `error`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Media RPC latency buckets, bounded above by the 10s RPC timeout
        .set_buckets_for_metric(
            Matcher::Prefix("signal_media_rpc".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
                10.000,
            ],
        )
        .map_err(|e| format!("Failed to set media RPC buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Metric: `signal_participants_active`
pub fn set_participants_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("signal_participants_active").set(count as f64);
}

/// Set the media node pool gauges.
///
/// Metrics: `signal_media_nodes_alive`, `signal_media_nodes_known`
pub fn set_media_nodes(alive: usize, known: usize) {
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!("signal_media_nodes_alive").set(alive as f64);
        gauge!("signal_media_nodes_known").set(known as f64);
    }
}

/// Record one media RPC round trip, successful or not.
///
/// Metric: `signal_media_rpc_duration_seconds`
/// Labels: `method`
pub fn record_media_rpc_duration(method: &'static str, duration: Duration) {
    histogram!("signal_media_rpc_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
}

/// Metric: `signal_media_rpc_failures_total`
/// Labels: `method`, `reason`
pub fn record_media_rpc_failure(method: &'static str, reason: &'static str) {
    counter!(
        "signal_media_rpc_failures_total",
        "method" => method,
        "reason" => reason
    )
    .increment(1);
}

/// Metric: `signal_client_requests_total`
/// Labels: `event`, `status`
pub fn record_client_request(event: &'static str, status: &'static str) {
    counter!(
        "signal_client_requests_total",
        "event" => event,
        "status" => status
    )
    .increment(1);
}

/// Count one accepted WebSocket upgrade.
///
/// Metric: `signal_connections_total`
pub fn record_connection() {
    counter!("signal_connections_total").increment(1);
}
