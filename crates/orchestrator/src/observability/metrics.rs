//! Metrics definitions for the orchestrator, in the spirit of the teacher's
//! ADR-0011: Prometheus naming (`orchestrator_` prefix, `_total` counters,
//! `_seconds` histograms), bounded-cardinality labels, and SLO-aligned
//! histogram buckets.
//!
//! # Cardinality
//!
//! - `method`/`endpoint`/`status` on HTTP metrics: bounded to the ambient
//!   ops surface (`/health`, `/ready`, `/metrics`).
//! - `operation` on DB metrics: bounded by the Repository trait's methods.
//! - `outcome` on placement/dispatch metrics: bounded by a small enum of
//!   named outcomes, never a free-form error string.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to serve
/// `/metrics`. Must be called once, before any metric is recorded.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or bucket
/// configuration is rejected.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("orchestrator_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("orchestrator_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("failed to set DB query buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("orchestrator_placement".to_string()),
            &[0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250],
        )
        .map_err(|e| format!("failed to set placement buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("orchestrator_rpc"),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 15.000,
            ],
        )
        .map_err(|e| format!("failed to set RPC buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("orchestrator_health_loop"),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("failed to set health-loop buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("orchestrator_metrics_aggregator"),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("failed to set metrics-aggregator buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("failed to install Prometheus recorder: {e}"))
}

/// Record HTTP request completion on the ambient ops surface.
///
/// Metric: `orchestrator_http_requests_total`, `orchestrator_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let status = categorize_status_code(status_code);

    histogram!("orchestrator_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("orchestrator_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Record a Repository call, wrapping every operation named by the
/// `Repository` trait (§4.1). `status` is `"success"` or `"error"`.
///
/// Metric: `orchestrator_db_queries_total`, `orchestrator_db_query_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("orchestrator_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("orchestrator_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a Placement Engine selection attempt (§4.4).
///
/// Metric: `orchestrator_placement_duration_seconds`, `orchestrator_placements_total`
/// Labels: `outcome` (`placed`, `no_candidate`)
pub fn record_placement(outcome: &str, duration: Duration) {
    histogram!("orchestrator_placement_duration_seconds").record(duration.as_secs_f64());

    counter!("orchestrator_placements_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an outbound RPC call to a recorder node or room server (§4.5, §6).
///
/// Metric: `orchestrator_rpc_calls_total`, `orchestrator_rpc_call_duration_seconds`
/// Labels: `target` (`recorder`, `room_server`), `method`, `status`
pub fn record_rpc_call(target: &str, method: &str, status: &str, duration: Duration) {
    histogram!("orchestrator_rpc_call_duration_seconds",
        "target" => target.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("orchestrator_rpc_calls_total",
        "target" => target.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one Health Loop tick (§4.6).
///
/// Metric: `orchestrator_health_loop_tick_duration_seconds`, `orchestrator_health_loop_reaps_total`
/// Labels (reaps): `kind` (`room_server`, `recorder_node`)
pub fn record_health_loop_tick(duration: Duration) {
    histogram!("orchestrator_health_loop_tick_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_health_loop_reap(kind: &str, count: u64) {
    counter!("orchestrator_health_loop_reaps_total",
        "kind" => kind.to_string()
    )
    .increment(count);
}

/// Record one Metrics Aggregator tick (§4.7).
///
/// Metric: `orchestrator_metrics_aggregator_tick_duration_seconds`
pub fn record_metrics_aggregator_tick(duration: Duration) {
    histogram!("orchestrator_metrics_aggregator_tick_duration_seconds").record(duration.as_secs_f64());
}

/// Record a fleet metrics snapshot publication (§4.7).
///
/// Metric: `orchestrator_metrics_snapshots_total`
pub fn record_metrics_snapshot_published() {
    counter!("orchestrator_metrics_snapshots_total").increment(1);
}

/// Record a scaling advisory emission (§4.7).
///
/// Metric: `orchestrator_scaling_advisories_total`
/// Labels: `direction` (`scale_up`, `scale_down`), `priority`
pub fn record_scaling_advisory(direction: &str, priority: &str) {
    counter!("orchestrator_scaling_advisories_total",
        "direction" => direction.to_string(),
        "priority" => priority.to_string()
    )
    .increment(1);
}
