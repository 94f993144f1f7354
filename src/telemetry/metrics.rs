//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cache_store_calls_total` (counter): attempts by endpoint, command, outcome
//! - `cache_store_call_duration_seconds` (histogram): attempt latency
//! - `cache_retries_total` (counter): retries by endpoint, command
//! - `cache_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `cache_circuit_transitions_total` (counter): by from, to
//! - `cache_pool_connections` (gauge): open and leased connections
//! - `cache_pool_exhausted_total` (counter): acquire timeouts
//! - `cache_http_requests_total` (counter): by method, route, status
//!
//! # Design Decisions
//! - Call sites use the `metrics` macros; without an installed recorder
//!   they are no-ops, so tests need no setup
//! - Histogram buckets span 100µs to 10s

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus recorder and describe every metric.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)?
        .install_recorder()?;
    describe();
    tracing::info!("Metrics recorder installed");
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(
        "cache_store_calls_total",
        "Store call attempts by endpoint, command and outcome"
    );
    metrics::describe_histogram!(
        "cache_store_call_duration_seconds",
        metrics::Unit::Seconds,
        "Store call attempt latency"
    );
    metrics::describe_counter!("cache_retries_total", "Store call retries");
    metrics::describe_gauge!(
        "cache_circuit_state",
        "Circuit breaker state (0=closed, 1=open, 2=half-open)"
    );
    metrics::describe_counter!(
        "cache_circuit_transitions_total",
        "Circuit breaker state transitions"
    );
    metrics::describe_gauge!("cache_pool_connections", "Pool connections by state");
    metrics::describe_counter!(
        "cache_pool_exhausted_total",
        "Acquire attempts that found no free connection in time"
    );
    metrics::describe_counter!("cache_http_requests_total", "HTTP requests by route and status");
}

/// Count one HTTP request.
pub fn record_http_request(method: &str, route: &str, status: u16) {
    metrics::counter!(
        "cache_http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
