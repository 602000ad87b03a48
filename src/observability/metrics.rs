//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define client metrics (commands, latency, retries, breaker, pool)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-projector and aggregate metrics
//!
//! # Metrics
//! - `pjlink_commands_total` (counter): commands by operation, outcome
//! - `pjlink_command_duration_seconds` (histogram): latency including retries
//! - `pjlink_retries_total` (counter): retries by endpoint
//! - `pjlink_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `pjlink_pool_connections` (gauge): connections by endpoint, state
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels stay low-cardinality (operation code, endpoint, outcome)

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::Endpoint;
use crate::pool::PoolStats;
use crate::resilience::CircuitPhase;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// One finished `execute` call.
pub fn record_command(operation: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        "pjlink_commands_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("pjlink_command_duration_seconds", "operation" => operation.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(endpoint: &Endpoint) {
    counter!("pjlink_retries_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_circuit_state(endpoint: &Endpoint, phase: CircuitPhase) {
    let value = match phase {
        CircuitPhase::Closed => 0.0,
        CircuitPhase::HalfOpen => 1.0,
        CircuitPhase::Open => 2.0,
    };
    gauge!("pjlink_circuit_state", "endpoint" => endpoint.to_string()).set(value);
}

pub fn record_pool_stats(endpoint: &Endpoint, stats: &PoolStats) {
    let endpoint = endpoint.to_string();
    for (state, count) in [
        ("active", stats.active),
        ("idle", stats.idle),
        ("opening", stats.opening),
    ] {
        gauge!(
            "pjlink_pool_connections",
            "endpoint" => endpoint.clone(),
            "state" => state
        )
        .set(count as f64);
    }
}
