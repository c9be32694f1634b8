//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_circuit_transitions_total` (counter): transitions by key, target state
//! - `dispatch_circuit_rejections_total` (counter): fast-fail rejections by key
//! - `dispatch_queue_events_total` (counter): enqueued/rejected/retried/completed/failed
//! - `dispatch_queue_pending` / `dispatch_queue_running` (gauges)
//! - `dispatch_requests_total` (counter): dispatched requests by backend, outcome
//! - `dispatch_request_duration_seconds` (histogram): latency by backend
//! - `dispatch_health_score` (gauge): derived 0-100 health score
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in (`observability.metrics_enabled`)

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_circuit_transition(key: &str, to: CircuitState) {
    counter!(
        "dispatch_circuit_transitions_total",
        "key" => key.to_string(),
        "state" => to.to_string()
    )
    .increment(1);
}

pub fn record_circuit_rejected(key: &str) {
    counter!("dispatch_circuit_rejections_total", "key" => key.to_string()).increment(1);
}

pub fn record_queue_event(event: &'static str) {
    counter!("dispatch_queue_events_total", "event" => event).increment(1);
}

pub fn record_queue_depth(pending: usize, running: usize) {
    gauge!("dispatch_queue_pending").set(pending as f64);
    gauge!("dispatch_queue_running").set(running as f64);
}

pub fn record_dispatch(backend: &'static str, outcome: &'static str, duration: Duration) {
    counter!("dispatch_requests_total", "backend" => backend, "outcome" => outcome).increment(1);
    histogram!("dispatch_request_duration_seconds", "backend" => backend).record(duration.as_secs_f64());
}

pub fn record_health_score(score: f64) {
    gauge!("dispatch_health_score").set(score);
}
