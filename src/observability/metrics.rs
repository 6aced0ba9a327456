//! Metrics collection and exposition.
//!
//! # Metrics
//! - `spoa_connections_active` (gauge): current proxy connections
//! - `spoa_frames_total` (counter): frames by type and direction
//! - `spoa_verdicts_total` (counter): verdicts by app, phase, action
//! - `spoa_errors_total` (counter): failures by kind
//! - `spoa_evaluation_duration_seconds` (histogram): evaluator latency by phase
//! - `spoa_registry_version` (gauge): currently published application set
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Labels are static strings or application names, never ids

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::engine::{Phase, VerdictAction};

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| e.to_string())?;

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn set_active_connections(active: u64) {
    gauge!("spoa_connections_active").set(active as f64);
}

/// Count one frame; `direction` is `in` or `out`.
pub fn record_frame(kind: &'static str, direction: &'static str) {
    counter!("spoa_frames_total", "type" => kind, "direction" => direction).increment(1);
}

pub fn record_verdict(app: &str, phase: Phase, action: VerdictAction) {
    counter!(
        "spoa_verdicts_total",
        "app" => app.to_string(),
        "phase" => phase.as_str(),
        "action" => action.as_str()
    )
    .increment(1);
}

pub fn record_error(kind: &'static str) {
    counter!("spoa_errors_total", "kind" => kind).increment(1);
}

pub fn record_evaluation(phase: Phase, started: Instant) {
    histogram!("spoa_evaluation_duration_seconds", "phase" => phase.as_str())
        .record(started.elapsed().as_secs_f64());
}

pub fn set_registry_version(version: u64) {
    gauge!("spoa_registry_version").set(version as f64);
}
