//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define API server metrics (requests, latency, filter latency, auth attempts)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `apiserver_request_total` (counter): requests by verb, route, code
//! - `apiserver_request_duration_seconds` (histogram): route latency
//! - `apiserver_request_filter_duration_seconds` (histogram): per-filter latency
//! - `apiserver_request_aborts_total` (counter): requests answered by the timeout stage
//! - `apiserver_current_inflight_requests` (gauge): wait-group size
//! - `authenticated_user_requests` (counter): by username
//! - `authentication_attempts` (counter): by result
//! - `authentication_duration_seconds` (histogram): by result
//!
//! # Design Decisions
//! - Recording never influences control flow
//! - Without an installed exporter the `metrics` macros are no-ops

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Outcome label for authentication metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Success,
    Failure,
    Error,
}

impl AuthResult {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthResult::Success => "success",
            AuthResult::Failure => "failure",
            AuthResult::Error => "error",
        }
    }
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_filter_latency(filter: &str, elapsed: Duration) {
    histogram!("apiserver_request_filter_duration_seconds", "filter" => filter.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_request(verb: &str, route: &str, code: u16, elapsed: Duration) {
    let labels = [
        ("verb", verb.to_string()),
        ("route", route.to_string()),
        ("code", code.to_string()),
    ];
    counter!("apiserver_request_total", &labels).increment(1);
    histogram!("apiserver_request_duration_seconds", &labels).record(elapsed.as_secs_f64());
}

pub fn record_request_abort(verb: &str, path: &str) {
    counter!("apiserver_request_aborts_total", "verb" => verb.to_string(), "path" => path.to_string())
        .increment(1);
}

pub fn set_inflight_requests(count: usize) {
    gauge!("apiserver_current_inflight_requests").set(count as f64);
}

pub fn record_authenticated_user(username: &str) {
    counter!("authenticated_user_requests", "username" => username.to_string()).increment(1);
}

pub fn record_authentication(result: AuthResult, elapsed: Duration) {
    counter!("authentication_attempts", "result" => result.as_str()).increment(1);
    histogram!("authentication_duration_seconds", "result" => result.as_str())
        .record(elapsed.as_secs_f64());
}
