//! Prometheus metrics exposition
//!
//! - `gateway_requests_total` (counter): labels `status`, `method`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `gateway_logins_total` (counter): labels `registration`, `outcome`
//! - `gateway_access_decisions_total` (counter): label `verdict`
//! - `gateway_upstream_errors_total` (counter): label `error_type`
//!
//! The session crate also emits `gateway_sessions_active` and
//! `gateway_swept_entries_total` through the same recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("gateway_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `gateway_request_duration_seconds` gets explicit buckets so it renders
/// as a histogram with `_bucket` lines rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a login callback outcome (`success` or an error kind).
pub fn record_login(registration: &str, outcome: &str) {
    metrics::counter!("gateway_logins_total", "registration" => registration.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

pub fn record_access_decision(verdict: &str) {
    metrics::counter!("gateway_access_decisions_total", "verdict" => verdict.to_string())
        .increment(1);
}

/// Record an upstream forwarding error with a classification label.
pub fn record_upstream_error(error_type: &str) {
    metrics::counter!("gateway_upstream_errors_total", "error_type" => error_type.to_string())
        .increment(1);
}
