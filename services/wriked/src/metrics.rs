//! Prometheus metrics exposition
//!
//! The token manager records provider traffic through the `metrics` facade:
//!
//! - `token_requests_total` (counter): labels `grant_type`, `outcome`
//! - `token_request_duration_seconds` (histogram): label `grant_type`
//! - `token_installs_total` (counter): label `grant_type`
//!
//! This module adds the HTTP-side series and installs the recorder:
//!
//! - `token_reads_total` (counter): label `outcome`
//! - `code_submissions_total` (counter): label `outcome`

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Buckets for provider round trips, from 10ms up to the 30s request timeout.
const TOKEN_REQUEST_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("token_request_duration_seconds".to_string()),
            TOKEN_REQUEST_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a `/get` outcome: `ok` or the error kind.
pub fn record_read(outcome: &'static str) {
    metrics::counter!("token_reads_total", "outcome" => outcome).increment(1);
}

/// Record a `/set-code` outcome: `accepted` or the rejection reason.
pub fn record_code_submission(outcome: &'static str) {
    metrics::counter!("code_submissions_total", "outcome" => outcome).increment(1);
}

/// Isolated recorder/handle pair for tests; never touches the global recorder.
#[cfg(test)]
pub fn test_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    let recorder = builder().unwrap().build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}
