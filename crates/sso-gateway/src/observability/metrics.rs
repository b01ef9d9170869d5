//! Metrics definitions for the SSO gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sso_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `algorithm`: registered algorithm names, or `unsupported`
//! - `status`: success, error (plus timeout for HTTP)
//! - `mode`: buffered, streaming
//! - `endpoint`: normalized route templates, unknown paths collapse to `/other`
//!
//! Service names from the topology are never used as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sso_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // RSA signing is single-digit milliseconds
        .set_buckets_for_metric(
            Matcher::Prefix("sso_token_issuance".to_string()),
            &[0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250],
        )
        .map_err(|e| format!("Failed to set token issuance buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("sso_dispatch".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set dispatch buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Record token issuance duration and outcome
///
/// Metric: `sso_token_issuance_duration_seconds`, `sso_token_issuance_total`
/// Labels: `algorithm`, `status`
pub fn record_token_issuance(algorithm: &str, status: &str, duration: Duration) {
    let algorithm = bounded_algorithm(algorithm);

    histogram!("sso_token_issuance_duration_seconds", "algorithm" => algorithm, "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("sso_token_issuance_total", "algorithm" => algorithm, "status" => status.to_string())
        .increment(1);
}

/// Record a redirect rejected by the whitelist
///
/// Metric: `sso_redirect_rejections_total`
pub fn record_redirect_rejection() {
    counter!("sso_redirect_rejections_total").increment(1);
}

fn bounded_algorithm(algorithm: &str) -> &'static str {
    match algorithm {
        "RS256" => "RS256",
        "RS384" => "RS384",
        "RS512" => "RS512",
        _ => "unsupported",
    }
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Record a forwarded request
///
/// Metric: `sso_dispatch_duration_seconds`, `sso_dispatch_total`
/// Labels: `mode` (buffered, streaming), `status` (success, error)
pub fn record_dispatch(mode: &str, status: &str, duration: Duration) {
    histogram!("sso_dispatch_duration_seconds", "mode" => mode.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("sso_dispatch_total", "mode" => mode.to_string(), "status" => status.to_string())
        .increment(1);
}

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Record JWKS endpoint request
///
/// Metric: `sso_jwks_requests_total`
pub fn record_jwks_request() {
    counter!("sso_jwks_requests_total").increment(1);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `sso_http_requests_total`, `sso_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
///
/// Captures every response, including framework-level 404/405.
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_path(path);
    let status = categorize_status_code(status_code);

    histogram!("sso_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("sso_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=399 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path to a bounded route template.
fn normalize_path(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/api/v1/websso" => "/api/v1/websso",
        "/.well-known/jwks.json" => "/.well-known/jwks.json",
        _ if path.starts_with("/gateway/") => "/gateway/{service}/{path}",
        _ => "/other",
    }
}
