//! HTTP routes for the SSO gateway.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, resolve_principal, PrincipalState};
use crate::services::key_management_service::SigningKeyPair;
use crate::services::sso_service::SsoIssuanceService;
use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use crate::observability::metrics::init_metrics_recorder;

/// Timeout for every route except `/gateway/...`.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack added on top of the outbound budget for forwarded requests.
const PROXY_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Timeout for `/gateway/...` requests.
///
/// A forwarded request may make two backend attempts, each bounded by
/// `forward_timeout`, so the outer timeout must never fire first.
pub fn proxy_request_timeout(forward_timeout: Duration) -> Duration {
    forward_timeout.saturating_mul(2).saturating_add(PROXY_TIMEOUT_MARGIN)
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Token issuance for `/api/v1/websso`.
    pub sso: SsoIssuanceService,

    /// Backend forwarding for `/gateway/...`.
    pub dispatcher: Dispatcher,

    /// Signing key, published through JWKS.
    pub key_pair: Arc<SigningKeyPair>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK")
/// - `/metrics` - Prometheus metrics endpoint
/// - `/.well-known/jwks.json` - Token verification key
/// - `/api/v1/websso` - SSO token issuance (principal required)
/// - `/gateway/:service/*path` - Forwarding to configured backends
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout, or [`proxy_request_timeout`] for forwarding
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let principal_state = Arc::new(PrincipalState {
        header: state.config.principal_header.clone(),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/.well-known/jwks.json", get(handlers::handle_get_jwks))
        .with_state(state.clone());

    // Bounded by the outbound timeout rather than REQUEST_TIMEOUT
    let proxy_timeout = proxy_request_timeout(state.config.dispatch.forward_timeout);
    let proxy_routes = Router::new()
        .route("/gateway/:service/*path", any(handlers::handle_proxy))
        .layer(TimeoutLayer::new(proxy_timeout))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Token issuance needs the caller's principal
    let principal_routes = Router::new()
        .route("/api/v1/websso", get(handlers::handle_websso))
        .route_layer(middleware::from_fn_with_state(
            principal_state,
            resolve_principal,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost, per route group)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(principal_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .merge(proxy_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}
