//! Backend forwarding endpoint.
//!
//! `ANY /gateway/:service/*path`
//!
//! The service name selects a backend from the static topology; the rest of
//! the path and the query string are forwarded unchanged. The path is taken
//! from the raw request URI, not the decoded route capture, so the backend
//! sees the client's percent-encoding.
//!
//! The trusted principal header is never forwarded. Only the gateway's own
//! authentication layer may set it.

use crate::dispatch::{strip_hop_by_hop_headers, OutboundRequest};
use crate::errors::GatewayError;
use crate::routes::AppState;
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::header::{CONTENT_LENGTH, HOST},
    response::Response,
};
use futures::TryStreamExt;
use std::io;
use std::sync::Arc;
use tracing::instrument;

/// Forward the request to `service` and stream the backend response back.
///
/// # Response
///
/// - The backend's status, headers (minus hop-by-hop) and body
/// - 400 if the path has a `.` or `..` segment
/// - 404 if `service` is not configured
/// - 502 with a generic message if the backend cannot be reached
#[instrument(name = "sso.gateway.forward", skip_all, fields(service = tracing::field::Empty, status))]
pub async fn handle_proxy(
    State(state): State<Arc<AppState>>,
    Path((service, _)): Path<(String, String)>,
    request: Request,
) -> Result<Response, GatewayError> {
    tracing::Span::current().record("service", service.as_str());

    let (parts, body) = request.into_parts();
    let query = parts.uri.query();
    let url = state
        .dispatcher
        .resolve_target(&service, raw_forward_path(parts.uri.path()), query)?;

    let mut headers = parts.headers.clone();
    strip_hop_by_hop_headers(&mut headers);
    // Recomputed by the outbound client for the new target and body framing
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    if let Some(principal_header) = &state.config.principal_header {
        headers.remove(principal_header);
    }

    let source = body
        .into_data_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let mut outbound = state.dispatcher.create_request_body(query, source);

    let outbound_request = OutboundRequest {
        method: parts.method.clone(),
        url,
        headers,
    };
    let result = state.dispatcher.forward(outbound_request, &mut outbound).await;

    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);

    let backend = result?;
    let mut response = Response::new(Body::from_stream(backend.body));
    *response.status_mut() = backend.status;
    *response.headers_mut() = backend.headers;
    Ok(response)
}

/// Path suffix after `/gateway/{service}/`, still percent-encoded.
fn raw_forward_path(request_path: &str) -> &str {
    request_path
        .strip_prefix("/gateway/")
        .and_then(|rest| rest.split_once('/'))
        .map_or("", |(_, suffix)| suffix)
}
