//! Web SSO endpoint.
//!
//! `GET /api/v1/websso?originalUrl=<url>`
//!
//! With a return URL the caller is redirected there with the SSO cookie set.
//! Without one the token is returned as JSON (and still set as a cookie) for
//! clients that are not browsers.

use crate::errors::GatewayError;
use crate::models::{Principal, TokenResponse};
use crate::routes::AppState;
use crate::services::sso_service::{CookieArtifact, SsoOutcome};
use axum::{
    extract::{Query, State},
    http::{
        header::{CACHE_CONTROL, LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct WebSsoParams {
    #[serde(rename = "originalUrl")]
    pub original_url: Option<String>,
}

/// Issue an SSO token for the authenticated caller.
///
/// # Response
///
/// - 302 with `Location` and `Set-Cookie` when `originalUrl` is whitelisted
/// - 200 with a [`TokenResponse`] and `Set-Cookie` when no `originalUrl` is given
/// - 401 without a principal, 400 for a rejected `originalUrl`; neither sets a cookie
#[instrument(name = "sso.websso.issue", skip_all, fields(status))]
pub async fn handle_websso(
    State(state): State<Arc<AppState>>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<WebSsoParams>,
) -> Result<Response, GatewayError> {
    let principal = principal.map(|Extension(principal)| principal);
    let mut cookies: Vec<CookieArtifact> = Vec::new();

    let result = state
        .sso
        .handle(principal.as_ref(), params.original_url.as_deref(), &mut cookies);

    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);

    let outcome = result?;

    let mut headers = HeaderMap::new();
    for cookie in &cookies {
        let value = HeaderValue::from_str(&cookie.to_header_value()).map_err(|e| {
            tracing::error!(target: "sso.websso", error = %e, "SSO cookie is not a valid header value");
            GatewayError::Internal
        })?;
        headers.append(SET_COOKIE, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    match outcome {
        SsoOutcome::Redirect { location, .. } => {
            let location = HeaderValue::from_str(&location).map_err(|_| {
                GatewayError::BadRequest("originalUrl is not a valid redirect target".to_string())
            })?;
            headers.insert(LOCATION, location);
            Ok((StatusCode::FOUND, headers).into_response())
        }
        SsoOutcome::Token { token } => {
            let body = TokenResponse {
                access_token: token.compact(),
                token_type: "Bearer".to_string(),
                expires_at: token.expires_at(),
                session: state.sso.settings().enable_session,
            };
            Ok((StatusCode::OK, headers, Json(body)).into_response())
        }
    }
}
