//! Principal resolution.
//!
//! Authentication happens before the gateway sees a request. The host layer
//! either inserts a [`Principal`] extension itself or, when a trusted proxy
//! sits in front, names the caller in a configured header. This middleware
//! turns that header into the extension handlers read.

use crate::models::Principal;
use axum::{
    extract::{Request, State},
    http::HeaderName,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// State for the principal middleware.
#[derive(Debug, Clone, Default)]
pub struct PrincipalState {
    /// Trusted header carrying the principal name. `None` disables lookup.
    pub header: Option<HeaderName>,
}

/// Insert a [`Principal`] from the trusted header when none is present.
///
/// An existing extension wins. Missing, empty or non-UTF-8 header values
/// leave the request anonymous; handlers decide whether that is an error.
pub async fn resolve_principal(
    State(state): State<Arc<PrincipalState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.extensions().get::<Principal>().is_none() {
        if let Some(principal) = principal_from_header(&req, state.header.as_ref()) {
            req.extensions_mut().insert(principal);
        }
    }

    next.run(req).await
}

fn principal_from_header(req: &Request, header: Option<&HeaderName>) -> Option<Principal> {
    let value = req.headers().get(header?)?;
    let name = match value.to_str() {
        Ok(name) => name.trim(),
        Err(_) => {
            tracing::debug!(target: "sso.middleware.principal", "Ignoring non-ASCII principal header");
            return None;
        }
    };
    if name.is_empty() {
        return None;
    }
    Some(Principal::new(name))
}
