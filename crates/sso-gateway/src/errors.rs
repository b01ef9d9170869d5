//! SSO gateway error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are generic; the real cause is logged server-side at
//! the point the error is raised.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Client-facing message for any backend transport failure.
///
/// Carries no host, address, port or underlying cause.
pub const FORWARDING_FAILURE_MESSAGE: &str =
    "Service connectivity error: the backend request could not be completed";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Redirect target is not allowed")]
    RedirectNotAllowed,

    #[error("Cannot issue token - unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Malformed token")]
    MalformedToken,

    #[error("Request body cannot be replayed: buffer limit exceeded")]
    NotReplayable,

    #[error("{}", FORWARDING_FAILURE_MESSAGE)]
    ForwardingFailure,

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Internal server error")]
    Internal,
}

impl GatewayError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::RedirectNotAllowed
            | GatewayError::MalformedToken
            | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownService(_) => StatusCode::NOT_FOUND,
            GatewayError::ForwardingFailure => StatusCode::BAD_GATEWAY,
            GatewayError::UnsupportedAlgorithm(_)
            | GatewayError::NotReplayable
            | GatewayError::Crypto(_)
            | GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated => "UNAUTHENTICATED",
            GatewayError::RedirectNotAllowed => "REDIRECT_NOT_ALLOWED",
            GatewayError::UnsupportedAlgorithm(_) => "TOKEN_ISSUANCE_FAILED",
            GatewayError::MalformedToken => "MALFORMED_TOKEN",
            GatewayError::NotReplayable => "NOT_REPLAYABLE",
            GatewayError::ForwardingFailure => "SERVICE_CONNECTIVITY_ERROR",
            GatewayError::UnknownService(_) => "UNKNOWN_SERVICE",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::Crypto(_) => "CRYPTO_ERROR",
            GatewayError::Internal => "INTERNAL_ERROR",
        }
    }

    fn client_message(&self) -> String {
        match self {
            GatewayError::Unauthenticated => "Authentication is required".to_string(),
            GatewayError::RedirectNotAllowed => {
                "The requested redirect URL is not allowed".to_string()
            }
            GatewayError::UnsupportedAlgorithm(_) => "Unable to issue token".to_string(),
            GatewayError::MalformedToken => "The token is malformed".to_string(),
            GatewayError::NotReplayable => {
                "The request could not be retried against the backend".to_string()
            }
            GatewayError::ForwardingFailure => FORWARDING_FAILURE_MESSAGE.to_string(),
            GatewayError::UnknownService(name) => format!("No route for service '{}'", name),
            GatewayError::BadRequest(reason) => reason.clone(),
            GatewayError::Crypto(_) => "An internal cryptographic error occurred".to_string(),
            GatewayError::Internal => "An internal error occurred".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}
