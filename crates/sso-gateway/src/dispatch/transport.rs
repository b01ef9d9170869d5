//! Outbound HTTP transport.
//!
//! [`Transport`] is the seam between the dispatcher and the network. The
//! production implementation uses `reqwest`; tests substitute their own.

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::io;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connect timeout for backend connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Request body handed to a transport.
pub type RequestBodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Response body returned by a transport.
pub type ResponseBodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Request line and headers for a backend call.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

/// Backend response with a streaming body.
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBodyStream,
}

impl std::fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendResponse")
            .field("status", &self.status)
            .field("headers", &self.headers.len())
            .finish_non_exhaustive()
    }
}

/// Transport-level failures. These carry backend details and must never
/// reach a client; the dispatcher logs them and returns `ForwardingFailure`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to backend failed: {0}")]
    Connect(String),

    #[error("Backend request timed out")]
    Timeout,

    #[error("Backend request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` with `body` and return once response headers arrive.
    async fn send(
        &self,
        request: OutboundRequest,
        body: RequestBodyStream,
    ) -> Result<BackendResponse, TransportError>;
}

/// `reqwest`-backed transport. Redirects are returned to the caller, not followed.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: OutboundRequest,
        body: RequestBodyStream,
    ) -> Result<BackendResponse, TransportError> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));

        Ok(BackendResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}
