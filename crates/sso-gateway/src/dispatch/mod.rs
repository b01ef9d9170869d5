//! Request forwarding to backend services.
//!
//! The dispatcher decides once per request, before the body is read, whether
//! the body must be replayable. Backends in a secured cluster negotiate a
//! credential on every connection, and a failed negotiation is retried with
//! the same body, so those bodies are wrapped in a [`ReplayableBody`]. A
//! request that already carries a delegation credential (a `delegation`
//! query parameter) needs no negotiation and is streamed straight through,
//! as is everything sent to an unsecured cluster.
//!
//! Transport failures never reach the client as-is. They are logged and
//! replaced with `ForwardingFailure`, whose message names no host, address
//! or cause.

pub mod replay;
pub mod transport;

pub use replay::ReplayableBody;
pub use transport::{
    BackendResponse, OutboundRequest, ReqwestTransport, RequestBodyStream, ResponseBodyStream,
    Transport, TransportError,
};

use crate::config::DispatchConfig;
use crate::errors::{GatewayError, FORWARDING_FAILURE_MESSAGE};
use crate::observability::metrics::record_dispatch;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::instrument;
use url::Url;

/// Replay buffer limit when neither the dispatcher nor the config sets one.
pub const DEFAULT_REPLAY_BUFFER_BYTES: usize = 8192;

/// Query parameter that carries a pre-obtained delegation credential.
pub const DELEGATION_PARAM: &str = "delegation";

/// Chunks in flight between the body pump and the transport.
const BODY_CHANNEL_CAPACITY: usize = 8;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Body of one outbound request.
#[derive(Debug)]
pub enum OutboundBody<S> {
    /// Unbuffered pass-through; cannot be reset.
    Streaming(S),
    /// Captured up to the replay limit; can be reset while within it.
    Replayable(ReplayableBody<S>),
}

impl<S> OutboundBody<S> {
    pub fn is_replayable(&self) -> bool {
        matches!(self, OutboundBody::Replayable(_))
    }

    /// Rewind for a second forward attempt.
    ///
    /// # Errors
    ///
    /// `NotReplayable` for a streaming body or a replay buffer that overflowed.
    pub fn reset(&mut self) -> Result<(), GatewayError> {
        match self {
            OutboundBody::Streaming(_) => Err(GatewayError::NotReplayable),
            OutboundBody::Replayable(body) => body.reset(),
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            OutboundBody::Streaming(_) => "streaming",
            OutboundBody::Replayable(_) => "buffered",
        }
    }
}

impl<S> Stream for OutboundBody<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            OutboundBody::Streaming(body) => Pin::new(body).poll_next(cx),
            OutboundBody::Replayable(body) => Pin::new(body).poll_next(cx),
        }
    }
}

/// Forwards requests to backends from a static topology.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    backends: HashMap<String, Url>,
    cluster_secured: bool,
    configured_buffer_bytes: Option<usize>,
    buffer_override: Option<usize>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backends", &self.backends.len())
            .field("cluster_secured", &self.cluster_secured)
            .field("replay_buffer_size", &self.replay_buffer_size())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: &DispatchConfig) -> Self {
        Self {
            transport,
            backends: config.backends.clone(),
            cluster_secured: config.cluster_secured,
            configured_buffer_bytes: config.request_buffer_bytes,
            buffer_override: None,
        }
    }

    /// Pin the replay buffer size, taking precedence over configuration.
    pub fn with_replay_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_override = Some(bytes);
        self
    }

    /// Effective replay limit: override, then configuration, then the default.
    pub fn replay_buffer_size(&self) -> usize {
        self.buffer_override
            .or(self.configured_buffer_bytes)
            .unwrap_or(DEFAULT_REPLAY_BUFFER_BYTES)
    }

    /// Whether a request with this query string needs a replayable body.
    pub fn requires_replay(&self, query: Option<&str>) -> bool {
        self.cluster_secured && !has_delegation_credential(query)
    }

    /// Wrap `body` according to [`requires_replay`](Self::requires_replay).
    pub fn create_request_body<S>(&self, query: Option<&str>, body: S) -> OutboundBody<S> {
        if self.requires_replay(query) {
            OutboundBody::Replayable(ReplayableBody::new(body, self.replay_buffer_size()))
        } else {
            OutboundBody::Streaming(body)
        }
    }

    /// Build the backend URL for `service` and the remaining `path`.
    ///
    /// `path` is the request path suffix exactly as the client sent it, still
    /// percent-encoded. It is appended to the service base path without
    /// decoding, so `%25` reaches the backend as `%25`.
    ///
    /// # Errors
    ///
    /// - `UnknownService` if the topology has no such service
    /// - `BadRequest` if `path` has a `.` or `..` segment, literal or encoded
    pub fn resolve_target(
        &self,
        service: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<Url, GatewayError> {
        let base = self
            .backends
            .get(service)
            .ok_or_else(|| GatewayError::UnknownService(service.to_string()))?;

        if has_dot_segment(path) {
            tracing::warn!(target: "sso.dispatch", service, "Rejected forwarding path with dot segment");
            return Err(GatewayError::BadRequest(
                "Forwarding path must not contain '.' or '..' segments".to_string(),
            ));
        }

        let mut url = base.clone();
        let joined = format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(query);
        Ok(url)
    }

    /// Send one request and return the backend response.
    ///
    /// The body is pumped into the transport from this task, so `body` stays
    /// with the caller and may be reset for another attempt afterwards.
    ///
    /// # Errors
    ///
    /// `ForwardingFailure` on any transport error. The cause is logged, not
    /// returned.
    #[instrument(skip_all, fields(method = %request.method, mode = body.mode()))]
    pub async fn execute<S>(
        &self,
        request: OutboundRequest,
        body: &mut OutboundBody<S>,
    ) -> Result<BackendResponse, GatewayError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let start = Instant::now();
        let mode = body.mode();

        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(BODY_CHANNEL_CAPACITY);
        let (result, ()) = futures::join!(
            self.transport.send(request, Box::pin(rx)),
            pump_body(body, tx)
        );

        match result {
            Ok(mut response) => {
                record_dispatch(mode, "success", start.elapsed());
                strip_hop_by_hop_headers(&mut response.headers);
                response.body = Box::pin(response.body.map(sanitize_body_error));
                Ok(response)
            }
            Err(e) => {
                record_dispatch(mode, "error", start.elapsed());
                tracing::warn!(target: "sso.dispatch", error = %e, "Backend request failed");
                Err(GatewayError::ForwardingFailure)
            }
        }
    }

    /// Forward one inbound request, retrying once if a secured backend
    /// rejects the handshake.
    ///
    /// A `401` on a replayable body resets the body and sends the same request
    /// again. Streaming bodies get exactly one attempt and the `401` is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// `ForwardingFailure` from either attempt, or `NotReplayable` if the
    /// retry needs bytes past the replay limit.
    pub async fn forward<S>(
        &self,
        request: OutboundRequest,
        body: &mut OutboundBody<S>,
    ) -> Result<BackendResponse, GatewayError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send,
    {
        let response = self.execute(request.clone(), body).await?;
        if response.status != StatusCode::UNAUTHORIZED || !body.is_replayable() {
            return Ok(response);
        }
        drop(response);

        tracing::debug!(target: "sso.dispatch", "Backend rejected handshake; replaying request body");
        body.reset()?;
        self.execute(request, body).await
    }
}

/// Feed `body` into the transport until it ends, errors, or the transport
/// stops reading.
async fn pump_body<S>(body: &mut OutboundBody<S>, mut tx: mpsc::Sender<io::Result<Bytes>>)
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    while let Some(chunk) = body.next().await {
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }
}

fn sanitize_body_error(chunk: io::Result<Bytes>) -> io::Result<Bytes> {
    chunk.map_err(|e| {
        tracing::warn!(target: "sso.dispatch", error = %e, "Backend response stream failed");
        io::Error::new(io::ErrorKind::Other, FORWARDING_FAILURE_MESSAGE)
    })
}

/// Whether any segment of an encoded path is `.` or `..`.
///
/// Encoded dots and encoded or back slashes count, since either the URL
/// parser or a backend may decode them into a traversal.
fn has_dot_segment(path: &str) -> bool {
    let normalized = path
        .to_ascii_lowercase()
        .replace("%2e", ".")
        .replace("%2f", "/")
        .replace("%5c", "/");
    normalized
        .split(['/', '\\'])
        .any(|segment| segment == "." || segment == "..")
}

fn has_delegation_credential(query: Option<&str>) -> bool {
    query.is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes()).any(|(name, _)| name == DELEGATION_PARAM)
    })
}

/// Remove connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
