//! Bounded replay of a request body.
//!
//! [`ReplayableBody`] wraps a body stream and keeps a copy of every chunk it
//! hands out, up to a byte limit. [`reset`](ReplayableBody::reset) rewinds to
//! the first captured chunk so a retried forward sees the same bytes. Reading
//! past the captured prefix continues from the source.
//!
//! Chunks are captured whole. The chunk that would take the capture past the
//! limit still passes through, but the capture is dropped and the body can
//! no longer be reset. A source error has the same effect: the captured
//! prefix is not the whole body.

use crate::errors::GatewayError;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Body wrapper that can be re-read while it stays within its limit.
#[derive(Debug)]
pub struct ReplayableBody<S> {
    source: S,
    limit: usize,
    captured: Vec<Bytes>,
    captured_len: usize,
    /// Index of the next captured chunk to serve.
    cursor: usize,
    abandoned: bool,
    source_done: bool,
}

impl<S> ReplayableBody<S> {
    pub fn new(source: S, limit: usize) -> Self {
        Self {
            source,
            limit,
            captured: Vec::new(),
            captured_len: 0,
            cursor: 0,
            abandoned: false,
            source_done: false,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently held for replay.
    pub fn buffered_len(&self) -> usize {
        self.captured_len
    }

    /// `false` once more than `limit` bytes have been read or the source
    /// has failed.
    pub fn is_replayable(&self) -> bool {
        !self.abandoned
    }

    /// Rewind to the start of the body.
    ///
    /// # Errors
    ///
    /// `NotReplayable` if the limit was exceeded or the source failed. The
    /// body is left as is.
    pub fn reset(&mut self) -> Result<(), GatewayError> {
        if self.abandoned {
            tracing::debug!(
                target: "sso.dispatch",
                limit = self.limit,
                "Body reset refused: replay capture abandoned"
            );
            return Err(GatewayError::NotReplayable);
        }
        self.cursor = 0;
        Ok(())
    }

    fn abandon_capture(&mut self) {
        self.abandoned = true;
        self.captured = Vec::new();
        self.captured_len = 0;
        self.cursor = 0;
    }

    fn capture(&mut self, chunk: &Bytes) {
        if self.abandoned {
            return;
        }
        if self.captured_len + chunk.len() > self.limit {
            self.abandon_capture();
            return;
        }
        self.captured.push(chunk.clone());
        self.captured_len += chunk.len();
        self.cursor = self.captured.len();
    }
}

impl<S> Stream for ReplayableBody<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunk) = this.captured.get(this.cursor) {
            let chunk = chunk.clone();
            this.cursor += 1;
            return Poll::Ready(Some(Ok(chunk)));
        }

        if this.source_done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.source).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.capture(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.abandon_capture();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.source_done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
