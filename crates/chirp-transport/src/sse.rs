//! Event-stream channel implementation.
//!
//! [`channel`] creates a bounded frame queue. The [`SseChannel`] half is
//! owned by the connection registry; the [`SseStream`] half becomes the
//! HTTP response body. When the client goes away the HTTP layer drops the
//! stream, and every later push fails with [`TransportError::ConnectionClosed`].

use bytes::Bytes;
use futures_util::Stream;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::traits::{SubscriberChannel, TransportError};

/// Create a connected channel/stream pair buffering up to `capacity` frames.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn channel(capacity: usize) -> (SseChannel, SseStream) {
    let (sender, receiver) = mpsc::channel(capacity);
    let channel = SseChannel {
        sender: Mutex::new(Some(sender)),
        remote_addr: None,
    };
    let stream = SseStream {
        inner: ReceiverStream::new(receiver),
    };
    (channel, stream)
}

/// Server side of an event-stream subscription.
#[derive(Debug)]
pub struct SseChannel {
    /// `None` once closed locally.
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    remote_addr: Option<String>,
}

impl SseChannel {
    /// Attach the remote address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl SubscriberChannel for SseChannel {
    fn push(&self, frame: Bytes) -> Result<(), TransportError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(TransportError::ConnectionClosed)?;

        trace!(bytes = frame.len(), "Pushing frame");
        sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::BufferFull,
            TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn close(&self) {
        if self.sender.lock().take().is_some() {
            debug!(remote = ?self.remote_addr, "Event stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}

/// Client side of an event-stream subscription.
///
/// Yields encoded frames until the channel is closed and drained.
#[derive(Debug)]
pub struct SseStream {
    inner: ReceiverStream<Bytes>,
}

impl SseStream {
    /// Take the next buffered frame without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.inner.as_mut().try_recv().ok()
    }
}

impl Stream for SseStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|frame| frame.map(Ok))
    }
}
