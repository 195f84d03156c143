//! Event-stream subscription handle.

use crate::hub::ChatHub;
use bytes::Bytes;
use chirp_transport::{SseStream, SubscriberId};
use futures_util::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A live subscription, usable as a streaming response body.
///
/// Dropping it (the client went away or the response was torn down)
/// removes the subscriber from the hub.
pub struct Subscription {
    id: SubscriberId,
    stream: SseStream,
    hub: Arc<ChatHub>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, stream: SseStream, hub: Arc<ChatHub>) -> Self {
        Self { id, stream, hub }
    }

    /// The subscriber id.
    #[must_use]
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Take the next buffered frame without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.stream.try_recv()
    }
}

impl Stream for Subscription {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use chirp_protocol::{codec, EventKind};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_subscription_streams_frames() {
        let hub = Arc::new(ChatHub::with_config(HubConfig {
            announce_active_clients: false,
            ..HubConfig::default()
        }));
        hub.post("earlier", "alice", None).unwrap();

        let mut subscription = hub.connect(Some("127.0.0.1:4000".to_string())).unwrap();
        hub.post("now", "bob", None).unwrap();

        let replayed = subscription.next().await.unwrap().unwrap();
        let live = subscription.next().await.unwrap().unwrap();

        assert!(codec::decode(&replayed).unwrap().payload.contains("earlier"));
        let live = codec::decode(&live).unwrap();
        assert_eq!(live.kind, EventKind::MessageReceived);
        assert!(live.payload.contains("now"));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = Arc::new(ChatHub::new());
        let first = hub.connect(None).unwrap();
        let second = hub.connect(None).unwrap();
        assert_eq!(hub.subscriber_count(), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(), 1);

        drop(second);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_ends_after_close_all() {
        let hub = Arc::new(ChatHub::new());
        let mut subscription = hub.connect(None).unwrap();

        hub.close_all();

        // The activeClients frame from connecting is still buffered.
        assert!(subscription.next().await.is_some());
        assert!(subscription.next().await.is_none());
    }
}
