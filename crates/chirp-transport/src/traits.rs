//! Channel abstraction traits for Chirp.
//!
//! These traits define the interface every subscriber output channel
//! provides, so the broadcast engine never depends on the HTTP stack.

use bytes::Bytes;
use chirp_protocol::{codec, Event};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub String);

impl SubscriberId {
    /// Create a subscriber ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random subscriber ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sub_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SubscriberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel was closed, locally or by the remote peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The subscriber is not draining its frames fast enough.
    #[error("Send buffer full")]
    BufferFull,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] chirp_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// An output channel to a single subscriber.
///
/// Pushes never wait on the subscriber. A push either lands in the
/// channel's buffer or fails immediately.
pub trait SubscriberChannel: Send + Sync {
    /// Push a pre-encoded frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or its buffer is full.
    fn push(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Encode and push a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the push fails.
    fn push_event(&self, event: &Event) -> Result<(), TransportError> {
        let frame = codec::encode(event)?;
        self.push(frame)
    }

    /// Close the channel. Closing twice is a no-op.
    fn close(&self);

    /// Check if the channel can still accept frames.
    fn is_open(&self) -> bool;

    /// Get the remote address of the subscriber, if known.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_id_generation() {
        let id1 = SubscriberId::generate();
        let id2 = SubscriberId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("sub_"));
    }

    #[test]
    fn test_subscriber_id_from_string() {
        let id: SubscriberId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(id.to_string(), "test-id");
    }
}
