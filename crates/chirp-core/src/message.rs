//! Chat message types for Chirp.
//!
//! Messages are created by the hub when a send request is accepted and are
//! never mutated afterwards.

use chirp_protocol::{Event, EventKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A message identifier (hex encoded fingerprint).
pub type MessageId = String;

/// Atomic counter for ensuring distinct stamps within the same nanosecond.
static STAMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current time in nanoseconds, nudged by a process-wide counter.
fn unique_stamp() -> u64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = STAMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// Current time in unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Fingerprint a message from its creation stamp, sender and text.
///
/// Practical uniqueness only; not meant to resist crafted collisions.
#[must_use]
pub fn fingerprint(stamp: u64, sender: &str, text: &str) -> MessageId {
    let mut hasher = Sha256::new();
    hasher.update(stamp.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(sender.as_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());

    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

/// Generate an id for a side event (`ping`, `activeClients`).
#[must_use]
pub fn generate_event_id(kind: EventKind) -> String {
    format!("{}-{:x}", kind, unique_stamp())
}

/// An accepted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message body.
    pub text: String,
    /// Display name of the author.
    pub sender: String,
    /// Fingerprint, also used as the wire event id.
    pub id: MessageId,
    /// Avatar reference, empty when the sender did not give one.
    #[serde(default)]
    pub avatar_ref: String,
}

impl Message {
    /// Create a new message stamped with the current time.
    #[must_use]
    pub fn new(text: impl Into<String>, sender: impl Into<String>) -> Self {
        let text = text.into();
        let sender = sender.into();
        let id = fingerprint(unique_stamp(), &sender, &text);

        Self {
            text,
            sender,
            id,
            avatar_ref: String::new(),
        }
    }

    /// Set the avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = avatar_ref.into();
        self
    }

    /// Build the `messageReceived` event for this message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    pub fn to_event(&self) -> Result<Event, serde_json::Error> {
        Ok(Event::message_received(
            self.id.clone(),
            serde_json::to_string(self)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("hi", "bob");
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.sender, "bob");
        assert_eq!(msg.id.len(), 64);
        assert!(msg.avatar_ref.is_empty());
    }

    #[test]
    fn test_identical_messages_get_distinct_ids() {
        let first = Message::new("same", "alice");
        let second = Message::new("same", "alice");
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint(1, "bob", "hi"), fingerprint(1, "bob", "hi"));
        assert_ne!(fingerprint(1, "bob", "hi"), fingerprint(2, "bob", "hi"));
        assert_ne!(fingerprint(1, "bo", "bhi"), fingerprint(1, "bob", "hi"));
    }

    #[test]
    fn test_message_event_payload() {
        let msg = Message::new("hi", "bob").with_avatar("https://example.com/bob.png");
        let event = msg.to_event().unwrap();

        assert_eq!(event.id, msg.id);
        assert_eq!(event.kind, EventKind::MessageReceived);

        let payload: serde_json::Value = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(payload["text"], "hi");
        assert_eq!(payload["sender"], "bob");
        assert_eq!(payload["id"], msg.id.as_str());
        assert_eq!(payload["avatarRef"], "https://example.com/bob.png");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let id1 = generate_event_id(EventKind::Ping);
        let id2 = generate_event_id(EventKind::Ping);
        assert_ne!(id1, id2);
        assert!(id1.starts_with("ping-"));
    }
}
