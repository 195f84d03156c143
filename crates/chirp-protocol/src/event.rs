//! Event types for the Chirp protocol.
//!
//! An event is the unit pushed to subscribers. It is never stored; the
//! server builds one on demand and hands it to the codec.

use std::fmt;
use std::str::FromStr;

/// Event kind identifiers.
///
/// The wire names are a stable contract with browser clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A chat message was accepted.
    MessageReceived,
    /// The number of connected subscribers changed.
    ActiveClients,
    /// Keep-alive, carries no meaning for the client.
    Ping,
}

impl EventKind {
    /// Name written to the `event:` line.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::MessageReceived => "messageReceived",
            EventKind::ActiveClients => "activeClients",
            EventKind::Ping => "ping",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "messageReceived" => Ok(EventKind::MessageReceived),
            "activeClients" => Ok(EventKind::ActiveClients),
            "ping" => Ok(EventKind::Ping),
            _ => Err("Invalid event kind"),
        }
    }
}

/// A single pushed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Record identifier, unique per record.
    pub id: String,
    /// What the payload means.
    pub kind: EventKind,
    /// Payload text. May span several lines.
    pub payload: String,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: payload.into(),
        }
    }

    /// Create a `messageReceived` event from an already serialized message.
    #[must_use]
    pub fn message_received(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(id, EventKind::MessageReceived, payload)
    }

    /// Create an `activeClients` event carrying the live subscriber count.
    #[must_use]
    pub fn active_clients(id: impl Into<String>, count: usize) -> Self {
        Self::new(id, EventKind::ActiveClients, count.to_string())
    }

    /// Create a `ping` event. The payload is the send time in unix millis.
    #[must_use]
    pub fn ping(id: impl Into<String>, timestamp: u64) -> Self {
        Self::new(id, EventKind::Ping, timestamp.to_string())
    }
}
