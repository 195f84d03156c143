//! # chirp-protocol
//!
//! Wire framing for the Chirp chat relay.
//!
//! Subscribers receive a `text/event-stream` body. Every pushed unit is one
//! record carrying an id line, an event-kind line and one or more data
//! lines, terminated by a blank line.
//!
//! ## Event Kinds
//!
//! - `messageReceived` - A chat message was accepted (JSON payload)
//! - `activeClients` - Live subscriber count changed
//! - `ping` - Keep-alive for idle connections
//!
//! ## Example
//!
//! ```rust
//! use chirp_protocol::{codec, Event};
//!
//! let event = Event::active_clients("evt-1", 3);
//!
//! let encoded = codec::encode(&event).unwrap();
//! assert_eq!(&encoded[..], b"id: evt-1\nevent: activeClients\ndata: 3\n\n");
//!
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod event;

pub use codec::{decode, encode, ProtocolError};
pub use event::{Event, EventKind};
