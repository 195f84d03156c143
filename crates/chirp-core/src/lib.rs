//! # chirp-core
//!
//! Broadcast and connection-lifecycle engine for the Chirp chat relay.
//!
//! This crate provides the stateful building blocks:
//!
//! - **Message** - Accepted chat messages and their fingerprint ids
//! - **MessageHistory** - Bounded replay buffer of recent messages
//! - **ConnectionRegistry** - Arena of live subscriber channels
//! - **ChatHub** - Owner of both, and the broadcast entry point
//! - **LivenessLoop** - Periodic keep-alive and occupancy reporting
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌────────────────────┐
//! │  HTTP layer │────▶│   ChatHub   │────▶│ ConnectionRegistry │
//! └─────────────┘     └─────────────┘     └────────────────────┘
//!                        │       ▲
//!                        ▼       │
//!              ┌────────────────┐ ┌──────────────┐
//!              │ MessageHistory │ │ LivenessLoop │
//!              └────────────────┘ └──────────────┘
//! ```

pub mod broadcast;
pub mod history;
pub mod hub;
pub mod liveness;
pub mod message;
pub mod registry;
pub mod subscription;

pub use broadcast::BroadcastReport;
pub use history::MessageHistory;
pub use hub::{ChatHub, HubConfig, HubError};
pub use liveness::{LivenessConfig, LivenessLoop, OccupancyObserver};
pub use message::{Message, MessageId};
pub use registry::ConnectionRegistry;
pub use subscription::Subscription;
