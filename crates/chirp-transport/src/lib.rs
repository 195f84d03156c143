//! # chirp-transport
//!
//! Output channels for Chirp subscribers.
//!
//! The broadcast engine only ever sees a [`SubscriberChannel`]: a handle that
//! accepts pre-encoded frames without blocking and can be closed from the
//! server side. The event-stream implementation in [`sse`] pairs such a
//! handle with a [`futures_util::Stream`] that an HTTP framework can use as a
//! streaming response body.
//!
//! ```rust,ignore
//! use chirp_transport::{sse, SubscriberChannel};
//!
//! let (channel, stream) = sse::channel(256);
//! channel.push(frame)?;
//! // hand `stream` to the HTTP layer as the response body
//! ```

pub mod sse;
pub mod traits;

pub use sse::{SseChannel, SseStream};
pub use traits::{SubscriberChannel, SubscriberId, TransportError};
