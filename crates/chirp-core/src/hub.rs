//! The chat hub.
//!
//! `ChatHub` owns the message history and the subscriber registry and is
//! the only way to touch either. Lock order is always history, then
//! registry. The announce lock is never held together with the history
//! lock.

use crate::broadcast::{fan_out, BroadcastReport};
use crate::history::MessageHistory;
use crate::message::{generate_event_id, now_millis, Message};
use crate::registry::{ChannelHandle, ConnectionRegistry};
use crate::subscription::Subscription;
use bytes::Bytes;
use chirp_protocol::{codec, Event, EventKind, ProtocolError};
use chirp_transport::{sse, SubscriberChannel, SubscriberId, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Maximum subscribers reached.
    #[error("Maximum subscribers reached")]
    MaxSubscribersReached,

    /// The hub was closed and accepts no new subscribers.
    #[error("Hub is shutting down")]
    ShuttingDown,

    /// The history replay could not be written to the new subscriber.
    #[error("Replay failed: {0}")]
    Replay(#[from] TransportError),

    /// Message serialization failed.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Event framing failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Number of recent messages replayed to new subscribers.
    pub history_capacity: usize,
    /// Maximum number of simultaneous subscribers.
    pub max_subscribers: usize,
    /// Frames buffered per subscriber before it is considered stalled.
    pub subscriber_buffer: usize,
    /// Broadcast an `activeClients` event whenever the count changes.
    pub announce_active_clients: bool,
    /// Avatar reference used when a sender gives none.
    pub default_avatar: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            max_subscribers: 10_000,
            subscriber_buffer: 256,
            announce_active_clients: true,
            default_avatar: String::new(),
        }
    }
}

/// Owner of the message history and the subscriber registry.
pub struct ChatHub {
    history: Mutex<MessageHistory>,
    registry: ConnectionRegistry,
    // Serializes activeClients broadcasts so the last one sent carries
    // the latest count.
    announce: Mutex<()>,
    // Set under the history lock by `close_all`.
    closed: AtomicBool,
    config: HubConfig,
}

impl ChatHub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating chat hub with config: {:?}", config);
        Self {
            history: Mutex::new(MessageHistory::new(config.history_capacity)),
            registry: ConnectionRegistry::new(),
            announce: Mutex::new(()),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Get the hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Accept a message: append it to the history and broadcast it.
    ///
    /// `avatar_ref` falls back to the configured default.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be framed. Nothing is stored
    /// or sent in that case.
    pub fn post(
        &self,
        text: impl Into<String>,
        sender: impl Into<String>,
        avatar_ref: Option<String>,
    ) -> Result<(Message, BroadcastReport), HubError> {
        let message = Message::new(text, sender).with_avatar(
            avatar_ref.unwrap_or_else(|| self.config.default_avatar.clone()),
        );
        let frame = encode_message(&message)?;

        // Append and fan out under the history lock so a concurrent
        // subscribe sees the message either in its replay or live, never both.
        let report = {
            let mut history = self.history.lock();
            history.append(message.clone());
            fan_out(&self.registry, &frame)
        };
        self.settle(report);

        debug!(
            message = %message.id,
            sender = %message.sender,
            recipients = report.delivered,
            "Message accepted"
        );

        Ok((message, report))
    }

    /// Broadcast an already accepted message without storing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be framed.
    pub fn broadcast_message(&self, message: &Message) -> Result<BroadcastReport, HubError> {
        let frame = encode_message(message)?;
        let report = fan_out(&self.registry, &frame);
        self.settle(report);
        Ok(report)
    }

    /// Broadcast a side event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be framed.
    pub fn broadcast_event(&self, event: &Event) -> Result<BroadcastReport, HubError> {
        let frame = codec::encode(event)?;
        let report = fan_out(&self.registry, &frame);
        self.settle(report);
        Ok(report)
    }

    /// Broadcast a keep-alive `ping` with a fresh id.
    pub fn ping(&self) -> BroadcastReport {
        let event = Event::ping(generate_event_id(EventKind::Ping), now_millis());
        self.broadcast_event(&event).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to frame ping");
            BroadcastReport::default()
        })
    }

    /// Register a subscriber channel.
    ///
    /// The current history is replayed into the channel before it starts
    /// receiving live broadcasts.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is closed, the subscriber limit is
    /// reached or the replay cannot be written. The channel is closed in
    /// every case.
    pub fn subscribe(&self, channel: ChannelHandle) -> Result<SubscriberId, HubError> {
        let registered = {
            let history = self.history.lock();
            self.ensure_open()
                .and_then(|()| replay(&history, channel.as_ref()))
                .and_then(|()| {
                    self.registry
                        .try_register(Arc::clone(&channel), self.config.max_subscribers)
                        .ok_or(HubError::MaxSubscribersReached)
                })
        };

        let id = match registered {
            Ok(id) => id,
            Err(e) => {
                channel.close();
                return Err(e);
            }
        };

        debug!(
            subscriber = %id,
            remote = ?channel.remote_addr(),
            subscribers = self.registry.len(),
            "Subscriber connected"
        );
        self.announce_active_clients();

        Ok(id)
    }

    /// Open an event-stream subscription.
    ///
    /// The returned [`Subscription`] unsubscribes itself when dropped.
    ///
    /// # Errors
    ///
    /// See [`ChatHub::subscribe`].
    pub fn connect(self: &Arc<Self>, remote_addr: Option<String>) -> Result<Subscription, HubError> {
        self.ensure_open()?;
        if self.registry.len() >= self.config.max_subscribers {
            return Err(HubError::MaxSubscribersReached);
        }

        let (channel, stream) = sse::channel(self.config.subscriber_buffer.max(1));
        let channel = match remote_addr {
            Some(addr) => channel.with_remote_addr(addr),
            None => channel,
        };

        let id = self.subscribe(Arc::new(channel))?;
        Ok(Subscription::new(id, stream, Arc::clone(self)))
    }

    /// Remove a subscriber. Unknown ids are ignored.
    ///
    /// Returns `true` if the subscriber was live.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let removed = self.registry.unregister(id);
        if removed {
            debug!(
                subscriber = %id,
                subscribers = self.registry.len(),
                "Subscriber disconnected"
            );
            self.announce_active_clients();
        }
        removed
    }

    /// Broadcast the live subscriber count, if enabled.
    pub fn announce_active_clients(&self) {
        if !self.config.announce_active_clients {
            return;
        }

        // Count and fan-out happen under one lock: a transition that lands
        // after the count was read announces again once this one is done.
        let _announce = self.announce.lock();

        // Each failed push shrinks the registry, so this terminates.
        loop {
            let event = Event::active_clients(
                generate_event_id(EventKind::ActiveClients),
                self.registry.len(),
            );
            let frame = match codec::encode(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Failed to frame activeClients");
                    return;
                }
            };
            if fan_out(&self.registry, &frame).failed == 0 {
                return;
            }
        }
    }

    /// Close every subscriber channel and refuse new ones. Used on
    /// shutdown.
    pub fn close_all(&self) -> usize {
        let _history = self.history.lock();
        self.closed.store(true, Ordering::SeqCst);
        self.registry.close_all()
    }

    /// Check if [`ChatHub::close_all`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Point-in-time copy of the message history.
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<Message> {
        self.history.lock().snapshot()
    }

    fn ensure_open(&self) -> Result<(), HubError> {
        if self.is_closed() {
            Err(HubError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Dropped subscribers change the count.
    fn settle(&self, report: BroadcastReport) {
        if report.failed > 0 {
            warn!(dropped = report.failed, "Dropped unreachable subscribers");
            self.announce_active_clients();
        }
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_message(message: &Message) -> Result<Bytes, HubError> {
    Ok(codec::encode(&message.to_event()?)?)
}

fn replay(history: &MessageHistory, channel: &dyn SubscriberChannel) -> Result<(), HubError> {
    for message in history.iter() {
        channel.push(encode_message(message)?)?;
    }
    Ok(())
}
