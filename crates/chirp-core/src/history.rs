//! Bounded message history.
//!
//! Keeps the most recent messages so a new subscriber can be replayed some
//! context before live pushes start.

use crate::message::Message;
use std::collections::VecDeque;

/// Fixed-capacity FIFO of accepted messages, oldest first.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl MessageHistory {
    /// Create an empty history holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message at the tail.
    ///
    /// Returns the message evicted to make room, if any.
    pub fn append(&mut self, message: Message) -> Option<Message> {
        if self.capacity == 0 {
            return Some(message);
        }

        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Point-in-time copy of the contents in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Iterate over the buffered messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if no messages are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Maximum number of buffered messages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
