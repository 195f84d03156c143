//! Registry of live subscribers.
//!
//! Entries live in an arena: a slot vector plus an id-to-slot index and a
//! free list, so insert and remove are O(1) amortized and iteration walks
//! the slots instead of relying on map order.

use chirp_transport::{SubscriberChannel, SubscriberId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Shared handle to a subscriber's output channel.
pub type ChannelHandle = Arc<dyn SubscriberChannel>;

struct Entry {
    id: SubscriberId,
    channel: ChannelHandle,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Option<Entry>>,
    index: HashMap<SubscriberId, usize>,
    free: Vec<usize>,
}

impl Slots {
    fn insert(&mut self, channel: ChannelHandle) -> SubscriberId {
        let mut id = SubscriberId::generate();
        while self.index.contains_key(&id) {
            id = SubscriberId::generate();
        }

        let entry = Entry {
            id: id.clone(),
            channel,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        self.index.insert(id.clone(), slot);
        id
    }

    fn remove(&mut self, id: &SubscriberId) -> Option<Entry> {
        let slot = self.index.remove(id)?;
        self.free.push(slot);
        self.entries[slot].take()
    }
}

/// Mapping from subscriber id to its open output channel.
///
/// An id is present exactly while its connection is open and not yet
/// removed. The registry owns the channel handles.
#[derive(Default)]
pub struct ConnectionRegistry {
    slots: RwLock<Slots>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under a freshly generated id.
    pub fn register(&self, channel: ChannelHandle) -> SubscriberId {
        let id = self.slots.write().insert(channel);
        trace!(subscriber = %id, "Registered");
        id
    }

    /// Register a channel unless the registry already holds `limit` entries.
    ///
    /// The check and the insert happen under one lock.
    pub fn try_register(&self, channel: ChannelHandle, limit: usize) -> Option<SubscriberId> {
        let mut slots = self.slots.write();
        if slots.index.len() >= limit {
            return None;
        }
        let id = slots.insert(channel);
        drop(slots);

        trace!(subscriber = %id, "Registered");
        Some(id)
    }

    /// Remove a subscriber and close its channel.
    ///
    /// Returns `false` if the id was unknown or already removed.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let entry = self.slots.write().remove(id);

        match entry {
            Some(entry) => {
                entry.channel.close();
                trace!(subscriber = %entry.id, "Unregistered");
                true
            }
            None => false,
        }
    }

    /// Snapshot of the live entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SubscriberId, ChannelHandle)> {
        self.slots
            .read()
            .entries
            .iter()
            .flatten()
            .map(|entry| (entry.id.clone(), Arc::clone(&entry.channel)))
            .collect()
    }

    /// Call `f` once per entry live at call time.
    ///
    /// Runs over a snapshot without holding the lock, so `f` may register or
    /// unregister subscribers.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&SubscriberId, &dyn SubscriberChannel),
    {
        for (id, channel) in self.snapshot() {
            f(&id, channel.as_ref());
        }
    }

    /// Check if a subscriber is registered.
    #[must_use]
    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.slots.read().index.contains_key(id)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().index.len()
    }

    /// Check if no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and close every entry.
    ///
    /// Returns the number of closed channels.
    pub fn close_all(&self) -> usize {
        let entries: Vec<Entry> = {
            let mut slots = self.slots.write();
            slots.index.clear();
            slots.free.clear();
            slots.entries.drain(..).flatten().collect()
        };

        for entry in &entries {
            entry.channel.close();
        }

        debug!(closed = entries.len(), "Closed all subscriber channels");
        entries.len()
    }
}
