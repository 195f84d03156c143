//! Fan-out of encoded frames to every live subscriber.

use crate::registry::ConnectionRegistry;
use bytes::Bytes;
use tracing::debug;

/// Outcome of a single fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers whose channel accepted the frame.
    pub delivered: usize,
    /// Subscribers whose push failed. These were unregistered.
    pub failed: usize,
}

impl BroadcastReport {
    /// Total number of subscribers the frame was offered to.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Push `frame` to every subscriber live at call time.
///
/// Best effort: a failed push is logged, the subscriber is dropped from the
/// registry, and the fan-out continues with the others.
pub fn fan_out(registry: &ConnectionRegistry, frame: &Bytes) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    let mut dead = Vec::new();

    registry.for_each(|id, channel| match channel.push(frame.clone()) {
        Ok(()) => report.delivered += 1,
        Err(e) => {
            debug!(subscriber = %id, error = %e, "Push failed, dropping subscriber");
            report.failed += 1;
            dead.push(id.clone());
        }
    });

    for id in &dead {
        registry.unregister(id);
    }

    report
}
