//! Subscriber fan-out
//!
//! Ordered observer list for one connection. Dispatch is synchronous and in
//! registration order; adding or removing one subscriber never disturbs the
//! others.

use std::sync::Arc;

use crate::error::SyncError;

/// Identifies one subscriber within its connection.
pub type SubscriberId = u64;

/// Events fanned out to subscribers.
#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// The channel is open.
    Connected,

    /// The channel dropped; a reconnect may follow.
    Disconnected,

    /// Another client edited a section.
    ExternalUpdate { section_id: String, content: String },

    /// Non-fatal error; expires from the subscription surface after a TTL.
    TransientError(SyncError),

    /// Terminal error; persists and no further reconnects are scheduled.
    FatalError(SyncError),
}

/// Receiving end of the fan-out, implemented by subscription handles.
pub trait SubscriberSink: Send + Sync {
    fn deliver(&self, event: &SubscriberEvent);
}

/// Ordered set of subscriber sinks.
#[derive(Default)]
pub struct SubscriberSet {
    entries: Vec<(SubscriberId, Arc<dyn SubscriberSink>)>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: SubscriberId, sink: Arc<dyn SubscriberSink>) {
        self.entries.push((id, sink));
    }

    /// Remove one subscriber; true if it was present.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deliver `event` to every subscriber, in registration order.
    pub fn dispatch(&self, event: &SubscriberEvent) {
        for (_, sink) in &self.entries {
            sink.deliver(event);
        }
    }
}
