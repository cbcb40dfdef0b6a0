//! Connection registry
//!
//! Process-wide (well, registry-wide) map from document id to the single
//! shared connection serving it. The registry is an explicit object rather
//! than a global: construct one at the application's composition root, or
//! one per test for isolation, and clone it wherever subscriptions are
//! created. It is the sole authority on whether a connection exists for a
//! document, and connections remove their own entries on teardown so the
//! map never holds a dangling handle for long.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::connection::{Command, Connection, ConnectionHandle};
use crate::subscription::{StateSink, Subscription, SubscriptionState};
use crate::transport::Transport;

/// Map shared between the registry front-end and its connection tasks.
#[derive(Default)]
pub(crate) struct RegistryShared {
    pub(crate) entries: Mutex<HashMap<String, ConnectionHandle>>,
}

/// Remove the entry for `document_id` only if it still points at the
/// connection identified by `commands`. A newer generation that replaced
/// the entry must never be evicted by its predecessor's teardown.
pub(crate) fn remove_current(
    entries: &mut HashMap<String, ConnectionHandle>,
    document_id: &str,
    commands: &mpsc::UnboundedSender<Command>,
) {
    let current = entries
        .get(document_id)
        .map(|handle| handle.commands.same_channel(commands))
        .unwrap_or(false);
    if current {
        entries.remove(document_id);
    }
}

/// Entry point for UI code: hands out subscriptions backed by shared
/// per-document connections. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncRegistry {
    shared: Arc<RegistryShared>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
}

impl SyncRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, SyncConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(RegistryShared::default()),
            transport,
            config,
        }
    }

    /// Subscribe to `document_id`, creating its shared connection if none is
    /// live. `on_external_update` fires for every section update another
    /// client sends, in channel delivery order.
    ///
    /// Must be called inside a tokio runtime. Never fails: connectivity
    /// problems surface through [`Subscription::error`], not here.
    pub fn subscribe<F>(&self, document_id: &str, on_external_update: F) -> Subscription
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let state = Arc::new(SubscriptionState::new(
            Box::new(on_external_update),
            self.config.transient_error_ttl,
        ));

        loop {
            let mut entries = self.shared.entries.lock();
            let handle = match entries.get(document_id) {
                Some(handle) if !handle.commands.is_closed() => handle.clone(),
                _ => {
                    let handle = Connection::spawn(
                        document_id,
                        Arc::clone(&self.transport),
                        self.config.clone(),
                        Arc::clone(&self.shared),
                    );
                    entries.insert(document_id.to_string(), handle.clone());
                    handle
                }
            };

            let subscriber_id = handle.alloc_subscriber_id();
            let send = handle.commands.send(Command::Subscribe {
                subscriber_id,
                sink: Arc::new(StateSink::new(Arc::clone(&state))),
            });
            if send.is_ok() {
                return Subscription::new(
                    document_id.to_string(),
                    subscriber_id,
                    handle.commands.clone(),
                    state,
                );
            }

            // The connection shut down between lookup and send; forget the
            // stale entry and try again with a fresh one.
            remove_current(&mut entries, document_id, &handle.commands);
        }
    }

    /// Whether a live connection exists for `document_id`.
    pub fn contains(&self, document_id: &str) -> bool {
        self.shared
            .entries
            .lock()
            .get(document_id)
            .map(|handle| !handle.commands.is_closed())
            .unwrap_or(false)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.shared
            .entries
            .lock()
            .values()
            .filter(|handle| !handle.commands.is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
