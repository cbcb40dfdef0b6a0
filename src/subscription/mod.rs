//! Subscription handle
//!
//! The per-UI-instance view onto a shared connection. A handle exposes the
//! connected flag, the current error (transient errors expire on their own,
//! terminal ones persist), and `send_update`; dropping it deregisters the
//! subscriber, and when the last one goes the connection schedules its
//! grace-delay teardown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connection::{Command, SubscriberEvent, SubscriberId, SubscriberSink};
use crate::error::SyncError;

type UpdateCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// State shared between a subscription handle and the connection's fan-out.
pub(crate) struct SubscriptionState {
    connected: AtomicBool,
    error: Mutex<Option<SyncError>>,
    /// Bumped on every error change so a stale expiry task never clears a
    /// newer error.
    error_generation: AtomicU64,
    transient_error_ttl: Duration,
    on_external_update: UpdateCallback,
}

impl SubscriptionState {
    pub(crate) fn new(on_external_update: UpdateCallback, transient_error_ttl: Duration) -> Self {
        Self {
            connected: AtomicBool::new(false),
            error: Mutex::new(None),
            error_generation: AtomicU64::new(0),
            transient_error_ttl,
            on_external_update,
        }
    }

    fn apply(this: &Arc<Self>, event: &SubscriberEvent) {
        match event {
            SubscriberEvent::Connected => {
                this.connected.store(true, Ordering::SeqCst);
                this.clear_error();
            }
            SubscriberEvent::Disconnected => {
                this.connected.store(false, Ordering::SeqCst);
            }
            SubscriberEvent::ExternalUpdate {
                section_id,
                content,
            } => {
                (this.on_external_update)(section_id, content);
            }
            SubscriberEvent::TransientError(error) => {
                let generation = this.error_generation.fetch_add(1, Ordering::SeqCst) + 1;
                *this.error.lock() = Some(error.clone());

                let state = Arc::clone(this);
                let ttl = this.transient_error_ttl;
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    if state.error_generation.load(Ordering::SeqCst) == generation {
                        *state.error.lock() = None;
                    }
                });
            }
            SubscriberEvent::FatalError(error) => {
                this.error_generation.fetch_add(1, Ordering::SeqCst);
                *this.error.lock() = Some(error.clone());
                this.connected.store(false, Ordering::SeqCst);
            }
        }
    }

    fn clear_error(&self) {
        self.error_generation.fetch_add(1, Ordering::SeqCst);
        *self.error.lock() = None;
    }
}

/// Adapter registered with the connection's subscriber set.
pub(crate) struct StateSink {
    state: Arc<SubscriptionState>,
}

impl StateSink {
    pub(crate) fn new(state: Arc<SubscriptionState>) -> Self {
        Self { state }
    }
}

impl SubscriberSink for StateSink {
    fn deliver(&self, event: &SubscriberEvent) {
        SubscriptionState::apply(&self.state, event);
    }
}

/// One UI instance's registration against a document's shared connection.
///
/// Created by [`SyncRegistry::subscribe`](crate::SyncRegistry::subscribe);
/// unsubscribes automatically on drop.
pub struct Subscription {
    document_id: String,
    subscriber_id: SubscriberId,
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(
        document_id: String,
        subscriber_id: SubscriberId,
        commands: mpsc::UnboundedSender<Command>,
        state: Arc<SubscriptionState>,
    ) -> Self {
        Self {
            document_id,
            subscriber_id,
            commands,
            state,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Whether the shared channel is currently open.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// The current error surface, if any. Transient errors clear themselves
    /// after a TTL or on reconnect; terminal errors persist.
    pub fn error(&self) -> Option<SyncError> {
        self.state.error.lock().clone()
    }

    /// Queue an edit for `section_id` and flush it if the channel is open.
    /// While offline the latest edit per section stays queued and goes out
    /// on reconnect. Never fails from the caller's perspective.
    pub fn send_update(&self, section_id: &str, content: &str) {
        let send = self.commands.send(Command::SendUpdate {
            section_id: section_id.to_string(),
            content: content.to_string(),
        });
        if send.is_err() {
            tracing::debug!(
                document_id = %self.document_id,
                section_id = %section_id,
                "update sent to a closed connection; dropped"
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe {
            subscriber_id: self.subscriber_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_ttl(ttl: Duration) -> Arc<SubscriptionState> {
        Arc::new(SubscriptionState::new(Box::new(|_, _| {}), ttl))
    }

    #[tokio::test]
    async fn test_connected_flag_follows_status_events() {
        let state = state_with_ttl(Duration::from_secs(5));
        assert!(!state.connected.load(Ordering::SeqCst));

        SubscriptionState::apply(&state, &SubscriberEvent::Connected);
        assert!(state.connected.load(Ordering::SeqCst));

        SubscriptionState::apply(&state, &SubscriberEvent::Disconnected);
        assert!(!state.connected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_expires() {
        let state = state_with_ttl(Duration::from_secs(5));
        SubscriptionState::apply(
            &state,
            &SubscriberEvent::TransientError(SyncError::ConnectionLost),
        );
        assert_eq!(*state.error.lock(), Some(SyncError::ConnectionLost));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(*state.error.lock(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_outlives_transient_expiry() {
        let state = state_with_ttl(Duration::from_secs(5));
        SubscriptionState::apply(
            &state,
            &SubscriberEvent::TransientError(SyncError::ConnectionLost),
        );
        SubscriptionState::apply(
            &state,
            &SubscriberEvent::FatalError(SyncError::AttemptsExhausted(5)),
        );

        // The transient expiry task fires but must not clear the newer
        // fatal error.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(*state.error.lock(), Some(SyncError::AttemptsExhausted(5)));
    }

    #[tokio::test]
    async fn test_reconnect_clears_transient_error() {
        let state = state_with_ttl(Duration::from_secs(500));
        SubscriptionState::apply(
            &state,
            &SubscriberEvent::TransientError(SyncError::ConnectionLost),
        );
        SubscriptionState::apply(&state, &SubscriberEvent::Connected);
        assert_eq!(*state.error.lock(), None);
    }

    #[tokio::test]
    async fn test_external_updates_reach_the_callback() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&received);
        let state = Arc::new(SubscriptionState::new(
            Box::new(move |section_id, content| {
                sink_log.lock().push((section_id.to_string(), content.to_string()));
            }),
            Duration::from_secs(5),
        ));

        SubscriptionState::apply(
            &state,
            &SubscriberEvent::ExternalUpdate {
                section_id: "abstract".to_string(),
                content: "hello".to_string(),
            },
        );
        assert_eq!(
            *received.lock(),
            vec![("abstract".to_string(), "hello".to_string())]
        );
    }
}
