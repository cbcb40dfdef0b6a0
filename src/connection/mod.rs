//! Shared per-document connection
//!
//! One `Connection` exists per document id, shared by every subscriber to
//! that document. It owns the channel lifecycle end to end: connect,
//! connect timeout, reconnect with capped exponential backoff, keepalive
//! pings, inbound fan-out, the last-write-wins update queue, and grace-delay
//! teardown once the last subscriber detaches.
//!
//! The connection runs as a single tokio task driven by a command channel
//! and its own timers, so everything inside it is cooperatively scheduled:
//! no locks are held across suspension points and no two transitions race.
//! Every state transition clears the timers it invalidates; when the task
//! exits, every remaining timer dies with it, so no timer can fire after
//! logical teardown.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, Interval, Sleep};

use crate::config::SyncConfig;
use crate::error::{SyncError, TransportError};
use crate::protocol::{WireMessage, STATUS_CONNECTED, STATUS_DISCONNECTED};
use crate::registry::{remove_current, RegistryShared};
use crate::transport::{Channel, ChannelEvent, Transport};

pub mod queue;
pub mod subscribers;

use queue::UpdateQueue;
pub use subscribers::{SubscriberEvent, SubscriberId, SubscriberSink};
use subscribers::SubscriberSet;

/// Commands accepted by a connection task.
pub(crate) enum Command {
    Subscribe {
        subscriber_id: SubscriberId,
        sink: Arc<dyn SubscriberSink>,
    },
    Unsubscribe {
        subscriber_id: SubscriberId,
    },
    SendUpdate {
        section_id: String,
        content: String,
    },
}

/// Cheap handle to a running connection task, stored in the registry and
/// cloned into every subscription.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    next_subscriber_id: Arc<AtomicU64>,
}

impl ConnectionHandle {
    pub(crate) fn alloc_subscriber_id(&self) -> SubscriberId {
        self.next_subscriber_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnState {
    /// No channel and no connect in flight.
    Idle,
    /// A connect attempt or backoff wait is in progress.
    Connecting,
    /// The channel is open and flushable.
    Open,
    /// Torn down; the task is exiting.
    Closed,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

type ConnectFuture = BoxFuture<'static, Result<Channel, TransportError>>;
type Timer = Pin<Box<Sleep>>;

/// State for one document's connection task.
pub(crate) struct Connection {
    document_id: String,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    registry: Arc<RegistryShared>,

    commands: mpsc::UnboundedReceiver<Command>,
    /// Kept for registry identity checks (`same_channel`) during teardown.
    command_tx: mpsc::UnboundedSender<Command>,

    subscribers: SubscriberSet,
    queue: UpdateQueue,

    state: ConnState,
    reconnect_attempts: u32,
    channel: Option<Channel>,
    connect: Option<ConnectFuture>,

    connect_timeout: Option<Timer>,
    reconnect_timer: Option<Timer>,
    grace_timer: Option<Timer>,
    flush_timer: Option<Timer>,
    keepalive: Option<Interval>,
}

impl Connection {
    /// Spawn the connection task for `document_id` and return its handle.
    /// Must be called inside a tokio runtime.
    pub(crate) fn spawn(
        document_id: &str,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
        registry: Arc<RegistryShared>,
    ) -> ConnectionHandle {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            commands: command_tx.clone(),
            next_subscriber_id: Arc::new(AtomicU64::new(1)),
        };
        let connection = Connection {
            document_id: document_id.to_string(),
            transport,
            config,
            registry,
            commands,
            command_tx,
            subscribers: SubscriberSet::new(),
            queue: UpdateQueue::new(),
            state: ConnState::Idle,
            reconnect_attempts: 0,
            channel: None,
            connect: None,
            connect_timeout: None,
            reconnect_timer: None,
            grace_timer: None,
            flush_timer: None,
            keepalive: None,
        };
        tokio::spawn(connection.run());
        handle
    }

    async fn run(mut self) {
        tracing::debug!(document_id = %self.document_id, "connection task started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        // All handles gone without a teardown pass; nothing
                        // left to serve.
                        None => break,
                    }
                }
                result = poll_connect(&mut self.connect) => {
                    if self.on_connect_result(result) == Flow::Stop {
                        break;
                    }
                }
                event = next_channel_event(&mut self.channel) => {
                    self.on_channel_event(event);
                }
                _ = keepalive_tick(&mut self.keepalive) => {
                    self.send_ping();
                }
                _ = armed(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.begin_connect();
                }
                _ = armed(&mut self.connect_timeout) => {
                    if self.on_connect_timeout() == Flow::Stop {
                        break;
                    }
                }
                _ = armed(&mut self.flush_timer) => {
                    self.flush_timer = None;
                    self.flush();
                }
                _ = armed(&mut self.grace_timer) => {
                    if self.try_teardown() {
                        break;
                    }
                }
            }
        }
        // Dropping the channel here closes it; the transport treats that as
        // a clean, locally initiated close.
        tracing::debug!(document_id = %self.document_id, "connection task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                subscriber_id,
                sink,
            } => {
                // A new subscriber aborts any scheduled teardown.
                self.grace_timer = None;
                if self.state == ConnState::Open {
                    sink.deliver(&SubscriberEvent::Connected);
                }
                self.subscribers.insert(subscriber_id, sink);
                if self.state == ConnState::Idle {
                    self.begin_connect();
                }
            }
            Command::Unsubscribe { subscriber_id } => {
                if self.subscribers.remove(subscriber_id) && self.subscribers.is_empty() {
                    self.grace_timer = Some(Box::pin(sleep(self.config.grace_delay)));
                }
            }
            Command::SendUpdate {
                section_id,
                content,
            } => {
                self.queue.enqueue(&section_id, content);
                if self.state == ConnState::Open {
                    self.flush();
                }
            }
        }
    }

    /// Idle/backoff -> Connecting: start a fresh connect attempt. The old
    /// channel, if any, is discarded wholesale.
    fn begin_connect(&mut self) {
        self.state = ConnState::Connecting;
        self.reconnect_timer = None;
        self.channel = None;
        self.keepalive = None;
        self.connect = Some(self.transport.connect(&self.document_id));
        self.connect_timeout = Some(Box::pin(sleep(self.config.connect_timeout)));
    }

    fn on_connect_result(&mut self, result: Result<Channel, TransportError>) -> Flow {
        self.connect = None;
        self.connect_timeout = None;
        match result {
            Ok(channel) => {
                self.on_open(channel);
                Flow::Continue
            }
            Err(err) => {
                tracing::warn!(
                    document_id = %self.document_id,
                    error = %err,
                    "connect attempt failed"
                );
                self.on_connect_failure()
            }
        }
    }

    /// Connecting -> Connecting: no open confirmation arrived in time.
    /// Dropping the connect future force-closes the half-open channel.
    fn on_connect_timeout(&mut self) -> Flow {
        self.connect_timeout = None;
        self.connect = None;
        tracing::warn!(document_id = %self.document_id, "connect attempt timed out");
        self.on_connect_failure()
    }

    /// Connecting -> Open.
    fn on_open(&mut self, channel: Channel) {
        tracing::debug!(document_id = %self.document_id, "channel open");
        self.state = ConnState::Open;
        self.reconnect_attempts = 0;
        self.reconnect_timer = None;
        self.channel = Some(channel);
        let first_tick = Instant::now() + self.config.keepalive_interval;
        self.keepalive = Some(interval_at(first_tick, self.config.keepalive_interval));
        self.subscribers.dispatch(&SubscriberEvent::Connected);
        self.flush();
    }

    fn on_connect_failure(&mut self) -> Flow {
        self.reconnect_attempts += 1;
        if self.reconnect_attempts >= self.config.max_connect_attempts {
            self.close_terminal();
            return Flow::Stop;
        }
        if self.subscribers.is_empty() {
            // Nobody is waiting; the grace timer owns the endgame. A late
            // subscriber restarts the connect path from Idle.
            self.state = ConnState::Idle;
            return Flow::Continue;
        }
        let delay = self.config.backoff_delay(self.reconnect_attempts - 1);
        tracing::debug!(
            document_id = %self.document_id,
            attempt = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.state = ConnState::Connecting;
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
        Flow::Continue
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(text) => self.on_frame(&text),
            ChannelEvent::Closed { clean } => self.on_channel_closed(clean),
        }
    }

    fn on_frame(&mut self, text: &str) {
        match WireMessage::decode(text) {
            Ok(WireMessage::Update {
                section_id,
                content,
            }) => {
                self.subscribers.dispatch(&SubscriberEvent::ExternalUpdate {
                    section_id,
                    content,
                });
            }
            Ok(WireMessage::Status { message }) => match message.as_str() {
                STATUS_CONNECTED => self.subscribers.dispatch(&SubscriberEvent::Connected),
                STATUS_DISCONNECTED => self.subscribers.dispatch(&SubscriberEvent::Disconnected),
                other => {
                    tracing::debug!(
                        document_id = %self.document_id,
                        status = %other,
                        "unrecognized status message"
                    );
                }
            },
            Ok(WireMessage::Error { message }) => {
                self.subscribers
                    .dispatch(&SubscriberEvent::TransientError(SyncError::Server(message)));
            }
            // Pings are outbound-only; a server echo is harmless.
            Ok(WireMessage::Ping) => {}
            Err(err) => {
                tracing::warn!(
                    document_id = %self.document_id,
                    error = %err,
                    "dropping malformed inbound frame"
                );
            }
        }
    }

    /// Open -> Connecting (unclean close with subscribers) or Open -> Idle.
    fn on_channel_closed(&mut self, clean: bool) {
        self.channel = None;
        self.keepalive = None;
        self.subscribers.dispatch(&SubscriberEvent::Disconnected);
        if clean || self.subscribers.is_empty() {
            // Intentional close, or nobody left to reconnect for.
            self.state = ConnState::Idle;
            return;
        }
        self.subscribers
            .dispatch(&SubscriberEvent::TransientError(SyncError::ConnectionLost));
        self.state = ConnState::Connecting;
        let delay = self.config.backoff_delay(self.reconnect_attempts);
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
    }

    fn send_ping(&mut self) {
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        match WireMessage::Ping.encode() {
            Ok(frame) => {
                if let Err(err) = channel.try_send(frame) {
                    tracing::debug!(
                        document_id = %self.document_id,
                        error = %err,
                        "keepalive send failed"
                    );
                }
            }
            Err(err) => tracing::warn!(error = %err, "keepalive encode failed"),
        }
    }

    /// Send every queued update if the channel is open. Re-arms a short
    /// retry timer when entries remain after the pass.
    fn flush(&mut self) {
        if self.state != ConnState::Open {
            return;
        }
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        self.queue.flush(|entry| {
            let frame = WireMessage::update(&entry.section_id, &entry.content)
                .encode()
                .map_err(|err| TransportError::Encode(err.to_string()))?;
            channel.try_send(frame)
        });
        if !self.queue.is_empty() && self.flush_timer.is_none() {
            self.flush_timer = Some(Box::pin(sleep(self.config.flush_retry_delay)));
        }
    }

    /// Grace window elapsed. Returns true when the connection should exit.
    ///
    /// Subscribes are sent while holding the registry lock, so taking the
    /// same lock here makes every racing subscribe either visible in the
    /// command buffer or routed to a fresh connection after our entry is
    /// removed.
    fn try_teardown(&mut self) -> bool {
        self.grace_timer = None;
        let registry = Arc::clone(&self.registry);
        let mut entries = registry.entries.lock();

        let mut buffered = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            buffered.push(command);
        }
        if buffered
            .iter()
            .any(|command| matches!(command, Command::Subscribe { .. }))
        {
            // A remount beat the teardown; replay and keep running.
            drop(entries);
            for command in buffered {
                self.handle_command(command);
            }
            return false;
        }
        // Only trailing unsubscribes/sends from dying handles remain.
        if !buffered.is_empty() {
            tracing::debug!(
                document_id = %self.document_id,
                discarded = buffered.len(),
                "discarding commands from detached subscribers"
            );
        }
        remove_current(&mut entries, &self.document_id, &self.command_tx);
        self.commands.close();
        drop(entries);

        self.cancel_timers();
        self.state = ConnState::Closed;
        tracing::debug!(document_id = %self.document_id, "torn down after grace window");
        true
    }

    /// Reconnect attempts exhausted: report a terminal error and leave the
    /// registry so a future subscriber starts over with a fresh connection.
    fn close_terminal(&mut self) {
        let error = SyncError::AttemptsExhausted(self.config.max_connect_attempts);
        tracing::warn!(
            document_id = %self.document_id,
            attempts = self.reconnect_attempts,
            "giving up on reconnecting"
        );
        self.cancel_timers();
        self.channel = None;
        self.state = ConnState::Closed;
        self.subscribers
            .dispatch(&SubscriberEvent::FatalError(error.clone()));

        let registry = Arc::clone(&self.registry);
        let mut entries = registry.entries.lock();
        remove_current(&mut entries, &self.document_id, &self.command_tx);
        self.commands.close();
        // Subscribes buffered behind the lock joined a dead connection;
        // they at least learn why.
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Subscribe { sink, .. } = command {
                sink.deliver(&SubscriberEvent::FatalError(error.clone()));
            }
        }
    }

    fn cancel_timers(&mut self) {
        self.connect = None;
        self.connect_timeout = None;
        self.reconnect_timer = None;
        self.grace_timer = None;
        self.flush_timer = None;
        self.keepalive = None;
    }
}

async fn armed(slot: &mut Option<Timer>) {
    match slot {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn keepalive_tick(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn poll_connect(slot: &mut Option<ConnectFuture>) -> Result<Channel, TransportError> {
    match slot {
        Some(connect) => connect.await,
        None => std::future::pending().await,
    }
}

async fn next_channel_event(slot: &mut Option<Channel>) -> ChannelEvent {
    match slot {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;
    impl SubscriberSink for NullSink {
        fn deliver(&self, _event: &SubscriberEvent) {}
    }

    #[tokio::test]
    async fn test_handle_allocates_distinct_subscriber_ids() {
        let registry = Arc::new(RegistryShared::default());
        let transport = Arc::new(crate::transport::memory::MemoryTransport::new());
        let handle = Connection::spawn("doc", transport, SyncConfig::default(), registry);

        let first = handle.alloc_subscriber_id();
        let second = handle.alloc_subscriber_id();
        assert_ne!(first, second);

        // The task is idle until a subscriber arrives; dropping the last
        // sink path is exercised in the integration suite.
        let _ = handle.commands.send(Command::Subscribe {
            subscriber_id: first,
            sink: Arc::new(NullSink),
        });
    }
}
