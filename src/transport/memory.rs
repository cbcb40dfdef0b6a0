//! In-process transport
//!
//! Paired-channel transport for tests and single-process embedding. Every
//! connect hands the "server" half back through `take_server`, and failure
//! modes (refused or stalled connects) are scriptable, which is what lets
//! the reconnect and teardown behavior be exercised without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Channel, ChannelEvent, Transport, CHANNEL_BUFFER};
use crate::error::TransportError;
use crate::protocol::WireMessage;

/// Scriptable in-process transport. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Connect attempts made, successful or not.
    attempts: AtomicU64,
    /// Upcoming connects to refuse.
    fail_next: AtomicU64,
    /// Upcoming connects to leave half-open forever.
    stall_next: AtomicU64,
    /// Server halves of successful connects, oldest first.
    servers: Mutex<VecDeque<ServerEnd>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total connect attempts observed, including refused and stalled ones.
    pub fn connect_count(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: u64) {
        self.inner.fail_next.fetch_add(n, Ordering::SeqCst);
    }

    /// Leave the next `n` connect attempts half-open until the caller's
    /// connect timeout abandons them.
    pub fn stall_next_connects(&self, n: u64) {
        self.inner.stall_next.fetch_add(n, Ordering::SeqCst);
    }

    /// Take the oldest unclaimed server half, if any.
    pub fn take_server(&self) -> Option<ServerEnd> {
        self.inner.servers.lock().pop_front()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, document_id: &str) -> BoxFuture<'static, Result<Channel, TransportError>> {
        let inner = Arc::clone(&self.inner);
        let document_id = document_id.to_string();
        Box::pin(async move {
            inner.attempts.fetch_add(1, Ordering::SeqCst);

            if consume(&inner.stall_next) {
                futures::future::pending::<()>().await;
                unreachable!("stalled connect never resolves");
            }
            if consume(&inner.fail_next) {
                return Err(TransportError::Connect(
                    "simulated connect failure".to_string(),
                ));
            }

            let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER);
            let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER);
            inner.servers.lock().push_back(ServerEnd {
                document_id,
                from_client: outbound_rx,
                to_client: event_tx,
            });
            Ok(Channel::new(outbound_tx, event_rx))
        })
    }
}

/// Decrement `counter` if positive; true when a unit was consumed.
fn consume(counter: &AtomicU64) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// The server half of one in-process channel.
pub struct ServerEnd {
    document_id: String,
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<ChannelEvent>,
}

impl ServerEnd {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Next frame sent by the client, or `None` once the client side closed.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Non-blocking variant of [`recv_frame`](Self::recv_frame).
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Push a section update to the client.
    pub async fn push_update(&self, section_id: &str, content: &str) {
        let frame = WireMessage::update(section_id, content)
            .encode()
            .expect("wire message encodes");
        self.push_raw(&frame).await;
    }

    /// Push a raw text frame to the client, malformed or otherwise.
    pub async fn push_raw(&self, text: &str) {
        let _ = self
            .to_client
            .send(ChannelEvent::Message(text.to_string()))
            .await;
    }

    /// Close the client's channel. `clean` mirrors a normal close frame.
    pub async fn close(&self, clean: bool) {
        let _ = self.to_client.send(ChannelEvent::Closed { clean }).await;
    }
}
