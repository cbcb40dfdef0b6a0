//! Transport contract consumed by the sync core
//!
//! A `Transport` opens one duplex, message-oriented `Channel` per connect
//! call, keyed by document id. The connection owns the channel exclusively
//! and replaces it wholesale on every (re)connect attempt.
//!
//! Two implementations ship with the crate:
//! - [`ws::WebSocketTransport`]: production transport over tokio-tungstenite
//! - [`memory::MemoryTransport`]: in-process paired channels for tests and
//!   embedding

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub mod memory;
pub mod ws;

/// Outbound buffer size per channel before sends report `Saturated`.
pub(crate) const CHANNEL_BUFFER: usize = 64;

/// Events emitted by an open channel, in transport delivery order.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A text frame arrived from the server.
    Message(String),

    /// The channel closed. `clean` is true only for an intentional, normal
    /// close; everything else (error, EOF, abnormal close code) is unclean
    /// and eligible for reconnect.
    Closed { clean: bool },
}

/// One live duplex channel to the server for a single document.
///
/// Dropping the channel tears it down; the transport side treats that as a
/// clean, locally initiated close.
pub struct Channel {
    outbound: mpsc::Sender<String>,
    events: mpsc::Receiver<ChannelEvent>,
}

impl Channel {
    /// Assemble a channel from its two halves. Transports call this; the
    /// core only consumes the result.
    pub fn new(outbound: mpsc::Sender<String>, events: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { outbound, events }
    }

    /// Send a serialized frame. Fails if the channel is no longer open or
    /// its outbound buffer is full; never blocks.
    pub fn try_send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Closed(_) => TransportError::NotOpen,
            mpsc::error::TrySendError::Full(_) => TransportError::Saturated,
        })
    }

    /// Wait for the next channel event. A transport that drops its event
    /// sender without an explicit close frame reads as an unclean close.
    pub async fn next_event(&mut self) -> ChannelEvent {
        self.events
            .recv()
            .await
            .unwrap_or(ChannelEvent::Closed { clean: false })
    }
}

/// Factory for duplex channels, parameterized by document id.
///
/// Implementations must return a fresh physical channel per call and hand
/// back a `'static` future so the core can race it against a connect
/// timeout; dropping that future abandons the half-open attempt.
pub trait Transport: Send + Sync + 'static {
    /// Open a new channel for `document_id`.
    fn connect(&self, document_id: &str) -> BoxFuture<'static, Result<Channel, TransportError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_send_and_receive() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(8);
        let mut channel = Channel::new(out_tx, event_rx);

        channel.try_send("frame".to_string()).unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), "frame");

        event_tx
            .send(ChannelEvent::Message("inbound".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            channel.next_event().await,
            ChannelEvent::Message(text) if text == "inbound"
        ));
    }

    #[tokio::test]
    async fn test_dropped_event_sender_reads_as_unclean_close() {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(8);
        let mut channel = Channel::new(out_tx, event_rx);

        drop(event_tx);
        assert!(matches!(
            channel.next_event().await,
            ChannelEvent::Closed { clean: false }
        ));
    }

    #[tokio::test]
    async fn test_send_after_close_reports_not_open() {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (_event_tx, event_rx) = mpsc::channel(8);
        let channel = Channel::new(out_tx, event_rx);

        drop(out_rx);
        assert!(matches!(
            channel.try_send("frame".to_string()),
            Err(TransportError::NotOpen)
        ));
    }
}
