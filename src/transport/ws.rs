//! WebSocket transport
//!
//! Production transport over tokio-tungstenite. Each connect opens one
//! socket against `{base}/ws/documents/{id}` and bridges it onto the
//! [`Channel`] contract with a read pump and a write pump. Dropping the
//! channel shuts the write pump down, which sends a close frame; that is
//! the clean, locally initiated close.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Channel, ChannelEvent, Transport, CHANNEL_BUFFER};
use crate::error::TransportError;

/// WebSocket transport rooted at a base URL such as `ws://host:port`.
pub struct WebSocketTransport {
    base_url: String,
}

impl WebSocketTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, document_id: &str) -> String {
        format!(
            "{}/ws/documents/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(document_id)
        )
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, document_id: &str) -> BoxFuture<'static, Result<Channel, TransportError>> {
        let url = self.endpoint(document_id);
        Box::pin(async move {
            let (stream, _) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            Ok(spawn_pumps(stream))
        })
    }
}

/// Split a connected socket into the channel halves and start the pumps.
fn spawn_pumps(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Channel {
    let (mut ws_write, mut ws_read) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_BUFFER);
    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(CHANNEL_BUFFER);

    // Write pump: forward frames until the channel owner drops the sender,
    // then perform the close handshake.
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_write
                .send(tungstenite::Message::Text(frame.into()))
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
    });

    // Read pump: text frames become events; the first close frame, read
    // error, or EOF ends the session.
    tokio::spawn(async move {
        let clean = loop {
            match ws_read.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if event_tx
                        .send(ChannelEvent::Message(text.to_string()))
                        .await
                        .is_err()
                    {
                        // Channel owner is gone; nothing left to deliver to.
                        return;
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    break frame
                        .map(|f| f.code == CloseCode::Normal)
                        .unwrap_or(false);
                }
                // Ping/pong are answered by tungstenite itself; binary
                // frames are not part of the document protocol.
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "websocket read failed");
                    break false;
                }
                None => break false,
            }
        };
        let _ = event_tx.send(ChannelEvent::Closed { clean }).await;
    });

    Channel::new(outbound_tx, event_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_document_id() {
        let transport = WebSocketTransport::new("ws://localhost:9001/");
        assert_eq!(
            transport.endpoint("paper/42 draft"),
            "ws://localhost:9001/ws/documents/paper%2F42%20draft"
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Port 1 is never listening.
        let transport = WebSocketTransport::new("ws://127.0.0.1:1");
        let result = transport.connect("42").await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
