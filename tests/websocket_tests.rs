//! End-to-end test over a real WebSocket
//!
//! Runs a tokio-tungstenite accept loop on a loopback listener and drives
//! the full stack (registry, connection, WebSocket transport) against it.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite;

use paper_sync::transport::ws::WebSocketTransport;
use paper_sync::{SyncRegistry, WireMessage};

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn test_round_trip_over_real_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Server: accept one socket, wait for the client's update, answer with
    // an update of its own, then hold the socket open until the test is
    // done so the client never sees a close mid-assertion.
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let client_frame = loop {
            match ws.next().await.expect("client hung up").unwrap() {
                tungstenite::Message::Text(text) => {
                    let msg = assert_ok!(WireMessage::decode(&text));
                    if msg != WireMessage::Ping {
                        break msg;
                    }
                }
                _ => continue,
            }
        };

        let reply = WireMessage::update("abstract", "from-server")
            .encode()
            .unwrap();
        ws.send(tungstenite::Message::Text(reply.into()))
            .await
            .unwrap();
        let _ = done_rx.await;
        client_frame
    });

    let transport = Arc::new(WebSocketTransport::new(format!("ws://{addr}")));
    let registry = SyncRegistry::new(transport);

    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    let subscription = registry.subscribe("42", move |section_id, content| {
        log.lock().push((section_id.to_string(), content.to_string()));
    });

    wait_until(|| subscription.is_connected()).await;
    subscription.send_update("abstract", "hello");

    wait_until(|| !received.lock().is_empty()).await;
    assert_eq!(
        *received.lock(),
        vec![("abstract".to_string(), "from-server".to_string())]
    );
    assert!(subscription.error().is_none());

    let _ = done_tx.send(());
    let client_frame = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server timed out")
        .unwrap();
    assert_eq!(client_frame, WireMessage::update("abstract", "hello"));
}
