//! Paper Sync
//!
//! Real-time collaborative section-editing transport for research-paper
//! summaries: a per-document, multi-subscriber, auto-reconnecting,
//! update-queuing channel that synchronizes concurrent edits to named
//! sections across tabs and users.
//!
//! # Features
//!
//! - **Shared connections**: one physical channel per document, no matter
//!   how many views subscribe
//! - **Auto-reconnect**: capped exponential backoff, connect timeout, and a
//!   terminal error after the attempt cap
//! - **Offline queuing**: last-write-wins per section; the latest edit per
//!   section is flushed on reconnect
//! - **Grace-delay teardown**: rapid remounts never flap the channel
//!
//! # Modules
//!
//! - `protocol`: JSON wire messages (`update`, `ping`, `status`, `error`)
//! - `transport`: duplex channel contract, WebSocket and in-memory impls
//! - `connection`: per-document state machine, queue, and fan-out
//! - `registry`: explicit connection registry, the public entry point
//! - `subscription`: per-UI-instance handle
//! - `config`: timing and retry tunables
//! - `error`: error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use paper_sync::{SyncRegistry, transport::ws::WebSocketTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(WebSocketTransport::new("ws://localhost:9001"));
//!     let registry = SyncRegistry::new(transport);
//!
//!     let subscription = registry.subscribe("42", |section_id, content| {
//!         println!("section {section_id} changed: {content}");
//!     });
//!     subscription.send_update("abstract", "Revised abstract text");
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod subscription;
pub mod transport;

// Re-export commonly used items at crate root
pub use config::SyncConfig;
pub use error::{SyncError, TransportError};
pub use protocol::WireMessage;
pub use registry::SyncRegistry;
pub use subscription::Subscription;
pub use transport::{Channel, ChannelEvent, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
