//! Error types for the sync core
//!
//! Two layers: `TransportError` covers the channel itself (connect and send
//! failures), `SyncError` is what subscribers observe through the
//! subscription's error surface.

use thiserror::Error;

/// Errors produced by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening a channel to the server failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A send was attempted while the channel is not open.
    #[error("channel is not open")]
    NotOpen,

    /// The channel's outbound buffer is full.
    #[error("channel backlogged")]
    Saturated,

    /// A message could not be serialized for the wire.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Errors surfaced to subscribers.
///
/// Transient variants auto-expire from the subscription's error surface
/// after a fixed TTL; `AttemptsExhausted` is terminal and persists until the
/// subscriber re-registers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The channel dropped; a reconnect is underway.
    #[error("connection lost; retrying")]
    ConnectionLost,

    /// The server reported an error over the channel.
    #[error("server error: {0}")]
    Server(String),

    /// All reconnect attempts failed; no further retries are scheduled.
    #[error("connection failed after {0} attempts")]
    AttemptsExhausted(u32),
}

impl SyncError {
    /// Terminal errors persist on the subscription; everything else expires.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::AttemptsExhausted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(SyncError::AttemptsExhausted(5).is_terminal());
        assert!(!SyncError::ConnectionLost.is_terminal());
        assert!(!SyncError::Server("boom".to_string()).is_terminal());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::AttemptsExhausted(5);
        assert_eq!(err.to_string(), "connection failed after 5 attempts");
    }
}
