//! Wire message schema
//!
//! JSON messages exchanged over a document channel. The tag is snake_case
//! (`update`, `ping`, `status`, `error`); field names are camelCase to match
//! the browser clients on the other end of the wire.

use serde::{Deserialize, Serialize};

/// Status payload sent by the server when a channel opens.
pub const STATUS_CONNECTED: &str = "Connected successfully";

/// Status payload sent by the server when a peer drops.
pub const STATUS_DISCONNECTED: &str = "Disconnected";

/// Messages carried over a document channel, both directions.
///
/// Outbound: `Update`, `Ping`. Inbound: `Update`, `Status`, `Error`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// An edit to one named section of a paper summary.
    #[serde(rename_all = "camelCase")]
    Update { section_id: String, content: String },

    /// Keepalive; prevents idle-timeout disconnects on proxies. No pong is
    /// tracked: channel close/error events are the sole liveness signal.
    Ping,

    /// Server-side connection status notification.
    Status { message: String },

    /// Server-side error notification.
    Error { message: String },
}

impl WireMessage {
    /// Serialize for the wire.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a frame received from the wire.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Build an update message for one section.
    pub fn update(section_id: &str, content: &str) -> Self {
        WireMessage::Update {
            section_id: section_id.to_string(),
            content: content.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_serialization() {
        let msg = WireMessage::update("abstract", "hello");
        let json = msg.encode().unwrap();
        assert!(json.contains(r#""type":"update""#));
        assert!(json.contains(r#""sectionId":"abstract""#));
        assert!(json.contains(r#""content":"hello""#));
    }

    #[test]
    fn test_ping_serialization() {
        let json = WireMessage::Ping.encode().unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_status_parsing() {
        let msg =
            WireMessage::decode(r#"{"type":"status","message":"Connected successfully"}"#).unwrap();
        assert_eq!(
            msg,
            WireMessage::Status {
                message: STATUS_CONNECTED.to_string()
            }
        );
    }

    #[test]
    fn test_inbound_update_parsing() {
        let msg =
            WireMessage::decode(r#"{"type":"update","sectionId":"methods","content":"x"}"#)
                .unwrap();
        assert!(matches!(msg, WireMessage::Update { section_id, .. } if section_id == "methods"));
    }

    #[test]
    fn test_malformed_frames_fail_to_decode() {
        assert!(WireMessage::decode("not json").is_err());
        assert!(WireMessage::decode(r#"{"type":"launch_missiles"}"#).is_err());
        assert!(WireMessage::decode(r#"{"type":"update","content":"x"}"#).is_err());
    }
}
