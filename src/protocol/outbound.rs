//! Frames sent to the extension.
//!
//! # Format
//!
//! ```json
//! { "type": "navigate", "url": "https://example.com", "timestamp": "2026-01-01T00:00:00Z" }
//! ```
//!
//! Correlated requests have a dynamic `type`, so they are assembled as raw
//! JSON by [`correlated_request`] rather than through [`OutboundFrame`].

// ============================================================================
// Imports
// ============================================================================

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::Result;
use crate::identifiers::{RequestId, TabId};

// ============================================================================
// OutboundFrame
// ============================================================================

/// A frame with a fixed shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundFrame {
    /// Handshake reply carrying the replay window.
    ConnectionAck {
        /// Server version string.
        server_version: String,
        /// Last sequence number assigned.
        current_sequence: u64,
        /// Sequenced events newer than the client's `lastSequence`.
        replay: Vec<Value>,
    },

    /// Heartbeat reply.
    Pong {
        /// Client timestamp, echoed.
        timestamp: Value,
    },

    /// Transport metadata.
    ServerInfoResponse {
        /// Listening port.
        port: Option<u16>,
        /// Project directory the bridge serves.
        project_path: String,
        /// Last component of `project_path`.
        project_name: String,
        /// Server version string.
        version: String,
    },

    /// Navigate the connected tab.
    Navigate {
        /// Target URL.
        url: String,
        /// RFC 3339 send time.
        timestamp: String,
    },

    /// Fire-and-forget DOM command.
    DomCommand {
        /// Correlation id.
        request_id: RequestId,
        /// Target tab, or the active tab when `None`.
        tab_id: Option<TabId>,
        /// Command body.
        command: Value,
        /// RFC 3339 send time.
        timestamp: String,
    },

    /// Sent before the server closes a socket.
    Disconnect {
        /// Machine-readable reason, e.g. `new_connection`.
        reason: String,
        /// Human-readable message.
        message: String,
        /// RFC 3339 send time.
        timestamp: String,
    },
}

impl OutboundFrame {
    /// Creates a `navigate` frame stamped now.
    #[inline]
    #[must_use]
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::Navigate {
            url: url.into(),
            timestamp: now_timestamp(),
        }
    }

    /// Creates a `disconnect` frame stamped now.
    #[inline]
    #[must_use]
    pub fn disconnect(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Disconnect {
            reason: reason.into(),
            message: message.into(),
            timestamp: now_timestamp(),
        }
    }

    /// Converts the frame into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Current time as an RFC 3339 string.
#[inline]
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Builds `{type, requestId, tabId, ...payload}`.
///
/// Object payloads are merged at the top level; any other payload is placed
/// under `payload`. Envelope keys win over payload keys.
#[must_use]
pub fn correlated_request(
    message_type: &str,
    request_id: RequestId,
    tab_id: Option<TabId>,
    payload: Option<Value>,
) -> Value {
    let mut frame = match payload {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other);
            map
        }
        None => Map::new(),
    };

    frame.insert("type".to_string(), json!(message_type));
    frame.insert("requestId".to_string(), json!(request_id));
    frame.insert("tabId".to_string(), json!(tab_id));

    Value::Object(frame)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ack_shape() {
        let frame = OutboundFrame::ConnectionAck {
            server_version: "0.1.0".into(),
            current_sequence: 7,
            replay: vec![json!({"sequence": 7})],
        };
        let value = frame.to_value().expect("serialize");

        assert_eq!(value["type"], "connection_ack");
        assert_eq!(value["serverVersion"], "0.1.0");
        assert_eq!(value["currentSequence"], 7);
        assert_eq!(value["replay"][0]["sequence"], 7);
    }

    #[test]
    fn test_server_info_response_shape() {
        let frame = OutboundFrame::ServerInfoResponse {
            port: Some(8851),
            project_path: "/tmp/demo".into(),
            project_name: "demo".into(),
            version: "0.1.0".into(),
        };
        let value = frame.to_value().expect("serialize");

        assert_eq!(value["type"], "server_info_response");
        assert_eq!(value["port"], 8851);
        assert_eq!(value["projectPath"], "/tmp/demo");
        assert_eq!(value["projectName"], "demo");
    }

    #[test]
    fn test_dom_command_shape() {
        let id = RequestId::generate();
        let frame = OutboundFrame::DomCommand {
            request_id: id,
            tab_id: None,
            command: json!({"type": "click", "selector": "#go"}),
            timestamp: now_timestamp(),
        };
        let value = frame.to_value().expect("serialize");

        assert_eq!(value["type"], "dom_command");
        assert_eq!(value["requestId"], id.to_string());
        assert!(value["tabId"].is_null());
        assert_eq!(value["command"]["selector"], "#go");
    }

    #[test]
    fn test_disconnect_shape() {
        let value = OutboundFrame::disconnect("new_connection", "replaced")
            .to_value()
            .expect("serialize");
        assert_eq!(value["type"], "disconnect");
        assert_eq!(value["reason"], "new_connection");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_correlated_request_merges_payload() {
        let id = RequestId::generate();
        let frame = correlated_request(
            "extract_semantic_dom",
            id,
            Some(TabId::new(3)),
            Some(json!({"options": {"links": true}, "type": "ignored"})),
        );

        assert_eq!(frame["type"], "extract_semantic_dom");
        assert_eq!(frame["requestId"], id.to_string());
        assert_eq!(frame["tabId"], 3);
        assert_eq!(frame["options"]["links"], true);
    }

    #[test]
    fn test_correlated_request_wraps_scalar_payload() {
        let frame = correlated_request("echo", RequestId::generate(), None, Some(json!(5)));
        assert_eq!(frame["payload"], 5);
        assert!(frame["tabId"].is_null());
    }
}
