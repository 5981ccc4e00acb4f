//! Frames received from the extension.
//!
//! Every frame is a JSON object with a `type` discriminator. The transport
//! routes on that string, so frames are kept as an [`InboundFrame`] envelope
//! and decoded into typed bodies only by the component that owns them.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, from_str, from_value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Frame Types
// ============================================================================

/// Handshake sent by the extension after (re)connecting.
pub const CONNECTION_INIT: &str = "connection_init";

/// Liveness probe, answered with `pong`.
pub const HEARTBEAT: &str = "heartbeat";

/// Request for transport metadata.
pub const SERVER_INFO: &str = "server_info";

/// Single console log entry.
pub const CONSOLE: &str = "console";

/// Batch of console log entries.
pub const BATCH: &str = "batch";

/// Handler key used when no handler matches a frame type.
pub const DEFAULT_HANDLER: &str = "default";

/// Type reported for frames without a `type` field.
const UNKNOWN_TYPE: &str = "unknown";

// ============================================================================
// InboundFrame
// ============================================================================

/// A parsed frame with its type extracted.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Value of the `type` field, or `"unknown"`.
    pub frame_type: String,
    /// The whole frame object.
    pub payload: Value,
}

impl InboundFrame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not JSON
    /// - [`Error::Protocol`] if the JSON is not an object
    pub fn parse(text: &str) -> Result<Self> {
        let payload: Value = from_str(text)?;

        if !payload.is_object() {
            return Err(Error::protocol("frame must be a JSON object"));
        }

        let frame_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_TYPE)
            .to_string();

        Ok(Self {
            frame_type,
            payload,
        })
    }

    /// Decodes the frame into a typed body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the frame does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(from_value(self.payload.clone())?)
    }

    /// Returns the `requestId` if present and well-formed.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.payload
            .get("requestId")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
    }
}

// ============================================================================
// Typed Bodies
// ============================================================================

/// `connection_init{lastSequence, extensionVersion, capabilities}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInit {
    /// Highest sequence number the client has seen.
    #[serde(default)]
    pub last_sequence: u64,

    /// Extension version string.
    #[serde(default = "unknown_version")]
    pub extension_version: String,

    /// Feature names advertised by the extension.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn unknown_version() -> String {
    UNKNOWN_TYPE.to_string()
}

/// `heartbeat{timestamp}`.
///
/// The timestamp is echoed back verbatim, whatever its JSON type.
#[derive(Debug, Clone, Deserialize)]
pub struct Heartbeat {
    /// Client timestamp.
    #[serde(default)]
    pub timestamp: Value,
}

/// `batch{messages}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Batch {
    /// Raw console entries.
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// `<action>_response{requestId, response}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedResponse {
    /// Correlation id of the originating request.
    pub request_id: RequestId,

    /// Response body.
    #[serde(default)]
    pub response: Value,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_type() {
        let frame = InboundFrame::parse(r#"{"type":"console","message":"hi"}"#).expect("parse");
        assert_eq!(frame.frame_type, CONSOLE);
        assert_eq!(frame.payload["message"], "hi");
    }

    #[test]
    fn test_parse_missing_type() {
        let frame = InboundFrame::parse(r#"{"message":"hi"}"#).expect("parse");
        assert_eq!(frame.frame_type, "unknown");
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            InboundFrame::parse("[1,2,3]"),
            Err(Error::Protocol { .. })
        ));
        assert!(matches!(InboundFrame::parse("{oops"), Err(Error::Json(_))));
    }

    #[test]
    fn test_connection_init_defaults() {
        let frame = InboundFrame::parse(r#"{"type":"connection_init"}"#).expect("parse");
        let init: ConnectionInit = frame.decode().expect("decode");
        assert_eq!(init.last_sequence, 0);
        assert_eq!(init.extension_version, "unknown");
        assert!(init.capabilities.is_empty());
    }

    #[test]
    fn test_connection_init_fields() {
        let frame = InboundFrame::parse(
            r#"{"type":"connection_init","lastSequence":42,"extensionVersion":"2.0.1","capabilities":["console","dom"]}"#,
        )
        .expect("parse");
        let init: ConnectionInit = frame.decode().expect("decode");
        assert_eq!(init.last_sequence, 42);
        assert_eq!(init.extension_version, "2.0.1");
        assert_eq!(init.capabilities, vec!["console", "dom"]);
    }

    #[test]
    fn test_correlated_response() {
        let frame = InboundFrame::parse(
            r#"{"type":"dom_command_response","requestId":"550e8400-e29b-41d4-a716-446655440000","response":{"success":true}}"#,
        )
        .expect("parse");
        let id = frame.request_id().expect("request id");
        let body: CorrelatedResponse = frame.decode().expect("decode");
        assert_eq!(body.request_id, id);
        assert_eq!(body.response["success"], true);
    }
}
