//! Type-safe identifiers.
//!
//! Newtype wrappers keep correlation ids and tab ids from being mixed with
//! plain strings and ports.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// RequestId
// ============================================================================

/// Correlation id tying an outbound request to its response.
///
/// Serialized as the bare UUID string in the `requestId` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// TabId
// ============================================================================

/// Browser tab id as reported by the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(u32);

impl TabId {
    /// Wraps a raw tab id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw tab id.
    #[inline]
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }

    #[test]
    fn test_request_id_parse_display() {
        let raw = "550e8400-e29b-41d4-a716-446655440000";
        let id: RequestId = raw.parse().expect("valid uuid");
        assert_eq!(id.to_string(), raw);
        assert!("not-a-uuid".parse::<RequestId>().is_err());
    }

    #[test]
    fn test_request_id_serializes_bare() {
        let id = RequestId::generate();
        let json = serde_json::to_value(id).expect("serialize");
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }

    #[test]
    fn test_tab_id_serializes_as_number() {
        let json = serde_json::to_string(&TabId::new(7)).expect("serialize");
        assert_eq!(json, "7");
    }
}
