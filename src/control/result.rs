//! Uniform controller result.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// ControlMethod
// ============================================================================

/// Backend that produced a [`ControlResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlMethod {
    /// Browser extension over the WebSocket transport.
    Extension,
    /// Chrome DevTools Protocol.
    RemoteDebugging,
    /// AppleScript through `osascript`.
    OsScripting,
    /// No backend produced the result.
    None,
}

impl ControlMethod {
    /// Wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::RemoteDebugging => "remote-debugging",
            Self::OsScripting => "os-scripting",
            Self::None => "none",
        }
    }

    /// Human-readable description used in capability reports.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Extension => "Browser extension (WebSocket) - best performance",
            Self::RemoteDebugging => "Chrome DevTools Protocol - cross-platform",
            Self::OsScripting => "AppleScript (macOS) - reliable fallback",
            Self::None => "No control method",
        }
    }
}

impl fmt::Display for ControlMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ControlResult
// ============================================================================

/// Outcome of one controller operation.
///
/// `method` names the backend whose answer this is; `none` only when every
/// backend in the chain failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlResult {
    /// Whether the action succeeded.
    pub success: bool,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Backend that produced the result.
    pub method: ControlMethod,
    /// Backend payload, or the failed attempts on exhaustion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ControlResult {
    /// Successful result.
    #[must_use]
    pub fn success(method: ControlMethod, data: Value) -> Self {
        Self {
            success: true,
            error: None,
            method,
            data: Some(data),
        }
    }

    /// Failed result.
    #[must_use]
    pub fn failure(method: ControlMethod, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            method,
            data: None,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns `true` on success.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }
}

// ============================================================================
// Attempt
// ============================================================================

/// One failed backend attempt, reported when a chain is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// Backend tried.
    pub method: ControlMethod,
    /// Why it failed.
    pub error: String,
}

// ============================================================================
// Tests
// ============================================================================
