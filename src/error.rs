//! Error types for the browser bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use browser_bridge::{Bridge, BridgeConfig, Result};
//!
//! async fn example() -> Result<()> {
//!     let bridge = Bridge::new(BridgeConfig::default())?;
//!     let port = bridge.start().await?;
//!     println!("listening on {port}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::PortRangeExhausted`], [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidArgument`] |
//! | Backend | [`Error::BackendUnavailable`], [`Error::BackendFailed`], [`Error::Unsupported`], [`Error::NoActiveConnection`] |
//! | Execution | [`Error::Timeout`] |
//! | Storage | [`Error::Storage`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`] |
//!
//! A correlated request that never gets a reply is not an error: the
//! correlator resolves it to `None`.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::control::ControlMethod;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// No port in the configured range could be bound.
    ///
    /// The only transport error that aborts startup.
    #[error("No available port found in range {start}-{end}")]
    PortRangeExhausted {
        /// First port tried.
        start: u16,
        /// Last port tried.
        end: u16,
    },

    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket connection closed.
    ///
    /// Returned when writing to a socket whose writer task has ended.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid argument passed to an action.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// No extension connection matches the requested port.
    #[error("No active browser connection for port {port:?}")]
    NoActiveConnection {
        /// Port the caller asked for, if any.
        port: Option<u16>,
    },

    /// A control backend cannot be reached.
    #[error("{method} unavailable: {message}")]
    BackendUnavailable {
        /// Backend that is unavailable.
        method: ControlMethod,
        /// Why it is unavailable.
        message: String,
    },

    /// A control backend was reached but reported failure.
    #[error("{method} failed: {message}")]
    BackendFailed {
        /// Backend that failed.
        method: ControlMethod,
        /// Failure reported by the backend.
        message: String,
    },

    /// A control backend cannot express the requested action.
    #[error("{method} does not support '{action}'")]
    Unsupported {
        /// Backend asked to run the action.
        method: ControlMethod,
        /// Action name.
        action: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// Persisting or querying console messages failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP error talking to the remote-debugging endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML configuration parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a port range exhausted error.
    #[inline]
    pub fn port_range_exhausted(start: u16, end: u16) -> Self {
        Self::PortRangeExhausted { start, end }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a no active connection error.
    #[inline]
    pub fn no_active_connection(port: Option<u16>) -> Self {
        Self::NoActiveConnection { port }
    }

    /// Creates a backend unavailable error.
    #[inline]
    pub fn backend_unavailable(method: ControlMethod, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            method,
            message: message.into(),
        }
    }

    /// Creates a backend failed error.
    #[inline]
    pub fn backend_failed(method: ControlMethod, message: impl Into<String>) -> Self {
        Self::BackendFailed {
            method,
            message: message.into(),
        }
    }

    /// Creates an unsupported action error.
    #[inline]
    pub fn unsupported(method: ControlMethod, action: impl Into<String>) -> Self {
        Self::Unsupported {
            method,
            action: action.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a storage error.
    #[inline]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::NoActiveConnection { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the controller should try the next backend.
    ///
    /// Configuration and argument errors stop a fallback chain, since every
    /// other backend would reject the same input.
    #[inline]
    #[must_use]
    pub fn is_fallthrough(&self) -> bool {
        !matches!(self, Self::Config { .. } | Self::InvalidArgument { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
