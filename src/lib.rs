//! Browser Bridge - local automation bridge between a browser extension and
//! an external controller.
//!
//! The bridge listens on a local WebSocket for a browser extension, captures
//! the tab's console output, and drives the tab through the extension, the
//! Chrome DevTools Protocol, or AppleScript, whichever is available.
//!
//! # Architecture
//!
//! - **Transport**: sequenced WebSocket server with reconnect replay
//! - **Registry**: one active tab at a time, addressable by client or server
//!   port
//! - **Ingest**: per-connection console buffers flushed to [`Storage`]
//! - **Controller**: ordered backend chain with a deadline per backend
//!
//! # Quick Start
//!
//! ```no_run
//! use browser_bridge::{Bridge, BridgeConfig, ElementTarget, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bridge = Bridge::new(BridgeConfig::default())?;
//!     let port = bridge.start().await?;
//!
//!     let controller = bridge.controller();
//!     controller.navigate("https://example.com", Some(port)).await;
//!     let result = controller.click(ElementTarget::selector("a"), Some(port)).await;
//!     println!("{} via {}", result.success, result.method);
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`Bridge`] lifecycle |
//! | [`config`] | [`BridgeConfig`] and TOML loading |
//! | [`control`] | [`BrowserController`] and backends |
//! | [`correlator`] | Request/response correlation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`ingest`] | Console buffering and flushing |
//! | [`protocol`] | Extension wire frames |
//! | [`registry`] | Connection registry |
//! | [`service`] | Extension-facing glue |
//! | [`storage`] | Console message persistence |
//! | [`transport`] | WebSocket server |

// ============================================================================
// Modules
// ============================================================================

/// Bridge coordinator.
pub mod bridge;

/// Configuration.
///
/// Use [`BridgeConfig::builder()`] or [`BridgeConfig::from_file`].
pub mod config;

/// Browser control with backend fallback.
pub mod control;

/// Request/response correlation.
pub mod correlator;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Console message ingestion.
pub mod ingest;

/// Extension wire protocol.
pub mod protocol;

/// Connection registry.
pub mod registry;

/// Extension-facing service.
pub mod service;

/// Console message storage.
pub mod storage;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge
pub use bridge::Bridge;

// Configuration
pub use config::{BridgeConfig, BridgeConfigBuilder, ControlConfig, ControlMode};

// Control
pub use control::{
    Action, BrowserController, Capabilities, CapabilityReport, ControlBackend, ControlMethod,
    ControlResult, ElementTarget,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RequestId, TabId};

// Protocol types
pub use protocol::{ConsoleMessage, LogLevel};

// Services
pub use registry::{Connection, ConnectionRegistry};
pub use service::BrowserService;
pub use storage::{MemoryStorage, Storage};
pub use transport::Transport;
