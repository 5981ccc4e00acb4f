//! WebSocket protocol message types.
//!
//! This module defines the frames exchanged between this process and the
//! browser extension.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `connection_init` / `connection_ack` | Extension ↔ Bridge | Handshake and replay |
//! | `heartbeat` / `pong` | Extension ↔ Bridge | Liveness |
//! | `server_info` / `server_info_response` | Extension ↔ Bridge | Transport metadata |
//! | `console`, `batch` | Extension → Bridge | Console capture |
//! | `navigate`, `dom_command`, correlated requests | Bridge → Extension | Control |
//! | `<action>_response` | Extension → Bridge | Correlated replies |
//! | `disconnect` | Bridge → Extension | Forced close |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `console` | Console log entries |
//! | `inbound` | Frame envelope and inbound bodies |
//! | `outbound` | Outbound frames |

// ============================================================================
// Submodules
// ============================================================================

/// Console log entries.
pub mod console;

/// Frames received from the extension.
pub mod inbound;

/// Frames sent to the extension.
pub mod outbound;

// ============================================================================
// Re-exports
// ============================================================================

pub use console::{ConsoleMessage, LogLevel};
pub use inbound::{Batch, ConnectionInit, CorrelatedResponse, Heartbeat, InboundFrame};
pub use outbound::{OutboundFrame, correlated_request, now_timestamp};
