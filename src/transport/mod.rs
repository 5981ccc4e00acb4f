//! WebSocket transport layer.
//!
//! The extension's background script connects as a WebSocket client. The
//! server binds the first free port of a fixed range so the extension can
//! find it by scanning.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Bridge (Rust)  │                              │  Extension      │
//! │                 │         WebSocket            │  (Background)   │
//! │  Transport      │◄────────────────────────────►│                 │
//! │  → SocketHandle │   localhost:8851..=8895      │  WebSocket      │
//! │                 │                              │  Client         │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Transport::start` - Bind the first free port in range
//! 2. Extension connects, connect handler runs
//! 3. `connection_init` / `connection_ack` - Replay missed sequenced events
//! 4. Frames dispatched by type to registered handlers
//! 5. Read loop ends, disconnect handler runs once
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handler` | Message and lifecycle handler traits |
//! | `replay` | Bounded ring of sequenced events |
//! | `server` | Port discovery, accept loop and dispatch |
//! | `socket` | Cloneable write handle per connection |

// ============================================================================
// Submodules
// ============================================================================

/// Message and lifecycle handler traits.
pub mod handler;

/// Bounded ring of sequenced events.
pub mod replay;

/// WebSocket server with sequenced replay.
pub mod server;

/// Per-connection write handle.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::{
    ConnectionEvent, ConnectionHandler, ConnectionInfo, InboundMessage, MessageHandler,
};
pub use replay::{ReplayBuffer, SequencedEvent};
pub use server::{ServerInfo, Transport, TransportOptions};
pub use socket::SocketHandle;
