//! Write handle for one extension socket.
//!
//! Each accepted WebSocket gets a writer task that owns the sink. Every
//! other component writes through a cloneable [`SocketHandle`], so writes
//! never contend with the connection's read loop.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::OutboundFrame;

// ============================================================================
// SocketCommand
// ============================================================================

/// Commands consumed by the writer task.
#[derive(Debug)]
pub(crate) enum SocketCommand {
    /// Write a text frame.
    Send(String),
    /// Send a close frame and stop writing.
    Close,
}

// ============================================================================
// SocketHandle
// ============================================================================

/// Cloneable write side of an extension connection.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    /// Peer address; its port is the ephemeral client port.
    remote_addr: SocketAddr,
    /// Server port the peer connected to.
    listening_port: u16,
    /// Channel to the writer task.
    command_tx: mpsc::UnboundedSender<SocketCommand>,
}

impl SocketHandle {
    /// Creates a handle and the receiver its writer task drains.
    pub(crate) fn new(
        remote_addr: SocketAddr,
        listening_port: u16,
    ) -> (Self, mpsc::UnboundedReceiver<SocketCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        (
            Self {
                remote_addr,
                listening_port,
                command_tx,
            },
            command_rx,
        )
    }

    /// Returns the peer address.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns the OS-assigned client port.
    #[inline]
    #[must_use]
    pub fn client_port(&self) -> u16 {
        self.remote_addr.port()
    }

    /// Returns the server port the client connected to.
    #[inline]
    #[must_use]
    pub fn listening_port(&self) -> u16 {
        self.listening_port
    }

    /// Returns `true` once the writer task has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Queues a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the writer task has stopped.
    pub fn send_text(&self, text: String) -> Result<()> {
        trace!(client_port = self.client_port(), len = text.len(), "Frame queued");
        self.command_tx
            .send(SocketCommand::Send(text))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Queues a JSON frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - [`Error::ConnectionClosed`] if the writer task has stopped
    pub fn send_json(&self, value: &Value) -> Result<()> {
        self.send_text(serde_json::to_string(value)?)
    }

    /// Queues a typed frame.
    ///
    /// # Errors
    ///
    /// See [`SocketHandle::send_json`].
    pub fn send(&self, frame: &OutboundFrame) -> Result<()> {
        self.send_text(serde_json::to_string(frame)?)
    }

    /// Asks the writer task to close the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.command_tx.send(SocketCommand::Close);
    }
}

// ============================================================================
// Tests
// ============================================================================
