//! Handler traits for inbound frames and connection lifecycle.
//!
//! Both traits have blanket impls for async closures, so registration sites
//! can pass `move |msg| async move { ... }` directly.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::InboundFrame;

use super::SocketHandle;

// ============================================================================
// Types
// ============================================================================

/// A frame delivered to a [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Parsed frame.
    pub frame: InboundFrame,
    /// Socket the frame arrived on.
    pub socket: SocketHandle,
}

impl InboundMessage {
    /// Frame type.
    #[inline]
    #[must_use]
    pub fn frame_type(&self) -> &str {
        &self.frame.frame_type
    }

    /// Whole frame object.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.frame.payload
    }

    /// Ephemeral port of the sending client.
    #[inline]
    #[must_use]
    pub fn client_port(&self) -> u16 {
        self.socket.client_port()
    }

    /// Server port the frame arrived on.
    #[inline]
    #[must_use]
    pub fn server_port(&self) -> u16 {
        self.socket.listening_port()
    }
}

/// Connection lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// WebSocket upgrade completed.
    Connect,
    /// Read loop ended.
    Disconnect,
}

/// Details passed to a [`ConnectionHandler`].
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Write handle of the connection.
    pub socket: SocketHandle,
    /// Peer address.
    pub remote_addr: SocketAddr,
    /// Server port accepted on.
    pub server_port: u16,
    /// `User-Agent` header of the upgrade request.
    pub user_agent: Option<String>,
}

impl ConnectionInfo {
    /// Ephemeral port of the client.
    #[inline]
    #[must_use]
    pub fn client_port(&self) -> u16 {
        self.remote_addr.port()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Receives frames of one registered type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one frame. Errors are logged by the transport.
    async fn handle(&self, message: InboundMessage) -> Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, message: InboundMessage) -> Result<()> {
        self(message).await
    }
}

/// Receives connect or disconnect notifications.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Handles one lifecycle event. Errors are logged by the transport.
    async fn handle(&self, info: ConnectionInfo) -> Result<()>;
}

#[async_trait]
impl<F, Fut> ConnectionHandler for F
where
    F: Fn(ConnectionInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, info: ConnectionInfo) -> Result<()> {
        self(info).await
    }
}
