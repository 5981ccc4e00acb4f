//! Connection registry with the single-active-tab invariant.
//!
//! Each connection has two port identities:
//!
//! | Port | Meaning | Stability |
//! |------|---------|-----------|
//! | client port | OS-assigned ephemeral port of the extension socket | changes every reconnect |
//! | server port | listening port the extension connected to | stable across reconnects |
//!
//! Connections are keyed by client port. A `server port → client port` map
//! lets callers address the current tab by the stable port.
//!
//! At most one connection is active at any instant. Registering a new
//! connection sends `disconnect{reason: "new_connection"}` to every active
//! one and closes it, inside the same critical section.

// ============================================================================
// Imports
// ============================================================================

use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::protocol::OutboundFrame;
use crate::transport::SocketHandle;

// ============================================================================
// Constants
// ============================================================================

/// `disconnect.reason` sent to a superseded tab.
pub const NEW_CONNECTION_REASON: &str = "new_connection";

const NEW_CONNECTION_MESSAGE: &str = "Another browser tab has connected";

// ============================================================================
// Connection
// ============================================================================

/// One extension connection.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    /// Ephemeral client port (primary key).
    pub client_port: u16,
    /// Listening port the client connected to.
    pub server_port: u16,
    /// Write handle.
    #[serde(skip)]
    pub socket: SocketHandle,
    /// `User-Agent` of the upgrade request.
    pub user_agent: Option<String>,
    /// Last URL reported or navigated to.
    pub current_url: Option<String>,
    /// Whether this is the active tab.
    pub is_active: bool,
    /// When the connection was registered.
    pub connected_at: DateTime<Utc>,
    /// Last inbound console activity.
    pub last_activity: DateTime<Utc>,
    /// Console messages received.
    pub message_count: u64,
}

/// Registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Registered connections, active or not.
    pub total_connections: usize,
    /// Active connections (0 or 1).
    pub active_connections: usize,
    /// Console messages received across all connections.
    pub total_messages: u64,
    /// Every registered connection.
    pub connections: Vec<Connection>,
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

#[derive(Default)]
struct RegistryState {
    connections: FxHashMap<u16, Connection>,
    server_to_client: FxHashMap<u16, u16>,
}

impl RegistryState {
    /// Resolves `port` as a client port, then as a server port.
    fn resolve(&self, port: u16) -> Option<u16> {
        if self.connections.contains_key(&port) {
            return Some(port);
        }
        self.server_to_client
            .get(&port)
            .copied()
            .filter(|client_port| self.connections.contains_key(client_port))
    }

    fn any_active(&self) -> Option<&Connection> {
        self.connections
            .values()
            .filter(|connection| connection.is_active)
            .max_by_key(|connection| connection.connected_at)
    }
}

/// Tracks extension connections by client and server port.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    server_port_range: RangeInclusive<u16>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connection_count())
            .field("server_port_range", &self.server_port_range)
            .finish()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    ///
    /// Lookups for an unknown port inside `server_port_range` fall back to
    /// the active connection.
    #[must_use]
    pub fn new(server_port_range: RangeInclusive<u16>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            server_port_range,
        }
    }

    /// Registers a connection as the sole active one.
    ///
    /// Every previously active connection is marked inactive, sent a
    /// `disconnect` frame and closed. It stays registered until its own
    /// disconnect removes it.
    pub fn add_connection(
        &self,
        client_port: u16,
        server_port: u16,
        socket: SocketHandle,
        user_agent: Option<String>,
    ) -> Connection {
        let now = Utc::now();
        let connection = Connection {
            client_port,
            server_port,
            socket,
            user_agent,
            current_url: None,
            is_active: true,
            connected_at: now,
            last_activity: now,
            message_count: 0,
        };

        let mut state = self.state.write();

        for previous in state
            .connections
            .values_mut()
            .filter(|existing| existing.is_active)
        {
            previous.is_active = false;

            info!(
                client_port = previous.client_port,
                new_client_port = client_port,
                "Superseding active connection"
            );

            let notice = OutboundFrame::disconnect(NEW_CONNECTION_REASON, NEW_CONNECTION_MESSAGE);
            if let Err(e) = previous.socket.send(&notice) {
                warn!(client_port = previous.client_port, error = %e, "Disconnect notice not sent");
            }
            previous.socket.close();
        }

        state.connections.insert(client_port, connection.clone());
        state.server_to_client.insert(server_port, client_port);

        debug!(client_port, server_port, "Connection registered");
        connection
    }

    /// Looks up by client port, then server port, then (for ports inside
    /// the server range) any active connection.
    #[must_use]
    pub fn get_connection(&self, port: u16) -> Option<Connection> {
        let state = self.state.read();

        if let Some(client_port) = state.resolve(port) {
            return state.connections.get(&client_port).cloned();
        }

        if self.server_port_range.contains(&port) {
            return state.any_active().cloned();
        }

        None
    }

    /// Resolves `port` to an active connection.
    ///
    /// `None` selects any active connection. A port that resolves to an
    /// inactive connection falls back to any active one.
    #[must_use]
    pub fn get_active_connection(&self, port: Option<u16>) -> Option<Connection> {
        if let Some(port) = port
            && let Some(connection) = self.get_connection(port)
            && connection.is_active
        {
            return Some(connection);
        }

        self.get_any_active_connection()
    }

    /// Returns the active connection, if any.
    #[must_use]
    pub fn get_any_active_connection(&self) -> Option<Connection> {
        self.state.read().any_active().cloned()
    }

    /// Marks a connection inactive and evicts it.
    ///
    /// The server-port mapping is dropped only if it still points at this
    /// client.
    pub fn remove_connection(&self, client_port: u16) -> Option<Connection> {
        let mut state = self.state.write();

        let mut removed = state.connections.remove(&client_port)?;
        removed.is_active = false;

        if state.server_to_client.get(&removed.server_port) == Some(&client_port) {
            state.server_to_client.remove(&removed.server_port);
        }

        debug!(client_port, server_port = removed.server_port, "Connection removed");
        Some(removed)
    }

    /// Records inbound activity on a connection.
    pub fn update_activity(&self, client_port: u16) {
        if let Some(connection) = self.state.write().connections.get_mut(&client_port) {
            connection.last_activity = Utc::now();
            connection.message_count += 1;
        }
    }

    /// Sets the current URL of the connection `port` resolves to.
    pub fn update_url(&self, port: u16, url: impl Into<String>) {
        let mut state = self.state.write();
        if let Some(client_port) = state.resolve(port)
            && let Some(connection) = state.connections.get_mut(&client_port)
        {
            connection.current_url = Some(url.into());
        }
    }

    /// Number of registered connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of active connections.
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state
            .read()
            .connections
            .values()
            .filter(|connection| connection.is_active)
            .count()
    }

    /// Server ports that fall back to the active connection.
    #[inline]
    #[must_use]
    pub fn server_port_range(&self) -> RangeInclusive<u16> {
        self.server_port_range.clone()
    }

    /// Connection counts and per-connection details.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();

        let mut connections: Vec<Connection> = state.connections.values().cloned().collect();
        connections.sort_by_key(|connection| connection.connected_at);

        RegistryStats {
            total_connections: connections.len(),
            active_connections: connections.iter().filter(|c| c.is_active).count(),
            total_messages: connections.iter().map(|c| c.message_count).sum(),
            connections,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use proptest::prelude::*;
    use tokio::sync::mpsc;

    use crate::transport::socket::SocketCommand;

    const RANGE: RangeInclusive<u16> = 8851..=8895;

    fn socket(client_port: u16) -> (SocketHandle, mpsc::UnboundedReceiver<SocketCommand>) {
        SocketHandle::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), client_port),
            8851,
        )
    }

    fn add(registry: &ConnectionRegistry, client_port: u16, server_port: u16) -> mpsc::UnboundedReceiver<SocketCommand> {
        let (socket, rx) = socket(client_port);
        registry.add_connection(client_port, server_port, socket, Some("TestAgent/1.0".into()));
        rx
    }

    #[test]
    fn test_new_connection_supersedes_active() {
        let registry = ConnectionRegistry::new(RANGE);
        let mut first_rx = add(&registry, 50001, 8851);
        let _second_rx = add(&registry, 50002, 8851);

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.connection_count(), 2);
        assert!(!registry.get_connection(50001).expect("first").is_active);

        match first_rx.try_recv().expect("disconnect notice") {
            SocketCommand::Send(text) => {
                let frame: serde_json::Value = serde_json::from_str(&text).expect("json");
                assert_eq!(frame["type"], "disconnect");
                assert_eq!(frame["reason"], NEW_CONNECTION_REASON);
            }
            SocketCommand::Close => panic!("notice must precede close"),
        }
        assert!(matches!(first_rx.try_recv(), Ok(SocketCommand::Close)));
    }

    #[test]
    fn test_lookup_by_client_then_server_port() {
        let registry = ConnectionRegistry::new(RANGE);
        let _rx = add(&registry, 50001, 8852);

        assert_eq!(registry.get_connection(50001).expect("client").client_port, 50001);
        assert_eq!(registry.get_connection(8852).expect("server").client_port, 50001);
        assert!(registry.get_connection(9999).is_none());
    }

    #[test]
    fn test_unknown_port_in_range_falls_back_to_active() {
        let registry = ConnectionRegistry::new(RANGE);
        let _rx = add(&registry, 50001, 8852);

        let connection = registry.get_connection(8870).expect("fallback");
        assert_eq!(connection.client_port, 50001);
    }

    #[test]
    fn test_get_active_connection_skips_inactive() {
        let registry = ConnectionRegistry::new(RANGE);
        let _a = add(&registry, 50001, 8851);
        let _b = add(&registry, 50002, 8852);

        let resolved = registry.get_active_connection(Some(50001)).expect("active");
        assert_eq!(resolved.client_port, 50002);
        assert_eq!(
            registry.get_active_connection(None).expect("any").client_port,
            50002
        );
    }

    #[test]
    fn test_remove_keeps_newer_server_mapping() {
        let registry = ConnectionRegistry::new(RANGE);
        let _old = add(&registry, 50001, 8851);
        let _new = add(&registry, 50002, 8851);

        let removed = registry.remove_connection(50001).expect("removed");
        assert!(!removed.is_active);
        assert_eq!(registry.get_connection(8851).expect("mapped").client_port, 50002);

        registry.remove_connection(50002);
        assert!(registry.get_connection(8851).is_none());
        assert!(registry.remove_connection(50002).is_none());
    }

    #[test]
    fn test_activity_and_url_updates() {
        let registry = ConnectionRegistry::new(RANGE);
        let _rx = add(&registry, 50001, 8851);

        registry.update_activity(50001);
        registry.update_activity(50001);
        registry.update_url(8851, "https://example.test/");

        let connection = registry.get_connection(50001).expect("connection");
        assert_eq!(connection.message_count, 2);
        assert_eq!(connection.current_url.as_deref(), Some("https://example.test/"));

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.total_messages, 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { client_port: u16, server_port: u16 },
        Remove { client_port: u16 },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (50000u16..50010, 8851u16..8855)
                .prop_map(|(client_port, server_port)| Op::Add { client_port, server_port }),
            (50000u16..50010).prop_map(|client_port| Op::Remove { client_port }),
        ]
    }

    proptest! {
        #[test]
        fn prop_at_most_one_active(ops in prop::collection::vec(op(), 1..60)) {
            let registry = ConnectionRegistry::new(RANGE);
            let mut receivers = Vec::new();

            for op in ops {
                match op {
                    Op::Add { client_port, server_port } => {
                        receivers.push(add(&registry, client_port, server_port));
                    }
                    Op::Remove { client_port } => {
                        registry.remove_connection(client_port);
                    }
                }
                prop_assert!(registry.active_count() <= 1);
            }
        }
    }
}
