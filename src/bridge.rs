//! Bridge coordinator.
//!
//! [`Bridge`] wires the transport, the browser service and the controller
//! together and owns their lifecycle.
//!
//! # Example
//!
//! ```no_run
//! use browser_bridge::{Bridge, BridgeConfig};
//!
//! # async fn example() -> browser_bridge::Result<()> {
//! let bridge = Bridge::new(BridgeConfig::default())?;
//! let port = bridge.start().await?;
//! println!("extension endpoint: ws://127.0.0.1:{port}");
//!
//! let result = bridge.controller().navigate("https://example.com", Some(port)).await;
//! println!("navigated via {}", result.method);
//!
//! bridge.stop().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::BridgeConfig;
use crate::control::BrowserController;
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use crate::service::{BrowserService, ServiceStats};
use crate::storage::{MemoryStorage, Storage};
use crate::transport::{Transport, TransportOptions};

// ============================================================================
// Types
// ============================================================================

struct BridgeInner {
    config: BridgeConfig,
    transport: Transport,
    service: Arc<BrowserService>,
    controller: BrowserController,
}

// ============================================================================
// Bridge
// ============================================================================

/// Transport, service and controller under one lifecycle.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("port", &self.port())
            .field("mode", &self.inner.controller.mode())
            .field("connections", &self.inner.transport.connection_count())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Creates a bridge that keeps console history in memory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `config` fails validation.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        Self::with_storage(config, Arc::new(MemoryStorage::default()))
    }

    /// Creates a bridge persisting console messages to `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `config` fails validation.
    pub fn with_storage(config: BridgeConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new(config.port_range()));
        let service = Arc::new(BrowserService::new(registry, storage, &config));
        let transport = Transport::new(TransportOptions::from(&config));
        service.register(&transport);

        let controller = BrowserController::from_config(Arc::clone(&service), &config.control)?;

        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                transport,
                service,
                controller,
            }),
        })
    }

    /// Binds the transport, then starts background tasks.
    ///
    /// Returns the bound port. Calling it again returns the same port.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PortRangeExhausted`] if no port in the range
    /// is free; nothing is left running in that case.
    pub async fn start(&self) -> Result<u16> {
        let port = self.inner.transport.start().await?;
        self.inner.service.start();
        info!(port, mode = %self.inner.controller.mode(), "Bridge started");
        Ok(port)
    }

    /// Closes every connection, then flushes buffers and resolves pending
    /// requests.
    pub async fn stop(&self) {
        self.inner.transport.stop().await;
        self.inner.service.shutdown().await;
        info!("Bridge stopped");
    }

    /// Configuration the bridge was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// WebSocket transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    /// Browser service.
    #[inline]
    #[must_use]
    pub fn service(&self) -> &Arc<BrowserService> {
        &self.inner.service
    }

    /// Backend controller.
    #[inline]
    #[must_use]
    pub fn controller(&self) -> &BrowserController {
        &self.inner.controller
    }

    /// Bound port, while running.
    #[inline]
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.inner.transport.port()
    }

    /// Connection, buffer and correlation statistics.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        self.inner.service.stats()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    use crate::config::ControlMode;
    use crate::control::ControlMethod;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn config() -> BridgeConfig {
        BridgeConfig::builder()
            .port_range(39051, 39150)
            .mode(ControlMode::Extension)
            .flush_interval(Duration::from_millis(50))
            .build()
            .expect("config")
    }

    async fn send(client: &mut Client, value: Value) {
        client
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("client send");
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            let message = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("frame within deadline")
                .expect("stream open")
                .expect("read ok");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("json frame");
            }
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BridgeConfig {
            replay_limit: 0,
            ..BridgeConfig::default()
        };
        assert!(Bridge::new(config).is_err());
    }

    #[tokio::test]
    async fn test_failed_start_leaves_nothing_running() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let taken = occupied.local_addr().expect("addr").port();

        let config = BridgeConfig::builder()
            .port_range(taken, taken)
            .build()
            .expect("config");
        let bridge = Bridge::new(config).expect("bridge");

        let err = bridge.start().await.expect_err("range exhausted");
        assert!(matches!(err, crate::Error::PortRangeExhausted { .. }));
        assert!(!bridge.service().correlator().is_sweeping());
        assert_eq!(bridge.port(), None);
    }

    #[tokio::test]
    async fn test_console_messages_reach_storage() -> anyhow::Result<()> {
        let storage = Arc::new(MemoryStorage::default());
        let bridge = Bridge::with_storage(config(), storage.clone())?;
        let port = bridge.start().await?;

        let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}")).await?;
        send(&mut client, json!({"type": "connection_init", "lastSequence": 0})).await;
        assert_eq!(next_json(&mut client).await["type"], "connection_ack");

        send(
            &mut client,
            json!({"type": "console", "level": "error", "message": "boom", "url": "https://a.test"}),
        )
        .await;

        wait_for(|| !storage.is_empty()).await;

        let logs = bridge.service().query_logs(port, 10, None).await?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "boom");
        assert_eq!(logs[0].port, port);

        bridge.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_controller_navigates_through_extension() {
        let bridge = Bridge::new(config()).expect("bridge");
        let port = bridge.start().await.expect("start");

        let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .expect("connect");
        send(&mut client, json!({"type": "connection_init", "lastSequence": 0})).await;
        next_json(&mut client).await;

        let registry = Arc::clone(bridge.service().registry());
        wait_for(|| registry.active_count() == 1).await;

        let result = bridge
            .controller()
            .navigate("https://example.com", Some(port))
            .await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.method, ControlMethod::Extension);

        let frame = next_json(&mut client).await;
        assert_eq!(frame["type"], "navigate");
        assert_eq!(frame["url"], "https://example.com");

        assert_eq!(bridge.stats().registry.active_connections, 1);
        bridge.stop().await;
    }
}
