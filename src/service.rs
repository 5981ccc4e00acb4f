//! Browser service: the transport's handler for extension traffic.
//!
//! Owns the registry, the console buffers, the correlator and the storage
//! handle, and exposes the outbound operations the controller's extension
//! backend is built on.
//!
//! # Handled Frames
//!
//! | Frame | Action |
//! |-------|--------|
//! | connect | register as sole active connection, start flush task |
//! | disconnect | final flush, stop flush task, evict |
//! | `console` | parse, update activity and URL, buffer |
//! | `batch` | each entry as `console` |
//! | `*_response` | resolve pending request with `response` |
//! | `content_extracted`, `semantic_dom_extracted` | resolve with `response` |
//! | `screenshot_captured` | resolve with the whole frame |
//! | anything else | resolve if it carries `requestId`, else drop |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::identifiers::{RequestId, TabId};
use crate::ingest::MessageBuffers;
use crate::protocol::inbound::{BATCH, CONSOLE, DEFAULT_HANDLER};
use crate::protocol::{
    Batch, ConsoleMessage, CorrelatedResponse, InboundFrame, LogLevel, OutboundFrame,
    now_timestamp,
};
use crate::registry::{Connection, ConnectionRegistry, RegistryStats};
use crate::storage::Storage;
use crate::transport::{
    ConnectionEvent, ConnectionInfo, InboundMessage, MessageHandler, Transport,
};

// ============================================================================
// Constants
// ============================================================================

/// Default deadline for correlated extension requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response frames that carry `{requestId, response}`.
const RESPONSE_TYPES: &[&str] = &[
    "dom_command_response",
    "extract_content_response",
    "extract_semantic_dom_response",
    "capture_screenshot_response",
    "list_tabs_response",
    "content_extracted",
    "semantic_dom_extracted",
];

/// Legacy response frame whose payload is the whole frame.
const SCREENSHOT_CAPTURED: &str = "screenshot_captured";

// ============================================================================
// ServiceStats
// ============================================================================

/// Registry statistics plus buffer and correlation counters.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Connection counts and details.
    #[serde(flatten)]
    pub registry: RegistryStats,
    /// Unflushed console entries per client port.
    pub buffers: BTreeMap<u16, usize>,
    /// Unanswered correlated requests.
    pub pending_requests: usize,
}

// ============================================================================
// BrowserService
// ============================================================================

/// Handles extension connections, console ingestion and correlated requests.
pub struct BrowserService {
    registry: Arc<ConnectionRegistry>,
    buffers: MessageBuffers,
    correlator: Correlator,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for BrowserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserService")
            .field("registry", &self.registry)
            .field("buffers", &self.buffers)
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

impl BrowserService {
    /// Creates a service sharing `registry` and persisting to `storage`.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        storage: Arc<dyn Storage>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            buffers: MessageBuffers::new(
                Arc::clone(&storage),
                config.log_buffer_capacity,
                config.flush_interval(),
            ),
            correlator: Correlator::new(config.request_sweep_interval()),
            registry,
            storage,
        }
    }

    /// Shared connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Request correlator.
    #[inline]
    #[must_use]
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Console buffers.
    #[inline]
    #[must_use]
    pub fn buffers(&self) -> &MessageBuffers {
        &self.buffers
    }

    /// Registers every connection and message handler on `transport`.
    pub fn register(self: &Arc<Self>, transport: &Transport) {
        let service = Arc::clone(self);
        transport.register_connection_handler(
            ConnectionEvent::Connect,
            Arc::new(move |info: ConnectionInfo| {
                let service = Arc::clone(&service);
                async move { service.handle_connect(info).await }
            }),
        );

        let service = Arc::clone(self);
        transport.register_connection_handler(
            ConnectionEvent::Disconnect,
            Arc::new(move |info: ConnectionInfo| {
                let service = Arc::clone(&service);
                async move { service.handle_disconnect(info).await }
            }),
        );

        transport.register_message_handler(
            CONSOLE,
            self.handler(|service, message| async move {
                service.handle_console_message(&message)
            }),
        );
        transport.register_message_handler(
            BATCH,
            self.handler(|service, message| async move {
                service.handle_batch_messages(&message)
            }),
        );

        for response_type in RESPONSE_TYPES {
            transport.register_message_handler(
                *response_type,
                self.handler(|service, message| async move {
                    service.handle_response(&message.frame)
                }),
            );
        }

        transport.register_message_handler(
            SCREENSHOT_CAPTURED,
            self.handler(|service, message| async move {
                service.handle_screenshot_captured(&message.frame)
            }),
        );
        transport.register_message_handler(
            DEFAULT_HANDLER,
            self.handler(|service, message| async move {
                service.handle_unrouted(&message.frame)
            }),
        );
    }

    fn handler<F, Fut>(self: &Arc<Self>, handle: F) -> Arc<dyn MessageHandler>
    where
        F: Fn(Arc<Self>, InboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let service = Arc::clone(self);
        Arc::new(move |message: InboundMessage| handle(Arc::clone(&service), message))
    }

    /// Starts the correlator sweep.
    pub fn start(&self) {
        self.correlator.start_cleanup_task();
    }

    /// Stops the sweep, resolves pending requests and flushes every buffer.
    pub async fn shutdown(&self) {
        self.correlator.shutdown().await;
        self.buffers.shutdown().await;
        info!("Browser service shut down");
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Registers a new extension connection.
    ///
    /// # Errors
    ///
    /// Infallible today; the signature matches the handler trait.
    pub async fn handle_connect(&self, info: ConnectionInfo) -> Result<()> {
        let client_port = info.client_port();
        let server_port = info.server_port;

        self.registry
            .add_connection(client_port, server_port, info.socket, info.user_agent);
        self.buffers.start(client_port);

        info!(client_port, server_port, remote = %info.remote_addr, "Browser connected");
        Ok(())
    }

    /// Flushes and evicts a closed connection.
    ///
    /// # Errors
    ///
    /// Infallible today; the signature matches the handler trait.
    pub async fn handle_disconnect(&self, info: ConnectionInfo) -> Result<()> {
        let client_port = info.client_port();

        self.buffers.stop(client_port).await;
        self.registry.remove_connection(client_port);

        info!(client_port, server_port = info.server_port, "Browser disconnected");
        Ok(())
    }

    /// Buffers one `console` frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a field has the wrong type.
    pub fn handle_console_message(&self, message: &InboundMessage) -> Result<()> {
        let entry = ConsoleMessage::from_frame(message.payload(), message.server_port())?;
        self.ingest(message.client_port(), entry);
        Ok(())
    }

    /// Buffers every entry of a `batch` frame, skipping malformed ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `messages` is not an array.
    pub fn handle_batch_messages(&self, message: &InboundMessage) -> Result<()> {
        let batch: Batch = message.frame.decode()?;
        let client_port = message.client_port();
        let server_port = message.server_port();
        let count = batch.messages.len();

        for raw in &batch.messages {
            match ConsoleMessage::from_frame(raw, server_port) {
                Ok(entry) => self.ingest(client_port, entry),
                Err(e) => warn!(client_port, error = %e, "Skipping malformed batch entry"),
            }
        }

        debug!(client_port, count, "Batch processed");
        Ok(())
    }

    /// Resolves a `{requestId, response}` frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `requestId` is missing or malformed.
    pub fn handle_response(&self, frame: &InboundFrame) -> Result<()> {
        let CorrelatedResponse {
            request_id,
            response,
        } = frame.decode()?;

        if self.correlator.handle_response(request_id, response) {
            debug!(%request_id, frame_type = %frame.frame_type, "Response received");
        }
        Ok(())
    }

    /// Resolves a `screenshot_captured` frame with the frame itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `requestId` is missing.
    pub fn handle_screenshot_captured(&self, frame: &InboundFrame) -> Result<()> {
        let request_id = frame
            .request_id()
            .ok_or_else(|| Error::protocol("screenshot_captured without requestId"))?;

        self.correlator.handle_response(request_id, frame.payload.clone());
        Ok(())
    }

    /// Correlates unrouted frames carrying a `requestId`; drops the rest.
    ///
    /// # Errors
    ///
    /// Infallible today; the signature matches the handler trait.
    pub fn handle_unrouted(&self, frame: &InboundFrame) -> Result<()> {
        let Some(request_id) = frame.request_id() else {
            debug!(frame_type = %frame.frame_type, "Dropping unrouted frame");
            return Ok(());
        };

        let response = frame
            .payload
            .get("response")
            .cloned()
            .unwrap_or_else(|| frame.payload.clone());
        self.correlator.handle_response(request_id, response);
        Ok(())
    }

    fn ingest(&self, client_port: u16, entry: ConsoleMessage) {
        self.registry.update_activity(client_port);
        if let Some(url) = &entry.url {
            self.registry.update_url(client_port, url.clone());
        }

        if entry.level.is_high_priority() {
            let preview: String = entry.message.chars().take(100).collect();
            info!(client_port, level = %entry.level, "{preview}");
        }

        self.buffers.append(client_port, entry);
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn connection(&self, port: Option<u16>) -> Result<Connection> {
        self.registry
            .get_active_connection(port)
            .ok_or_else(|| Error::no_active_connection(port))
    }

    /// Sends `navigate{url}` to the tab `port` resolves to.
    ///
    /// Returns `false` if no connection exists or the socket is gone.
    pub fn navigate_browser(&self, port: Option<u16>, url: &str) -> bool {
        let Ok(connection) = self.connection(port) else {
            warn!(?port, "No active browser connection");
            return false;
        };

        if let Err(e) = connection.socket.send(&OutboundFrame::navigate(url)) {
            warn!(client_port = connection.client_port, error = %e, "Navigation not sent");
            return false;
        }

        self.registry.update_url(connection.client_port, url);
        info!(client_port = connection.client_port, url, "Navigation sent");
        true
    }

    /// Sends an uncorrelated `dom_command`. Returns its request id.
    pub fn send_dom_command(
        &self,
        port: Option<u16>,
        command: Value,
        tab_id: Option<TabId>,
    ) -> Option<RequestId> {
        let connection = self.connection(port).ok()?;
        let request_id = RequestId::generate();

        let frame = OutboundFrame::DomCommand {
            request_id,
            tab_id,
            command,
            timestamp: now_timestamp(),
        };

        match connection.socket.send(&frame) {
            Ok(()) => {
                debug!(%request_id, client_port = connection.client_port, "DOM command sent");
                Some(request_id)
            }
            Err(e) => {
                warn!(client_port = connection.client_port, error = %e, "DOM command not sent");
                None
            }
        }
    }

    /// Sends a correlated request and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveConnection`] if no tab is connected
    /// - [`Error::Timeout`] if the extension does not answer in time
    pub async fn request(
        &self,
        port: Option<u16>,
        message_type: &str,
        payload: Option<Value>,
        tab_id: Option<TabId>,
        timeout: Duration,
    ) -> Result<Value> {
        let connection = self.connection(port)?;

        self.correlator
            .send_request(&connection.socket, message_type, payload, timeout, tab_id)
            .await
            .ok_or_else(|| Error::timeout(message_type, timeout.as_millis() as u64))
    }

    /// Sends a correlated `dom_command` and waits for the result.
    ///
    /// # Errors
    ///
    /// See [`BrowserService::request`].
    pub async fn dom_request(
        &self,
        port: Option<u16>,
        command: Value,
        tab_id: Option<TabId>,
        timeout: Duration,
    ) -> Result<Value> {
        let payload = json!({ "command": command, "timestamp": now_timestamp() });
        self.request(port, "dom_command", Some(payload), tab_id, timeout)
            .await
    }

    /// Extracts readable page content.
    ///
    /// # Errors
    ///
    /// See [`BrowserService::request`].
    pub async fn extract_content(
        &self,
        port: Option<u16>,
        tab_id: Option<TabId>,
        timeout: Duration,
    ) -> Result<Value> {
        self.request(port, "extract_content", None, tab_id, timeout)
            .await
    }

    /// Extracts headings, landmarks, links and forms.
    ///
    /// # Errors
    ///
    /// See [`BrowserService::request`].
    pub async fn extract_semantic_dom(
        &self,
        port: Option<u16>,
        tab_id: Option<TabId>,
        options: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let payload = json!({ "options": options.unwrap_or_else(|| json!({})) });
        self.request(port, "extract_semantic_dom", Some(payload), tab_id, timeout)
            .await
    }

    /// Captures the visible tab through the extension.
    ///
    /// # Errors
    ///
    /// See [`BrowserService::request`].
    pub async fn capture_screenshot(&self, port: Option<u16>, timeout: Duration) -> Result<Value> {
        self.request(port, "capture_screenshot", None, None, timeout)
            .await
    }

    /// Lists the browser's tabs.
    ///
    /// # Errors
    ///
    /// See [`BrowserService::request`].
    pub async fn list_tabs(&self, port: Option<u16>, timeout: Duration) -> Result<Value> {
        self.request(port, "list_tabs", None, None, timeout).await
    }

    /// Returns the newest `last_n` console messages for `port`, stored
    /// history first, then unflushed entries.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the history cannot be read.
    pub async fn query_logs(
        &self,
        port: u16,
        last_n: usize,
        level_filter: Option<&[LogLevel]>,
    ) -> Result<Vec<ConsoleMessage>> {
        let (client_port, server_port) = match self.registry.get_connection(port) {
            Some(connection) => (Some(connection.client_port), connection.server_port),
            None => (None, port),
        };

        let mut buffered = client_port
            .map(|client_port| self.buffers.snapshot(client_port, level_filter))
            .unwrap_or_default();

        let remaining = last_n.saturating_sub(buffered.len());
        let mut messages = if remaining > 0 {
            self.storage
                .query_messages(server_port, remaining, level_filter)
                .await?
        } else {
            Vec::new()
        };

        messages.append(&mut buffered);
        let excess = messages.len().saturating_sub(last_n);
        messages.drain(..excess);

        Ok(messages)
    }

    /// Connection, buffer and correlation statistics.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            registry: self.registry.stats(),
            buffers: self.buffers.buffer_sizes(),
            pending_requests: self.correlator.pending_count(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
