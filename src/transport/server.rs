//! Sequenced WebSocket server the extension connects to.
//!
//! # Connection Flow
//!
//! 1. [`Transport::start`] binds the first free port of the configured range
//! 2. The extension connects; connect handlers run
//! 3. The extension sends `connection_init{lastSequence}`
//! 4. The server answers `connection_ack` with every retained event newer
//!    than `lastSequence` (most recent `replay_limit`, ascending)
//! 5. Other frames are dispatched by `type`, falling back to the `default`
//!    handler
//!
//! `heartbeat` and `server_info` are answered here and never dispatched.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::protocol::inbound::{CONNECTION_INIT, DEFAULT_HANDLER, HEARTBEAT, SERVER_INFO};
use crate::protocol::{ConnectionInit, Heartbeat, InboundFrame, OutboundFrame};

use super::handler::{
    ConnectionEvent, ConnectionHandler, ConnectionInfo, InboundMessage, MessageHandler,
};
use super::replay::ReplayBuffer;
use super::socket::{SocketCommand, SocketHandle};

// ============================================================================
// Constants
// ============================================================================

/// How long [`Transport::stop`] waits for connection tasks to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

// ============================================================================
// TransportOptions
// ============================================================================

/// Settings the transport needs from [`BridgeConfig`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Bind address.
    pub host: IpAddr,
    /// Inclusive discovery range.
    pub port_range: RangeInclusive<u16>,
    /// Version reported to the extension.
    pub server_version: String,
    /// Project directory reported in `server_info_response`.
    pub project_path: PathBuf,
    /// Replay ring capacity.
    pub replay_capacity: usize,
    /// Most events per `connection_ack`.
    pub replay_limit: usize,
}

impl From<&BridgeConfig> for TransportOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            host: config.host,
            port_range: config.port_range(),
            server_version: config.server_version.clone(),
            project_path: config.project_path.clone(),
            replay_capacity: config.replay_capacity,
            replay_limit: config.replay_limit,
        }
    }
}

// ============================================================================
// ServerInfo
// ============================================================================

/// Transport metadata, as returned in `server_info_response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Listening port, if started.
    pub port: Option<u16>,
    /// Project directory.
    pub project_path: String,
    /// Last component of the project directory.
    pub project_name: String,
    /// Server version.
    pub version: String,
}

impl ServerInfo {
    fn into_frame(self) -> OutboundFrame {
        OutboundFrame::ServerInfoResponse {
            port: self.port,
            project_path: self.project_path,
            project_name: self.project_name,
            version: self.version,
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Bound listener state, present between start and stop.
struct Running {
    port: u16,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

struct TransportInner {
    options: TransportOptions,
    message_handlers: RwLock<FxHashMap<String, Arc<dyn MessageHandler>>>,
    connection_handlers: RwLock<FxHashMap<ConnectionEvent, Arc<dyn ConnectionHandler>>>,
    clients: Mutex<FxHashMap<SocketAddr, SocketHandle>>,
    replay: Mutex<ReplayBuffer>,
    running: Mutex<Option<Running>>,
    starting: tokio::sync::Mutex<()>,
}

/// WebSocket server with sequenced replay and typed dispatch.
///
/// Cheap to clone; clones share the same server.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("port", &self.port())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a stopped transport.
    #[must_use]
    pub fn new(options: TransportOptions) -> Self {
        let replay = ReplayBuffer::new(options.replay_capacity);

        Self {
            inner: Arc::new(TransportInner {
                options,
                message_handlers: RwLock::new(FxHashMap::default()),
                connection_handlers: RwLock::new(FxHashMap::default()),
                clients: Mutex::new(FxHashMap::default()),
                replay: Mutex::new(replay),
                running: Mutex::new(None),
                starting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Binds the first free port in the range and starts accepting.
    ///
    /// Returns the bound port. Calling again while running returns the
    /// current port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortRangeExhausted`] if every port is taken.
    pub async fn start(&self) -> Result<u16> {
        let _starting = self.inner.starting.lock().await;
        if let Some(port) = self.port() {
            return Ok(port);
        }

        let (listener, port) =
            bind_first_available(self.inner.options.host, &self.inner.options.port_range).await?;

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(Arc::clone(&self.inner).accept_loop(
            listener,
            port,
            shutdown.clone(),
            tracker.clone(),
        ));

        *self.inner.running.lock() = Some(Running {
            port,
            shutdown,
            tracker,
        });

        info!(port, "Transport started");
        Ok(port)
    }

    /// Closes every socket and stops accepting. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.inner.running.lock().take() else {
            return;
        };

        info!(port = running.port, "Transport stopping");

        for socket in self.inner.clients.lock().values() {
            socket.close();
        }

        running.shutdown.cancel();
        running.tracker.close();

        if timeout(SHUTDOWN_GRACE, running.tracker.wait()).await.is_err() {
            warn!(port = running.port, "Connection tasks still running after grace period");
        }

        info!(port = running.port, "Transport stopped");
    }

    /// Registers the handler for one frame type, replacing any previous one.
    ///
    /// Register under `"default"` to receive otherwise unhandled frames.
    pub fn register_message_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let message_type = message_type.into();
        debug!(message_type = %message_type, "Message handler registered");
        self.inner
            .message_handlers
            .write()
            .insert(message_type, handler);
    }

    /// Registers the handler for a lifecycle event, replacing any previous one.
    pub fn register_connection_handler(
        &self,
        event: ConnectionEvent,
        handler: Arc<dyn ConnectionHandler>,
    ) {
        debug!(?event, "Connection handler registered");
        self.inner.connection_handlers.write().insert(event, handler);
    }

    /// Sends a frame to one socket.
    ///
    /// With `sequenced`, the frame is stamped with the next sequence number
    /// and retained for replay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket is gone.
    pub fn send_message(&self, socket: &SocketHandle, frame: Value, sequenced: bool) -> Result<()> {
        let frame = self.inner.prepare(frame, sequenced);
        socket.send_json(&frame)
    }

    /// Sends a frame to every connected socket.
    ///
    /// A sequenced frame is stamped and retained even when nobody is
    /// connected. Returns the number of sockets written.
    pub fn broadcast_message(&self, frame: Value, sequenced: bool) -> usize {
        let frame = self.inner.prepare(frame, sequenced);

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let clients: Vec<SocketHandle> = self.inner.clients.lock().values().cloned().collect();
        let delivered = clients
            .iter()
            .filter(|socket| socket.send_text(text.clone()).is_ok())
            .count();

        trace!(delivered, total = clients.len(), "Broadcast sent");
        delivered
    }

    /// Bound port, or `None` when stopped.
    #[inline]
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.inner.running.lock().as_ref().map(|running| running.port)
    }

    /// WebSocket URL of the running server.
    #[must_use]
    pub fn ws_url(&self) -> Option<String> {
        self.port()
            .map(|port| format!("ws://{}:{port}", self.inner.options.host))
    }

    /// Number of open sockets.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.clients.lock().len()
    }

    /// Last sequence number assigned.
    #[inline]
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.inner.replay.lock().current_sequence()
    }

    /// Port, project and version metadata.
    #[must_use]
    pub fn server_info(&self) -> ServerInfo {
        self.inner.server_info(self.port())
    }

    /// Inclusive discovery range.
    #[inline]
    #[must_use]
    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.inner.options.port_range.clone()
    }
}

// ============================================================================
// TransportInner - Accept Loop
// ============================================================================

impl TransportInner {
    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        port: u16,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) {
        debug!(port, "Accept loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        tracker.spawn(Arc::clone(&self).serve_connection(
                            stream,
                            remote_addr,
                            port,
                            shutdown.child_token(),
                            tracker.clone(),
                        ));
                    }
                    Err(e) => error!(error = %e, "Accept failed"),
                },
            }
        }

        debug!(port, "Accept loop terminated");
    }

    /// Runs one connection from upgrade to disconnect.
    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        server_port: u16,
        closed: CancellationToken,
        tracker: TaskTracker,
    ) {
        let mut user_agent = None;
        let upgrade = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| {
                user_agent = request
                    .headers()
                    .get(USER_AGENT)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                Ok::<Response, ErrorResponse>(response)
            },
        );

        let ws_stream = match upgrade.await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                warn!(error = %e, ?remote_addr, "WebSocket upgrade failed");
                return;
            }
        };

        info!(?remote_addr, server_port, "Extension connected");

        let (ws_write, mut ws_read) = ws_stream.split();
        let (socket, command_rx) = SocketHandle::new(remote_addr, server_port);

        tracker.spawn(run_writer(ws_write, command_rx, closed.clone(), remote_addr));

        self.clients.lock().insert(remote_addr, socket.clone());

        let info = ConnectionInfo {
            socket: socket.clone(),
            remote_addr,
            server_port,
            user_agent,
        };
        self.notify(ConnectionEvent::Connect, &info).await;

        loop {
            tokio::select! {
                biased;

                () = closed.cancelled() => break,

                message = ws_read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(&socket, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(?remote_addr, "Socket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, ?remote_addr, "Socket read failed");
                        break;
                    }
                },
            }
        }

        closed.cancel();
        self.clients.lock().remove(&remote_addr);
        self.notify(ConnectionEvent::Disconnect, &info).await;

        info!(?remote_addr, server_port, "Extension disconnected");
    }
}

/// Drains socket commands into the sink until closed.
async fn run_writer(
    mut ws_write: WsSink,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    closed: CancellationToken,
    remote_addr: SocketAddr,
) {
    loop {
        let command = tokio::select! {
            biased;
            command = command_rx.recv() => command,
            () = closed.cancelled() => None,
        };

        match command {
            Some(SocketCommand::Send(text)) => {
                if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                    warn!(error = %e, ?remote_addr, "Socket write failed");
                    break;
                }
            }
            Some(SocketCommand::Close) => {
                if let Err(e) = ws_write.close().await {
                    debug!(error = %e, ?remote_addr, "Close frame not delivered");
                }
                break;
            }
            None => break,
        }
    }

    closed.cancel();
}

// ============================================================================
// TransportInner - Dispatch
// ============================================================================

impl TransportInner {
    async fn handle_frame(&self, socket: &SocketHandle, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, client_port = socket.client_port(), "Dropping malformed frame");
                return;
            }
        };

        trace!(frame_type = %frame.frame_type, client_port = socket.client_port(), "Frame received");

        let reply = match frame.frame_type.as_str() {
            CONNECTION_INIT => self.handle_connection_init(socket, &frame),
            HEARTBEAT => {
                let timestamp = frame
                    .decode::<Heartbeat>()
                    .map(|heartbeat| heartbeat.timestamp)
                    .unwrap_or(Value::Null);
                socket.send(&OutboundFrame::Pong { timestamp })
            }
            SERVER_INFO => {
                let port = Some(socket.listening_port());
                socket.send(&self.server_info(port).into_frame())
            }
            _ => {
                self.dispatch(socket, frame).await;
                Ok(())
            }
        };

        if let Err(e) = reply {
            warn!(error = %e, client_port = socket.client_port(), "Reply not sent");
        }
    }

    fn handle_connection_init(&self, socket: &SocketHandle, frame: &InboundFrame) -> Result<()> {
        let init = frame.decode::<ConnectionInit>().unwrap_or_else(|e| {
            warn!(error = %e, "Malformed connection_init, replaying from the start");
            ConnectionInit {
                last_sequence: 0,
                extension_version: "unknown".to_string(),
                capabilities: Vec::new(),
            }
        });

        let (current_sequence, replay) = {
            let buffer = self.replay.lock();
            (
                buffer.current_sequence(),
                buffer.events_after(init.last_sequence, self.options.replay_limit),
            )
        };

        info!(
            client_port = socket.client_port(),
            last_sequence = init.last_sequence,
            current_sequence,
            replayed = replay.len(),
            extension_version = %init.extension_version,
            "Connection handshake"
        );

        socket.send(&OutboundFrame::ConnectionAck {
            server_version: self.options.server_version.clone(),
            current_sequence,
            replay,
        })
    }

    async fn dispatch(&self, socket: &SocketHandle, frame: InboundFrame) {
        let handler = {
            let handlers = self.message_handlers.read();
            handlers
                .get(&frame.frame_type)
                .or_else(|| handlers.get(DEFAULT_HANDLER))
                .cloned()
        };

        let Some(handler) = handler else {
            warn!(frame_type = %frame.frame_type, "No handler for frame type");
            return;
        };

        let frame_type = frame.frame_type.clone();
        let message = InboundMessage {
            frame,
            socket: socket.clone(),
        };

        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(frame_type = %frame_type, error = %e, "Message handler failed"),
            Err(_) => error!(frame_type = %frame_type, "Message handler panicked"),
        }
    }

    async fn notify(&self, event: ConnectionEvent, info: &ConnectionInfo) {
        let handler = self.connection_handlers.read().get(&event).cloned();
        let Some(handler) = handler else {
            return;
        };

        match AssertUnwindSafe(handler.handle(info.clone())).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(?event, error = %e, "Connection handler failed"),
            Err(_) => error!(?event, "Connection handler panicked"),
        }
    }

    fn prepare(&self, frame: Value, sequenced: bool) -> Value {
        if sequenced {
            self.replay.lock().push(frame)
        } else {
            frame
        }
    }

    fn server_info(&self, port: Option<u16>) -> ServerInfo {
        let project_name = self
            .options
            .project_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        ServerInfo {
            port,
            project_path: self.options.project_path.to_string_lossy().into_owned(),
            project_name,
            version: self.options.server_version.clone(),
        }
    }
}

/// Binds the first port of `range` that is free.
async fn bind_first_available(
    host: IpAddr,
    range: &RangeInclusive<u16>,
) -> Result<(TcpListener, u16)> {
    for port in range.clone() {
        match TcpListener::bind(SocketAddr::new(host, port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => debug!(port, error = %e, "Port unavailable"),
        }
    }

    Err(Error::port_range_exhausted(*range.start(), *range.end()))
}

// ============================================================================
// Tests
// ============================================================================
