//! Request/response correlation over a fire-and-forget socket.
//!
//! Each request gets a fresh [`RequestId`]. The pending entry is registered
//! before the frame is written, so a fast response can never miss its
//! waiter. A request that is not answered in time resolves to `None`, never
//! to an error.
//!
//! # Example
//!
//! ```ignore
//! let correlator = Correlator::new(Duration::from_secs(1));
//! correlator.start_cleanup_task();
//!
//! let content = correlator
//!     .send_request(&socket, "extract_content", None, Duration::from_secs(10), None)
//!     .await;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::identifiers::{RequestId, TabId};
use crate::protocol::correlated_request;
use crate::transport::SocketHandle;

// ============================================================================
// Types
// ============================================================================

/// An in-flight request awaiting its response.
struct PendingRequest {
    created_at: Instant,
    timeout: Duration,
    resolver: oneshot::Sender<Option<Value>>,
}

impl PendingRequest {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.timeout
    }
}

type PendingMap = FxHashMap<RequestId, PendingRequest>;

struct CleanupTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

// ============================================================================
// Correlator
// ============================================================================

/// Matches responses to outstanding requests by correlation id.
pub struct Correlator {
    pending: Arc<Mutex<PendingMap>>,
    sweep_interval: Duration,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl Correlator {
    /// Creates a correlator whose sweep runs every `sweep_interval`.
    #[must_use]
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(FxHashMap::default())),
            sweep_interval,
            cleanup: Mutex::new(None),
        }
    }

    /// Writes `{type, requestId, tabId, ...payload}` and waits for the
    /// matching response.
    ///
    /// Returns `None` on timeout, on write failure, or when the correlator
    /// shuts down first.
    pub async fn send_request(
        &self,
        socket: &SocketHandle,
        message_type: &str,
        payload: Option<Value>,
        request_timeout: Duration,
        tab_id: Option<TabId>,
    ) -> Option<Value> {
        let request_id = RequestId::generate();
        let response_rx = self.register(request_id, request_timeout);

        let frame = correlated_request(message_type, request_id, tab_id, payload);
        if let Err(e) = socket.send_json(&frame) {
            self.pending.lock().remove(&request_id);
            warn!(%request_id, message_type, error = %e, "Request not sent");
            return None;
        }

        debug!(%request_id, message_type, client_port = socket.client_port(), "Request sent");

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => None,
            Err(_) => {
                self.pending.lock().remove(&request_id);
                debug!(
                    %request_id,
                    message_type,
                    timeout_ms = request_timeout.as_millis() as u64,
                    "Request timed out"
                );
                None
            }
        }
    }

    /// Resolves the waiter for `request_id`.
    ///
    /// Returns `false` if no waiter exists (unknown, expired or already
    /// answered).
    pub fn handle_response(&self, request_id: RequestId, response: Value) -> bool {
        let Some(pending) = self.pending.lock().remove(&request_id) else {
            debug!(%request_id, "Response without pending request");
            return false;
        };

        trace!(%request_id, "Response correlated");
        let _ = pending.resolver.send(Some(response));
        true
    }

    /// Starts the periodic sweep of expired entries. Idempotent.
    pub fn start_cleanup_task(&self) {
        let mut cleanup = self.cleanup.lock();
        if cleanup.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let pending = Arc::clone(&self.pending);
        let sweep_interval = self.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => sweep_expired(&pending),
                }
            }

            debug!("Correlator sweep stopped");
        });

        *cleanup = Some(CleanupTask { token, handle });
    }

    /// Stops the sweep and resolves every outstanding waiter to `None`.
    pub async fn shutdown(&self) {
        let task = self.cleanup.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Correlator sweep task failed");
            }
        }

        let drained: Vec<PendingRequest> =
            self.pending.lock().drain().map(|(_, pending)| pending).collect();

        if !drained.is_empty() {
            debug!(count = drained.len(), "Pending requests abandoned on shutdown");
        }

        for pending in drained {
            let _ = pending.resolver.send(None);
        }
    }

    /// Returns `true` while the periodic sweep is running.
    #[inline]
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.cleanup.lock().is_some()
    }

    /// Number of unanswered requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn register(
        &self,
        request_id: RequestId,
        request_timeout: Duration,
    ) -> oneshot::Receiver<Option<Value>> {
        let (resolver, response_rx) = oneshot::channel();

        self.pending.lock().insert(
            request_id,
            PendingRequest {
                created_at: Instant::now(),
                timeout: request_timeout,
                resolver,
            },
        );

        response_rx
    }
}

/// Drops every entry older than its own timeout, resolving it to `None`.
fn sweep_expired(pending: &Mutex<PendingMap>) {
    let now = Instant::now();

    let expired: Vec<(RequestId, PendingRequest)> = {
        let mut map = pending.lock();
        let ids: Vec<RequestId> = map
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| map.remove(&id).map(|entry| (id, entry)))
            .collect()
    };

    for (request_id, entry) in expired {
        debug!(%request_id, "Expired request swept");
        let _ = entry.resolver.send(None);
    }
}

// ============================================================================
// Tests
// ============================================================================
