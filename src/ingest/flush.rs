//! Per-connection buffers and their periodic flush tasks.
//!
//! # Flush Cycle
//!
//! 1. Swap the live buffer for an empty one under the lock
//! 2. Store the swapped batch through [`Storage::store_messages_batch`]
//! 3. On failure, merge the batch back in front of whatever accumulated
//!    meanwhile and trim to capacity
//!
//! Appends always look the buffer up under the lock, so an append racing a
//! flush lands in the new live buffer and is never lost.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::Result;
use crate::protocol::{ConsoleMessage, LogLevel};
use crate::storage::Storage;

use super::buffer::LogBuffer;

// ============================================================================
// Types
// ============================================================================

struct FlushTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct BuffersInner {
    storage: Arc<dyn Storage>,
    capacity: usize,
    buffers: Mutex<FxHashMap<u16, LogBuffer>>,
    /// Serializes flushes so restored batches keep their order.
    flush_gate: tokio::sync::Mutex<()>,
}

// ============================================================================
// MessageBuffers
// ============================================================================

/// Console buffers keyed by client port, flushed to [`Storage`].
pub struct MessageBuffers {
    inner: Arc<BuffersInner>,
    flush_interval: Duration,
    tasks: Mutex<FxHashMap<u16, FlushTask>>,
}

impl std::fmt::Debug for MessageBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuffers")
            .field("capacity", &self.inner.capacity)
            .field("flush_interval", &self.flush_interval)
            .field("buffer_sizes", &self.buffer_sizes())
            .finish_non_exhaustive()
    }
}

impl MessageBuffers {
    /// Creates an empty set of buffers.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, capacity: usize, flush_interval: Duration) -> Self {
        Self {
            inner: Arc::new(BuffersInner {
                storage,
                capacity,
                buffers: Mutex::new(FxHashMap::default()),
                flush_gate: tokio::sync::Mutex::new(()),
            }),
            flush_interval,
            tasks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Appends to the live buffer of `client_port`, creating it if needed.
    pub fn append(&self, client_port: u16, message: ConsoleMessage) {
        let mut buffers = self.inner.buffers.lock();
        let buffer = buffers
            .entry(client_port)
            .or_insert_with(|| LogBuffer::new(self.inner.capacity));

        if buffer.push(message) {
            trace!(client_port, "Buffer full, oldest entry dropped");
        }
    }

    /// Starts the periodic flush task for `client_port`. Idempotent while
    /// the task is running.
    pub fn start(&self, client_port: u16) {
        let mut tasks = self.tasks.lock();
        if tasks
            .get(&client_port)
            .is_some_and(|task| !task.handle.is_finished())
        {
            return;
        }

        self.inner
            .buffers
            .lock()
            .entry(client_port)
            .or_insert_with(|| LogBuffer::new(self.inner.capacity));

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).flush_loop(
            client_port,
            self.flush_interval,
            token.clone(),
        ));

        tasks.insert(client_port, FlushTask { token, handle });
        debug!(client_port, "Flush task started");
    }

    /// Flushes `client_port` now. Returns the number of entries stored.
    ///
    /// # Errors
    ///
    /// Returns the storage error; the batch is already back in the buffer.
    pub async fn flush(&self, client_port: u16) -> Result<usize> {
        self.inner.flush(client_port).await
    }

    /// Runs a final flush, then cancels and awaits the flush task.
    ///
    /// The buffer is dropped if it ended up empty.
    pub async fn stop(&self, client_port: u16) {
        if let Err(e) = self.inner.flush(client_port).await {
            warn!(client_port, error = %e, "Final flush failed");
        }

        let task = self.tasks.lock().remove(&client_port);
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                error!(client_port, error = %e, "Flush task failed");
            }
        }

        let mut buffers = self.inner.buffers.lock();
        if buffers.get(&client_port).is_some_and(LogBuffer::is_empty) {
            buffers.remove(&client_port);
        }

        debug!(client_port, "Flush task stopped");
    }

    /// Cancels and awaits every flush task; each flushes once more on exit.
    pub async fn shutdown(&self) {
        let tasks: Vec<(u16, FlushTask)> = self.tasks.lock().drain().collect();

        for (_, task) in &tasks {
            task.token.cancel();
        }

        for (client_port, task) in tasks {
            if let Err(e) = task.handle.await {
                error!(client_port, error = %e, "Flush task failed");
            }
        }

        debug!("Message buffers shut down");
    }

    /// Unflushed entries of `client_port` matching the filter, oldest first.
    #[must_use]
    pub fn snapshot(&self, client_port: u16, level_filter: Option<&[LogLevel]>) -> Vec<ConsoleMessage> {
        self.inner
            .buffers
            .lock()
            .get(&client_port)
            .map(|buffer| buffer.snapshot(level_filter))
            .unwrap_or_default()
    }

    /// Buffered entry count per client port.
    #[must_use]
    pub fn buffer_sizes(&self) -> BTreeMap<u16, usize> {
        self.inner
            .buffers
            .lock()
            .iter()
            .map(|(port, buffer)| (*port, buffer.len()))
            .collect()
    }

    /// Number of running flush tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

// ============================================================================
// BuffersInner
// ============================================================================

impl BuffersInner {
    async fn flush_loop(
        self: Arc<Self>,
        client_port: u16,
        flush_interval: Duration,
        token: CancellationToken,
    ) {
        let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.flush(client_port).await {
                        error!(client_port, error = %e, "Periodic flush failed");
                    }
                }
            }
        }

        if let Err(e) = self.flush(client_port).await {
            error!(client_port, error = %e, "Flush on cancellation failed");
        }
    }

    async fn flush(&self, client_port: u16) -> Result<usize> {
        let _gate = self.flush_gate.lock().await;

        let batch = match self.buffers.lock().get_mut(&client_port) {
            Some(buffer) => buffer.take(),
            None => return Ok(0),
        };

        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        match self.storage.store_messages_batch(&batch).await {
            Ok(()) => {
                debug!(client_port, count, "Buffer flushed");
                Ok(count)
            }
            Err(e) => {
                let dropped = self
                    .buffers
                    .lock()
                    .entry(client_port)
                    .or_insert_with(|| LogBuffer::new(self.capacity))
                    .restore(batch);

                warn!(client_port, count, dropped, "Flush failed, batch restored");
                Err(e)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
