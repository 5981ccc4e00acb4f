//! Persistence seam for console messages.
//!
//! The bridge only needs batch append and "last N for a port" queries.
//! [`MemoryStorage`] keeps a bounded history per port; disk-backed stores
//! implement [`Storage`] outside this crate.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::Result;
use crate::protocol::{ConsoleMessage, LogLevel};

// ============================================================================
// Storage
// ============================================================================

/// Console message store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Appends a batch, in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the batch could not be stored;
    /// the caller keeps the batch and retries.
    async fn store_messages_batch(&self, messages: &[ConsoleMessage]) -> Result<()>;

    /// Returns the newest `last_n` messages for `port` matching the filter,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the store cannot be read.
    async fn query_messages(
        &self,
        port: u16,
        last_n: usize,
        level_filter: Option<&[LogLevel]>,
    ) -> Result<Vec<ConsoleMessage>>;
}

// ============================================================================
// MemoryStorage
// ============================================================================

/// Default number of messages retained per port.
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// In-process store with a bounded history per port.
#[derive(Debug)]
pub struct MemoryStorage {
    messages: RwLock<FxHashMap<u16, VecDeque<ConsoleMessage>>>,
    capacity_per_port: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryStorage {
    /// Creates a store keeping at most `capacity_per_port` messages per port.
    #[must_use]
    pub fn new(capacity_per_port: usize) -> Self {
        Self {
            messages: RwLock::new(FxHashMap::default()),
            capacity_per_port: capacity_per_port.max(1),
        }
    }

    /// Total stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().values().map(VecDeque::len).sum()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store_messages_batch(&self, messages: &[ConsoleMessage]) -> Result<()> {
        let mut store = self.messages.write();

        for message in messages {
            let history = store.entry(message.port).or_default();
            if history.len() == self.capacity_per_port {
                history.pop_front();
            }
            history.push_back(message.clone());
        }

        trace!(count = messages.len(), "Messages stored");
        Ok(())
    }

    async fn query_messages(
        &self,
        port: u16,
        last_n: usize,
        level_filter: Option<&[LogLevel]>,
    ) -> Result<Vec<ConsoleMessage>> {
        let store = self.messages.read();
        let Some(history) = store.get(&port) else {
            return Ok(Vec::new());
        };

        let mut newest: Vec<ConsoleMessage> = history
            .iter()
            .rev()
            .filter(|message| message.matches_filter(level_filter))
            .take(last_n)
            .cloned()
            .collect();
        newest.reverse();

        Ok(newest)
    }
}

// ============================================================================
// Tests
// ============================================================================
