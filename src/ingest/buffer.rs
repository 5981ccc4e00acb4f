//! Bounded per-connection console buffer.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use crate::protocol::{ConsoleMessage, LogLevel};

// ============================================================================
// LogBuffer
// ============================================================================

/// Ordered ring of console messages that drops the oldest on overflow.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<ConsoleMessage>,
    capacity: usize,
    dropped: u64,
}

impl LogBuffer {
    /// Creates an empty buffer holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Appends an entry. Returns `true` if the oldest entry was evicted.
    pub fn push(&mut self, message: ConsoleMessage) -> bool {
        let evicted = self.entries.len() == self.capacity;
        if evicted {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(message);
        evicted
    }

    /// Swaps the live entries for an empty buffer and returns them.
    pub fn take(&mut self) -> Vec<ConsoleMessage> {
        std::mem::take(&mut self.entries).into()
    }

    /// Puts a failed batch back in front of what accumulated since, then
    /// trims to capacity by dropping the oldest.
    ///
    /// Returns the number of entries dropped by the trim.
    pub fn restore(&mut self, failed: Vec<ConsoleMessage>) -> usize {
        let mut merged: VecDeque<ConsoleMessage> = failed.into();
        merged.append(&mut self.entries);

        let overflow = merged.len().saturating_sub(self.capacity);
        merged.drain(..overflow);

        self.entries = merged;
        self.dropped += overflow as u64;
        overflow
    }

    /// Copies the entries matching `level_filter`, oldest first.
    #[must_use]
    pub fn snapshot(&self, level_filter: Option<&[LogLevel]>) -> Vec<ConsoleMessage> {
        self.entries
            .iter()
            .filter(|message| message.matches_filter(level_filter))
            .cloned()
            .collect()
    }

    /// Buffered entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum buffered entries.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted since creation.
    #[inline]
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ============================================================================
// Tests
// ============================================================================
