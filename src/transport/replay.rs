//! Bounded buffer of sequenced events for reconnect replay.
//!
//! Sequence numbers are assigned here, strictly increasing from 1. A client
//! that reconnects reports the last sequence it saw and receives everything
//! newer that is still in the ring.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use serde_json::Value;

// ============================================================================
// SequencedEvent
// ============================================================================

/// An outbound frame retained for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    /// Server-assigned sequence number.
    pub sequence: u64,
    /// Frame as sent, including its `sequence` field.
    pub payload: Value,
}

// ============================================================================
// ReplayBuffer
// ============================================================================

/// Ring of the most recent sequenced events.
#[derive(Debug)]
pub struct ReplayBuffer {
    events: VecDeque<SequencedEvent>,
    capacity: usize,
    current_sequence: u64,
}

impl ReplayBuffer {
    /// Creates an empty ring holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            current_sequence: 0,
        }
    }

    /// Assigns the next sequence number, stamps it into `payload` and
    /// retains it, evicting the oldest event when full.
    ///
    /// Returns the stamped payload.
    pub fn push(&mut self, mut payload: Value) -> Value {
        self.current_sequence += 1;

        if let Value::Object(map) = &mut payload {
            map.insert("sequence".to_string(), Value::from(self.current_sequence));
        }

        if self.events.len() == self.capacity {
            self.events.pop_front();
        }

        self.events.push_back(SequencedEvent {
            sequence: self.current_sequence,
            payload: payload.clone(),
        });

        payload
    }

    /// Returns payloads with sequence strictly greater than `last_sequence`,
    /// ascending, keeping only the most recent `limit`.
    #[must_use]
    pub fn events_after(&self, last_sequence: u64, limit: usize) -> Vec<Value> {
        let first_newer = self
            .events
            .partition_point(|event| event.sequence <= last_sequence);
        let start = first_newer.max(self.events.len().saturating_sub(limit));

        self.events
            .range(start..)
            .map(|event| event.payload.clone())
            .collect()
    }

    /// Last sequence number assigned (0 before the first push).
    #[inline]
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    /// Number of retained events.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing is retained.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum retained events.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn filled(count: u64, capacity: usize) -> ReplayBuffer {
        let mut buffer = ReplayBuffer::new(capacity);
        for i in 0..count {
            buffer.push(json!({"type": "state", "n": i}));
        }
        buffer
    }

    fn sequences(events: &[Value]) -> Vec<u64> {
        events
            .iter()
            .map(|e| e["sequence"].as_u64().expect("sequence"))
            .collect()
    }

    #[test]
    fn test_push_stamps_sequence() {
        let mut buffer = ReplayBuffer::new(10);
        let first = buffer.push(json!({"type": "a"}));
        let second = buffer.push(json!({"type": "b"}));

        assert_eq!(first["sequence"], 1);
        assert_eq!(second["sequence"], 2);
        assert_eq!(buffer.current_sequence(), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let buffer = filled(1001, 1000);
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.current_sequence(), 1001);

        let all = buffer.events_after(0, 1000);
        assert_eq!(all.first().expect("first")["sequence"], 2);
    }

    #[test]
    fn test_events_after_is_strictly_greater() {
        let buffer = filled(10, 100);
        assert_eq!(sequences(&buffer.events_after(7, 100)), vec![8, 9, 10]);
        assert!(buffer.events_after(10, 100).is_empty());
    }

    #[test]
    fn test_events_after_keeps_most_recent_limit() {
        let buffer = filled(250, 1000);
        let replay = buffer.events_after(0, 100);

        assert_eq!(replay.len(), 100);
        assert_eq!(sequences(&replay), (151..=250).collect::<Vec<_>>());
    }

    #[test]
    fn test_non_object_payload_kept() {
        let mut buffer = ReplayBuffer::new(2);
        let stamped = buffer.push(json!("raw"));
        assert_eq!(stamped, json!("raw"));
        assert_eq!(buffer.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_replay_is_ascending_bounded_and_newer(
            pushes in 0u64..400,
            capacity in 1usize..300,
            last in 0u64..450,
            limit in 1usize..150,
        ) {
            let buffer = filled(pushes, capacity);
            let replay = sequences(&buffer.events_after(last, limit));

            prop_assert!(replay.len() <= limit);
            prop_assert!(buffer.len() <= capacity);
            prop_assert!(replay.iter().all(|&s| s > last));
            prop_assert!(replay.windows(2).all(|w| w[0] < w[1]));
            if let Some(&newest) = replay.last() {
                prop_assert_eq!(newest, pushes);
            }
        }
    }
}
