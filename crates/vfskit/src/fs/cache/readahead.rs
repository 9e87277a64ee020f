//! Sequential-access tracking for block prefetch.
//!
//! Keeps, per logical path, the last block served and the set of block
//! indices currently being prefetched. Locks are per-map and never held
//! across I/O; the prefetch tasks themselves live in the block cache.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Per-path read-ahead bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct ReadAheadTracker {
    last_block: Mutex<HashMap<String, u32>>,
    in_flight: Mutex<HashMap<String, HashSet<u32>>>,
}

impl ReadAheadTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record that `block` was served and report whether the access pattern
    /// is sequential.
    ///
    /// An access is sequential when there was no previous access, or the
    /// previous block equals `block` or `block - 1`.
    pub(crate) fn record_access(&self, key: &str, block: u32) -> bool {
        let mut last = self.last_block.lock().unwrap();
        let sequential = match last.get(key) {
            None => true,
            Some(&prev) => prev == block || block.checked_sub(1) == Some(prev),
        };
        last.insert(key.to_string(), block);
        sequential
    }

    /// Claim `block` for prefetching; false when it is already in flight.
    pub(crate) fn begin_prefetch(&self, key: &str, block: u32) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.entry(key.to_string()).or_default().insert(block)
    }

    /// Release a claim taken by [`begin_prefetch`](Self::begin_prefetch).
    pub(crate) fn finish_prefetch(&self, key: &str, block: u32) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(blocks) = in_flight.get_mut(key) {
            blocks.remove(&block);
            if blocks.is_empty() {
                in_flight.remove(key);
            }
        }
    }

    /// Number of prefetches currently in flight for `key`.
    pub(crate) fn in_flight_count(&self, key: &str) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, HashSet::len)
    }

    /// Drop all state for `key` (entry invalidated).
    pub(crate) fn reset(&self, key: &str) {
        self.last_block.lock().unwrap().remove(key);
        self.in_flight.lock().unwrap().remove(key);
    }
}
