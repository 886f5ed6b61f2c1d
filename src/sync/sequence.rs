//! Generation numbers for superseding in-flight fetches.
//!
//! Push events and poll ticks both trigger reads of the same data. Every
//! read is issued with a fresh generation for its key; a result is applied
//! only if its generation is still the latest issued for that key, so a
//! slow, older read can never overwrite a newer one.

use std::collections::HashMap;

/// Logical key a fetch reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKey {
    Session,
    Decisions,
    Metrics,
    Adjustments,
}

#[derive(Debug, Default)]
pub struct RequestSequencer {
    next: u64,
    latest: HashMap<FetchKey, u64>,
    pending: HashMap<FetchKey, u64>,
}

impl RequestSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new generation for `key`, superseding any outstanding one.
    pub fn issue(&mut self, key: FetchKey) -> u64 {
        self.next += 1;
        self.latest.insert(key, self.next);
        self.pending.insert(key, self.next);
        self.next
    }

    /// Retire the outstanding generation for `key` without issuing a read.
    /// Used when newer data arrived by another route, such as a push event.
    pub fn supersede(&mut self, key: FetchKey) {
        self.next += 1;
        self.latest.insert(key, self.next);
        self.pending.remove(&key);
    }

    /// Mark a result as arrived. Returns `true` only when `generation` is the
    /// latest issued for `key`; stale results return `false` and must be
    /// discarded.
    pub fn complete(&mut self, key: FetchKey, generation: u64) -> bool {
        if self.latest.get(&key) != Some(&generation) {
            return false;
        }
        self.pending.remove(&key);
        true
    }

    /// True while the latest fetch for `key` has not completed.
    #[must_use]
    pub fn is_loading(&self, key: FetchKey) -> bool {
        self.pending.contains_key(&key)
    }

    /// Forget every outstanding fetch. Results that arrive later are stale.
    pub fn invalidate_all(&mut self) {
        self.pending.clear();
        self.latest.clear();
    }
}
