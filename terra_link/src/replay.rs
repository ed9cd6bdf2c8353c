//! Time-bounded replay protection.
//!
//! The seen-set records `(id, timestamp)` for every admitted command; a
//! second admission attempt inside the freshness window is a replay. Entries
//! older than the window are purged by a background sweep; stale envelopes
//! are already rejected on freshness, so dropping old entries never re-opens
//! a replay.

use std::collections::HashMap;
use uuid::Uuid;

/// In-memory seen-set with a single-writer update path.
#[derive(Debug)]
pub struct SeenSet {
    window_ms: u64,
    /// Admission wall-clock per `(id, timestamp)` tuple.
    entries: HashMap<(Uuid, u64), u64>,
}

impl SeenSet {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            entries: HashMap::new(),
        }
    }

    /// Whether the tuple is already in the set.
    pub fn contains(&self, id: Uuid, timestamp_ms: u64) -> bool {
        self.entries.contains_key(&(id, timestamp_ms))
    }

    /// Admit the tuple if unseen. Returns `false` on replay.
    pub fn check_and_admit(&mut self, id: Uuid, timestamp_ms: u64, now_ms: u64) -> bool {
        match self.entries.entry((id, timestamp_ms)) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(now_ms);
                true
            }
        }
    }

    /// Purge entries admitted more than one window ago.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let window = self.window_ms;
        let before = self.entries.len();
        self.entries
            .retain(|_, admitted| now_ms.saturating_sub(*admitted) <= window);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
