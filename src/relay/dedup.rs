//! Short-lived cache of processed envelope ids.

use std::collections::HashMap;

/// Remembers envelope ids until the envelopes themselves expire.
///
/// Each id is stored with the instant (milliseconds since the Unix epoch)
/// after which its envelope would be rejected as expired anyway, so a sweep
/// never forgets an id that could still be replayed.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: HashMap<String, i64>,
    last_sweep: i64,
}

impl DedupCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` unless it is already present.
    ///
    /// Returns false if the id was already seen.
    pub fn insert(&mut self, id: String, expires_at: i64) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, expires_at);
        true
    }

    /// Returns true if `id` has been seen.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the number of remembered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no ids are remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if at least `interval_ms` have passed since the last sweep.
    #[must_use]
    pub const fn sweep_due(&self, now: i64, interval_ms: i64) -> bool {
        now.saturating_sub(self.last_sweep) >= interval_ms
    }

    /// Forgets every id whose expiry is before `now`.
    ///
    /// Returns the number of ids removed.
    pub fn sweep(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at >= now);
        self.last_sweep = now;
        before - self.entries.len()
    }
}
