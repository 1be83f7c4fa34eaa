//! "New since last read" bookkeeping shared by every cache variant.
//!
//! A read (`take_limit`) does not move a cursor. It only raises a clear flag,
//! and the *next* append consumes that flag by zeroing the counters before
//! counting itself. Repeated reads between two appends therefore return the
//! same value and never reset twice.

use rustc_hash::{FxHashMap, FxHashSet};

/// New-update counters for one key group
#[derive(Debug, Clone)]
enum KeyUpdates {
    /// Every append counts once
    Count(usize),
    /// Only distinct sub-keys count (ids, sides, timestamps)
    Distinct(FxHashSet<String>),
}

impl KeyUpdates {
    fn len(&self) -> usize {
        match self {
            KeyUpdates::Count(n) => *n,
            KeyUpdates::Distinct(set) => set.len(),
        }
    }
}

/// Counters of items appended since the last read, in total and per key
#[derive(Debug, Clone, Default)]
pub struct UpdateTracker {
    total: usize,
    by_key: FxHashMap<String, KeyUpdates>,
    clear_total: bool,
    clear_by_key: FxHashSet<String>,
}

impl UpdateTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one append under `key`
    pub fn record(&mut self, key: &str) {
        self.consume_flags(key);
        let entry = self
            .by_key
            .entry(key.to_owned())
            .or_insert(KeyUpdates::Count(0));
        *entry = KeyUpdates::Count(entry.len() + 1);
        self.total += 1;
    }

    /// Count an append under `key` only if `sub_key` was not yet seen since
    /// the last read of that key
    ///
    /// The total grows by the growth of the key's set, so repeated updates to
    /// the same sub-key count once in both counters.
    pub fn record_distinct(&mut self, key: &str, sub_key: &str) {
        self.consume_flags(key);
        let entry = self
            .by_key
            .entry(key.to_owned())
            .or_insert_with(|| KeyUpdates::Distinct(FxHashSet::default()));
        let before = entry.len();
        match entry {
            KeyUpdates::Distinct(set) => {
                set.insert(sub_key.to_owned());
            }
            KeyUpdates::Count(n) => *n += 1,
        }
        self.total += entry.len() - before;
    }

    /// Read the new-update count and mark the boundary for the next append
    ///
    /// With `key` absent the total is read and every counter restarts on the
    /// next append; otherwise only that key's counter restarts. Returns the
    /// smaller of the count and `limit` when both exist, whichever exists
    /// otherwise, and `None` (unbounded) when neither does.
    pub fn take_limit(&mut self, key: Option<&str>, limit: Option<usize>) -> Option<usize> {
        let new_updates = match key {
            None => {
                self.clear_total = true;
                Some(self.total)
            }
            Some(key) => {
                self.clear_by_key.insert(key.to_owned());
                self.by_key.get(key).map(KeyUpdates::len)
            }
        };
        match (new_updates, limit) {
            (Some(count), Some(limit)) => Some(count.min(limit)),
            (Some(count), None) => Some(count),
            (None, limit) => limit,
        }
    }

    /// New updates since the last total read, without marking a boundary
    pub fn total(&self) -> usize {
        self.total
    }

    /// New updates for `key` since its last read, without marking a boundary
    pub fn count(&self, key: &str) -> usize {
        self.by_key.get(key).map_or(0, KeyUpdates::len)
    }

    /// Drop all counters and pending flags
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn consume_flags(&mut self, key: &str) {
        if self.clear_total {
            self.clear_total = false;
            self.total = 0;
            self.by_key.clear();
            self.clear_by_key.clear();
        }
        if self.clear_by_key.remove(key) {
            self.by_key.remove(key);
        }
    }
}
