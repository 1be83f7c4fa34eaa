//! Timestamp-keyed upsert log (candles).

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::types::Timestamped;

use super::{normalize_max_size, UpdateCache, UpdateTracker};

/// Bounded log where a record whose timestamp is already present overwrites
/// the stored record in place instead of growing the log
///
/// New updates are counted per distinct timestamp, so a candle that is
/// updated several times between two reads counts once.
#[derive(Debug, Clone)]
pub struct ArrayCacheByTimestamp<T> {
    items: VecDeque<T>,
    timestamps: FxHashSet<i64>,
    max_size: Option<usize>,
    tracker: UpdateTracker,
}

impl<T: Timestamped> ArrayCacheByTimestamp<T> {
    /// Create a cache holding at most `max_size` records (`None` or 0 = unbounded)
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            timestamps: FxHashSet::default(),
            max_size: normalize_max_size(max_size),
            tracker: UpdateTracker::new(),
        }
    }

    /// Upsert a record by its timestamp
    pub fn append(&mut self, item: T) {
        let timestamp = item.timestamp();
        if self.timestamps.contains(&timestamp) {
            // recent candles sit at the back
            if let Some(slot) = self
                .items
                .iter_mut()
                .rev()
                .find(|stored| stored.timestamp() == timestamp)
            {
                *slot = item;
            }
        } else {
            if let Some(max) = self.max_size {
                while self.items.len() >= max {
                    if let Some(evicted) = self.items.pop_front() {
                        self.timestamps.remove(&evicted.timestamp());
                    }
                }
            }
            self.timestamps.insert(timestamp);
            self.items.push_back(item);
        }
        self.tracker.record_distinct("", &timestamp.to_string());
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no record is retained
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate retained records, oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.items.iter()
    }

    /// Empty the cache and its counters
    pub fn clear(&mut self) {
        self.items.clear();
        self.timestamps.clear();
        self.tracker.clear();
    }

    /// Distinct timestamps updated since the last read, capped by `limit`
    pub fn get_limit(&mut self, limit: Option<usize>) -> Option<usize> {
        self.tracker.take_limit(None, limit)
    }
}

impl<T: Timestamped + Clone> UpdateCache for ArrayCacheByTimestamp<T> {
    type Item = T;

    fn append(&mut self, item: T) {
        ArrayCacheByTimestamp::append(self, item);
    }

    /// Candle caches hold a single symbol; the symbol argument is ignored
    fn get_limit(&mut self, _symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        ArrayCacheByTimestamp::get_limit(self, limit)
    }

    fn clear(&mut self) {
        ArrayCacheByTimestamp::clear(self);
    }

    fn items(&self) -> &VecDeque<T> {
        &self.items
    }
}
