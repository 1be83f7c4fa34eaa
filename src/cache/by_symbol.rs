//! Symbol-keyed dedup logs (orders by id, positions by side).
//!
//! Both caches keep one record per `(symbol, key)`. An update for a known key
//! replaces the stored record and moves it to the most recent position; a
//! new key is appended, evicting the oldest record (and its index entry) when
//! the cache is full.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::{Identified, Sided, Symbolic};

use super::{normalize_max_size, UpdateCache, UpdateTracker};

/// Shared machinery: records plus a `symbol -> keys` index
#[derive(Debug, Clone)]
struct KeyedLog<T> {
    items: VecDeque<T>,
    index: FxHashMap<String, FxHashSet<String>>,
    max_size: Option<usize>,
    tracker: UpdateTracker,
}

impl<T: Symbolic> KeyedLog<T> {
    fn new(max_size: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            index: FxHashMap::default(),
            max_size: normalize_max_size(max_size),
            tracker: UpdateTracker::new(),
        }
    }

    fn append(&mut self, item: T, key_of: impl Fn(&T) -> &str) {
        let symbol = item.symbol().to_owned();
        let key = key_of(&item).to_owned();

        let known = self
            .index
            .get(&symbol)
            .is_some_and(|keys| keys.contains(&key));

        if known {
            if let Some(position) = self
                .items
                .iter()
                .position(|stored| stored.symbol() == symbol && key_of(stored) == key)
            {
                self.items.remove(position);
            }
        } else {
            if let Some(max) = self.max_size {
                while self.items.len() >= max {
                    let Some(evicted) = self.items.pop_front() else {
                        break;
                    };
                    self.forget(evicted.symbol(), key_of(&evicted));
                }
            }
            self.index.entry(symbol.clone()).or_default().insert(key.clone());
        }

        self.items.push_back(item);
        self.tracker.record_distinct(&symbol, &key);
    }

    fn forget(&mut self, symbol: &str, key: &str) {
        if let Some(keys) = self.index.get_mut(symbol) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(symbol);
            }
        }
    }

    fn contains(&self, symbol: &str, key: &str) -> bool {
        self.index.get(symbol).is_some_and(|keys| keys.contains(key))
    }

    fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.tracker.clear();
    }
}

/// Bounded log of records deduplicated by `(symbol, id)`
///
/// Used for orders and my-trades: the newest version of each order is kept,
/// positioned by recency of its last update.
#[derive(Debug, Clone)]
pub struct ArrayCacheBySymbolById<T> {
    log: KeyedLog<T>,
}

impl<T: Symbolic + Identified> ArrayCacheBySymbolById<T> {
    /// Create a cache holding at most `max_size` records (`None` or 0 = unbounded)
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            log: KeyedLog::new(max_size),
        }
    }

    /// Insert or replace the record for `(item.symbol(), item.id())`
    pub fn append(&mut self, item: T) {
        self.log.append(item, |record| record.id());
    }

    /// Whether a record with this `(symbol, id)` is retained
    pub fn contains(&self, symbol: &str, id: &str) -> bool {
        self.log.contains(symbol, id)
    }

    /// Retained record for `(symbol, id)`
    pub fn get(&self, symbol: &str, id: &str) -> Option<&T> {
        if !self.contains(symbol, id) {
            return None;
        }
        self.log
            .items
            .iter()
            .find(|stored| stored.symbol() == symbol && stored.id() == id)
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.log.items.len()
    }

    /// Whether no record is retained
    pub fn is_empty(&self) -> bool {
        self.log.items.is_empty()
    }

    /// Iterate retained records, least recently updated first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.log.items.iter()
    }

    /// Empty the cache, its index and its counters
    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// Distinct ids updated since the last read, capped by `limit`
    pub fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        self.log.tracker.take_limit(symbol, limit)
    }
}

impl<T: Symbolic + Identified + Clone> UpdateCache for ArrayCacheBySymbolById<T> {
    type Item = T;

    fn append(&mut self, item: T) {
        ArrayCacheBySymbolById::append(self, item);
    }

    fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        ArrayCacheBySymbolById::get_limit(self, symbol, limit)
    }

    fn clear(&mut self) {
        ArrayCacheBySymbolById::clear(self);
    }

    fn items(&self) -> &VecDeque<T> {
        &self.log.items
    }
}

/// Bounded log of records deduplicated by `(symbol, side)`
///
/// Used for positions, where one record per side of a market is current.
#[derive(Debug, Clone)]
pub struct ArrayCacheBySymbolBySide<T> {
    log: KeyedLog<T>,
}

impl<T: Symbolic + Sided> ArrayCacheBySymbolBySide<T> {
    /// Create a cache holding at most `max_size` records (`None` or 0 = unbounded)
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            log: KeyedLog::new(max_size),
        }
    }

    /// Insert or replace the record for `(item.symbol(), item.side())`
    pub fn append(&mut self, item: T) {
        self.log.append(item, |record| record.side());
    }

    /// Whether a record with this `(symbol, side)` is retained
    pub fn contains(&self, symbol: &str, side: &str) -> bool {
        self.log.contains(symbol, side)
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.log.items.len()
    }

    /// Whether no record is retained
    pub fn is_empty(&self) -> bool {
        self.log.items.is_empty()
    }

    /// Iterate retained records, least recently updated first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.log.items.iter()
    }

    /// Empty the cache, its index and its counters
    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// Distinct sides updated since the last read, capped by `limit`
    pub fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        self.log.tracker.take_limit(symbol, limit)
    }
}

impl<T: Symbolic + Sided + Clone> UpdateCache for ArrayCacheBySymbolBySide<T> {
    type Item = T;

    fn append(&mut self, item: T) {
        ArrayCacheBySymbolBySide::append(self, item);
    }

    fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        ArrayCacheBySymbolBySide::get_limit(self, symbol, limit)
    }

    fn clear(&mut self) {
        ArrayCacheBySymbolBySide::clear(self);
    }

    fn items(&self) -> &VecDeque<T> {
        &self.log.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        symbol: String,
        id: String,
        status: &'static str,
    }

    impl Symbolic for Order {
        fn symbol(&self) -> &str {
            &self.symbol
        }
    }

    impl Identified for Order {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn order(symbol: &str, id: u32, status: &'static str) -> Order {
        Order {
            symbol: symbol.to_string(),
            id: id.to_string(),
            status,
        }
    }

    fn ids(cache: &ArrayCacheBySymbolById<Order>) -> Vec<String> {
        cache.iter().map(|o| o.id.clone()).collect()
    }

    #[derive(Debug, Clone)]
    struct Position {
        symbol: &'static str,
        side: &'static str,
        contracts: u32,
    }

    impl Symbolic for Position {
        fn symbol(&self) -> &str {
            self.symbol
        }
    }

    impl Sided for Position {
        fn side(&self) -> &str {
            self.side
        }
    }

    #[test]
    fn test_by_id_capacity_eviction() {
        let mut cache = ArrayCacheBySymbolById::new(Some(5));
        for id in 1..=10 {
            cache.append(order("X", id, "open"));
        }
        assert_eq!(ids(&cache), vec!["6", "7", "8", "9", "10"]);
        assert!(!cache.contains("X", "1"));
        assert!(cache.contains("X", "6"));

        for id in 1..=10 {
            cache.append(order("X", id, "closed"));
        }
        assert_eq!(ids(&cache), vec!["6", "7", "8", "9", "10"]);
        assert!(cache.iter().all(|o| o.status == "closed"));
        assert!(!cache.contains("X", "5"));
    }

    #[test]
    fn test_by_id_update_moves_to_end() {
        let mut cache = ArrayCacheBySymbolById::new(Some(5));
        cache.append(order("X", 1, "open"));
        cache.append(order("X", 2, "open"));
        cache.append(order("X", 3, "open"));

        cache.append(order("X", 1, "filled"));
        assert_eq!(ids(&cache), vec!["2", "3", "1"]);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("X", "1").map(|o| o.status), Some("filled"));
    }

    #[test]
    fn test_by_id_same_id_other_symbol_is_distinct() {
        let mut cache = ArrayCacheBySymbolById::new(None);
        cache.append(order("X", 1, "open"));
        cache.append(order("Y", 1, "open"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_limit(Some("Y"), None), Some(1));
    }

    #[test]
    fn test_by_id_new_updates() {
        let mut cache = ArrayCacheBySymbolById::new(None);
        cache.append(order("X", 1, "open"));
        assert_eq!(cache.get_limit(None, Some(5)), Some(1));

        cache.append(order("X", 1, "closed"));
        assert_eq!(cache.get_limit(None, Some(5)), Some(1));
    }

    #[test]
    fn test_by_id_repeated_updates_count_once() {
        let mut cache = ArrayCacheBySymbolById::new(None);
        cache.append(order("X", 1, "open"));
        cache.append(order("X", 1, "partial"));
        cache.append(order("X", 1, "closed"));
        cache.append(order("X", 2, "open"));

        assert_eq!(cache.get_limit(Some("X"), None), Some(2));
        assert_eq!(cache.get_limit(None, None), Some(2));
    }

    #[test]
    fn test_by_side_dedup_uses_symbol() {
        let mut cache = ArrayCacheBySymbolBySide::new(None);
        let long = |symbol, contracts| Position {
            symbol,
            side: "long",
            contracts,
        };

        cache.append(long("BTC/USDT", 1));
        cache.append(long("ETH/USDT", 2));
        cache.append(long("BTC/USDT", 3));

        let contracts: Vec<u32> = cache.iter().map(|p| p.contracts).collect();
        assert_eq!(contracts, vec![2, 3]);
        assert!(cache.contains("BTC/USDT", "long"));
        assert!(!cache.contains("BTC/USDT", "short"));
    }

    #[test]
    fn test_by_side_eviction() {
        let mut cache = ArrayCacheBySymbolBySide::new(Some(2));
        for (side, contracts) in [("long", 1), ("short", 2)] {
            cache.append(Position {
                symbol: "BTC/USDT",
                side,
                contracts,
            });
        }
        cache.append(Position {
            symbol: "ETH/USDT",
            side: "long",
            contracts: 3,
        });

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("BTC/USDT", "long"));
        assert!(cache.contains("BTC/USDT", "short"));
    }
}
