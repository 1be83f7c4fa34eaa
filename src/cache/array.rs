//! Plain bounded append log.

use std::collections::VecDeque;

use crate::types::Symbolic;

use super::{normalize_max_size, UpdateCache, UpdateTracker};

/// Fixed-capacity, FIFO-evicting append log of records
///
/// Every append counts as a new update for the record's symbol. When the
/// cache is full, the oldest record is dropped before the new one is pushed.
///
/// # Example
///
/// ```rust
/// use exchange_stream::cache::ArrayCache;
/// use exchange_stream::types::Symbolic;
///
/// #[derive(Clone)]
/// struct Trade { symbol: String, price: u64 }
///
/// impl Symbolic for Trade {
///     fn symbol(&self) -> &str { &self.symbol }
/// }
///
/// let mut trades = ArrayCache::new(Some(2));
/// for price in [100, 101, 102] {
///     trades.append(Trade { symbol: "BTC/USDT".into(), price });
/// }
///
/// let prices: Vec<u64> = trades.iter().map(|t| t.price).collect();
/// assert_eq!(prices, vec![101, 102]);
/// assert_eq!(trades.get_limit(Some("BTC/USDT"), None), Some(3));
/// ```
#[derive(Debug, Clone)]
pub struct ArrayCache<T> {
    items: VecDeque<T>,
    max_size: Option<usize>,
    tracker: UpdateTracker,
}

impl<T> ArrayCache<T> {
    /// Create a cache holding at most `max_size` records (`None` or 0 = unbounded)
    pub fn new(max_size: Option<usize>) -> Self {
        let max_size = normalize_max_size(max_size);
        Self {
            items: VecDeque::with_capacity(max_size.unwrap_or(0)),
            max_size,
            tracker: UpdateTracker::new(),
        }
    }

    /// Capacity bound, if any
    pub fn max_size(&self) -> Option<usize> {
        self.max_size
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

    /// Record at position `index` (0 = oldest)
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Empty the cache and its counters
    pub fn clear(&mut self) {
        self.items.clear();
        self.tracker.clear();
    }

    /// See [`UpdateTracker::take_limit`]
    pub fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        self.tracker.take_limit(symbol, limit)
    }
}

impl<T: Symbolic> ArrayCache<T> {
    /// Append a record, evicting the oldest one when full
    pub fn append(&mut self, item: T) {
        if let Some(max) = self.max_size {
            while self.items.len() >= max {
                self.items.pop_front();
            }
        }
        self.tracker.record(item.symbol());
        self.items.push_back(item);
    }
}

impl<T: Symbolic + Clone> UpdateCache for ArrayCache<T> {
    type Item = T;

    fn append(&mut self, item: T) {
        ArrayCache::append(self, item);
    }

    fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        ArrayCache::get_limit(self, symbol, limit)
    }

    fn clear(&mut self) {
        ArrayCache::clear(self);
    }

    fn items(&self) -> &VecDeque<T> {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        symbol: &'static str,
        data: u32,
    }

    impl Symbolic for Item {
        fn symbol(&self) -> &str {
            self.symbol
        }
    }

    fn item(data: u32) -> Item {
        Item {
            symbol: "BTC/USDT",
            data,
        }
    }

    fn data(cache: &ArrayCache<Item>) -> Vec<u32> {
        cache.iter().map(|i| i.data).collect()
    }

    #[test]
    fn test_bounded_fifo() {
        let mut cache = ArrayCache::new(Some(3));
        for i in 1..=4 {
            cache.append(item(i));
        }
        assert_eq!(data(&cache), vec![2, 3, 4]);

        for i in 5..=8 {
            cache.append(item(i));
        }
        assert_eq!(data(&cache), vec![6, 7, 8]);

        cache.clear();
        cache.append(item(1));
        assert_eq!(data(&cache), vec![1]);
    }

    #[test]
    fn test_max_size_one() {
        let mut cache = ArrayCache::new(Some(1));
        cache.append(item(1));
        cache.append(item(2));
        assert_eq!(data(&cache), vec![2]);
    }

    #[test]
    fn test_unbounded() {
        let mut cache = ArrayCache::new(None);
        for i in 0..100 {
            cache.append(item(i));
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(cache.max_size(), None);
        assert_eq!(ArrayCache::<Item>::new(Some(0)).max_size(), None);
    }

    #[test]
    fn test_get_limit_by_symbol() {
        let mut cache = ArrayCache::new(Some(10));
        cache.append(item(1));
        cache.append(Item {
            symbol: "ETH/USDT",
            data: 2,
        });
        cache.append(item(3));

        assert_eq!(cache.get_limit(Some("BTC/USDT"), None), Some(2));
        assert_eq!(cache.get_limit(Some("ETH/USDT"), Some(5)), Some(1));

        cache.append(item(4));
        assert_eq!(cache.get_limit(Some("BTC/USDT"), None), Some(1));
        // ETH was read but not appended to since; its counter is unchanged
        assert_eq!(cache.get_limit(Some("ETH/USDT"), None), Some(1));
        assert_eq!(cache.get_limit(None, None), Some(4));
    }
}
