//! Bounded update caches.
//!
//! Every subscription that streams records (trades, orders, positions,
//! candles) keeps them in a fixed-capacity, FIFO-evicting log that also
//! tracks how many records arrived since the caller last read it:
//!
//! - [`ArrayCache`] - plain append log, counted per symbol
//! - [`ArrayCacheByTimestamp`] - upsert by leading timestamp
//! - [`ArrayCacheBySymbolById`] - one record per `(symbol, id)`
//! - [`ArrayCacheBySymbolBySide`] - one record per `(symbol, side)`
//!
//! The caches are not internally synchronized. [`SharedCache`] wraps any of
//! them in a `parking_lot::Mutex` for access from several tasks and hands out
//! point-in-time copies via [`SharedCache::snapshot`].
//!
//! # Example
//!
//! ```rust
//! use exchange_stream::cache::{ArrayCacheByTimestamp, SharedCache};
//!
//! let candles = SharedCache::new(ArrayCacheByTimestamp::<[i64; 4]>::new(Some(3)));
//! candles.append([100, 1, 2, 3]);
//! candles.append([200, 5, 6, 7]);
//! candles.append([200, 10, 11, 12]);
//!
//! assert_eq!(candles.snapshot(), vec![[100, 1, 2, 3], [200, 10, 11, 12]]);
//! assert_eq!(candles.get_limit(None, Some(10)), Some(2));
//! ```

pub mod array;
pub mod by_symbol;
pub mod timestamp;
pub mod tracker;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

pub use array::ArrayCache;
pub use by_symbol::{ArrayCacheBySymbolById, ArrayCacheBySymbolBySide};
pub use timestamp::ArrayCacheByTimestamp;
pub use tracker::UpdateTracker;

/// Operations shared by every cache variant
pub trait UpdateCache {
    /// Record type held by the cache
    type Item: Clone;

    /// Append (or upsert) a record
    fn append(&mut self, item: Self::Item);

    /// Read the new-update count and mark the read boundary
    fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize>;

    /// Empty all state
    fn clear(&mut self);

    /// Retained records, oldest first
    fn items(&self) -> &VecDeque<Self::Item>;
}

/// A cache shared between tasks
///
/// All operations, including snapshot reads, take the same lock, so a read
/// never observes a half-applied append.
#[derive(Debug)]
pub struct SharedCache<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for SharedCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: UpdateCache> SharedCache<C> {
    /// Wrap a cache
    pub fn new(cache: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    /// See [`UpdateCache::append`]
    pub fn append(&self, item: C::Item) {
        self.inner.lock().append(item);
    }

    /// See [`UpdateCache::get_limit`]
    pub fn get_limit(&self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        self.inner.lock().get_limit(symbol, limit)
    }

    /// See [`UpdateCache::clear`]
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.inner.lock().items().len()
    }

    /// Whether no record is retained
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items().is_empty()
    }

    /// Point-in-time copy of the retained records, oldest first
    pub fn snapshot(&self) -> Vec<C::Item> {
        self.inner.lock().items().iter().cloned().collect()
    }

    /// Copy of the newest `limit` records, as used after a `get_limit` read
    pub fn tail(&self, limit: Option<usize>) -> Vec<C::Item> {
        let cache = self.inner.lock();
        let items = cache.items();
        let skip = limit.map_or(0, |limit| items.len().saturating_sub(limit));
        items.iter().skip(skip).cloned().collect()
    }

    /// Run `f` with exclusive access to the cache
    pub fn with<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

/// Treat a zero capacity as unbounded
pub(crate) fn normalize_max_size(max_size: Option<usize>) -> Option<usize> {
    max_size.filter(|&max| max > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbolic;

    #[derive(Debug, Clone, PartialEq)]
    struct Trade {
        symbol: &'static str,
        id: u32,
    }

    impl Symbolic for Trade {
        fn symbol(&self) -> &str {
            self.symbol
        }
    }

    #[test]
    fn test_shared_cache_snapshot_is_a_copy() {
        let cache = SharedCache::new(ArrayCache::new(Some(2)));
        cache.append(Trade {
            symbol: "BTC/USDT",
            id: 1,
        });
        let before = cache.snapshot();

        cache.append(Trade {
            symbol: "BTC/USDT",
            id: 2,
        });
        cache.append(Trade {
            symbol: "BTC/USDT",
            id: 3,
        });

        assert_eq!(before.len(), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.tail(Some(1)), vec![Trade { symbol: "BTC/USDT", id: 3 }]);
        assert_eq!(cache.tail(None).len(), 2);
    }

    #[tokio::test]
    async fn test_shared_cache_concurrent_appends() {
        let cache = SharedCache::new(ArrayCache::new(Some(50)));
        let mut handles = Vec::new();
        for task in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for id in 0..100 {
                    cache.append(Trade {
                        symbol: "BTC/USDT",
                        id: task * 1000 + id,
                    });
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len(), 50);
        assert_eq!(cache.get_limit(None, None), Some(800));
        cache.clear();
        assert!(cache.is_empty());
    }
}
