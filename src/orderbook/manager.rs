//! Registry of order books keyed by symbol.
//!
//! [`BookRegistry`] owns one book per market behind a `parking_lot::RwLock`,
//! together with its synchronization state. Deltas for a market whose
//! snapshot has not been reconciled yet are buffered instead of applied; the
//! resync in [`crate::hub::StreamHub::load_order_book`] then replays them.

use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::Error;
use crate::Result;

use super::book::{BookDelta, BookSnapshot, OrderBook};
use super::level::LadderLevel;

/// State of an order book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Snapshot loaded, deltas are applied live
    Synchronized,
    /// A gap was detected; deltas are buffered until the next resync
    NeedsResync,
    /// No snapshot yet; deltas are buffered
    WaitingForSnapshot,
}

#[derive(Debug)]
struct BookEntry<L: LadderLevel> {
    book: OrderBook<L>,
    state: SyncState,
}

/// Thread-safe set of order books, one per symbol
///
/// # Example
///
/// ```rust
/// use exchange_stream::orderbook::{BookDelta, BookRegistry, PriceLevel, SyncState};
/// use rust_decimal::Decimal;
///
/// let books = BookRegistry::<PriceLevel>::new();
/// books.add_market("BTC/USDT", None);
///
/// // buffered until a snapshot is reconciled
/// let delta = BookDelta::bid(PriceLevel::new(Decimal::ONE_HUNDRED, Decimal::ONE));
/// books.handle_delta("BTC/USDT", delta).unwrap();
/// assert_eq!(books.get_state("BTC/USDT"), Some(SyncState::WaitingForSnapshot));
/// assert_eq!(books.best_bid("BTC/USDT"), None);
/// ```
#[derive(Debug)]
pub struct BookRegistry<L: LadderLevel> {
    books: RwLock<FxHashMap<String, Arc<RwLock<BookEntry<L>>>>>,
}

impl<L: LadderLevel> Default for BookRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LadderLevel> BookRegistry<L> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            books: RwLock::new(FxHashMap::default()),
        }
    }

    /// Track a market with an empty book waiting for its snapshot
    ///
    /// An already tracked market is left as is.
    pub fn add_market(&self, symbol: impl Into<String>, depth: Option<usize>) {
        let mut books = self.books.write();
        books.entry(symbol.into()).or_insert_with(|| {
            Arc::new(RwLock::new(BookEntry {
                book: OrderBook::new(depth),
                state: SyncState::WaitingForSnapshot,
            }))
        });
    }

    /// Track a market with an already synchronized book, replacing any other
    pub fn insert(&self, symbol: impl Into<String>, book: OrderBook<L>) {
        let entry = Arc::new(RwLock::new(BookEntry {
            book,
            state: SyncState::Synchronized,
        }));
        self.books.write().insert(symbol.into(), entry);
    }

    /// Stop tracking a market
    pub fn remove_market(&self, symbol: &str) -> Option<OrderBook<L>> {
        let entry = self.books.write().remove(symbol)?;
        let book = entry.read().book.clone();
        Some(book)
    }

    /// Whether a market is tracked
    pub fn contains(&self, symbol: &str) -> bool {
        self.books.read().contains_key(symbol)
    }

    /// Synchronization state of a market
    pub fn get_state(&self, symbol: &str) -> Option<SyncState> {
        self.entry(symbol).map(|entry| entry.read().state)
    }

    /// Mark a market as needing a resync
    pub fn mark_needs_resync(&self, symbol: &str) {
        if let Some(entry) = self.entry(symbol) {
            entry.write().state = SyncState::NeedsResync;
        }
    }

    /// Markets whose deltas are currently being buffered
    pub fn markets_needing_resync(&self) -> Vec<String> {
        let books = self.books.read();
        books
            .iter()
            .filter(|(_, entry)| entry.read().state != SyncState::Synchronized)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Route a delta to its book
    ///
    /// Applied when the book is synchronized, buffered otherwise. Fails with
    /// [`Error::NotInitialized`] for an untracked market and propagates
    /// validation errors from the ladder.
    pub fn handle_delta(&self, symbol: &str, delta: BookDelta<L>) -> Result<()> {
        let entry = self
            .entry(symbol)
            .ok_or_else(|| Error::NotInitialized(format!("no order book for {}", symbol)))?;
        let mut entry = entry.write();
        if entry.state == SyncState::Synchronized {
            entry.book.apply_delta(delta)
        } else {
            entry.book.buffer(delta);
            Ok(())
        }
    }

    /// Reset a market from a snapshot and mark it synchronized
    ///
    /// Untracked markets are added first.
    pub fn apply_snapshot(&self, symbol: &str, snapshot: BookSnapshot<L>) -> Result<()> {
        let entry = match self.entry(symbol) {
            Some(entry) => entry,
            None => {
                self.add_market(symbol, None);
                self.entry(symbol)
                    .ok_or_else(|| Error::NotInitialized(format!("no order book for {}", symbol)))?
            }
        };
        let mut entry = entry.write();
        entry.book.reset(snapshot)?;
        entry.state = SyncState::Synchronized;
        Ok(())
    }

    /// Run `f` on a market's book under its read lock
    pub fn with_book<R>(&self, symbol: &str, f: impl FnOnce(&OrderBook<L>) -> R) -> Option<R> {
        self.entry(symbol).map(|entry| f(&entry.read().book))
    }

    /// Run `f` on a market's book under its write lock
    pub fn with_book_mut<R>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut OrderBook<L>) -> R,
    ) -> Option<R> {
        self.entry(symbol).map(|entry| f(&mut entry.write().book))
    }

    /// Point-in-time copy of a market's book
    pub fn get_orderbook(&self, symbol: &str) -> Option<OrderBook<L>> {
        self.with_book(symbol, Clone::clone)
    }

    /// Rebuild a book from a snapshot, replay its buffer from `index` and
    /// mark it synchronized; returns a copy of the result
    pub(crate) fn reconcile(
        &self,
        symbol: &str,
        snapshot: BookSnapshot<L>,
        index: usize,
    ) -> Result<OrderBook<L>> {
        let entry = self
            .entry(symbol)
            .ok_or_else(|| Error::NotInitialized(format!("no order book for {}", symbol)))?;
        let mut entry = entry.write();
        let replayed = entry.book.pending_deltas().len().saturating_sub(index);
        entry.book.reconcile(snapshot, index)?;
        entry.state = SyncState::Synchronized;
        debug!(symbol, replayed, nonce = ?entry.book.nonce(), "order book reconciled");
        Ok(entry.book.clone())
    }

    /// Best bid `(price, size)` for a market
    pub fn best_bid(&self, symbol: &str) -> Option<(Decimal, Decimal)> {
        self.with_book(symbol, |book| book.best_bid().map(|l| (l.price(), l.size())))
            .flatten()
    }

    /// Best ask `(price, size)` for a market
    pub fn best_ask(&self, symbol: &str) -> Option<(Decimal, Decimal)> {
        self.with_book(symbol, |book| book.best_ask().map(|l| (l.price(), l.size())))
            .flatten()
    }

    /// Mid price for a market
    pub fn mid_price(&self, symbol: &str) -> Option<Decimal> {
        self.with_book(symbol, OrderBook::mid_price).flatten()
    }

    /// Spread for a market
    pub fn spread(&self, symbol: &str) -> Option<Decimal> {
        self.with_book(symbol, OrderBook::spread).flatten()
    }

    /// Stop tracking every market
    pub fn clear(&self) {
        self.books.write().clear();
    }

    /// Number of tracked markets
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    /// Whether no market is tracked
    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// Tracked symbols
    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }

    fn entry(&self, symbol: &str) -> Option<Arc<RwLock<BookEntry<L>>>> {
        self.books.read().get(symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::level::PriceLevel;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    fn snapshot(nonce: u64) -> BookSnapshot<PriceLevel> {
        BookSnapshot::new(vec![level(dec!(50), dec!(100))], vec![level(dec!(55), dec!(150))])
            .with_nonce(nonce)
    }

    #[test]
    fn test_add_market() {
        let registry = BookRegistry::<PriceLevel>::new();
        registry.add_market("TEST", None);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_state("TEST"), Some(SyncState::WaitingForSnapshot));
    }

    #[test]
    fn test_apply_snapshot() {
        let registry = BookRegistry::new();
        registry.apply_snapshot("TEST", snapshot(1)).unwrap();

        assert_eq!(registry.get_state("TEST"), Some(SyncState::Synchronized));
        assert_eq!(registry.best_bid("TEST"), Some((dec!(50), dec!(100))));
        assert_eq!(registry.best_ask("TEST"), Some((dec!(55), dec!(150))));
        assert_eq!(registry.spread("TEST"), Some(dec!(5)));
    }

    #[test]
    fn test_handle_delta_when_synchronized() {
        let registry = BookRegistry::new();
        registry.apply_snapshot("TEST", snapshot(1)).unwrap();

        registry
            .handle_delta("TEST", BookDelta::bid(level(dec!(50), dec!(150))).with_nonce(2))
            .unwrap();
        assert_eq!(registry.best_bid("TEST"), Some((dec!(50), dec!(150))));
        assert_eq!(registry.with_book("TEST", |b| b.pending_deltas().len()), Some(1));
    }

    #[test]
    fn test_handle_delta_unknown_market() {
        let registry = BookRegistry::<PriceLevel>::new();
        let err = registry
            .handle_delta("NOPE", BookDelta::bid(level(dec!(1), dec!(1))))
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[test]
    fn test_needs_resync_buffers() {
        let registry = BookRegistry::new();
        registry.apply_snapshot("TEST", snapshot(1)).unwrap();
        registry.mark_needs_resync("TEST");

        registry
            .handle_delta("TEST", BookDelta::bid(level(dec!(51), dec!(1))).with_nonce(5))
            .unwrap();
        assert_eq!(registry.best_bid("TEST"), Some((dec!(50), dec!(100))));

        let book = registry.reconcile("TEST", snapshot(4), 0).unwrap();
        assert_eq!(book.best_bid(), Some(&level(dec!(51), dec!(1))));
        assert_eq!(registry.get_state("TEST"), Some(SyncState::Synchronized));
    }

    #[test]
    fn test_markets_needing_resync() {
        let registry = BookRegistry::<PriceLevel>::new();
        registry.add_market("TEST1", None);
        registry.add_market("TEST2", None);
        assert_eq!(registry.markets_needing_resync().len(), 2);

        registry.apply_snapshot("TEST1", BookSnapshot::default()).unwrap();
        assert_eq!(registry.markets_needing_resync(), vec!["TEST2".to_string()]);
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = BookRegistry::new();
        registry.apply_snapshot("A", snapshot(1)).unwrap();
        registry.apply_snapshot("B", snapshot(1)).unwrap();

        let removed = registry.remove_market("A").unwrap();
        assert_eq!(removed.nonce(), Some(1));
        assert!(!registry.contains("A"));

        registry.clear();
        assert!(registry.is_empty());
    }
}
