//! Order book aggregate: two ladders plus the delta buffer used for resync.
//!
//! Every delta applied through [`OrderBook::apply_delta`] (or parked with
//! [`OrderBook::buffer`] while no snapshot is loaded) is kept in
//! `pending_deltas` until the next [`OrderBook::reset`], so a REST snapshot
//! that arrives late can be reconciled against the live stream.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::types::{Nonce, Side, TimestampMs};
use crate::Result;

use super::level::LadderLevel;
use super::side::PriceLadder;

/// One incremental update for one side of a book
#[derive(Debug, Clone, PartialEq)]
pub struct BookDelta<L: LadderLevel> {
    /// Side the update applies to
    pub side: Side,
    /// Level payload
    pub delta: L::Delta,
    /// Exchange sequence number, if the feed carries one
    pub nonce: Option<Nonce>,
    /// Exchange timestamp, if the feed carries one
    pub timestamp: Option<TimestampMs>,
}

impl<L: LadderLevel> BookDelta<L> {
    /// Update for the bid side
    pub fn bid(delta: L::Delta) -> Self {
        Self::new(Side::Bid, delta)
    }

    /// Update for the ask side
    pub fn ask(delta: L::Delta) -> Self {
        Self::new(Side::Ask, delta)
    }

    /// Update for `side`
    pub fn new(side: Side, delta: L::Delta) -> Self {
        Self {
            side,
            delta,
            nonce: None,
            timestamp: None,
        }
    }

    /// Attach a sequence number
    #[must_use]
    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Attach an exchange timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: TimestampMs) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Full book state as returned by a REST snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot<L: LadderLevel> {
    /// Bid levels, in any order
    pub bids: Vec<L::Delta>,
    /// Ask levels, in any order
    pub asks: Vec<L::Delta>,
    /// Sequence number the snapshot was taken at
    pub nonce: Option<Nonce>,
    /// Exchange timestamp
    pub timestamp: Option<TimestampMs>,
    /// Unified market symbol
    pub symbol: Option<String>,
}

impl<L: LadderLevel> Default for BookSnapshot<L> {
    fn default() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            nonce: None,
            timestamp: None,
            symbol: None,
        }
    }
}

impl<L: LadderLevel> BookSnapshot<L> {
    /// Snapshot with the given levels
    pub fn new(bids: Vec<L::Delta>, asks: Vec<L::Delta>) -> Self {
        Self {
            bids,
            asks,
            ..Self::default()
        }
    }

    /// Set the sequence number
    #[must_use]
    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Set the exchange timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: TimestampMs) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the market symbol
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Limit order book for a single market
///
/// Not internally synchronized; [`super::BookRegistry`] wraps each book in a
/// `parking_lot::RwLock`, and readers that cross a task boundary should take
/// a clone under that lock.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook<L: LadderLevel> {
    symbol: Option<String>,
    bids: PriceLadder<L>,
    asks: PriceLadder<L>,
    timestamp: Option<TimestampMs>,
    datetime: Option<String>,
    nonce: Option<Nonce>,
    pending_deltas: Vec<BookDelta<L>>,
}

impl<L: LadderLevel> OrderBook<L> {
    /// Create an empty book; `depth` bounds both ladders on [`Self::limit`]
    #[must_use]
    pub fn new(depth: Option<usize>) -> Self {
        Self {
            symbol: None,
            bids: PriceLadder::new(Side::Bid, depth),
            asks: PriceLadder::new(Side::Ask, depth),
            timestamp: None,
            datetime: None,
            nonce: None,
            pending_deltas: Vec::new(),
        }
    }

    /// Create a book from a snapshot
    pub fn from_snapshot(snapshot: BookSnapshot<L>, depth: Option<usize>) -> Result<Self> {
        let mut book = Self::new(depth);
        book.reset(snapshot)?;
        Ok(book)
    }

    /// Market symbol
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Last applied sequence number
    #[must_use]
    pub const fn nonce(&self) -> Option<Nonce> {
        self.nonce
    }

    /// Last exchange timestamp
    #[must_use]
    pub const fn timestamp(&self) -> Option<TimestampMs> {
        self.timestamp
    }

    /// ISO-8601 rendering of [`Self::timestamp`]
    #[must_use]
    pub fn datetime(&self) -> Option<&str> {
        self.datetime.as_deref()
    }

    /// Bid ladder, best (highest) first
    #[must_use]
    pub fn bids(&self) -> &PriceLadder<L> {
        &self.bids
    }

    /// Ask ladder, best (lowest) first
    #[must_use]
    pub fn asks(&self) -> &PriceLadder<L> {
        &self.asks
    }

    /// Deltas seen since the last reset, in arrival order
    #[must_use]
    pub fn pending_deltas(&self) -> &[BookDelta<L>] {
        &self.pending_deltas
    }

    /// Apply a delta to its ladder and remember it for a later resync
    ///
    /// A rejected delta leaves the book and the buffer untouched.
    pub fn apply_delta(&mut self, delta: BookDelta<L>) -> Result<()> {
        self.store(&delta)?;
        self.pending_deltas.push(delta);
        Ok(())
    }

    /// Park a delta without applying it, while a snapshot is outstanding
    pub fn buffer(&mut self, delta: BookDelta<L>) {
        self.pending_deltas.push(delta);
    }

    /// Replace both ladders with the snapshot's levels
    ///
    /// The snapshot is validated in full before anything is replaced, so a
    /// malformed level leaves the book as it was. On success the delta buffer
    /// is cleared.
    pub fn reset(&mut self, snapshot: BookSnapshot<L>) -> Result<()> {
        let bids = PriceLadder::from_deltas(Side::Bid, snapshot.bids, self.bids.depth())?;
        let asks = PriceLadder::from_deltas(Side::Ask, snapshot.asks, self.asks.depth())?;
        self.bids.replace_contents(bids);
        self.asks.replace_contents(asks);
        self.pending_deltas.clear();
        self.nonce = snapshot.nonce;
        self.set_timestamp(snapshot.timestamp);
        if snapshot.symbol.is_some() {
            self.symbol = snapshot.symbol;
        }
        Ok(())
    }

    /// Reset only when the snapshot is newer than the book
    ///
    /// Returns whether the snapshot was applied. A snapshot without a nonce
    /// always applies.
    pub fn update(&mut self, snapshot: BookSnapshot<L>) -> Result<bool> {
        if let (Some(current), Some(incoming)) = (self.nonce, snapshot.nonce) {
            if incoming <= current {
                return Ok(false);
            }
        }
        self.reset(snapshot)?;
        Ok(true)
    }

    /// Rebuild from a snapshot and replay buffered deltas from `index` on
    pub(crate) fn reconcile(&mut self, snapshot: BookSnapshot<L>, index: usize) -> Result<()> {
        let replay = std::mem::take(&mut self.pending_deltas);
        if let Err(err) = self.reset(snapshot) {
            self.pending_deltas = replay;
            return Err(err);
        }
        for delta in replay.into_iter().skip(index) {
            self.store(&delta)?;
        }
        Ok(())
    }

    /// Trim both ladders to the configured depth
    pub fn limit(&mut self) {
        self.bids.limit();
        self.asks.limit();
    }

    /// Remove all levels and buffered deltas
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.pending_deltas.clear();
        self.nonce = None;
    }

    /// Whether both ladders are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Number of levels on each side
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Best bid level
    #[must_use]
    pub fn best_bid(&self) -> Option<&L> {
        self.bids.best()
    }

    /// Best ask level
    #[must_use]
    pub fn best_ask(&self) -> Option<&L> {
        self.asks.best()
    }

    /// Best ask minus best bid
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price() - bid.price()),
            _ => None,
        }
    }

    /// Average of best bid and best ask
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price() + ask.price()) / Decimal::TWO),
            _ => None,
        }
    }

    /// Whether best bid >= best ask
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price() >= ask.price(),
            _ => false,
        }
    }

    /// Copy of the top `n` bid levels
    #[must_use]
    pub fn top_bids(&self, n: usize) -> Vec<L> {
        self.bids.top(n)
    }

    /// Copy of the top `n` ask levels
    #[must_use]
    pub fn top_asks(&self, n: usize) -> Vec<L> {
        self.asks.top(n)
    }

    fn store(&mut self, delta: &BookDelta<L>) -> Result<()> {
        let ladder = match delta.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        ladder.store(delta.delta.clone())?;
        if let Some(nonce) = delta.nonce {
            self.nonce = Some(nonce);
        }
        if delta.timestamp.is_some() {
            self.set_timestamp(delta.timestamp);
        }
        Ok(())
    }

    fn set_timestamp(&mut self, timestamp: Option<TimestampMs>) {
        self.timestamp = timestamp;
        self.datetime = timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true));
    }
}

impl<L: LadderLevel + Serialize> Serialize for OrderBook<L> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("OrderBook", 6)?;
        state.serialize_field("symbol", &self.symbol)?;
        state.serialize_field("bids", self.bids.levels())?;
        state.serialize_field("asks", self.asks.levels())?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("datetime", &self.datetime)?;
        state.serialize_field("nonce", &self.nonce)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::orderbook::level::PriceLevel;
    use rust_decimal_macros::dec;

    type Book = OrderBook<PriceLevel>;

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    fn snapshot() -> BookSnapshot<PriceLevel> {
        BookSnapshot::new(
            vec![level(dec!(99), dec!(1)), level(dec!(100), dec!(2))],
            vec![level(dec!(102), dec!(3)), level(dec!(101), dec!(4))],
        )
        .with_nonce(10)
        .with_timestamp(1_704_067_200_000)
        .with_symbol("BTC/USDT")
    }

    #[test]
    fn test_new_orderbook() {
        let book = Book::new(None);
        assert!(book.is_empty());
        assert_eq!(book.nonce(), None);
        assert_eq!(book.symbol(), None);
    }

    #[test]
    fn test_from_snapshot() {
        let book = Book::from_snapshot(snapshot(), None).unwrap();
        assert_eq!(book.symbol(), Some("BTC/USDT"));
        assert_eq!(book.nonce(), Some(10));
        assert_eq!(book.datetime(), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(book.best_bid(), Some(&level(dec!(100), dec!(2))));
        assert_eq!(book.best_ask(), Some(&level(dec!(101), dec!(4))));
    }

    #[test]
    fn test_apply_delta_buffers() {
        let mut book = Book::from_snapshot(snapshot(), None).unwrap();
        book.apply_delta(BookDelta::bid(level(dec!(100), dec!(0))).with_nonce(11))
            .unwrap();
        book.apply_delta(BookDelta::ask(level(dec!(100.5), dec!(1))).with_nonce(12))
            .unwrap();

        assert_eq!(book.best_bid(), Some(&level(dec!(99), dec!(1))));
        assert_eq!(book.best_ask(), Some(&level(dec!(100.5), dec!(1))));
        assert_eq!(book.pending_deltas().len(), 2);
        assert_eq!(book.nonce(), Some(12));
    }

    #[test]
    fn test_rejected_delta_is_not_buffered() {
        let mut book = Book::from_snapshot(snapshot(), None).unwrap();
        let err = book
            .apply_delta(BookDelta::bid(level(dec!(100), dec!(-1))).with_nonce(11))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(book.pending_deltas().is_empty());
        assert_eq!(book.nonce(), Some(10));
    }

    #[test]
    fn test_reset_clears_buffer() {
        let mut book = Book::new(None);
        book.buffer(BookDelta::bid(level(dec!(1), dec!(1))));
        assert!(book.is_empty());
        assert_eq!(book.pending_deltas().len(), 1);

        book.reset(snapshot()).unwrap();
        assert!(book.pending_deltas().is_empty());
        assert_eq!(book.num_levels(), (2, 2));
    }

    #[test]
    fn test_invalid_snapshot_leaves_book() {
        let mut book = Book::from_snapshot(snapshot(), None).unwrap();
        let bad = BookSnapshot::new(vec![level(dec!(1), dec!(-5))], vec![]).with_nonce(20);
        assert!(book.reset(bad).is_err());
        assert_eq!(book.nonce(), Some(10));
        assert_eq!(book.num_levels(), (2, 2));
    }

    #[test]
    fn test_update_is_nonce_guarded() {
        let mut book = Book::from_snapshot(snapshot(), None).unwrap();
        let stale = BookSnapshot::new(vec![], vec![]).with_nonce(10);
        assert!(!book.update(stale).unwrap());
        assert_eq!(book.num_levels(), (2, 2));

        let fresh = BookSnapshot::new(vec![level(dec!(1), dec!(1))], vec![]).with_nonce(11);
        assert!(book.update(fresh).unwrap());
        assert_eq!(book.num_levels(), (1, 0));
    }

    #[test]
    fn test_reconcile_replays_from_index() {
        let mut book = Book::new(None);
        book.buffer(BookDelta::bid(level(dec!(100), dec!(9))).with_nonce(9));
        book.buffer(BookDelta::bid(level(dec!(100), dec!(5))).with_nonce(11));
        book.buffer(BookDelta::ask(level(dec!(101), dec!(0))).with_nonce(12));

        book.reconcile(snapshot(), 1).unwrap();
        assert_eq!(book.best_bid(), Some(&level(dec!(100), dec!(5))));
        assert_eq!(book.best_ask(), Some(&level(dec!(102), dec!(3))));
        assert_eq!(book.nonce(), Some(12));
        assert!(book.pending_deltas().is_empty());
    }

    #[test]
    fn test_mid_price_and_spread() {
        let book = Book::from_snapshot(snapshot(), None).unwrap();
        assert_eq!(book.spread(), Some(dec!(1)));
        assert_eq!(book.mid_price(), Some(dec!(100.5)));
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_crossed_book() {
        let mut book = Book::new(None);
        book.apply_delta(BookDelta::bid(level(dec!(55), dec!(1)))).unwrap();
        book.apply_delta(BookDelta::ask(level(dec!(50), dec!(1)))).unwrap();
        assert!(book.is_crossed());
    }

    #[test]
    fn test_limit_and_top_levels() {
        let mut book = Book::from_snapshot(snapshot(), Some(1)).unwrap();
        assert_eq!(book.top_bids(5).len(), 2);
        book.limit();
        assert_eq!(book.top_bids(5), vec![level(dec!(100), dec!(2))]);
        assert_eq!(book.top_asks(5), vec![level(dec!(101), dec!(4))]);
    }

    #[test]
    fn test_serialize() {
        let book = Book::from_snapshot(snapshot(), None).unwrap();
        let json = serde_json::to_value(&book).unwrap();
        assert_eq!(json["symbol"], "BTC/USDT");
        assert_eq!(json["nonce"], 10);
        assert_eq!(json["bids"][0]["price"], "100");
        assert_eq!(json["asks"].as_array().map(Vec::len), Some(2));
    }
}
