//! Limit order books built from sorted price ladders.
//!
//! - [`PriceLadder`] - one side, bisection-indexed by signed price
//! - [`OrderBook`] - bids, asks and the delta buffer used for resync
//! - [`BookRegistry`] - one book per symbol behind per-book locks
//!
//! Three level payloads cover the usual exchange feeds: aggregated
//! ([`PriceLevel`]), aggregated with order count ([`CountedLevel`]) and
//! order-by-order ([`IndexedLevel`]).
//!
//! # Example
//!
//! ```rust
//! use exchange_stream::orderbook::{order_book, BookDelta, BookSnapshot, PriceLevel};
//! use rust_decimal_macros::dec;
//!
//! let snapshot = BookSnapshot::new(
//!     vec![PriceLevel::new(dec!(99.5), dec!(2))],
//!     vec![PriceLevel::new(dec!(100.5), dec!(1))],
//! )
//! .with_nonce(7);
//! let mut book = order_book(Some(snapshot), Some(25)).unwrap();
//!
//! book.apply_delta(BookDelta::bid(PriceLevel::new(dec!(100), dec!(3))).with_nonce(8))
//!     .unwrap();
//!
//! assert_eq!(book.best_bid(), Some(&PriceLevel::new(dec!(100), dec!(3))));
//! assert_eq!(book.spread(), Some(dec!(0.5)));
//! ```

pub mod book;
pub mod level;
pub mod manager;
pub mod side;

pub use book::{BookDelta, BookSnapshot, OrderBook};
pub use level::{CountedLevel, IndexedDelta, IndexedLevel, LadderLevel, PriceLevel};
pub use manager::{BookRegistry, SyncState};
pub use side::PriceLadder;

use crate::Result;

/// Book of aggregated price levels
pub type PlainOrderBook = OrderBook<PriceLevel>;

/// Book of aggregated levels carrying an order count
pub type CountedOrderBook = OrderBook<CountedLevel>;

/// Order-by-order book
pub type IndexedOrderBook = OrderBook<IndexedLevel>;

fn build<L: LadderLevel>(
    snapshot: Option<BookSnapshot<L>>,
    depth: Option<usize>,
) -> Result<OrderBook<L>> {
    match snapshot {
        Some(snapshot) => OrderBook::from_snapshot(snapshot, depth),
        None => Ok(OrderBook::new(depth)),
    }
}

/// Create an aggregated book, optionally from a snapshot
pub fn order_book(
    snapshot: Option<BookSnapshot<PriceLevel>>,
    depth: Option<usize>,
) -> Result<PlainOrderBook> {
    build(snapshot, depth)
}

/// Create a counted book, optionally from a snapshot
pub fn counted_order_book(
    snapshot: Option<BookSnapshot<CountedLevel>>,
    depth: Option<usize>,
) -> Result<CountedOrderBook> {
    build(snapshot, depth)
}

/// Create an order-by-order book, optionally from a snapshot
pub fn indexed_order_book(
    snapshot: Option<BookSnapshot<IndexedLevel>>,
    depth: Option<usize>,
) -> Result<IndexedOrderBook> {
    build(snapshot, depth)
}
