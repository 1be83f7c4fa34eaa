//! # exchange-stream
//!
//! The streaming market-data core of an exchange connectivity layer. It
//! turns unordered, duplicated or gapped update messages into bounded
//! per-subscription caches and consistent limit order books, and owns the
//! WebSocket connections that feed them.
//!
//! ## Features
//!
//! - **Bounded update caches** - FIFO, timestamp-keyed upsert and
//!   symbol+id dedup, with "new since last read" counting
//! - **Price ladders** - bisection-indexed sides for aggregated, counted
//!   and order-by-order books
//! - **Snapshot resync** - buffer deltas, fetch a REST snapshot, replay from
//!   the reconciliation point
//! - **Single-flight connections** - one socket per URL, one subscribe
//!   message per subscription, one future per message hash
//! - **Topic fan-out** - ordered delivery to sync and async consumers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use exchange_stream::client::{ConnectionClient, Incoming};
//! use exchange_stream::orderbook::{
//!     BookDelta, BookRegistry, LadderLevel, PlainOrderBook, PriceLevel,
//! };
//! use exchange_stream::{Config, StreamHub, SubscribeHash};
//!
//! fn apply_frame(
//!     registry: &BookRegistry<PriceLevel>,
//!     text: &str,
//! ) -> exchange_stream::Result<Option<PlainOrderBook>> {
//!     let frame: Vec<serde_json::Value> = serde_json::from_str(text)?;
//!     let level = PriceLevel::parse_delta(&frame)?;
//!     registry.handle_delta("BTC/USDT", BookDelta::bid(level))?;
//!     Ok(registry.get_orderbook("BTC/USDT"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), exchange_stream::Error> {
//!     let books = Arc::new(BookRegistry::<PriceLevel>::new());
//!     books.add_market("BTC/USDT", Some(50));
//!
//!     let registry = Arc::clone(&books);
//!     let handler = move |client: &ConnectionClient<PlainOrderBook>, message: Incoming| {
//!         let Incoming::Text(text) = message else { return };
//!         match apply_frame(&registry, &text) {
//!             Ok(Some(book)) => {
//!                 client.resolve(book, "orderbook:BTC/USDT");
//!             }
//!             Ok(None) => {}
//!             // malformed deltas reach whoever waits on the book
//!             Err(error) => client.reject(error, Some("orderbook:BTC/USDT".into())),
//!         }
//!     };
//!
//!     let hub = StreamHub::new(Config::default(), Arc::new(handler)).with_books(books);
//!     let book = hub
//!         .watch(
//!             "wss://example.com/ws",
//!             "orderbook:BTC/USDT",
//!             Some(serde_json::json!({"op": "subscribe", "args": ["book.BTCUSDT"]})),
//!             Some(SubscribeHash::new("orderbook:BTC/USDT")),
//!             None,
//!         )
//!         .await?;
//!     println!("best bid: {:?}", book.best_bid());
//!
//!     hub.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`cache`] - bounded update caches and their new-update tracker
//! - [`orderbook`] - price ladders, books and the per-symbol registry
//! - [`client`] - connection, futures, transport and throttle
//! - [`hub`] - client registry, `watch` and order book resync
//! - [`topic`] - pub/sub fan-out
//! - [`types`] - shared keys, identifiers and record traits
//! - [`config`] - deadlines, retry bounds and limits
//! - [`error`] - error types for the crate
//!
//! ## Numbers
//!
//! Prices and sizes are [`rust_decimal::Decimal`], so ladder keys compare
//! exactly and a bid's negated price sorts without rounding.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod orderbook;
pub mod topic;
pub mod types;

// Re-export main types at crate root for convenience
pub use cache::{
    ArrayCache, ArrayCacheBySymbolById, ArrayCacheBySymbolBySide, ArrayCacheByTimestamp,
    SharedCache, UpdateCache,
};
pub use client::{ConnectionClient, WsFuture};
pub use config::{Config, ReconnectConfig};
pub use error::Error;
pub use hub::{SnapshotSource, StreamHub};
pub use orderbook::{counted_order_book, indexed_order_book, order_book, OrderBook};
pub use topic::TopicStream;
pub use types::{MessageHash, OrderId, Side, SubscribeHash};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
