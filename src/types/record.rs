//! Dedup-key traits for cache entries.
//!
//! Cache entries are exchange-defined records (trades, orders, positions,
//! candles). Each cache variant needs one or two identity fields from them;
//! these traits expose exactly those fields so key extraction is a plain
//! method call.

/// Record belonging to a market symbol
pub trait Symbolic {
    /// Unified market symbol, e.g. `BTC/USDT`
    fn symbol(&self) -> &str;
}

/// Record with a stable exchange id (orders, trades)
pub trait Identified {
    /// Exchange id, unique within a symbol
    fn id(&self) -> &str;
}

/// Record with a side key (positions: `long` / `short`)
pub trait Sided {
    /// Side key, unique within a symbol
    fn side(&self) -> &str;
}

/// Record whose leading field is its timestamp (candles)
pub trait Timestamped {
    /// Timestamp in milliseconds since Unix epoch
    fn timestamp(&self) -> i64;
}

impl<const N: usize> Timestamped for [i64; N] {
    fn timestamp(&self) -> i64 {
        self.first().copied().unwrap_or_default()
    }
}

impl Timestamped for Vec<i64> {
    fn timestamp(&self) -> i64 {
        self.first().copied().unwrap_or_default()
    }
}
