//! Price level payloads for the three ladder variants.
//!
//! | Level            | Delta            | Identity at a price           |
//! |------------------|------------------|-------------------------------|
//! | [`PriceLevel`]   | itself           | one level per price           |
//! | [`CountedLevel`] | itself           | one level per price           |
//! | [`IndexedLevel`] | [`IndexedDelta`] | one level per order id        |
//!
//! Raw exchange arrays (`["price", "size"]`, `["price", "size", count]`,
//! `["price", "size", "id"]`) are parsed with [`LadderLevel::parse_delta`],
//! which rejects wrong arity and non-numeric fields.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::types::OrderId;
use crate::Result;

use super::side::PriceLadder;

/// Payload stored in a [`PriceLadder`]
pub trait LadderLevel: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Incremental update applied to a ladder of this level type
    type Delta: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    /// Level price
    fn price(&self) -> Decimal;

    /// Resting size at this level
    fn size(&self) -> Decimal;

    /// Order id, for ladders holding one level per order
    fn order_id(&self) -> Option<&OrderId> {
        None
    }

    /// Apply one delta to the ladder
    fn store(ladder: &mut PriceLadder<Self>, delta: Self::Delta) -> Result<()>;

    /// Parse a raw exchange array into a delta
    fn parse_delta(values: &[Value]) -> Result<Self::Delta>;
}

/// Aggregated size at a price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price
    pub price: Decimal,
    /// Aggregated size; zero in a delta deletes the level
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a level
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

impl LadderLevel for PriceLevel {
    type Delta = PriceLevel;

    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }

    fn store(ladder: &mut PriceLadder<Self>, delta: Self) -> Result<()> {
        ladder.store_aggregated(delta, |stored, delta| stored.size = delta.size)
    }

    fn parse_delta(values: &[Value]) -> Result<Self> {
        expect_arity(values, 2)?;
        Ok(Self::new(
            decimal_field(values, 0, "price")?,
            decimal_field(values, 1, "size")?,
        ))
    }
}

/// Aggregated size and number of orders at a price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedLevel {
    /// Price
    pub price: Decimal,
    /// Aggregated size
    pub size: Decimal,
    /// Number of resting orders; zero in a delta deletes the level
    pub count: u64,
}

impl CountedLevel {
    /// Create a level
    pub const fn new(price: Decimal, size: Decimal, count: u64) -> Self {
        Self { price, size, count }
    }
}

impl LadderLevel for CountedLevel {
    type Delta = CountedLevel;

    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }

    fn store(ladder: &mut PriceLadder<Self>, delta: Self) -> Result<()> {
        if delta.count == 0 {
            // an empty level is a delete whatever the size says
            return ladder.store_aggregated(Self::new(delta.price, Decimal::ZERO, 0), |_, _| {});
        }
        ladder.store_aggregated(delta, |stored, delta| {
            stored.size = delta.size;
            stored.count = delta.count;
        })
    }

    fn parse_delta(values: &[Value]) -> Result<Self> {
        expect_arity(values, 3)?;
        Ok(Self::new(
            decimal_field(values, 0, "price")?,
            decimal_field(values, 1, "size")?,
            count_field(values, 2)?,
        ))
    }
}

/// One resting order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedLevel {
    /// Order price
    pub price: Decimal,
    /// Remaining size
    pub size: Decimal,
    /// Exchange order id
    pub id: OrderId,
}

impl IndexedLevel {
    /// Create a level
    pub fn new(price: Decimal, size: Decimal, id: impl Into<OrderId>) -> Self {
        Self {
            price,
            size,
            id: id.into(),
        }
    }
}

/// Update for one order; `price` may be omitted for a size-only change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDelta {
    /// New price, or `None` to keep the order's current price
    pub price: Option<Decimal>,
    /// New remaining size; zero deletes the order
    pub size: Decimal,
    /// Exchange order id
    pub id: OrderId,
}

impl IndexedDelta {
    /// Update carrying a price
    pub fn new(price: Decimal, size: Decimal, id: impl Into<OrderId>) -> Self {
        Self {
            price: Some(price),
            size,
            id: id.into(),
        }
    }

    /// Size-only update for an order already on the book
    pub fn resize(size: Decimal, id: impl Into<OrderId>) -> Self {
        Self {
            price: None,
            size,
            id: id.into(),
        }
    }

    /// Delete an order
    pub fn remove(id: impl Into<OrderId>) -> Self {
        Self::resize(Decimal::ZERO, id)
    }
}

impl From<IndexedLevel> for IndexedDelta {
    fn from(level: IndexedLevel) -> Self {
        Self {
            price: Some(level.price),
            size: level.size,
            id: level.id,
        }
    }
}

impl LadderLevel for IndexedLevel {
    type Delta = IndexedDelta;

    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }

    fn order_id(&self) -> Option<&OrderId> {
        Some(&self.id)
    }

    fn store(ladder: &mut PriceLadder<Self>, delta: IndexedDelta) -> Result<()> {
        ladder.store_indexed(delta)
    }

    fn parse_delta(values: &[Value]) -> Result<IndexedDelta> {
        expect_arity(values, 3)?;
        let price = match values.first() {
            Some(Value::Null) => None,
            _ => Some(decimal_field(values, 0, "price")?),
        };
        Ok(IndexedDelta {
            price,
            size: decimal_field(values, 1, "size")?,
            id: id_field(values, 2)?,
        })
    }
}

fn expect_arity(values: &[Value], expected: usize) -> Result<()> {
    if values.len() != expected {
        return Err(Error::Validation(format!(
            "expected a {}-element delta, got {} elements",
            expected,
            values.len()
        )));
    }
    Ok(())
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn decimal_field(values: &[Value], index: usize, name: &str) -> Result<Decimal> {
    let parsed = match values.get(index) {
        Some(Value::String(text)) => parse_decimal(text),
        Some(Value::Number(number)) => parse_decimal(&number.to_string()),
        _ => None,
    };
    parsed.ok_or_else(|| {
        Error::Validation(format!(
            "{} at position {} is not numeric: {:?}",
            name,
            index,
            values.get(index)
        ))
    })
}

fn count_field(values: &[Value], index: usize) -> Result<u64> {
    let parsed = match values.get(index) {
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(text)) => text.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        Error::Validation(format!(
            "count at position {} is not a non-negative integer: {:?}",
            index,
            values.get(index)
        ))
    })
}

fn id_field(values: &[Value], index: usize) -> Result<OrderId> {
    match values.get(index) {
        Some(Value::String(text)) if !text.is_empty() => Ok(OrderId::new(text.as_str())),
        Some(Value::Number(number)) => Ok(OrderId::new(number.to_string())),
        other => Err(Error::Validation(format!(
            "order id at position {} is missing: {:?}",
            index, other
        ))),
    }
}
