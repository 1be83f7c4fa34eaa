//! One side of an order book, kept sorted for bisection.
//!
//! Levels are stored in a `Vec` next to a parallel `Vec` of signed sort keys
//! (`-price` for bids, `price` for asks). Both sides therefore share a single
//! ascending lower-bound search, and the best level is always at index 0.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::Error;
use crate::types::{OrderId, Side};
use crate::Result;

use super::level::{IndexedDelta, IndexedLevel, LadderLevel};

/// Sorted price levels for one side of a book
///
/// `levels` and `keys` always have the same length and `keys` is ascending.
/// For [`IndexedLevel`] ladders, orders sharing a price are ordered by
/// ascending [`OrderId`], and every resting order has an `id_index` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLadder<L> {
    side: Side,
    levels: Vec<L>,
    keys: Vec<Decimal>,
    depth: Option<usize>,
    id_index: FxHashMap<OrderId, Decimal>,
}

impl<L: LadderLevel> PriceLadder<L> {
    /// Create an empty ladder; `depth` bounds the size kept by [`Self::limit`]
    pub fn new(side: Side, depth: Option<usize>) -> Self {
        Self {
            side,
            levels: Vec::new(),
            keys: Vec::new(),
            depth,
            id_index: FxHashMap::default(),
        }
    }

    /// Build a ladder from unsorted deltas
    pub fn from_deltas(
        side: Side,
        deltas: impl IntoIterator<Item = L::Delta>,
        depth: Option<usize>,
    ) -> Result<Self> {
        let mut ladder = Self::new(side, depth);
        for delta in deltas {
            ladder.store(delta)?;
        }
        Ok(ladder)
    }

    /// Apply a delta; a zero size removes the level
    pub fn store(&mut self, delta: L::Delta) -> Result<()> {
        L::store(self, delta)
    }

    /// Parse and apply a raw exchange array
    pub fn store_raw(&mut self, values: &[Value]) -> Result<()> {
        let delta = L::parse_delta(values)?;
        self.store(delta)
    }

    /// Drop the least competitive levels beyond `depth`
    pub fn limit(&mut self) {
        let Some(depth) = self.depth else {
            return;
        };
        if self.levels.len() <= depth {
            return;
        }
        for level in self.levels.drain(depth..) {
            if let Some(id) = level.order_id() {
                self.id_index.remove(id);
            }
        }
        self.keys.truncate(depth);
    }

    /// Remove every level, keeping side and depth
    pub fn clear(&mut self) {
        self.levels.clear();
        self.keys.clear();
        self.id_index.clear();
    }

    /// Replace this ladder's contents with another's, keeping side and depth
    pub(crate) fn replace_contents(&mut self, other: Self) {
        self.levels = other.levels;
        self.keys = other.keys;
        self.id_index = other.id_index;
    }

    /// Book side
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Configured depth
    #[must_use]
    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    /// Levels, best first
    #[must_use]
    pub fn levels(&self) -> &[L] {
        &self.levels
    }

    /// Signed sort keys, parallel to [`Self::levels`]
    #[must_use]
    pub fn keys(&self) -> &[Decimal] {
        &self.keys
    }

    /// Best level
    #[must_use]
    pub fn best(&self) -> Option<&L> {
        self.levels.first()
    }

    /// Copy of the best `n` levels
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<L> {
        self.levels.iter().take(n).cloned().collect()
    }

    /// Sum of resting size
    #[must_use]
    pub fn total_size(&self) -> Decimal {
        self.levels.iter().map(LadderLevel::size).sum()
    }

    /// Number of levels
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the ladder holds no level
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Check the ordering invariants
    ///
    /// Keys must be ascending, match their level's signed price, and (for
    /// indexed ladders) equal-key runs must be ordered by id and fully indexed.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.levels.len() != self.keys.len() {
            return false;
        }
        let keys_match = self
            .levels
            .iter()
            .zip(&self.keys)
            .all(|(level, key)| self.sort_key(level.price()) == *key);
        let ascending = self.keys.windows(2).all(|pair| pair[0] <= pair[1]);
        let ids_ordered = self.levels.windows(2).zip(self.keys.windows(2)).all(
            |(levels, keys)| match (levels[0].order_id(), levels[1].order_id()) {
                (Some(a), Some(b)) if keys[0] == keys[1] => a < b,
                _ => true,
            },
        );
        let with_ids = self
            .levels
            .iter()
            .filter(|level| level.order_id().is_some())
            .count();
        let indexed = with_ids == self.id_index.len()
            && self.levels.iter().zip(&self.keys).all(|(level, key)| {
                level
                    .order_id()
                    .map_or(true, |id| self.id_index.get(id) == Some(key))
            });
        keys_match && ascending && ids_ordered && indexed
    }

    fn sort_key(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Bid => -price,
            Side::Ask => price,
        }
    }

    fn price_of(&self, key: Decimal) -> Decimal {
        match self.side {
            Side::Bid => -key,
            Side::Ask => key,
        }
    }

    /// First index whose key is `>= key`
    fn bisect_left(&self, key: Decimal) -> usize {
        self.keys.partition_point(|probe| *probe < key)
    }

    fn insert_at(&mut self, index: usize, key: Decimal, level: L) {
        self.keys.insert(index, key);
        self.levels.insert(index, level);
    }

    fn remove_at(&mut self, index: usize) -> L {
        self.keys.remove(index);
        self.levels.remove(index)
    }

    /// Store for ladders holding one aggregated level per price
    ///
    /// `overwrite` copies the delta's fields onto an existing level.
    pub(crate) fn store_aggregated(
        &mut self,
        delta: L,
        overwrite: impl FnOnce(&mut L, &L),
    ) -> Result<()> {
        let size = delta.size();
        if size < Decimal::ZERO {
            return Err(Error::Validation(format!(
                "negative size {} at price {}",
                size,
                delta.price()
            )));
        }
        let key = self.sort_key(delta.price());
        let index = self.bisect_left(key);
        let exact = self.keys.get(index) == Some(&key);
        match (size.is_zero(), exact) {
            (true, true) => {
                self.remove_at(index);
            }
            (true, false) => {}
            (false, true) => overwrite(&mut self.levels[index], &delta),
            (false, false) => self.insert_at(index, key, delta),
        }
        Ok(())
    }
}

impl PriceLadder<IndexedLevel> {
    /// Price an order currently rests at
    #[must_use]
    pub fn order_price(&self, id: &OrderId) -> Option<Decimal> {
        self.id_index.get(id).map(|key| self.price_of(*key))
    }

    /// Whether an order is on this side
    #[must_use]
    pub fn contains_order(&self, id: &OrderId) -> bool {
        self.id_index.contains_key(id)
    }

    /// Store for ladders holding one level per order
    pub(crate) fn store_indexed(&mut self, delta: IndexedDelta) -> Result<()> {
        let IndexedDelta { price, size, id } = delta;
        if size < Decimal::ZERO {
            return Err(Error::Validation(format!(
                "negative size {} for order {}",
                size, id
            )));
        }

        if size.is_zero() {
            if let Some(old_key) = self.id_index.remove(&id) {
                if let Some(index) = self.find_order(old_key, &id) {
                    self.remove_at(index);
                }
            }
            return Ok(());
        }

        let new_key = price.map(|price| self.sort_key(price));
        let key = match (self.id_index.get(&id).copied(), new_key) {
            (Some(old_key), new_key) => {
                let key = new_key.unwrap_or(old_key);
                let found = self.find_order(old_key, &id);
                if key == old_key {
                    if let Some(index) = found {
                        self.levels[index].size = size;
                        return Ok(());
                    }
                } else if let Some(index) = found {
                    self.remove_at(index);
                }
                key
            }
            (None, Some(key)) => key,
            (None, None) => {
                return Err(Error::Validation(format!(
                    "order {} is not on the book and the update carries no price",
                    id
                )));
            }
        };

        let level = IndexedLevel {
            price: self.price_of(key),
            size,
            id: id.clone(),
        };
        // time priority: after equal-price orders with a smaller id
        let mut index = self.bisect_left(key);
        while index < self.keys.len() && self.keys[index] == key && self.levels[index].id < id {
            index += 1;
        }
        self.insert_at(index, key, level);
        self.id_index.insert(id, key);
        Ok(())
    }

    fn find_order(&self, key: Decimal, id: &OrderId) -> Option<usize> {
        let start = self.bisect_left(key);
        self.keys[start..]
            .iter()
            .take_while(|probe| **probe == key)
            .zip(&self.levels[start..])
            .position(|(_, level)| level.id == *id)
            .map(|offset| start + offset)
    }
}
