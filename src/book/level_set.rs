//! Sorted per-side container of price levels with a cached aggregate.
//!
//! This module provides a `LevelSet` that keeps one side of the book keyed by
//! fixed-point price, so that book order (bids descending, asks ascending)
//! falls out of the map ordering and no ad hoc re-sort is ever needed.
//!
//! # Invariant
//!
//! The `total_quantity` field MUST always equal the sum of stored quantities,
//! and no stored quantity is ≤ 0. Both are enforced through encapsulated
//! mutation methods and verified in debug builds via `verify_invariant()`.
//!
//! # Performance
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | `upsert` | O(log n) |
//! | `remove` | O(log n) |
//! | `best` | O(log n) |
//! | `truncate` | O(k log n) for k dropped levels |
//! | `total_quantity` | O(1) |

use std::collections::BTreeMap;

use crate::types::{price_to_key, PriceLevel, Side};

#[derive(Debug, Clone, Copy, PartialEq)]
struct LevelEntry {
    /// Price as received; the key only orders levels
    price: f64,
    quantity: f64,
    last_updated: i64,
}

/// One side of the order book.
#[derive(Debug, Clone)]
pub struct LevelSet {
    side: Side,
    /// price key → level; iteration order is ascending price
    levels: BTreeMap<i64, LevelEntry>,
    /// Cached total quantity (invariant: == sum of level quantities)
    total_quantity: f64,
}

impl LevelSet {
    /// Create a new empty side.
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            total_quantity: 0.0,
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Insert or replace the level at `price`.
    ///
    /// A non-positive quantity removes the level instead, so a stored level
    /// is never ≤ 0. Returns the previous quantity, if any.
    pub fn upsert(&mut self, price: f64, quantity: f64, timestamp: i64) -> Option<f64> {
        if quantity <= 0.0 {
            return self.remove(price);
        }

        let key = price_to_key(price);
        let old = self.levels.insert(
            key,
            LevelEntry {
                price,
                quantity,
                last_updated: timestamp,
            },
        );

        let old_quantity = old.map(|e| e.quantity);
        self.total_quantity += quantity - old_quantity.unwrap_or(0.0);

        #[cfg(debug_assertions)]
        self.verify_invariant();

        old_quantity
    }

    /// Remove the level at `price`. No-op (returns `None`) when absent.
    pub fn remove(&mut self, price: f64) -> Option<f64> {
        let removed = self.levels.remove(&price_to_key(price))?;
        self.total_quantity -= removed.quantity;
        if self.levels.is_empty() {
            // Clear accumulated float drift once the side empties.
            self.total_quantity = 0.0;
        }

        #[cfg(debug_assertions)]
        self.verify_invariant();

        Some(removed.quantity)
    }

    /// Quantity resting at `price`.
    pub fn get(&self, price: f64) -> Option<f64> {
        self.levels.get(&price_to_key(price)).map(|e| e.quantity)
    }

    #[inline]
    pub fn contains(&self, price: f64) -> bool {
        self.levels.contains_key(&price_to_key(price))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Cached total quantity (O(1)).
    #[inline]
    pub fn total_quantity(&self) -> f64 {
        self.total_quantity
    }

    /// Best price on this side (highest bid / lowest ask).
    pub fn best(&self) -> Option<f64> {
        let entry = match self.side {
            Side::Bid => self.levels.values().next_back(),
            Side::Ask => self.levels.values().next(),
        };
        entry.map(|e| e.price)
    }

    /// Drop the deepest levels so that at most `depth` remain.
    ///
    /// Returns the number of levels dropped.
    pub fn truncate(&mut self, depth: usize) -> usize {
        let mut dropped = 0;
        while self.levels.len() > depth {
            let worst = match self.side {
                Side::Bid => self.levels.pop_first(),
                Side::Ask => self.levels.pop_last(),
            };
            if let Some((_, entry)) = worst {
                self.total_quantity -= entry.quantity;
                dropped += 1;
            }
        }
        if self.levels.is_empty() {
            self.total_quantity = 0.0;
        }
        dropped
    }

    /// Remove every level.
    pub fn clear(&mut self) {
        self.levels.clear();
        self.total_quantity = 0.0;
    }

    /// Iterate levels in book order (best first).
    pub fn iter(&self) -> Box<dyn Iterator<Item = PriceLevel> + '_> {
        let side = self.side;
        let to_level = move |entry: &LevelEntry| PriceLevel::new(entry.price, entry.quantity, side, entry.last_updated);
        match side {
            Side::Bid => Box::new(self.levels.values().rev().map(to_level)),
            Side::Ask => Box::new(self.levels.values().map(to_level)),
        }
    }

    /// Top `depth` levels in book order.
    pub fn to_levels(&self, depth: usize) -> Vec<PriceLevel> {
        self.iter().take(depth).collect()
    }

    /// Compute the actual total by summing all levels (O(n)).
    pub fn compute_actual_total(&self) -> f64 {
        self.levels.values().map(|e| e.quantity).sum()
    }

    /// Verify the cached total and positivity invariants hold.
    #[cfg(debug_assertions)]
    pub fn verify_invariant(&self) {
        let actual = self.compute_actual_total();
        let tolerance = 1e-9 * actual.abs().max(1.0);
        debug_assert!(
            (actual - self.total_quantity).abs() <= tolerance,
            "LevelSet invariant violated: actual={}, cached={}",
            actual,
            self.total_quantity
        );
        debug_assert!(self.levels.values().all(|e| e.quantity > 0.0));
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub fn verify_invariant(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_level_set_is_empty() {
        let set = LevelSet::new(Side::Bid);
        assert!(set.is_empty());
        assert_eq!(set.total_quantity(), 0.0);
        assert_eq!(set.best(), None);
    }

    #[test]
    fn test_upsert_and_replace() {
        let mut set = LevelSet::new(Side::Ask);
        assert_eq!(set.upsert(101.0, 4.0, 1), None);
        assert_eq!(set.upsert(101.0, 6.0, 2), Some(4.0));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(101.0), Some(6.0));
        assert_eq!(set.total_quantity(), 6.0);
    }

    #[test]
    fn test_zero_quantity_upsert_removes() {
        let mut set = LevelSet::new(Side::Bid);
        set.upsert(100.0, 5.0, 0);
        assert_eq!(set.upsert(100.0, 0.0, 1), Some(5.0));
        assert!(set.is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut set = LevelSet::new(Side::Bid);
        set.upsert(100.0, 5.0, 0);
        assert_eq!(set.remove(98.0), None);
        assert_eq!(set.len(), 1);
        assert_eq!(set.total_quantity(), 5.0);
    }

    #[test]
    fn test_book_order_per_side() {
        let mut bids = LevelSet::new(Side::Bid);
        let mut asks = LevelSet::new(Side::Ask);
        for (i, p) in [99.0, 101.0, 100.0].iter().enumerate() {
            bids.upsert(*p, 1.0 + i as f64, 0);
            asks.upsert(*p + 10.0, 1.0, 0);
        }

        let bid_prices: Vec<f64> = bids.iter().map(|l| l.price).collect();
        let ask_prices: Vec<f64> = asks.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![101.0, 100.0, 99.0]);
        assert_eq!(ask_prices, vec![109.0, 110.0, 111.0]);
        assert_eq!(bids.best(), Some(101.0));
        assert_eq!(asks.best(), Some(109.0));
    }

    #[test]
    fn test_truncate_drops_deepest() {
        let mut bids = LevelSet::new(Side::Bid);
        let mut asks = LevelSet::new(Side::Ask);
        for i in 0..10 {
            bids.upsert(100.0 - i as f64, 1.0, 0);
            asks.upsert(101.0 + i as f64, 1.0, 0);
        }

        assert_eq!(bids.truncate(3), 7);
        assert_eq!(asks.truncate(3), 7);
        assert_eq!(bids.to_levels(10).last().map(|l| l.price), Some(98.0));
        assert_eq!(asks.to_levels(10).last().map(|l| l.price), Some(103.0));
        assert_eq!(bids.total_quantity(), 3.0);
    }

    #[test]
    fn test_compute_actual_matches_cached() {
        let mut set = LevelSet::new(Side::Ask);
        set.upsert(101.0, 1.5, 0);
        set.upsert(102.0, 2.25, 0);
        set.upsert(101.0, 0.75, 0);
        set.remove(102.0);
        assert!((set.compute_actual_total() - set.total_quantity()).abs() < 1e-12);
        set.verify_invariant();
    }

    #[test]
    fn test_reported_price_is_the_received_one() {
        let mut asks = LevelSet::new(Side::Ask);
        asks.upsert(1.235e-6, 2.0, 0);
        asks.upsert(0.1 + 0.2, 1.0, 0);
        let prices: Vec<f64> = asks.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![1.235e-6, 0.1 + 0.2]);
        assert_eq!(asks.best(), Some(1.235e-6));
    }

    #[test]
    fn test_stress_operations() {
        let mut set = LevelSet::new(Side::Bid);
        for i in 0..100 {
            set.upsert(1000.0 + i as f64 * 0.5, (i + 1) as f64, i);
        }
        assert_eq!(set.total_quantity(), 5050.0);
        for i in (0..100).step_by(2) {
            set.remove(1000.0 + i as f64 * 0.5);
        }
        assert_eq!(set.len(), 50);
        assert_eq!(set.total_quantity(), 2550.0);
        set.verify_invariant();
    }
}
