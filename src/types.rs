//! Core data types for order-book state and feed payloads.
//!
//! These types are designed to be:
//! - Strongly typed at the feed boundary (decoded snapshot/diff payloads)
//! - Cheap to clone (the engine publishes one `BookState` per update)
//! - Serializable for the presentation layer
//!
//! Prices travel as `f64` but are keyed internally as fixed-point `i64`
//! ticks (see [`PRICE_SCALE`]) so that level identity and ordering are exact.

use serde::{Deserialize, Serialize};

/// Fixed-point scale for price keys (1e-9 resolution).
pub const PRICE_SCALE: f64 = 1e9;

/// Convert a floating point price to its fixed-point key.
#[inline]
pub fn price_to_key(price: f64) -> i64 {
    (price * PRICE_SCALE).round() as i64
}

/// Convert a fixed-point key back to a floating point price.
#[inline]
pub fn key_to_price(key: i64) -> f64 {
    key as f64 / PRICE_SCALE
}

/// Largest relative error a price may lose to its fixed-point key.
pub const PRICE_KEY_TOLERANCE: f64 = 1e-6;

/// Whether `price` keeps its identity through [`price_to_key`].
///
/// Prices too small for the 1e-9 resolution (or too large for an `i64`
/// key) would collapse onto a neighbouring level, so they are refused at
/// the feed boundary instead.
#[inline]
pub fn is_representable(price: f64) -> bool {
    if !price.is_finite() || price <= 0.0 {
        return false;
    }
    let key = price_to_key(price);
    key > 0 && key < i64::MAX && (key_to_price(key) - price).abs() <= price * PRICE_KEY_TOLERANCE
}

/// Order side (bid or ask)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    /// Buy side
    Bid,
    /// Sell side
    Ask,
}

impl Side {
    /// Check if this is a bid.
    #[inline(always)]
    pub fn is_bid(self) -> bool {
        matches!(self, Side::Bid)
    }

    /// Check if this is an ask.
    #[inline(always)]
    pub fn is_ask(self) -> bool {
        matches!(self, Side::Ask)
    }

    /// The other side of the book.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Short lowercase name, used in ids and log lines.
    pub fn name(self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// A single aggregated price level.
///
/// Quantity is always > 0; a zero quantity means "absent" and is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
    pub side: Side,
    /// Timestamp of the update that last touched this level (ns since epoch)
    pub last_updated: i64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64, side: Side, last_updated: i64) -> Self {
        Self {
            price,
            quantity,
            side,
            last_updated,
        }
    }

    /// Representable positive price, finite positive quantity.
    #[inline]
    pub fn is_well_formed(&self) -> bool {
        is_representable(self.price) && self.quantity.is_finite() && self.quantity > 0.0
    }

    /// Notional value (price × quantity).
    #[inline]
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Inclusive price interval spanned by the book.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Width of the range (0 for an empty or single-price book).
    #[inline]
    pub fn span(&self) -> f64 {
        (self.max - self.min).max(0.0)
    }

    #[inline]
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }
}

/// Book consistency status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookConsistency {
    /// Book is valid: best_bid < best_ask
    Valid,
    /// Book is empty (no quotes on one or both sides)
    Empty,
    /// Book is locked: best_bid == best_ask
    Locked,
    /// Book is crossed: best_bid > best_ask
    Crossed,
}

impl BookConsistency {
    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, BookConsistency::Valid)
    }

    #[inline]
    pub fn is_crossed(&self) -> bool {
        matches!(self, BookConsistency::Crossed)
    }
}

/// Depth-bounded order-book state.
///
/// Invariants: bids strictly descending, asks strictly ascending, no
/// duplicate price per side, every quantity > 0. `price_range` spans the
/// union of both sides and `max_quantity` is the largest single level.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BookState {
    /// Bid levels (highest to lowest)
    pub bids: Vec<PriceLevel>,

    /// Ask levels (lowest to highest)
    pub asks: Vec<PriceLevel>,

    /// Largest single-level quantity across both sides
    pub max_quantity: f64,

    /// Price span of the union of both sides
    pub price_range: PriceRange,

    /// Last applied update id
    pub sequence_id: u64,

    /// Timestamp of the update that produced this state (ns since epoch)
    pub timestamp_ns: i64,
}

impl BookState {
    /// Build a state from unsorted per-side levels.
    ///
    /// Levels that are not well-formed are dropped, each side is sorted into
    /// book order and duplicate prices collapse to the last occurrence.
    pub fn from_sides(
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        sequence_id: u64,
        timestamp_ns: i64,
    ) -> Self {
        let bids = normalize_side(bids, Side::Bid);
        let asks = normalize_side(asks, Side::Ask);

        let mut state = Self {
            bids,
            asks,
            max_quantity: 0.0,
            price_range: PriceRange::default(),
            sequence_id,
            timestamp_ns,
        };
        state.recompute_derived();
        state
    }

    /// Recompute `max_quantity` and `price_range` from the level vectors.
    pub fn recompute_derived(&mut self) {
        let mut max_quantity: f64 = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for level in self.levels() {
            max_quantity = max_quantity.max(level.quantity);
            min = min.min(level.price);
            max = max.max(level.price);
        }

        self.max_quantity = max_quantity;
        self.price_range = if min.is_finite() && max.is_finite() {
            PriceRange::new(min, max)
        } else {
            PriceRange::default()
        };
    }

    /// Iterate over both sides (bids first, then asks).
    pub fn levels(&self) -> impl Iterator<Item = &PriceLevel> {
        self.bids.iter().chain(self.asks.iter())
    }

    /// Levels of one side in book order.
    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    #[inline]
    pub fn level_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    #[inline]
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    #[inline]
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid-price; falls back to the single populated side's best price, and
    /// to the centre of the price range for an empty book.
    pub fn mid_price(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => (bid + ask) / 2.0,
            (Some(bid), None) => bid,
            (None, Some(ask)) => ask,
            (None, None) => (self.price_range.min + self.price_range.max) / 2.0,
        }
    }

    /// Spread (best ask − best bid).
    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Spread in basis points of the mid-price.
    pub fn spread_bps(&self) -> Option<f64> {
        let mid = self.mid_price();
        match self.spread() {
            Some(spread) if mid > 0.0 => Some(spread / mid * 10_000.0),
            _ => None,
        }
    }

    pub fn total_bid_volume(&self) -> f64 {
        self.bids.iter().map(|l| l.quantity).sum()
    }

    pub fn total_ask_volume(&self) -> f64 {
        self.asks.iter().map(|l| l.quantity).sum()
    }

    pub fn total_volume(&self) -> f64 {
        self.total_bid_volume() + self.total_ask_volume()
    }

    /// Average quantity per level (0 for an empty book).
    pub fn average_level_volume(&self) -> f64 {
        let count = self.level_count();
        if count == 0 {
            0.0
        } else {
            self.total_volume() / count as f64
        }
    }

    /// Depth imbalance: (bid − ask) / (bid + ask), in [-1, 1].
    pub fn depth_imbalance(&self) -> Option<f64> {
        let bid = self.total_bid_volume();
        let ask = self.total_ask_volume();
        let total = bid + ask;
        if total > 0.0 {
            Some((bid - ask) / total)
        } else {
            None
        }
    }

    pub fn check_consistency(&self) -> BookConsistency {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                if bid < ask {
                    BookConsistency::Valid
                } else if bid == ask {
                    BookConsistency::Locked
                } else {
                    BookConsistency::Crossed
                }
            }
            _ => BookConsistency::Empty,
        }
    }

    /// Check ordering, uniqueness and positivity on both sides.
    pub fn satisfies_invariants(&self) -> bool {
        let bids_ok = self.bids.windows(2).all(|w| w[0].price > w[1].price);
        let asks_ok = self.asks.windows(2).all(|w| w[0].price < w[1].price);
        let qty_ok = self.levels().all(|l| l.quantity > 0.0);
        bids_ok && asks_ok && qty_ok
    }
}

fn normalize_side(levels: Vec<PriceLevel>, side: Side) -> Vec<PriceLevel> {
    let mut by_key = std::collections::BTreeMap::new();
    for mut level in levels.into_iter().filter(PriceLevel::is_well_formed) {
        level.side = side;
        by_key.insert(price_to_key(level.price), level);
    }
    match side {
        Side::Bid => by_key.into_values().rev().collect(),
        Side::Ask => by_key.into_values().collect(),
    }
}

/// One (price, quantity) entry of a snapshot or diff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelUpdate {
    pub price: f64,
    pub quantity: f64,
}

impl LevelUpdate {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }

    /// Representable positive price and finite, non-negative quantity.
    #[inline]
    pub fn is_valid(&self) -> bool {
        is_representable(self.price) && self.quantity.is_finite() && self.quantity >= 0.0
    }
}

impl From<(f64, f64)> for LevelUpdate {
    fn from((price, quantity): (f64, f64)) -> Self {
        Self { price, quantity }
    }
}

/// Decoded bootstrap snapshot delivered by the transport.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<LevelUpdate>,
    pub asks: Vec<LevelUpdate>,
    /// Exchange update id the snapshot corresponds to, if the venue provides one
    pub last_update_id: Option<u64>,
    /// Receipt time (ns since epoch)
    pub timestamp_ns: i64,
}

impl BookSnapshot {
    /// Create a snapshot from `(price, quantity)` pairs.
    pub fn new(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Self {
        Self {
            bids: bids.iter().copied().map(LevelUpdate::from).collect(),
            asks: asks.iter().copied().map(LevelUpdate::from).collect(),
            last_update_id: None,
            timestamp_ns: 0,
        }
    }

    /// Set the exchange update id.
    pub fn with_last_update_id(mut self, id: u64) -> Self {
        self.last_update_id = Some(id);
        self
    }

    /// Set the receipt timestamp.
    pub fn with_timestamp(mut self, timestamp_ns: i64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }
}

/// Decoded incremental diff delivered by the transport.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BookDiff {
    /// First update id covered by this diff
    pub sequence_start: u64,
    /// Last update id covered by this diff
    pub sequence_end: u64,
    pub bids: Vec<LevelUpdate>,
    pub asks: Vec<LevelUpdate>,
    /// Receipt time (ns since epoch)
    pub timestamp_ns: i64,
}

impl BookDiff {
    /// Create a diff covering `sequence_start..=sequence_end`.
    pub fn new(sequence_start: u64, sequence_end: u64) -> Self {
        Self {
            sequence_start,
            sequence_end,
            ..Default::default()
        }
    }

    /// Append a bid entry (quantity 0 deletes the level).
    pub fn bid(mut self, price: f64, quantity: f64) -> Self {
        self.bids.push(LevelUpdate::new(price, quantity));
        self
    }

    /// Append an ask entry (quantity 0 deletes the level).
    pub fn ask(mut self, price: f64, quantity: f64) -> Self {
        self.asks.push(LevelUpdate::new(price, quantity));
        self
    }

    /// Set the receipt timestamp.
    pub fn with_timestamp(mut self, timestamp_ns: i64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
