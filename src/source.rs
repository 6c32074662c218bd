//! Market data source abstraction.
//!
//! A source yields decoded [`FeedEvent`]s: one bootstrap snapshot followed by
//! diffs. The engine never talks to a transport directly; anything that can
//! produce this sequence plugs in through [`MarketDataSource`].
//!
//! - [`VecSource`]: in-memory events, for tests and replays
//! - [`SyntheticFeed`]: random-walk book used as the fallback once
//!   reconnection is exhausted
//!
//! # Implementing Custom Sources
//!
//! ```ignore
//! use orderbook_pressure::source::{FeedEvent, MarketDataSource, SourceMetadata};
//! use orderbook_pressure::Result;
//!
//! struct Recorded {
//!     events: Vec<FeedEvent>,
//!     metadata: SourceMetadata,
//! }
//!
//! impl MarketDataSource for Recorded {
//!     type EventIter = std::vec::IntoIter<FeedEvent>;
//!
//!     fn events(self) -> Result<Self::EventIter> {
//!         Ok(self.events.into_iter())
//!     }
//!
//!     fn metadata(&self) -> &SourceMetadata {
//!         &self.metadata
//!     }
//! }
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PressureError, Result};
use crate::types::{BookDiff, BookSnapshot, LevelUpdate};

// ============================================================================
// Events
// ============================================================================

/// One decoded message from a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedEvent {
    Snapshot(BookSnapshot),
    Diff(BookDiff),
}

impl FeedEvent {
    pub fn timestamp_ns(&self) -> i64 {
        match self {
            FeedEvent::Snapshot(s) => s.timestamp_ns,
            FeedEvent::Diff(d) => d.timestamp_ns,
        }
    }

    #[inline]
    pub fn is_snapshot(&self) -> bool {
        matches!(self, FeedEvent::Snapshot(_))
    }
}

// ============================================================================
// Source Metadata
// ============================================================================

/// Metadata about a market data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Trading symbol (e.g., "BTCUSDT")
    pub symbol: Option<String>,

    /// Provider name (e.g., "memory", "synthetic")
    pub provider: Option<String>,

    /// Estimated event count (for progress tracking)
    pub estimated_events: Option<u64>,
}

impl SourceMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_estimated_events(mut self, count: u64) -> Self {
        self.estimated_events = Some(count);
        self
    }
}

// ============================================================================
// MarketDataSource Trait
// ============================================================================

/// A provider of decoded snapshot/diff events.
///
/// Implementations should yield the bootstrap snapshot first; diffs that
/// arrive before it are treated by the engine as out of order.
pub trait MarketDataSource {
    type EventIter: Iterator<Item = FeedEvent>;

    /// Consume the source and return an iterator over events.
    fn events(self) -> Result<Self::EventIter>;

    fn metadata(&self) -> &SourceMetadata;
}

// ============================================================================
// Vector Source
// ============================================================================

/// In-memory event source.
///
/// # Example
///
/// ```
/// use orderbook_pressure::source::{FeedEvent, MarketDataSource, VecSource};
/// use orderbook_pressure::{BookDiff, BookSnapshot};
///
/// let events = vec![
///     FeedEvent::Snapshot(BookSnapshot::new(&[(100.0, 5.0)], &[(101.0, 4.0)]).with_last_update_id(10)),
///     FeedEvent::Diff(BookDiff::new(11, 11).bid(100.0, 6.0)),
/// ];
///
/// let source = VecSource::new(events);
/// assert_eq!(source.metadata().estimated_events, Some(2));
/// assert_eq!(source.events().unwrap().count(), 2);
/// ```
pub struct VecSource {
    events: Vec<FeedEvent>,
    metadata: SourceMetadata,
}

impl VecSource {
    pub fn new(events: Vec<FeedEvent>) -> Self {
        Self {
            metadata: SourceMetadata::new()
                .with_provider("memory")
                .with_estimated_events(events.len() as u64),
            events,
        }
    }

    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl MarketDataSource for VecSource {
    type EventIter = std::vec::IntoIter<FeedEvent>;

    fn events(self) -> Result<Self::EventIter> {
        Ok(self.events.into_iter())
    }

    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }
}

// ============================================================================
// Synthetic Feed
// ============================================================================

/// Parameters of the synthetic random-walk book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub base_price: f64,
    pub tick_size: f64,
    /// Levels per side in the snapshot
    pub levels: usize,
    pub base_quantity: f64,
    /// Level updates per diff
    pub updates_per_diff: usize,
    /// Probability that an update removes its level
    pub removal_probability: f64,
    /// Spacing between events
    pub interval_ms: u64,
    pub start_ns: i64,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            base_price: 100.0,
            tick_size: 0.01,
            levels: 20,
            base_quantity: 10.0,
            updates_per_diff: 4,
            removal_probability: 0.1,
            interval_ms: 100,
            start_ns: 0,
            seed: None,
        }
    }
}

impl SyntheticConfig {
    pub fn with_base_price(mut self, price: f64) -> Self {
        self.base_price = price;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_start(mut self, start_ns: i64) -> Self {
        self.start_ns = start_ns;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_price.is_finite() && self.base_price > 0.0) {
            return Err(PressureError::InvalidConfig(format!(
                "synthetic base price must be positive, got {}",
                self.base_price
            )));
        }
        if !(self.tick_size.is_finite() && self.tick_size > 0.0) {
            return Err(PressureError::InvalidConfig(format!(
                "synthetic tick size must be positive, got {}",
                self.tick_size
            )));
        }
        if self.levels == 0 {
            return Err(PressureError::InvalidConfig("synthetic feed needs at least one level".into()));
        }
        Ok(())
    }
}

/// Endless random-walk feed with the same snapshot/diff shape as a live
/// transport. The first event is a snapshot; every later event is a diff
/// chaining from the previous sequence id.
#[derive(Debug, Clone)]
pub struct SyntheticFeed {
    config: SyntheticConfig,
    rng: StdRng,
    metadata: SourceMetadata,
    mid_ticks: i64,
    sequence: u64,
    timestamp_ns: i64,
    started: bool,
}

impl SyntheticFeed {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mid_ticks = (config.base_price / config.tick_size).round() as i64;
        log::info!(
            "Synthetic feed started at {:.4} ({} levels per side)",
            config.base_price,
            config.levels
        );

        Ok(Self {
            timestamp_ns: config.start_ns,
            config,
            rng,
            metadata: SourceMetadata::new().with_provider("synthetic"),
            mid_ticks,
            sequence: 0,
            started: false,
        })
    }

    #[inline]
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Current synthetic mid price.
    pub fn mid_price(&self) -> f64 {
        self.mid_ticks as f64 * self.config.tick_size
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn price_at(&self, ticks: i64) -> f64 {
        ticks as f64 * self.config.tick_size
    }

    fn quantity(&mut self) -> f64 {
        let q = self.config.base_quantity * self.rng.gen_range(0.2..3.0);
        (q * 1000.0).round() / 1000.0
    }

    /// Fresh snapshot around the current mid; restarts the sequence chain.
    pub fn snapshot(&mut self) -> BookSnapshot {
        let mut bids = Vec::with_capacity(self.config.levels);
        let mut asks = Vec::with_capacity(self.config.levels);
        for i in 0..self.config.levels as i64 {
            let bid = self.price_at(self.mid_ticks - 1 - i);
            let ask = self.price_at(self.mid_ticks + 1 + i);
            let bid_qty = self.quantity();
            let ask_qty = self.quantity();
            if bid > 0.0 {
                bids.push(LevelUpdate::new(bid, bid_qty));
            }
            asks.push(LevelUpdate::new(ask, ask_qty));
        }

        self.sequence += 1;
        self.started = true;
        BookSnapshot {
            bids,
            asks,
            last_update_id: Some(self.sequence),
            timestamp_ns: self.timestamp_ns,
        }
    }

    /// Next diff: the mid walks by at most one tick and a few levels near it
    /// change.
    pub fn next_diff(&mut self) -> BookDiff {
        self.timestamp_ns += self.config.interval_ms as i64 * 1_000_000;
        self.sequence += 1;

        let step: i64 = self.rng.gen_range(-1..=1);
        if self.mid_ticks + step > self.config.levels as i64 {
            self.mid_ticks += step;
        }

        let mut diff = BookDiff::new(self.sequence, self.sequence).with_timestamp(self.timestamp_ns);
        for _ in 0..self.config.updates_per_diff {
            let offset: i64 = self.rng.gen_range(0..self.config.levels as i64);
            let remove = self.rng.gen_bool(self.config.removal_probability.clamp(0.0, 1.0));
            let quantity = if remove { 0.0 } else { self.quantity() };
            if self.rng.gen_bool(0.5) {
                let price = self.price_at(self.mid_ticks - 1 - offset);
                diff = diff.bid(price, quantity);
            } else {
                let price = self.price_at(self.mid_ticks + 1 + offset);
                diff = diff.ask(price, quantity);
            }
        }
        // Keep the touch populated so the walk never crosses itself
        diff = diff
            .bid(self.price_at(self.mid_ticks - 1), self.quantity())
            .ask(self.price_at(self.mid_ticks + 1), self.quantity());
        diff
    }

    /// Levels that drifted outside the new touch are cleared.
    fn clear_crossing(&self, diff: BookDiff, previous_mid: i64) -> BookDiff {
        let mut diff = diff;
        if self.mid_ticks > previous_mid {
            diff = diff.ask(self.price_at(previous_mid + 1), 0.0);
        } else if self.mid_ticks < previous_mid {
            diff = diff.bid(self.price_at(previous_mid - 1), 0.0);
        }
        diff
    }
}

impl Iterator for SyntheticFeed {
    type Item = FeedEvent;

    fn next(&mut self) -> Option<FeedEvent> {
        if !self.started {
            return Some(FeedEvent::Snapshot(self.snapshot()));
        }
        let previous_mid = self.mid_ticks;
        let diff = self.next_diff();
        Some(FeedEvent::Diff(self.clear_crossing(diff, previous_mid)))
    }
}

impl MarketDataSource for SyntheticFeed {
    type EventIter = SyntheticFeed;

    fn events(self) -> Result<Self::EventIter> {
        Ok(self)
    }

    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }
}
