//! Aggregate statistics over an analysis pass.
//!
//! [`StatsAggregator::compute`] is a pure function of the current zone list,
//! the book it was derived from and the previous pass's zones. It never
//! fails: empty input degrades every aggregate to zero/empty.
//!
//! # Usage
//!
//! ```ignore
//! use orderbook_pressure::statistics::StatsAggregator;
//!
//! let stats = StatsAggregator::default().compute(&zones, &book, &previous, now_ns);
//! println!("{} zones, mean intensity {:.2}", stats.zone_count, stats.mean_intensity);
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{BookState, Side};
use crate::zones::{closest_match, PressureType, Zone, ZoneType};

/// Zones above this intensity are reported as critical levels.
pub const CRITICAL_INTENSITY: f64 = 0.7;

/// Zones above this intensity count toward volume concentration.
pub const CONCENTRATION_INTENSITY: f64 = 0.6;

/// Level quantity multiple of the book average that counts as a spike.
pub const SPIKE_MULTIPLE: f64 = 3.0;

/// Zones younger than this are "forming".
pub const FORMING_AGE_SECS: f64 = 30.0;

pub const STRENGTHENING_INTENSITY: f64 = 0.6;
pub const WEAKENING_INTENSITY: f64 = 0.4;

/// Zone count at which fragmentation saturates.
pub const FRAGMENTATION_ZONES: f64 = 10.0;

// ============================================================================
// Running Statistics (Welford's Algorithm)
// ============================================================================

/// Online algorithm for computing running mean and standard deviation.
///
/// Uses Welford's algorithm for numerical stability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    /// Number of observations
    pub count: u64,
    /// Running mean
    pub mean: f64,
    /// Running M2 (sum of squared differences from mean)
    m2: f64,
    /// Minimum value observed
    pub min: f64,
    /// Maximum value observed
    pub max: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Update statistics with a new value (Welford's online algorithm).
    #[inline]
    pub fn update(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;

        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Population variance.
    #[inline]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Population standard deviation.
    #[inline]
    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = Self::new();
        for value in iter {
            stats.update(value);
        }
        stats
    }
}

// ============================================================================
// Depth Statistics
// ============================================================================

/// Liquidity statistics for one side of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthStats {
    pub side: Side,

    /// Total quantity across all levels
    pub total_volume: f64,

    pub levels_count: usize,

    pub avg_level_size: f64,

    /// Volume-weighted average price
    pub weighted_avg_price: f64,

    pub min_level_size: f64,
    pub max_level_size: f64,
    pub std_dev_level_size: f64,

    /// Best price on this side
    pub best_price: Option<f64>,

    /// Furthest price from the mid
    pub worst_price: Option<f64>,

    /// Volume at the best level / total volume
    pub concentration_ratio: f64,
}

impl DepthStats {
    pub fn empty(side: Side) -> Self {
        Self {
            side,
            total_volume: 0.0,
            levels_count: 0,
            avg_level_size: 0.0,
            weighted_avg_price: 0.0,
            min_level_size: 0.0,
            max_level_size: 0.0,
            std_dev_level_size: 0.0,
            best_price: None,
            worst_price: None,
            concentration_ratio: 0.0,
        }
    }

    /// Compute depth statistics for `side` of `book`.
    pub fn from_book(book: &BookState, side: Side) -> Self {
        let levels: Vec<_> = book.side(side).iter().filter(|l| l.is_well_formed()).collect();
        if levels.is_empty() {
            return Self::empty(side);
        }

        let sizes: RunningStats = levels.iter().map(|l| l.quantity).collect();
        let total_volume: f64 = levels.iter().map(|l| l.quantity).sum();
        let notional: f64 = levels.iter().map(|l| l.notional()).sum();

        let best = levels[0];
        let worst = levels[levels.len() - 1];

        Self {
            side,
            total_volume,
            levels_count: levels.len(),
            avg_level_size: sizes.mean,
            weighted_avg_price: if total_volume > 0.0 { notional / total_volume } else { 0.0 },
            min_level_size: sizes.min,
            max_level_size: sizes.max,
            std_dev_level_size: sizes.std(),
            best_price: Some(best.price),
            worst_price: Some(worst.price),
            concentration_ratio: if total_volume > 0.0 { best.quantity / total_volume } else { 0.0 },
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels_count == 0
    }

    /// Price distance between best and worst level.
    pub fn price_range(&self) -> f64 {
        match (self.best_price, self.worst_price) {
            (Some(best), Some(worst)) => (worst - best).abs(),
            _ => 0.0,
        }
    }

    /// Coefficient of variation of level sizes. Higher means more uneven
    /// liquidity.
    #[inline]
    pub fn size_coefficient_of_variation(&self) -> f64 {
        if self.avg_level_size > 0.0 {
            self.std_dev_level_size / self.avg_level_size
        } else {
            0.0
        }
    }
}

// ============================================================================
// Pass statistics
// ============================================================================

/// Zone counts per pressure type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureCounts {
    pub support: usize,
    pub resistance: usize,
    pub accumulation: usize,
    pub distribution: usize,
}

impl PressureCounts {
    fn record(&mut self, pressure: PressureType) {
        match pressure {
            PressureType::Support => self.support += 1,
            PressureType::Resistance => self.resistance += 1,
            PressureType::Accumulation => self.accumulation += 1,
            PressureType::Distribution => self.distribution += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeDistribution {
    pub total_volume: f64,
    pub average_level_volume: f64,
    /// Levels above `SPIKE_MULTIPLE` × average
    pub spike_count: usize,
    /// Volume in high-intensity zones / book volume, in [0, 1]
    pub concentration: f64,
}

/// Statistics over Distribution zones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub count: usize,
    pub average_order_count: f64,
    pub largest_order_count: usize,
    /// Count per unit of book price span
    pub density: f64,
}

/// Independent age/intensity classification buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalStats {
    pub forming: usize,
    pub strengthening: usize,
    pub weakening: usize,
    pub average_age_secs: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub fragmentation: f64,
    pub concentration_risk: f64,
    /// Mean absolute deviation of zone intensities
    pub volatility: f64,
}

/// Zone churn against the previous pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTurnover {
    pub new_zones: usize,
    pub persisted_zones: usize,
    pub vanished_zones: usize,
}

/// Aggregate view of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub zone_count: usize,
    pub support_zones: usize,
    pub resistance_zones: usize,
    pub by_pressure: PressureCounts,
    pub mean_intensity: f64,
    /// Zone with maximum intensity
    pub strongest_zone: Option<Zone>,
    /// Centres of zones with intensity above `CRITICAL_INTENSITY`, ascending
    pub critical_levels: Vec<f64>,
    pub volume: VolumeDistribution,
    pub clusters: ClusterStats,
    pub temporal: TemporalStats,
    pub risk: RiskMetrics,
    pub turnover: ZoneTurnover,
    pub bid_depth: DepthStats,
    pub ask_depth: DepthStats,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            zone_count: 0,
            support_zones: 0,
            resistance_zones: 0,
            by_pressure: PressureCounts::default(),
            mean_intensity: 0.0,
            strongest_zone: None,
            critical_levels: Vec::new(),
            volume: VolumeDistribution::default(),
            clusters: ClusterStats::default(),
            temporal: TemporalStats::default(),
            risk: RiskMetrics::default(),
            turnover: ZoneTurnover::default(),
            bid_depth: DepthStats::empty(Side::Bid),
            ask_depth: DepthStats::empty(Side::Ask),
        }
    }
}

impl Statistics {
    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "zones={} (S{} R{} A{} D{}) mean_intensity={:.3} critical={} spikes={} fragmentation={:.2}",
            self.zone_count,
            self.by_pressure.support,
            self.by_pressure.resistance,
            self.by_pressure.accumulation,
            self.by_pressure.distribution,
            self.mean_intensity,
            self.critical_levels.len(),
            self.volume.spike_count,
            self.risk.fragmentation,
        )
    }
}

/// Computes [`Statistics`]; `match_tolerance` pairs zones across passes for
/// turnover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsAggregator {
    pub match_tolerance: f64,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self { match_tolerance: 0.001 }
    }
}

impl StatsAggregator {
    pub fn new(match_tolerance: f64) -> Self {
        Self { match_tolerance }
    }

    pub fn compute(&self, current: &[Zone], book: &BookState, previous: &[Zone], now_ns: i64) -> Statistics {
        let mut stats = Statistics {
            zone_count: current.len(),
            bid_depth: DepthStats::from_book(book, Side::Bid),
            ask_depth: DepthStats::from_book(book, Side::Ask),
            ..Statistics::default()
        };

        let intensities: RunningStats = current.iter().map(|z| z.intensity).collect();
        stats.mean_intensity = intensities.mean;

        for zone in current {
            match zone.zone_type {
                ZoneType::Support => stats.support_zones += 1,
                ZoneType::Resistance => stats.resistance_zones += 1,
            }
            stats.by_pressure.record(zone.pressure_type);
        }

        stats.strongest_zone = current
            .iter()
            .max_by(|a, b| a.intensity.total_cmp(&b.intensity))
            .cloned();

        let mut critical: Vec<f64> = current
            .iter()
            .filter(|z| z.intensity > CRITICAL_INTENSITY)
            .map(|z| z.center_price)
            .collect();
        critical.sort_by(f64::total_cmp);
        stats.critical_levels = critical;

        stats.volume = volume_distribution(current, book);
        stats.clusters = cluster_stats(current, book);
        stats.temporal = temporal_stats(current, now_ns);
        stats.risk = RiskMetrics {
            fragmentation: (current.len() as f64 / FRAGMENTATION_ZONES).min(1.0),
            concentration_risk: (stats.volume.concentration - 0.5).max(0.0) * 2.0,
            volatility: mean_absolute_deviation(current, intensities.mean),
        };
        stats.turnover = self.turnover(current, previous);

        stats
    }

    fn turnover(&self, current: &[Zone], previous: &[Zone]) -> ZoneTurnover {
        let persisted = current
            .iter()
            .filter(|z| closest_match(z, previous, self.match_tolerance).is_some())
            .count();
        let vanished = previous
            .iter()
            .filter(|z| closest_match(z, current, self.match_tolerance).is_none())
            .count();
        ZoneTurnover {
            new_zones: current.len() - persisted,
            persisted_zones: persisted,
            vanished_zones: vanished,
        }
    }
}

fn volume_distribution(zones: &[Zone], book: &BookState) -> VolumeDistribution {
    let levels: Vec<f64> = book
        .levels()
        .filter(|l| l.is_well_formed())
        .map(|l| l.quantity)
        .collect();
    let total_volume: f64 = levels.iter().sum();
    let average_level_volume = if levels.is_empty() {
        0.0
    } else {
        total_volume / levels.len() as f64
    };
    let spike_count = levels
        .iter()
        .filter(|&&q| average_level_volume > 0.0 && q > average_level_volume * SPIKE_MULTIPLE)
        .count();
    let concentrated: f64 = zones
        .iter()
        .filter(|z| z.intensity > CONCENTRATION_INTENSITY)
        .map(|z| z.total_volume)
        .sum();
    let concentration = if total_volume > 0.0 {
        (concentrated / total_volume).clamp(0.0, 1.0)
    } else {
        0.0
    };

    VolumeDistribution {
        total_volume,
        average_level_volume,
        spike_count,
        concentration,
    }
}

fn cluster_stats(zones: &[Zone], book: &BookState) -> ClusterStats {
    let clusters: Vec<&Zone> = zones
        .iter()
        .filter(|z| z.pressure_type == PressureType::Distribution)
        .collect();
    if clusters.is_empty() {
        return ClusterStats::default();
    }

    let count = clusters.len();
    let orders: usize = clusters.iter().map(|z| z.order_count).sum();
    let span = book.price_range.span();

    ClusterStats {
        count,
        average_order_count: orders as f64 / count as f64,
        largest_order_count: clusters.iter().map(|z| z.order_count).max().unwrap_or(0),
        density: if span > 0.0 { count as f64 / span } else { 0.0 },
    }
}

fn temporal_stats(zones: &[Zone], now_ns: i64) -> TemporalStats {
    if zones.is_empty() {
        return TemporalStats::default();
    }

    let mut temporal = TemporalStats::default();
    let mut total_age = 0.0;
    for zone in zones {
        let age = zone.age_secs(now_ns);
        total_age += age;
        if age < FORMING_AGE_SECS {
            temporal.forming += 1;
        }
        if zone.intensity > STRENGTHENING_INTENSITY {
            temporal.strengthening += 1;
        }
        if zone.intensity < WEAKENING_INTENSITY {
            temporal.weakening += 1;
        }
    }
    temporal.average_age_secs = total_age / zones.len() as f64;
    temporal
}

fn mean_absolute_deviation(zones: &[Zone], mean: f64) -> f64 {
    if zones.is_empty() {
        return 0.0;
    }
    zones.iter().map(|z| (z.intensity - mean).abs()).sum::<f64>() / zones.len() as f64
}
