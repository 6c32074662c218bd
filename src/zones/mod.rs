//! Pressure-zone detection.
//!
//! Six independent candidate generators run over the same [`BookState`];
//! their outputs are concatenated and reduced by a merge pass into at most
//! `max_zones` canonical zones.
//!
//! | Generator | Module | Pressure types |
//! |-----------|--------|----------------|
//! | Volume-weighted density clustering | [`density`] | Support / Resistance |
//! | Same-side proximity grouping | [`proximity`] | Support / Resistance |
//! | Order-flow imbalance scan | [`imbalance`] | Support / Resistance |
//! | Liquidity density mapping | [`liquidity`] | Accumulation / Distribution |
//! | Microstructure heuristics | [`microstructure`] | all four |
//! | Time-weighted volume profile | [`profile`] | Accumulation / Distribution |
//!
//! Malformed levels (non-finite or non-positive price/quantity) are dropped
//! when the [`BookView`] is built, so every generator degrades instead of
//! failing the pass.

pub mod density;
pub mod imbalance;
pub mod liquidity;
pub mod merge;
pub mod microstructure;
pub mod profile;
pub mod proximity;

use serde::{Deserialize, Serialize};

use crate::types::{price_to_key, BookState, PriceLevel, PriceRange, Side};

pub use merge::merge_zones;
pub use profile::VolumeHistory;

/// Zone classification derived from side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneType {
    Support,
    Resistance,
}

impl ZoneType {
    pub fn for_side(side: Side) -> Self {
        match side {
            Side::Bid => ZoneType::Support,
            Side::Ask => ZoneType::Resistance,
        }
    }
}

/// Inferred market behaviour of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PressureType {
    Support,
    Resistance,
    Accumulation,
    Distribution,
}

impl PressureType {
    pub fn name(&self) -> &'static str {
        match self {
            PressureType::Support => "support",
            PressureType::Resistance => "resistance",
            PressureType::Accumulation => "accumulation",
            PressureType::Distribution => "distribution",
        }
    }

    /// Support/Resistance by side.
    pub fn directional(side: Side) -> Self {
        match side {
            Side::Bid => PressureType::Support,
            Side::Ask => PressureType::Resistance,
        }
    }

    /// Accumulation/Distribution by side.
    pub fn flow(side: Side) -> Self {
        match side {
            Side::Bid => PressureType::Accumulation,
            Side::Ask => PressureType::Distribution,
        }
    }
}

/// Which generator produced a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneSource {
    DensityCluster,
    ProximityGroup,
    Imbalance,
    LiquidityPeak,
    Iceberg,
    HiddenLiquidity,
    AlgorithmicPattern,
    VolumeProfile,
}

impl ZoneSource {
    /// Short tag used in zone ids.
    pub fn tag(&self) -> &'static str {
        match self {
            ZoneSource::DensityCluster => "dc",
            ZoneSource::ProximityGroup => "pg",
            ZoneSource::Imbalance => "im",
            ZoneSource::LiquidityPeak => "lq",
            ZoneSource::Iceberg => "ib",
            ZoneSource::HiddenLiquidity => "hl",
            ZoneSource::AlgorithmicPattern => "ap",
            ZoneSource::VolumeProfile => "vp",
        }
    }
}

/// A derived price region carrying above-average buy or sell pressure.
///
/// Invariants: `min_price ≤ center_price ≤ max_price`; `intensity` and
/// `strength` in [0, 1]. Zones are immutable once published; the next pass
/// produces a wholly new list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    pub pressure_type: PressureType,
    pub source: ZoneSource,
    pub center_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub intensity: f64,
    pub strength: f64,
    pub total_volume: f64,
    pub order_count: usize,
    pub average_quantity: f64,
    /// Detection time of this pass (ns since epoch)
    pub timestamp: i64,
    /// Detection time of the earliest matching zone in previous passes
    pub first_seen_ns: i64,
    pub is_active: bool,
}

impl Zone {
    /// Price width of the zone.
    #[inline]
    pub fn width(&self) -> f64 {
        self.max_price - self.min_price
    }

    #[inline]
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min_price && price <= self.max_price
    }

    /// Closed-interval overlap test.
    #[inline]
    pub fn overlaps(&self, other: &Zone) -> bool {
        self.min_price <= other.max_price && other.min_price <= self.max_price
    }

    /// Age in seconds relative to `now_ns`, measured from `first_seen_ns`.
    pub fn age_secs(&self, now_ns: i64) -> f64 {
        (now_ns.saturating_sub(self.first_seen_ns)).max(0) as f64 / 1e9
    }

    /// Check the bound and range invariants.
    pub fn satisfies_invariants(&self) -> bool {
        self.min_price <= self.center_price
            && self.center_price <= self.max_price
            && (0.0..=1.0).contains(&self.intensity)
            && (0.0..=1.0).contains(&self.strength)
    }
}

/// Raw generator output before normalisation into a [`Zone`].
#[derive(Debug, Clone, Copy)]
pub struct ZoneDraft {
    pub source: ZoneSource,
    pub side: Side,
    pub pressure_type: PressureType,
    pub min_price: f64,
    pub center_price: f64,
    pub max_price: f64,
    pub total_volume: f64,
    pub order_count: usize,
    pub intensity: f64,
    pub strength: f64,
}

impl ZoneDraft {
    /// Normalise into a zone: bounds ordered, centre clamped into bounds,
    /// intensity and strength clamped to [0, 1].
    pub fn build(self, timestamp: i64) -> Zone {
        let (min_price, max_price) = if self.min_price <= self.max_price {
            (self.min_price, self.max_price)
        } else {
            (self.max_price, self.min_price)
        };
        let center_price = if self.center_price.is_finite() {
            self.center_price.clamp(min_price, max_price)
        } else {
            (min_price + max_price) / 2.0
        };
        let total_volume = if self.total_volume.is_finite() {
            self.total_volume.max(0.0)
        } else {
            0.0
        };
        let average_quantity = if self.order_count > 0 {
            total_volume / self.order_count as f64
        } else {
            0.0
        };

        Zone {
            id: format!(
                "{}-{}-{}",
                self.source.tag(),
                self.side.name(),
                price_to_key(center_price)
            ),
            side: self.side,
            zone_type: ZoneType::for_side(self.side),
            pressure_type: self.pressure_type,
            source: self.source,
            center_price,
            min_price,
            max_price,
            intensity: clamp01(self.intensity),
            strength: clamp01(self.strength),
            total_volume,
            order_count: self.order_count,
            average_quantity,
            timestamp,
            first_seen_ns: timestamp,
            is_active: true,
        }
    }
}

/// Tunable thresholds for every generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    // Density clustering
    /// Linkage epsilon as a fraction of the book's price span
    pub density_epsilon_ratio: f64,
    pub density_min_levels: usize,
    pub density_volume_floor: f64,
    pub density_median_factor: f64,
    pub density_p75_factor: f64,

    // Proximity grouping
    /// Relative distance between neighbouring levels of one group
    pub proximity_tolerance: f64,
    pub proximity_volume_floor: f64,
    pub proximity_min_orders: usize,

    // Imbalance scan
    pub imbalance_buckets: usize,
    /// Dominant/minor volume ratio that counts as imbalanced
    pub imbalance_ratio: f64,

    // Liquidity density mapping
    pub liquidity_buckets: usize,
    /// Peak floor as a fraction of the densest bucket
    pub liquidity_peak_floor: f64,
    /// Peak width cut-off as a fraction of the peak density
    pub liquidity_width_ratio: f64,

    // Microstructure heuristics
    pub iceberg_multiple: f64,
    pub iceberg_confidence: f64,
    pub hidden_median_factor: f64,
    pub hidden_tolerance: f64,
    pub hidden_min_orders: usize,
    pub algo_min_repeats: usize,

    // Time-weighted profile
    pub history_capacity: usize,
    pub min_history_samples: usize,
    /// Minimum spacing between history samples
    pub history_interval_secs: f64,
    pub half_life_secs: f64,
    pub profile_width_ratio: f64,

    // Merge
    pub max_zones: usize,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            density_epsilon_ratio: 0.002,
            density_min_levels: 5,
            density_volume_floor: 100.0,
            density_median_factor: 1.5,
            density_p75_factor: 0.8,

            proximity_tolerance: 0.001,
            proximity_volume_floor: 50.0,
            proximity_min_orders: 3,

            imbalance_buckets: 100,
            imbalance_ratio: 2.0,

            liquidity_buckets: 200,
            liquidity_peak_floor: 0.25,
            liquidity_width_ratio: 0.5,

            iceberg_multiple: 5.0,
            iceberg_confidence: 0.9,
            hidden_median_factor: 2.0,
            hidden_tolerance: 0.002,
            hidden_min_orders: 3,
            algo_min_repeats: 3,

            history_capacity: 120,
            min_history_samples: 10,
            history_interval_secs: 30.0,
            half_life_secs: 3_600.0,
            profile_width_ratio: 0.0005,

            max_zones: 20,
        }
    }
}

impl ZoneConfig {
    /// Set the maximum number of zones per pass.
    pub fn with_max_zones(mut self, max_zones: usize) -> Self {
        self.max_zones = max_zones;
        self
    }

    /// Set the fixed floor of the dynamic cluster volume threshold.
    pub fn with_density_volume_floor(mut self, floor: f64) -> Self {
        self.density_volume_floor = floor;
        self
    }

    /// Set the history requirements of the time-weighted profile.
    pub fn with_history(mut self, capacity: usize, min_samples: usize) -> Self {
        self.history_capacity = capacity;
        self.min_history_samples = min_samples;
        self
    }

    /// Set the minimum spacing between history samples; 0 records every pass.
    pub fn with_history_interval(mut self, secs: f64) -> Self {
        self.history_interval_secs = secs;
        self
    }

    pub(crate) fn history_interval_ns(&self) -> i64 {
        if self.history_interval_secs.is_finite() && self.history_interval_secs > 0.0 {
            (self.history_interval_secs * 1e9) as i64
        } else {
            0
        }
    }
}

/// Sanitised, pre-computed view of a book shared by all generators.
#[derive(Debug, Clone)]
pub struct BookView {
    /// Well-formed bids in book order (descending)
    pub bids: Vec<PriceLevel>,
    /// Well-formed asks in book order (ascending)
    pub asks: Vec<PriceLevel>,
    /// Both sides, ascending by price
    pub levels: Vec<PriceLevel>,
    pub range: PriceRange,
    pub mid_price: f64,
    pub max_quantity: f64,
    pub total_volume: f64,
    pub timestamp: i64,
}

impl BookView {
    pub fn new(book: &BookState) -> Self {
        let bids: Vec<PriceLevel> = book.bids.iter().copied().filter(PriceLevel::is_well_formed).collect();
        let asks: Vec<PriceLevel> = book.asks.iter().copied().filter(PriceLevel::is_well_formed).collect();

        let mut levels: Vec<PriceLevel> = bids.iter().chain(asks.iter()).copied().collect();
        levels.sort_by(|a, b| a.price.total_cmp(&b.price));

        let range = match (levels.first(), levels.last()) {
            (Some(lo), Some(hi)) => PriceRange::new(lo.price, hi.price),
            _ => PriceRange::default(),
        };
        let max_quantity = levels.iter().map(|l| l.quantity).fold(0.0, f64::max);
        let total_volume = levels.iter().map(|l| l.quantity).sum();

        let mid_price = match (bids.first(), asks.first()) {
            (Some(b), Some(a)) => (b.price + a.price) / 2.0,
            (Some(b), None) => b.price,
            (None, Some(a)) => a.price,
            (None, None) => 0.0,
        };

        Self {
            bids,
            asks,
            levels,
            range,
            mid_price,
            max_quantity,
            total_volume,
            timestamp: book.timestamp_ns,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Average quantity per level.
    pub fn average_volume(&self) -> f64 {
        if self.levels.is_empty() {
            0.0
        } else {
            self.total_volume / self.levels.len() as f64
        }
    }

    /// Fraction of book volume represented by `volume`.
    pub fn volume_share(&self, volume: f64) -> f64 {
        if self.total_volume > 0.0 {
            clamp01(volume / self.total_volume)
        } else {
            0.0
        }
    }

    /// Side implied by a price's position relative to the mid.
    pub fn side_of(&self, price: f64) -> Side {
        if price < self.mid_price {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    /// All level quantities, ascending.
    pub fn sorted_quantities(&self) -> Vec<f64> {
        let mut q: Vec<f64> = self.levels.iter().map(|l| l.quantity).collect();
        q.sort_by(f64::total_cmp);
        q
    }
}

/// Runs every generator and the merge pass.
///
/// Owns the rolling volume history used by the time-weighted profile; the
/// caller owns the detector, so there is no shared module-level state.
#[derive(Debug, Clone)]
pub struct ZoneDetector {
    config: ZoneConfig,
    history: VolumeHistory,
}

impl Default for ZoneDetector {
    fn default() -> Self {
        Self::new(ZoneConfig::default())
    }
}

impl ZoneDetector {
    pub fn new(config: ZoneConfig) -> Self {
        let history = VolumeHistory::new(config.history_capacity).with_min_interval(config.history_interval_ns());
        Self { config, history }
    }

    #[inline]
    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    #[inline]
    pub fn history(&self) -> &VolumeHistory {
        &self.history
    }

    /// Record `book` into the history and produce the canonical zone list.
    pub fn detect(&mut self, book: &BookState) -> Vec<Zone> {
        let view = BookView::new(book);
        if view.is_empty() {
            return Vec::new();
        }

        self.history.record(&view);

        let candidates = self.candidates(&view);
        let total = candidates.len();
        let zones = merge_zones(candidates, self.config.max_zones);

        log::debug!(
            "Zone pass at seq {}: {} candidates -> {} zones",
            book.sequence_id,
            total,
            zones.len()
        );

        zones
    }

    /// Concatenated, un-merged output of all six generators.
    pub fn candidates(&self, view: &BookView) -> Vec<Zone> {
        let config = &self.config;
        let mut candidates = Vec::new();
        candidates.extend(density::detect(view, config));
        candidates.extend(proximity::detect(view, config));
        candidates.extend(imbalance::detect(view, config));
        candidates.extend(liquidity::detect(view, config));
        candidates.extend(microstructure::detect(view, config));
        candidates.extend(profile::detect(&self.history, view, config));
        candidates
    }

    /// Drop the retained history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Closest same-side zone in `candidates` whose centre lies within
/// `tolerance` (relative to `zone.center_price`).
pub fn closest_match<'a>(zone: &Zone, candidates: &'a [Zone], tolerance: f64) -> Option<&'a Zone> {
    let limit = zone.center_price.abs() * tolerance;
    candidates
        .iter()
        .filter(|c| c.side == zone.side)
        .map(|c| (c, (c.center_price - zone.center_price).abs()))
        .filter(|(_, distance)| *distance <= limit)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

/// Carry `first_seen_ns` over from matching previous-pass zones.
pub fn inherit_first_seen(current: &mut [Zone], previous: &[Zone], tolerance: f64) {
    for zone in current.iter_mut() {
        if let Some(matched) = closest_match(zone, previous, tolerance) {
            zone.first_seen_ns = zone.first_seen_ns.min(matched.first_seen_ns);
        }
    }
}

/// Clamp into [0, 1]; NaN maps to 0.
#[inline]
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Linear-interpolated percentile of an ascending slice (`q` in [0, 1]).
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = clamp01(q) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Strength blend shared by generators: half signal, half share of book volume.
#[inline]
pub(crate) fn blend_strength(signal: f64, share: f64) -> f64 {
    clamp01(0.5 * clamp01(signal) + 0.5 * clamp01(share))
}

/// Volume-weighted mean price of a set of levels.
pub(crate) fn vwap(levels: &[PriceLevel]) -> Option<f64> {
    let volume: f64 = levels.iter().map(|l| l.quantity).sum();
    if volume > 0.0 {
        Some(levels.iter().map(PriceLevel::notional).sum::<f64>() / volume)
    } else {
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::types::{BookState, PriceLevel, Side};

    /// Book from `(price, quantity)` pairs.
    pub fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> BookState {
        let to_levels = |entries: &[(f64, f64)], side| {
            entries
                .iter()
                .map(|&(p, q)| PriceLevel::new(p, q, side, 0))
                .collect::<Vec<_>>()
        };
        BookState::from_sides(to_levels(bids, Side::Bid), to_levels(asks, Side::Ask), 1, 0)
    }

    /// The clustered-bids book: ten bids of 60 between 100.00 and 100.18,
    /// five sparse asks.
    pub fn clustered_book() -> BookState {
        let bids: Vec<(f64, f64)> = (0..10).map(|i| (100.0 + 0.02 * i as f64, 60.0)).collect();
        let asks = [(101.0, 10.0), (103.0, 10.0), (105.0, 10.0), (107.0, 10.0), (111.0, 10.0)];
        book(&bids, &asks)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 1.0), 4.0);
        assert!((percentile(&values, 0.5) - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 0.75) - 3.25).abs() < 1e-12);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_draft_build_normalises() {
        let zone = ZoneDraft {
            source: ZoneSource::Imbalance,
            side: Side::Ask,
            pressure_type: PressureType::Resistance,
            min_price: 102.0,
            center_price: 110.0,
            max_price: 101.0,
            total_volume: 10.0,
            order_count: 4,
            intensity: 1.7,
            strength: -0.2,
        }
        .build(5);

        assert_eq!(zone.min_price, 101.0);
        assert_eq!(zone.max_price, 102.0);
        assert_eq!(zone.center_price, 102.0);
        assert_eq!(zone.intensity, 1.0);
        assert_eq!(zone.strength, 0.0);
        assert_eq!(zone.average_quantity, 2.5);
        assert_eq!(zone.zone_type, ZoneType::Resistance);
        assert_eq!(zone.first_seen_ns, 5);
        assert!(zone.satisfies_invariants());
    }

    #[test]
    fn test_book_view_filters_malformed_levels() {
        let mut state = book(&[(100.0, 5.0)], &[(101.0, 4.0)]);
        state.bids.push(PriceLevel::new(f64::NAN, 1.0, Side::Bid, 0));
        state.asks.push(PriceLevel::new(102.0, -3.0, Side::Ask, 0));

        let view = BookView::new(&state);
        assert_eq!(view.levels.len(), 2);
        assert_eq!(view.total_volume, 9.0);
        assert_eq!(view.range, PriceRange::new(100.0, 101.0));
        assert_eq!(view.side_of(100.2), Side::Bid);
        assert_eq!(view.side_of(100.7), Side::Ask);
    }

    #[test]
    fn test_detect_bounds_and_cap() {
        let mut detector = ZoneDetector::default();
        let zones = detector.detect(&clustered_book());

        assert!(!zones.is_empty());
        assert!(zones.len() <= 20);
        for zone in &zones {
            assert!(zone.satisfies_invariants(), "{zone:?}");
        }
        // Sorted by strength, strongest first
        assert!(zones.windows(2).all(|w| w[0].strength >= w[1].strength));
    }

    #[test]
    fn test_closest_match_within_tolerance() {
        let mut detector = ZoneDetector::default();
        let previous = detector.detect(&clustered_book());
        let mut current = previous.clone();
        for zone in current.iter_mut() {
            zone.first_seen_ns = 99;
            zone.center_price *= 1.0005;
        }

        for zone in &current {
            let matched = closest_match(zone, &previous, 0.001).expect("match");
            assert_eq!(matched.side, zone.side);
        }

        inherit_first_seen(&mut current, &previous, 0.001);
        assert!(current.iter().all(|z| z.first_seen_ns == 0));

        let far = ZoneDraft {
            source: ZoneSource::Iceberg,
            side: Side::Bid,
            pressure_type: PressureType::Support,
            min_price: 50.0,
            center_price: 50.0,
            max_price: 50.0,
            total_volume: 1.0,
            order_count: 1,
            intensity: 0.5,
            strength: 0.5,
        }
        .build(0);
        assert!(closest_match(&far, &previous, 0.001).is_none());
    }

    #[test]
    fn test_detector_spaces_history_samples() {
        let mut detector = ZoneDetector::default();
        let mut book = clustered_book();
        for secs in 0..60 {
            book.timestamp_ns = secs * 1_000_000_000;
            detector.detect(&book);
        }
        assert_eq!(detector.history().len(), 2);

        let mut every_pass = ZoneDetector::new(ZoneConfig::default().with_history_interval(0.0));
        for _ in 0..5 {
            every_pass.detect(&book);
        }
        assert_eq!(every_pass.history().len(), 5);
    }

    #[test]
    fn test_detect_empty_book() {
        let mut detector = ZoneDetector::default();
        assert!(detector.detect(&BookState::default()).is_empty());
        assert!(detector.history().is_empty());
    }

    #[test]
    fn test_detect_finds_support_near_cluster() {
        let mut detector = ZoneDetector::default();
        let zones = detector.detect(&clustered_book());
        assert!(zones
            .iter()
            .any(|z| z.side == Side::Bid && z.contains(100.09)));
    }
}
