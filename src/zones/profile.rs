//! Time-weighted volume profile.
//!
//! Detection passes record a per-price volume sample, at most one per
//! `history_interval_secs`, so the retained window spans
//! `history_capacity * history_interval_secs` of wall time. Once at least
//! `min_history_samples` are retained, historical volume is aggregated per
//! price with exponential decay (`half_life_secs`) and local maxima above the
//! mean become Accumulation (below mid) or Distribution (above mid) zones.

use std::collections::VecDeque;

use ahash::AHashMap;

use crate::types::{key_to_price, price_to_key};

use super::{blend_strength, BookView, PressureType, Zone, ZoneConfig, ZoneDraft, ZoneSource};

/// Per-price volume captured from one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySample {
    pub timestamp: i64,
    /// `(price key, quantity)`, both sides combined
    pub volumes: Vec<(i64, f64)>,
}

/// Bounded FIFO of [`HistorySample`]s, oldest evicted first.
#[derive(Debug, Clone)]
pub struct VolumeHistory {
    capacity: usize,
    /// Minimum spacing between recorded samples (ns); 0 keeps every pass
    min_interval_ns: i64,
    samples: VecDeque<HistorySample>,
}

impl VolumeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            min_interval_ns: 0,
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Keep at most one sample per `interval_ns`.
    pub fn with_min_interval(mut self, interval_ns: i64) -> Self {
        self.min_interval_ns = interval_ns.max(0);
        self
    }

    /// Record `view` unless the newest sample is younger than the minimum
    /// interval. A timestamp earlier than the newest sample is always kept.
    ///
    /// Returns whether a sample was added.
    pub fn record(&mut self, view: &BookView) -> bool {
        if let Some(last) = self.samples.back() {
            let elapsed = view.timestamp - last.timestamp;
            if elapsed >= 0 && elapsed < self.min_interval_ns {
                return false;
            }
        }

        let volumes = view
            .levels
            .iter()
            .map(|l| (price_to_key(l.price), l.quantity))
            .collect();
        self.push(HistorySample {
            timestamp: view.timestamp,
            volumes,
        });
        true
    }

    pub fn push(&mut self, sample: HistorySample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn min_interval_ns(&self) -> i64 {
        self.min_interval_ns
    }

    pub fn samples(&self) -> impl Iterator<Item = &HistorySample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Decayed volume per price key as of `now_ns`, with the number of
    /// samples each price appeared in.
    pub fn decayed_profile(&self, now_ns: i64, half_life_secs: f64) -> Vec<(i64, f64, usize)> {
        let mut profile: AHashMap<i64, (f64, usize)> = AHashMap::new();
        for sample in &self.samples {
            let weight = decay_weight(now_ns - sample.timestamp, half_life_secs);
            for &(key, quantity) in &sample.volumes {
                let entry = profile.entry(key).or_insert((0.0, 0));
                entry.0 += quantity * weight;
                entry.1 += 1;
            }
        }

        let mut out: Vec<(i64, f64, usize)> = profile.into_iter().map(|(k, (v, n))| (k, v, n)).collect();
        out.sort_unstable_by_key(|&(key, _, _)| key);
        out
    }
}

/// `0.5^(age / half_life)`; future samples weigh 1.
pub fn decay_weight(age_ns: i64, half_life_secs: f64) -> f64 {
    if age_ns <= 0 || half_life_secs <= 0.0 {
        return 1.0;
    }
    let age_secs = age_ns as f64 / 1e9;
    0.5f64.powf(age_secs / half_life_secs)
}

pub fn detect(history: &VolumeHistory, view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    if history.len() < config.min_history_samples {
        return Vec::new();
    }

    let profile = history.decayed_profile(view.timestamp, config.half_life_secs);
    if profile.is_empty() {
        return Vec::new();
    }

    let total: f64 = profile.iter().map(|&(_, v, _)| v).sum();
    let mean = total / profile.len() as f64;
    let peak = profile.iter().map(|&(_, v, _)| v).fold(0.0, f64::max);
    if peak <= 0.0 {
        return Vec::new();
    }

    let mut zones = Vec::new();
    for i in 0..profile.len() {
        let (key, volume, appearances) = profile[i];
        let left = if i > 0 { profile[i - 1].1 } else { 0.0 };
        let right = profile.get(i + 1).map_or(0.0, |p| p.1);
        if volume <= left || volume <= right || volume <= mean {
            continue;
        }

        let price = key_to_price(key);
        let half_width = price * config.profile_width_ratio;
        let side = view.side_of(price);
        let intensity = volume / peak;

        zones.push(
            ZoneDraft {
                source: ZoneSource::VolumeProfile,
                side,
                pressure_type: PressureType::flow(side),
                min_price: price - half_width,
                center_price: price,
                max_price: price + half_width,
                total_volume: volume,
                order_count: appearances,
                intensity,
                strength: blend_strength(intensity, volume / total),
            }
            .build(view.timestamp),
        );
    }
    zones
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookState, PriceLevel, Side};
    use crate::zones::test_support::book;

    const SECOND: i64 = 1_000_000_000;

    fn view_at(secs: i64) -> BookView {
        let to_level = |(p, q): (f64, f64), side: Side| PriceLevel::new(p, q, side, secs * SECOND);
        let state = BookState::from_sides(
            vec![to_level((100.0, 10.0), Side::Bid)],
            vec![to_level((101.0, 1.0), Side::Ask)],
            1,
            secs * SECOND,
        );
        BookView::new(&state)
    }

    #[test]
    fn test_history_is_bounded() {
        let view = BookView::new(&book(&[(100.0, 1.0)], &[(101.0, 1.0)]));
        let mut history = VolumeHistory::new(3);
        for _ in 0..5 {
            history.record(&view);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.capacity(), 3);
    }

    #[test]
    fn test_history_samples_are_spaced() {
        let mut history = VolumeHistory::new(120).with_min_interval(30 * SECOND);
        assert!(history.record(&view_at(0)));
        assert!(!history.record(&view_at(1)));
        assert!(!history.record(&view_at(29)));
        assert!(history.record(&view_at(30)));
        assert!(history.record(&view_at(75)));
        assert_eq!(history.len(), 3);

        // A clock reset starts a new run
        assert!(history.record(&view_at(5)));
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_full_history_spans_half_life() {
        let config = ZoneConfig::default();
        let interval = (config.history_interval_secs * 1e9) as i64;
        let mut history = VolumeHistory::new(config.history_capacity).with_min_interval(interval);
        // One pass per second for two hours
        for secs in 0..7200 {
            history.record(&view_at(secs));
        }
        assert_eq!(history.len(), config.history_capacity);

        let oldest = history.samples().next().map(|s| s.timestamp).unwrap_or_default();
        let newest = history.samples().last().map(|s| s.timestamp).unwrap_or_default();
        assert!((newest - oldest) as f64 / 1e9 >= 0.95 * config.half_life_secs);

        let profile = history.decayed_profile(newest, config.half_life_secs);
        let bid = profile.iter().find(|&&(key, _, _)| key == price_to_key(100.0)).expect("bid level");
        // Undecayed this would be 1200
        assert!(bid.1 < 0.8 * 1200.0);
    }

    #[test]
    fn test_decay_weight() {
        assert_eq!(decay_weight(0, 3600.0), 1.0);
        assert_eq!(decay_weight(-5, 3600.0), 1.0);
        assert!((decay_weight(3600 * SECOND, 3600.0) - 0.5).abs() < 1e-12);
        assert!((decay_weight(7200 * SECOND, 3600.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_skipped_without_history() {
        let view = BookView::new(&book(&[(100.0, 50.0), (99.0, 1.0)], &[(101.0, 1.0)]));
        let mut history = VolumeHistory::new(120);
        for _ in 0..9 {
            history.record(&view);
        }
        assert!(detect(&history, &view, &ZoneConfig::default()).is_empty());
    }

    #[test]
    fn test_profile_peaks() {
        let bids = [(100.0, 2.0), (99.0, 30.0), (98.0, 2.0)];
        let asks = [(101.0, 2.0), (102.0, 20.0), (103.0, 2.0)];
        let view = BookView::new(&book(&bids, &asks));
        let mut history = VolumeHistory::new(120);
        for _ in 0..10 {
            history.record(&view);
        }

        let zones = detect(&history, &view, &ZoneConfig::default());
        assert_eq!(zones.len(), 2);

        let bid = zones.iter().find(|z| z.side == Side::Bid).expect("bid peak");
        assert_eq!(bid.center_price, 99.0);
        assert_eq!(bid.pressure_type, PressureType::Accumulation);
        assert_eq!(bid.intensity, 1.0);
        assert_eq!(bid.order_count, 10);

        let ask = zones.iter().find(|z| z.side == Side::Ask).expect("ask peak");
        assert_eq!(ask.center_price, 102.0);
        assert_eq!(ask.pressure_type, PressureType::Distribution);
    }

    #[test]
    fn test_old_samples_decay() {
        let mut history = VolumeHistory::new(120);
        for i in 0..10 {
            history.push(HistorySample {
                timestamp: i * SECOND,
                volumes: vec![(price_to_key(100.0), 10.0)],
            });
        }
        let profile = history.decayed_profile(7200 * SECOND, 3600.0);
        assert_eq!(profile.len(), 1);
        // Ten samples roughly two half-lives old
        assert!(profile[0].1 < 26.0 && profile[0].1 > 24.0);
    }
}
