//! Liquidity density mapping.
//!
//! Builds a `liquidity_buckets`-bucket volume histogram over the price
//! range and emits a zone for every strict local maximum above
//! `liquidity_peak_floor` × the densest bucket. A peak extends outward while
//! neighbouring buckets hold at least `liquidity_width_ratio` × its density.
//! Peaks below the mid are Accumulation, above it Distribution.

use super::imbalance::bucket_index;
use super::{blend_strength, BookView, PressureType, Zone, ZoneConfig, ZoneDraft, ZoneSource};

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    volume: f64,
    notional: f64,
    levels: usize,
}

pub fn detect(view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    let count = config.liquidity_buckets;
    let span = view.range.span();
    if count == 0 || span <= 0.0 {
        return Vec::new();
    }

    let width = span / count as f64;
    let mut cells = vec![Cell::default(); count];
    for level in &view.levels {
        let cell = &mut cells[bucket_index(level.price, view.range.min, width, count)];
        cell.volume += level.quantity;
        cell.notional += level.notional();
        cell.levels += 1;
    }

    let max_density = cells.iter().map(|c| c.volume).fold(0.0, f64::max);
    if max_density <= 0.0 {
        return Vec::new();
    }
    let floor = max_density * config.liquidity_peak_floor;

    let mut zones = Vec::new();
    for i in 0..count {
        let density = cells[i].volume;
        let left = if i > 0 { cells[i - 1].volume } else { 0.0 };
        let right = if i + 1 < count { cells[i + 1].volume } else { 0.0 };
        if density <= 0.0 || density < floor || density <= left || density <= right {
            continue;
        }

        let cutoff = density * config.liquidity_width_ratio;
        let mut lo = i;
        while lo > 0 && cells[lo - 1].volume >= cutoff && cells[lo - 1].volume > 0.0 {
            lo -= 1;
        }
        let mut hi = i;
        while hi + 1 < count && cells[hi + 1].volume >= cutoff && cells[hi + 1].volume > 0.0 {
            hi += 1;
        }

        let span_cells = &cells[lo..=hi];
        let volume: f64 = span_cells.iter().map(|c| c.volume).sum();
        let notional: f64 = span_cells.iter().map(|c| c.notional).sum();
        let levels: usize = span_cells.iter().map(|c| c.levels).sum();
        let center = notional / volume;
        let side = view.side_of(center);
        let intensity = density / max_density;

        zones.push(
            ZoneDraft {
                source: ZoneSource::LiquidityPeak,
                side,
                pressure_type: PressureType::flow(side),
                min_price: view.range.min + width * lo as f64,
                center_price: center,
                max_price: view.range.min + width * (hi + 1) as f64,
                total_volume: volume,
                order_count: levels,
                intensity,
                strength: blend_strength(intensity, view.volume_share(volume)),
            }
            .build(view.timestamp),
        );
    }

    zones
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use crate::zones::test_support::book;

    fn config(buckets: usize) -> ZoneConfig {
        ZoneConfig {
            liquidity_buckets: buckets,
            ..ZoneConfig::default()
        }
    }

    #[test]
    fn test_peaks_on_both_sides() {
        let bids = [(100.0, 5.0), (99.0, 40.0), (98.0, 5.0)];
        let asks = [(101.0, 5.0), (102.0, 30.0), (103.0, 5.0)];
        let view = BookView::new(&book(&bids, &asks));

        let zones = detect(&view, &config(6));
        assert_eq!(zones.len(), 2);

        let bid_peak = zones.iter().find(|z| z.side == Side::Bid).expect("bid peak");
        assert_eq!(bid_peak.pressure_type, PressureType::Accumulation);
        assert!(bid_peak.contains(99.0));
        assert_eq!(bid_peak.intensity, 1.0);

        let ask_peak = zones.iter().find(|z| z.side == Side::Ask).expect("ask peak");
        assert_eq!(ask_peak.pressure_type, PressureType::Distribution);
        assert!(ask_peak.contains(102.0));
        assert!((ask_peak.intensity - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_peak_below_floor_ignored() {
        let bids = [(100.0, 1.0), (99.0, 100.0), (98.0, 1.0)];
        let asks = [(101.0, 1.0), (102.0, 10.0), (103.0, 1.0)];
        let view = BookView::new(&book(&bids, &asks));
        let zones = detect(&view, &config(6));
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].side, Side::Bid);
    }

    #[test]
    fn test_flat_profile_has_no_peak() {
        let view = BookView::new(&book(&[(100.0, 5.0), (99.0, 5.0)], &[(101.0, 5.0)]));
        assert!(detect(&view, &config(3)).is_empty());
    }
}
