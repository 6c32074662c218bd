//! Microstructure heuristics: iceberg, hidden liquidity and algorithmic
//! spacing patterns.

use ahash::AHashMap;

use crate::types::{key_to_price, price_to_key, PriceLevel, Side};

use super::{blend_strength, percentile, vwap, BookView, PressureType, Zone, ZoneConfig, ZoneDraft, ZoneSource};

pub fn detect(view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    let mut zones = icebergs(view, config);
    zones.extend(hidden_liquidity(view, config));
    zones.extend(algorithmic_patterns(view, config));
    zones
}

#[derive(Debug, Clone, Copy, Default)]
struct PriceAggregate {
    bid: f64,
    ask: f64,
    levels: usize,
}

/// Single prices holding more than `iceberg_multiple` × the average volume
/// per distinct price. Point zones with confidence `iceberg_confidence`.
pub fn icebergs(view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    let mut by_price: AHashMap<i64, PriceAggregate> = AHashMap::with_capacity(view.levels.len());
    for level in &view.levels {
        let entry = by_price.entry(price_to_key(level.price)).or_default();
        match level.side {
            Side::Bid => entry.bid += level.quantity,
            Side::Ask => entry.ask += level.quantity,
        }
        entry.levels += 1;
    }
    if by_price.is_empty() {
        return Vec::new();
    }

    let average = view.total_volume / by_price.len() as f64;
    let threshold = average * config.iceberg_multiple;

    let mut keys: Vec<i64> = by_price.keys().copied().collect();
    keys.sort_unstable();

    let mut zones = Vec::new();
    for key in keys {
        let agg = by_price[&key];
        let quantity = agg.bid + agg.ask;
        if quantity <= threshold || average <= 0.0 {
            continue;
        }
        let side = if agg.bid >= agg.ask { Side::Bid } else { Side::Ask };
        let price = key_to_price(key);
        let multiple = quantity / average;

        zones.push(
            ZoneDraft {
                source: ZoneSource::Iceberg,
                side,
                pressure_type: PressureType::directional(side),
                min_price: price,
                center_price: price,
                max_price: price,
                total_volume: quantity,
                order_count: agg.levels,
                intensity: multiple / (2.0 * config.iceberg_multiple),
                strength: config.iceberg_confidence,
            }
            .build(view.timestamp),
        );
    }
    zones
}

/// Groups of mid-sized orders (between `hidden_median_factor` × median and
/// the 75th percentile) lying within `hidden_tolerance` of each other.
pub fn hidden_liquidity(view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    let quantities = view.sorted_quantities();
    let lower = percentile(&quantities, 0.5) * config.hidden_median_factor;
    let upper = percentile(&quantities, 0.75);
    if lower > upper {
        return Vec::new();
    }

    let mut zones = Vec::new();
    for side in [Side::Bid, Side::Ask] {
        let mut candidates: Vec<PriceLevel> = view
            .side(side)
            .iter()
            .filter(|l| l.quantity >= lower && l.quantity <= upper)
            .copied()
            .collect();
        candidates.sort_by(|a, b| a.price.total_cmp(&b.price));

        let mut group: Vec<PriceLevel> = Vec::new();
        for level in candidates {
            if let Some(last) = group.last() {
                if (level.price - last.price) / last.price > config.hidden_tolerance {
                    push_hidden(&group, view, config, side, &mut zones);
                    group.clear();
                }
            }
            group.push(level);
        }
        push_hidden(&group, view, config, side, &mut zones);
    }
    zones
}

fn push_hidden(group: &[PriceLevel], view: &BookView, config: &ZoneConfig, side: Side, out: &mut Vec<Zone>) {
    if group.len() < config.hidden_min_orders.max(1) {
        return;
    }
    let Some(center) = vwap(group) else {
        return;
    };
    let volume: f64 = group.iter().map(|l| l.quantity).sum();
    let average = volume / group.len() as f64;
    let intensity = if view.max_quantity > 0.0 {
        average / view.max_quantity
    } else {
        0.0
    };

    out.push(
        ZoneDraft {
            source: ZoneSource::HiddenLiquidity,
            side,
            pressure_type: PressureType::flow(side),
            min_price: group[0].price,
            center_price: center,
            max_price: group[group.len() - 1].price,
            total_volume: volume,
            order_count: group.len(),
            intensity,
            strength: blend_strength(intensity, view.volume_share(volume)),
        }
        .build(view.timestamp),
    );
}

#[derive(Debug, Clone, Copy, Default)]
struct SpacingTally {
    occurrences: usize,
    volume: f64,
}

/// Inter-level spacings repeating at least `algo_min_repeats` times, placed
/// at mid + spacing.
pub fn algorithmic_patterns(view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    if view.mid_price <= 0.0 {
        return Vec::new();
    }

    let mut tallies: AHashMap<i64, SpacingTally> = AHashMap::new();
    let mut pairs = 0usize;
    for side in [Side::Bid, Side::Ask] {
        for pair in view.side(side).windows(2) {
            let spacing = (price_to_key(pair[1].price) - price_to_key(pair[0].price)).abs();
            if spacing == 0 {
                continue;
            }
            let tally = tallies.entry(spacing).or_default();
            tally.occurrences += 1;
            tally.volume += pair[1].quantity;
            pairs += 1;
        }
    }

    let mut spacings: Vec<(i64, SpacingTally)> = tallies
        .into_iter()
        .filter(|(_, t)| t.occurrences >= config.algo_min_repeats.max(1))
        .collect();
    spacings.sort_unstable_by_key(|(spacing, _)| *spacing);

    spacings
        .into_iter()
        .map(|(spacing, tally)| {
            let step = key_to_price(spacing);
            let center = view.mid_price + step;
            let frequency = tally.occurrences as f64 / pairs as f64;
            ZoneDraft {
                source: ZoneSource::AlgorithmicPattern,
                side: Side::Ask,
                pressure_type: PressureType::Resistance,
                min_price: center - step / 2.0,
                center_price: center,
                max_price: center + step / 2.0,
                total_volume: tally.volume,
                order_count: tally.occurrences,
                intensity: frequency,
                strength: blend_strength(frequency, view.volume_share(tally.volume)),
            }
            .build(view.timestamp)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::test_support::book;

    #[test]
    fn test_iceberg_single_large_level() {
        let bids: Vec<(f64, f64)> = (0..10).map(|i| (100.0 - i as f64 * 0.37, 1.0)).collect();
        let asks = [(101.0, 1.0), (101.5, 200.0), (102.3, 1.0)];
        let view = BookView::new(&book(&bids, &asks));

        let zones = icebergs(&view, &ZoneConfig::default());
        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert_eq!(zone.center_price, 101.5);
        assert_eq!(zone.min_price, zone.max_price);
        assert_eq!(zone.side, Side::Ask);
        assert_eq!(zone.pressure_type, PressureType::Resistance);
        assert!((zone.strength - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_no_iceberg_in_uniform_book() {
        let view = BookView::new(&book(&[(100.0, 5.0), (99.0, 5.0)], &[(101.0, 5.0)]));
        assert!(icebergs(&view, &ZoneConfig::default()).is_empty());
    }

    #[test]
    fn test_hidden_liquidity_band() {
        // Nine 1s, four mid-sized 4s on the bid, three large asks
        let mut bids: Vec<(f64, f64)> = vec![(100.0, 4.0), (99.9, 4.0), (99.8, 4.0), (99.7, 4.0)];
        bids.extend((0..5).map(|i| (98.0 - i as f64, 1.0)));
        let asks = [
            (101.0, 1.0),
            (102.0, 1.0),
            (103.0, 1.0),
            (104.0, 1.0),
            (110.0, 50.0),
            (111.0, 50.0),
            (112.0, 50.0),
        ];
        let view = BookView::new(&book(&bids, &asks));

        let zones = hidden_liquidity(&view, &ZoneConfig::default());
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].side, Side::Bid);
        assert_eq!(zones[0].pressure_type, PressureType::Accumulation);
        assert_eq!(zones[0].order_count, 4);
        assert_eq!(zones[0].min_price, 99.7);
        assert_eq!(zones[0].max_price, 100.0);
    }

    #[test]
    fn test_algorithmic_spacing() {
        let bids: Vec<(f64, f64)> = (0..4).map(|i| (100.0 - 0.5 * i as f64, 2.0)).collect();
        let asks = [(101.0, 2.0), (101.7, 2.0), (103.1, 2.0)];
        let view = BookView::new(&book(&bids, &asks));

        let zones = algorithmic_patterns(&view, &ZoneConfig::default());
        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert!((zone.center_price - (view.mid_price + 0.5)).abs() < 1e-9);
        assert_eq!(zone.order_count, 3);
        assert_eq!(zone.side, Side::Ask);
        assert_eq!(zone.pressure_type, PressureType::Resistance);
    }
}
