//! Merge pass reducing generator candidates to canonical zones.
//!
//! Candidates are sorted by centre price and same-side zones with
//! overlapping closed ranges are combined:
//! - centre: volume-weighted average (plain average when both are empty)
//! - bounds: union
//! - volume and order count: sum
//! - intensity: max; strength: average
//!
//! The combined zone keeps id, source and pressure type of its
//! higher-volume member. Passes repeat until no same-side overlap remains,
//! so merging an already merged list is a no-op. Output is sorted by
//! strength descending and truncated to `max_zones`.

use std::cmp::Ordering;

use super::Zone;

pub fn merge_zones(mut candidates: Vec<Zone>, max_zones: usize) -> Vec<Zone> {
    candidates.sort_by(|a, b| a.center_price.total_cmp(&b.center_price));

    let mut merged = merge_pass(candidates);
    loop {
        let before = merged.len();
        merged = merge_pass(merged);
        if merged.len() == before {
            break;
        }
    }

    merged.sort_by(by_strength);
    merged.truncate(max_zones);
    merged
}

fn merge_pass(zones: Vec<Zone>) -> Vec<Zone> {
    let mut out: Vec<Zone> = Vec::with_capacity(zones.len());
    for zone in zones {
        match out
            .iter_mut()
            .rev()
            .find(|m| m.side == zone.side && m.overlaps(&zone))
        {
            Some(existing) => combine(existing, &zone),
            None => out.push(zone),
        }
    }
    out.sort_by(|a, b| a.center_price.total_cmp(&b.center_price));
    out
}

/// Fold `other` into `into`.
pub fn combine(into: &mut Zone, other: &Zone) {
    let volume = into.total_volume + other.total_volume;
    let center = if volume > 0.0 {
        (into.center_price * into.total_volume + other.center_price * other.total_volume) / volume
    } else {
        (into.center_price + other.center_price) / 2.0
    };

    if other.total_volume > into.total_volume {
        into.id = other.id.clone();
        into.source = other.source;
        into.pressure_type = other.pressure_type;
    }

    into.min_price = into.min_price.min(other.min_price);
    into.max_price = into.max_price.max(other.max_price);
    into.center_price = center.clamp(into.min_price, into.max_price);
    into.total_volume = volume;
    into.order_count += other.order_count;
    into.average_quantity = if into.order_count > 0 {
        volume / into.order_count as f64
    } else {
        0.0
    };
    into.intensity = into.intensity.max(other.intensity);
    into.strength = (into.strength + other.strength) / 2.0;
    into.timestamp = into.timestamp.max(other.timestamp);
    into.first_seen_ns = into.first_seen_ns.min(other.first_seen_ns);
    into.is_active = into.is_active || other.is_active;
}

fn by_strength(a: &Zone, b: &Zone) -> Ordering {
    b.strength
        .total_cmp(&a.strength)
        .then_with(|| a.center_price.total_cmp(&b.center_price))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use crate::zones::{PressureType, ZoneDraft, ZoneSource};

    fn zone(side: Side, min: f64, center: f64, max: f64, volume: f64, intensity: f64, strength: f64) -> Zone {
        ZoneDraft {
            source: ZoneSource::DensityCluster,
            side,
            pressure_type: PressureType::directional(side),
            min_price: min,
            center_price: center,
            max_price: max,
            total_volume: volume,
            order_count: 2,
            intensity,
            strength,
        }
        .build(0)
    }

    #[test]
    fn test_overlapping_same_side_merge() {
        let a = zone(Side::Bid, 99.0, 99.5, 100.0, 10.0, 0.4, 0.2);
        let mut b = zone(Side::Bid, 99.8, 100.2, 100.5, 30.0, 0.9, 0.6);
        b.source = ZoneSource::Imbalance;

        let merged = merge_zones(vec![b, a], 20);
        assert_eq!(merged.len(), 1);
        let z = &merged[0];
        assert_eq!(z.min_price, 99.0);
        assert_eq!(z.max_price, 100.5);
        assert!((z.center_price - (99.5 * 10.0 + 100.2 * 30.0) / 40.0).abs() < 1e-9);
        assert_eq!(z.total_volume, 40.0);
        assert_eq!(z.order_count, 4);
        assert_eq!(z.intensity, 0.9);
        assert!((z.strength - 0.4).abs() < 1e-12);
        assert_eq!(z.source, ZoneSource::Imbalance);
        assert!(z.satisfies_invariants());
    }

    #[test]
    fn test_opposite_sides_never_merge() {
        let bid = zone(Side::Bid, 99.0, 99.5, 100.0, 10.0, 0.5, 0.5);
        let ask = zone(Side::Ask, 99.5, 99.8, 100.0, 10.0, 0.5, 0.5);
        assert_eq!(merge_zones(vec![bid, ask], 20).len(), 2);
    }

    #[test]
    fn test_touching_ranges_merge() {
        let a = zone(Side::Ask, 101.0, 101.0, 101.0, 5.0, 0.5, 0.5);
        let b = zone(Side::Ask, 101.0, 101.5, 102.0, 5.0, 0.5, 0.5);
        assert_eq!(merge_zones(vec![a, b], 20).len(), 1);
    }

    #[test]
    fn test_bridging_zone_collapses_chain() {
        // c bridges the gap between a and b
        let a = zone(Side::Bid, 90.0, 90.5, 91.0, 1.0, 0.5, 0.5);
        let b = zone(Side::Bid, 92.0, 92.5, 93.0, 1.0, 0.5, 0.5);
        let c = zone(Side::Bid, 90.8, 91.5, 92.1, 100.0, 0.5, 0.5);
        let merged = merge_zones(vec![a, b, c], 20);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].min_price, 90.0);
        assert_eq!(merged[0].max_price, 93.0);
    }

    #[test]
    fn test_truncates_by_strength() {
        let zones: Vec<Zone> = (0..30)
            .map(|i| {
                let p = 100.0 + i as f64;
                zone(Side::Ask, p, p, p, 1.0, 0.5, i as f64 / 30.0)
            })
            .collect();
        let merged = merge_zones(zones, 20);
        assert_eq!(merged.len(), 20);
        assert!(merged.windows(2).all(|w| w[0].strength >= w[1].strength));
        assert!((merged[0].strength - 29.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let zones = vec![
            zone(Side::Bid, 99.0, 99.5, 100.0, 10.0, 0.4, 0.2),
            zone(Side::Bid, 99.8, 100.2, 100.5, 30.0, 0.9, 0.6),
            zone(Side::Bid, 95.0, 95.0, 95.0, 3.0, 0.3, 0.9),
            zone(Side::Ask, 101.0, 101.2, 101.4, 8.0, 0.7, 0.7),
            zone(Side::Ask, 101.3, 101.6, 102.0, 2.0, 0.2, 0.1),
            zone(Side::Ask, 104.0, 104.0, 104.0, 1.0, 0.1, 0.3),
        ];
        let once = merge_zones(zones, 20);
        let twice = merge_zones(once.clone(), 20);
        assert_eq!(once, twice);
    }
}
