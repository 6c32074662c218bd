//! Same-side proximity grouping.
//!
//! Walks each side in book order and groups neighbours whose relative price
//! distance is within `proximity_tolerance`. Groups carrying at least
//! `proximity_volume_floor` and `proximity_min_orders` levels become
//! Support (bid) or Resistance (ask) zones.

use crate::types::{PriceLevel, Side};

use super::{blend_strength, vwap, BookView, PressureType, Zone, ZoneConfig, ZoneDraft, ZoneSource};

pub fn detect(view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    let mut zones = Vec::new();
    for side in [Side::Bid, Side::Ask] {
        detect_side(view, config, side, &mut zones);
    }
    zones
}

fn detect_side(view: &BookView, config: &ZoneConfig, side: Side, out: &mut Vec<Zone>) {
    let mut group: Vec<PriceLevel> = Vec::new();

    for level in view.side(side) {
        if let Some(last) = group.last() {
            let distance = (level.price - last.price).abs() / last.price;
            if distance > config.proximity_tolerance {
                flush(&group, view, config, side, out);
                group.clear();
            }
        }
        group.push(*level);
    }
    flush(&group, view, config, side, out);
}

fn flush(group: &[PriceLevel], view: &BookView, config: &ZoneConfig, side: Side, out: &mut Vec<Zone>) {
    if group.len() < config.proximity_min_orders.max(1) {
        return;
    }
    let volume: f64 = group.iter().map(|l| l.quantity).sum();
    if volume < config.proximity_volume_floor {
        return;
    }
    let Some(center) = vwap(group) else {
        return;
    };

    let (min_price, max_price) = group
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), l| (lo.min(l.price), hi.max(l.price)));
    let average = volume / group.len() as f64;
    let intensity = if view.max_quantity > 0.0 {
        average / view.max_quantity
    } else {
        0.0
    };

    out.push(
        ZoneDraft {
            source: ZoneSource::ProximityGroup,
            side,
            pressure_type: PressureType::directional(side),
            min_price,
            center_price: center,
            max_price,
            total_volume: volume,
            order_count: group.len(),
            intensity,
            strength: blend_strength(intensity, view.volume_share(volume)),
        }
        .build(view.timestamp),
    );
}
