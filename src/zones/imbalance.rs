//! Order-flow imbalance scan.
//!
//! Partitions the price range into `imbalance_buckets` equal buckets and
//! flags buckets whose dominant-side volume is at least `imbalance_ratio`
//! times the other side's, provided the bucket carries at least the
//! average level volume. Bid-dominant buckets are Support, ask-dominant
//! buckets Resistance.

use crate::types::Side;

use super::{blend_strength, BookView, PressureType, Zone, ZoneConfig, ZoneDraft, ZoneSource};

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    bid_volume: f64,
    ask_volume: f64,
    notional: f64,
    levels: usize,
}

impl Bucket {
    fn total(&self) -> f64 {
        self.bid_volume + self.ask_volume
    }
}

/// Map `price` to a bucket index in `[0, buckets)`.
pub(crate) fn bucket_index(price: f64, min: f64, width: f64, buckets: usize) -> usize {
    let raw = ((price - min) / width).floor();
    if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(buckets - 1)
    }
}

pub fn detect(view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    let count = config.imbalance_buckets;
    let span = view.range.span();
    if count == 0 || span <= 0.0 {
        return Vec::new();
    }

    let width = span / count as f64;
    let mut buckets = vec![Bucket::default(); count];
    for level in &view.levels {
        let bucket = &mut buckets[bucket_index(level.price, view.range.min, width, count)];
        match level.side {
            Side::Bid => bucket.bid_volume += level.quantity,
            Side::Ask => bucket.ask_volume += level.quantity,
        }
        bucket.notional += level.notional();
        bucket.levels += 1;
    }

    let min_volume = view.average_volume();
    let mut zones = Vec::new();

    for (i, bucket) in buckets.iter().enumerate() {
        let total = bucket.total();
        if total <= 0.0 || total < min_volume {
            continue;
        }

        let (side, dominant, minor) = if bucket.bid_volume >= bucket.ask_volume {
            (Side::Bid, bucket.bid_volume, bucket.ask_volume)
        } else {
            (Side::Ask, bucket.ask_volume, bucket.bid_volume)
        };
        let ratio = if minor > 0.0 { dominant / minor } else { f64::INFINITY };
        if ratio < config.imbalance_ratio {
            continue;
        }

        let lower = view.range.min + width * i as f64;
        let upper = lower + width;
        let skew = 1.0 - 1.0 / ratio;
        let intensity = if view.max_quantity > 0.0 {
            skew * (total / view.max_quantity).min(1.0)
        } else {
            0.0
        };

        zones.push(
            ZoneDraft {
                source: ZoneSource::Imbalance,
                side,
                pressure_type: PressureType::directional(side),
                min_price: lower,
                center_price: bucket.notional / total,
                max_price: upper,
                total_volume: total,
                order_count: bucket.levels,
                intensity,
                strength: blend_strength(skew, view.volume_share(total)),
            }
            .build(view.timestamp),
        );
    }

    zones
}
