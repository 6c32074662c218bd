//! Volume-weighted density clustering.
//!
//! Single-linkage clustering over price with epsilon = `density_epsilon_ratio`
//! × the book's price span. Clusters with at least `density_min_levels`
//! members and volume above a dynamic threshold become zones:
//! `max(median × 1.5, p75 × 0.8, floor)` over all level quantities.

use crate::types::PriceLevel;

use super::{blend_strength, percentile, vwap, BookView, PressureType, Zone, ZoneConfig, ZoneDraft, ZoneSource};

/// Dynamic cluster volume threshold for `view`.
pub fn volume_threshold(view: &BookView, config: &ZoneConfig) -> f64 {
    let quantities = view.sorted_quantities();
    let median = percentile(&quantities, 0.5);
    let p75 = percentile(&quantities, 0.75);
    (median * config.density_median_factor)
        .max(p75 * config.density_p75_factor)
        .max(config.density_volume_floor)
}

/// Linkage distance for `view`.
pub fn epsilon(view: &BookView, config: &ZoneConfig) -> f64 {
    view.range.span() * config.density_epsilon_ratio
}

pub fn detect(view: &BookView, config: &ZoneConfig) -> Vec<Zone> {
    let min_levels = config.density_min_levels.max(1);
    if view.levels.len() < min_levels {
        return Vec::new();
    }

    let eps = epsilon(view, config);
    let threshold = volume_threshold(view, config);

    let mut zones = Vec::new();
    let mut cluster: Vec<PriceLevel> = Vec::new();

    for level in &view.levels {
        if let Some(last) = cluster.last() {
            if level.price - last.price > eps {
                if let Some(zone) = finish_cluster(&cluster, view, min_levels, threshold) {
                    zones.push(zone);
                }
                cluster.clear();
            }
        }
        cluster.push(*level);
    }
    if let Some(zone) = finish_cluster(&cluster, view, min_levels, threshold) {
        zones.push(zone);
    }

    zones
}

fn finish_cluster(cluster: &[PriceLevel], view: &BookView, min_levels: usize, threshold: f64) -> Option<Zone> {
    if cluster.len() < min_levels {
        return None;
    }
    let volume: f64 = cluster.iter().map(|l| l.quantity).sum();
    if volume < threshold {
        return None;
    }

    let center = vwap(cluster)?;
    let side = view.side_of(center);
    let average = volume / cluster.len() as f64;
    let intensity = if view.max_quantity > 0.0 {
        average / view.max_quantity
    } else {
        0.0
    };

    Some(
        ZoneDraft {
            source: ZoneSource::DensityCluster,
            side,
            pressure_type: PressureType::directional(side),
            min_price: cluster[0].price,
            center_price: center,
            max_price: cluster[cluster.len() - 1].price,
            total_volume: volume,
            order_count: cluster.len(),
            intensity,
            strength: blend_strength(intensity, view.volume_share(volume)),
        }
        .build(view.timestamp),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use crate::zones::test_support::{book, clustered_book};
    use crate::zones::ZoneType;

    #[test]
    fn test_clustered_bids_form_one_support_zone() {
        let view = BookView::new(&clustered_book());
        let config = ZoneConfig::default();

        assert!(epsilon(&view, &config) >= 0.02);
        let zones = detect(&view, &config);

        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert_eq!(zone.side, Side::Bid);
        assert_eq!(zone.zone_type, ZoneType::Support);
        assert!(zone.center_price >= 100.0 && zone.center_price <= 100.2);
        assert!((zone.total_volume - 600.0).abs() < 1e-9);
        assert_eq!(zone.order_count, 10);
        assert!(zone.satisfies_invariants());
    }

    #[test]
    fn test_threshold_uses_floor() {
        let view = BookView::new(&clustered_book());
        // median and p75 are both 60: max(90, 48, 100)
        assert_eq!(volume_threshold(&view, &ZoneConfig::default()), 100.0);
    }

    #[test]
    fn test_light_cluster_rejected() {
        let bids: Vec<(f64, f64)> = (0..6).map(|i| (100.0 + 0.02 * i as f64, 10.0)).collect();
        let view = BookView::new(&book(&bids, &[(110.0, 10.0)]));
        assert!(detect(&view, &ZoneConfig::default()).is_empty());
    }

    #[test]
    fn test_too_few_levels() {
        let view = BookView::new(&book(&[(100.0, 500.0), (99.99, 500.0)], &[(100.01, 500.0)]));
        assert!(detect(&view, &ZoneConfig::default()).is_empty());
    }
}
