//! Zone lifecycle and market-event alerts.
//!
//! Each pass compares the current zone list against the previous pass:
//! every current zone is paired with the closest same-side previous zone
//! within `match_tolerance` (relative). Unmatched zones raise `Formation`;
//! matched zones whose intensity moved past the strengthening/weakening
//! ratios raise `Strengthening`/`Weakening`. Independently, oversized levels
//! raise `VolumeSpike` and busy Distribution zones raise `ClusterFormation`.
//!
//! Alerts sharing a key `(type, side, price bucket)` within `cooldown_secs`
//! are suppressed and counted, which keeps noisy books from producing an
//! alert storm.
//!
//! # Example
//!
//! ```ignore
//! use orderbook_pressure::alerts::{AlertConfig, AlertGenerator};
//!
//! let mut alerts = AlertGenerator::new(AlertConfig::default());
//! for alert in alerts.diff(&zones, &previous, &book, now_ns) {
//!     println!("[{}] {}", alert.severity.name(), alert.message);
//! }
//! ```

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{BookState, Side};
use crate::zones::{clamp01, closest_match, PressureType, Zone};

/// Kind of alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    /// New zone with no previous-pass counterpart
    Formation,
    /// Intensity rose past the strengthening ratio
    Strengthening,
    /// Intensity fell past the weakening ratio
    Weakening,
    /// Single level far above the book-average volume
    VolumeSpike,
    /// Distribution zone with many orders
    ClusterFormation,
}

impl AlertType {
    pub fn name(&self) -> &'static str {
        match self {
            AlertType::Formation => "FORMATION",
            AlertType::Strengthening => "STRENGTHENING",
            AlertType::Weakening => "WEAKENING",
            AlertType::VolumeSpike => "VOLUME_SPIKE",
            AlertType::ClusterFormation => "CLUSTER_FORMATION",
        }
    }

    /// Whether the alert tracks a zone across passes.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            AlertType::Formation | AlertType::Strengthening | AlertType::Weakening
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Severity of a new zone by intensity.
    pub fn for_intensity(intensity: f64) -> Self {
        if intensity > 0.8 {
            Severity::Critical
        } else if intensity > 0.6 {
            Severity::High
        } else if intensity > 0.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Severity of a volume spike by multiple of the book average.
    pub fn for_spike(multiple: f64) -> Self {
        if multiple > 5.0 {
            Severity::Critical
        } else if multiple > 3.0 {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

/// A single alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Monotonic per generator
    pub id: u64,

    #[serde(rename = "type")]
    pub alert_type: AlertType,

    pub severity: Severity,

    pub message: String,

    /// Zone the alert refers to; `None` for level-based alerts
    pub zone: Option<Zone>,

    /// Data timestamp (ns since epoch)
    pub timestamp: i64,

    /// In [0, 1]
    pub confidence: f64,

    #[serde(skip_serializing_if = "metadata_is_empty", default)]
    pub metadata: AHashMap<String, String>,
}

fn metadata_is_empty(metadata: &AHashMap<String, String>) -> bool {
    metadata.is_empty()
}

impl Alert {
    pub fn new(id: u64, alert_type: AlertType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id,
            alert_type,
            severity,
            message: message.into(),
            zone: None,
            timestamp: 0,
            confidence: 0.0,
            metadata: AHashMap::new(),
        }
    }

    pub fn with_zone(mut self, zone: Zone) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn with_timestamp(mut self, ts: i64) -> Self {
        self.timestamp = ts;
        self
    }

    /// Set the confidence, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp01(confidence);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Alert thresholds and cooldown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Relative centre distance for matching zones across passes
    pub match_tolerance: f64,

    pub strengthening_ratio: f64,
    pub weakening_ratio: f64,

    /// Level quantity multiple of the book average that counts as a spike
    pub volume_spike_multiple: f64,

    /// Distribution zones above this order count raise a cluster alert
    pub cluster_min_orders: usize,

    /// Cluster alerts above this order count are High
    pub cluster_high_orders: usize,

    /// Suppression window per alert key; 0 disables it
    pub cooldown_secs: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            match_tolerance: 0.001,
            strengthening_ratio: 1.3,
            weakening_ratio: 0.7,
            volume_spike_multiple: 3.0,
            cluster_min_orders: 5,
            cluster_high_orders: 10,
            cooldown_secs: 5.0,
        }
    }
}

impl AlertConfig {
    pub fn with_cooldown(mut self, secs: f64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn without_cooldown(self) -> Self {
        self.with_cooldown(0.0)
    }

    fn cooldown_ns(&self) -> i64 {
        if self.cooldown_secs > 0.0 {
            (self.cooldown_secs * 1e9) as i64
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AlertKey {
    alert_type: AlertType,
    side: Side,
    bucket: i64,
}

/// Emits alerts by diffing consecutive zone lists.
#[derive(Debug, Clone)]
pub struct AlertGenerator {
    config: AlertConfig,
    next_id: u64,
    last_fired: AHashMap<AlertKey, i64>,
    type_counts: AHashMap<AlertType, u64>,
    suppressed: u64,
}

impl Default for AlertGenerator {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

impl AlertGenerator {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            next_id: 1,
            last_fired: AHashMap::new(),
            type_counts: AHashMap::new(),
            suppressed: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Alerts suppressed by the cooldown so far.
    #[inline]
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Total alerts emitted.
    pub fn emitted(&self) -> u64 {
        self.type_counts.values().sum()
    }

    pub fn count_by_type(&self, alert_type: AlertType) -> u64 {
        self.type_counts.get(&alert_type).copied().unwrap_or(0)
    }

    /// Forget cooldown state and counters; ids keep increasing.
    pub fn reset(&mut self) {
        self.last_fired.clear();
        self.type_counts.clear();
        self.suppressed = 0;
    }

    /// One alert set for the pass at `now_ns`.
    pub fn diff(&mut self, current: &[Zone], previous: &[Zone], book: &BookState, now_ns: i64) -> Vec<Alert> {
        let window = self.config.cooldown_ns();
        if window > 0 {
            self.last_fired.retain(|_, fired| now_ns - *fired < window);
        }

        let mut alerts = Vec::new();

        for zone in current {
            if let Some(alert) = self.lifecycle_alert(zone, previous, now_ns) {
                alerts.push(alert);
            }
        }
        self.volume_spikes(book, now_ns, &mut alerts);
        self.cluster_formations(current, now_ns, &mut alerts);

        if !alerts.is_empty() {
            log::debug!(
                "Alert pass at {}: {} alerts ({} suppressed total)",
                now_ns,
                alerts.len(),
                self.suppressed
            );
        }
        alerts
    }

    fn lifecycle_alert(&mut self, zone: &Zone, previous: &[Zone], now_ns: i64) -> Option<Alert> {
        let Some(matched) = closest_match(zone, previous, self.config.match_tolerance) else {
            let message = format!(
                "New {} zone at {:.4} (intensity {:.2})",
                zone.pressure_type.name(),
                zone.center_price,
                zone.intensity
            );
            return self.emit(
                AlertType::Formation,
                Severity::for_intensity(zone.intensity),
                zone.side,
                zone.center_price,
                message,
                now_ns,
                |alert| alert.with_zone(zone.clone()).with_confidence(zone.strength),
            );
        };

        if matched.intensity <= 0.0 {
            return None;
        }
        let ratio = zone.intensity / matched.intensity;

        if ratio >= self.config.strengthening_ratio {
            let message = format!(
                "{} zone at {:.4} strengthening {:.2} -> {:.2}",
                zone.pressure_type.name(),
                zone.center_price,
                matched.intensity,
                zone.intensity
            );
            self.emit(
                AlertType::Strengthening,
                Severity::for_intensity(zone.intensity),
                zone.side,
                zone.center_price,
                message,
                now_ns,
                |alert| {
                    alert
                        .with_zone(zone.clone())
                        .with_confidence(zone.strength)
                        .with_metadata("previous_intensity", matched.intensity)
                        .with_metadata("ratio", format!("{ratio:.3}"))
                },
            )
        } else if ratio <= self.config.weakening_ratio {
            let message = format!(
                "{} zone at {:.4} weakening {:.2} -> {:.2}",
                zone.pressure_type.name(),
                zone.center_price,
                matched.intensity,
                zone.intensity
            );
            self.emit(
                AlertType::Weakening,
                Severity::Medium,
                zone.side,
                zone.center_price,
                message,
                now_ns,
                |alert| {
                    alert
                        .with_zone(zone.clone())
                        .with_confidence(zone.strength)
                        .with_metadata("previous_intensity", matched.intensity)
                        .with_metadata("ratio", format!("{ratio:.3}"))
                },
            )
        } else {
            None
        }
    }

    fn volume_spikes(&mut self, book: &BookState, now_ns: i64, out: &mut Vec<Alert>) {
        let levels: Vec<_> = book.levels().filter(|l| l.is_well_formed()).copied().collect();
        if levels.is_empty() {
            return;
        }
        let average = levels.iter().map(|l| l.quantity).sum::<f64>() / levels.len() as f64;
        if average <= 0.0 {
            return;
        }

        for level in levels {
            let multiple = level.quantity / average;
            if multiple <= self.config.volume_spike_multiple {
                continue;
            }
            let message = format!(
                "Volume spike on {} at {:.4}: {:.1}x average",
                level.side.name(),
                level.price,
                multiple
            );
            let alert = self.emit(
                AlertType::VolumeSpike,
                Severity::for_spike(multiple),
                level.side,
                level.price,
                message,
                now_ns,
                |alert| {
                    alert
                        .with_confidence(multiple / 10.0)
                        .with_metadata("price", level.price)
                        .with_metadata("quantity", level.quantity)
                        .with_metadata("multiple", format!("{multiple:.2}"))
                },
            );
            out.extend(alert);
        }
    }

    fn cluster_formations(&mut self, zones: &[Zone], now_ns: i64, out: &mut Vec<Alert>) {
        for zone in zones {
            if zone.pressure_type != PressureType::Distribution || zone.order_count <= self.config.cluster_min_orders {
                continue;
            }
            let severity = if zone.order_count > self.config.cluster_high_orders {
                Severity::High
            } else {
                Severity::Medium
            };
            let message = format!(
                "Distribution cluster of {} orders at {:.4}",
                zone.order_count, zone.center_price
            );
            let confidence = zone.order_count as f64 / (2 * self.config.cluster_high_orders.max(1)) as f64;
            let alert = self.emit(
                AlertType::ClusterFormation,
                severity,
                zone.side,
                zone.center_price,
                message,
                now_ns,
                |alert| {
                    alert
                        .with_zone(zone.clone())
                        .with_confidence(confidence)
                        .with_metadata("order_count", zone.order_count)
                },
            );
            out.extend(alert);
        }
    }

    /// Build and record an alert unless its key is cooling down.
    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        alert_type: AlertType,
        severity: Severity,
        side: Side,
        price: f64,
        message: String,
        now_ns: i64,
        decorate: impl FnOnce(Alert) -> Alert,
    ) -> Option<Alert> {
        let window = self.config.cooldown_ns();
        if window > 0 {
            let key = AlertKey {
                alert_type,
                side,
                bucket: price_bucket(price, self.config.match_tolerance),
            };
            if let Some(&fired) = self.last_fired.get(&key) {
                if now_ns - fired < window {
                    self.suppressed += 1;
                    log::trace!("Suppressed {} alert at {:.4}", alert_type.name(), price);
                    return None;
                }
            }
            self.last_fired.insert(key, now_ns);
        }

        let id = self.next_id;
        self.next_id += 1;
        *self.type_counts.entry(alert_type).or_insert(0) += 1;

        let alert = decorate(Alert::new(id, alert_type, severity, message).with_timestamp(now_ns));
        if alert.severity >= Severity::High {
            log::info!("[{}] {}", alert.severity.name(), alert.message);
        }
        Some(alert)
    }
}

/// Log-scale bucket of relative width `tolerance`.
fn price_bucket(price: f64, tolerance: f64) -> i64 {
    if price <= 0.0 || !price.is_finite() || tolerance <= 0.0 {
        return 0;
    }
    (price.ln() / tolerance.ln_1p()).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceLevel;
    use crate::zones::{ZoneDetector, ZoneDraft, ZoneSource};

    const SECOND: i64 = 1_000_000_000;

    fn zone(side: Side, pressure: PressureType, center: f64, intensity: f64, orders: usize) -> Zone {
        ZoneDraft {
            source: ZoneSource::ProximityGroup,
            side,
            pressure_type: pressure,
            min_price: center - 0.05,
            center_price: center,
            max_price: center + 0.05,
            total_volume: 10.0,
            order_count: orders,
            intensity,
            strength: 0.6,
        }
        .build(0)
    }

    fn flat_book() -> BookState {
        let bids = (0..5).map(|i| PriceLevel::new(100.0 - i as f64, 10.0, Side::Bid, 0)).collect();
        let asks = (0..5).map(|i| PriceLevel::new(101.0 + i as f64, 10.0, Side::Ask, 0)).collect();
        BookState::from_sides(bids, asks, 1, 0)
    }

    fn lifecycle(alerts: &[Alert]) -> usize {
        alerts.iter().filter(|a| a.alert_type.is_lifecycle()).count()
    }

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(Severity::for_intensity(0.9), Severity::Critical);
        assert_eq!(Severity::for_intensity(0.7), Severity::High);
        assert_eq!(Severity::for_intensity(0.5), Severity::Medium);
        assert_eq!(Severity::for_intensity(0.4), Severity::Low);
        assert_eq!(Severity::for_spike(10.0), Severity::Critical);
        assert_eq!(Severity::for_spike(4.0), Severity::High);
        assert_eq!(Severity::for_spike(3.0), Severity::Medium);
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn test_formation_for_unmatched_zone() {
        let mut generator = AlertGenerator::default();
        let current = vec![zone(Side::Bid, PressureType::Support, 99.0, 0.85, 3)];
        let alerts = generator.diff(&current, &[], &flat_book(), 0);

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Formation);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].id, 1);
        assert!(alerts[0].zone.is_some());
    }

    #[test]
    fn test_strengthening_and_weakening() {
        let mut generator = AlertGenerator::new(AlertConfig::default().without_cooldown());
        let previous = vec![
            zone(Side::Bid, PressureType::Support, 99.0, 0.4, 3),
            zone(Side::Ask, PressureType::Resistance, 102.0, 0.8, 3),
            zone(Side::Ask, PressureType::Resistance, 104.0, 0.5, 3),
        ];
        let current = vec![
            zone(Side::Bid, PressureType::Support, 99.02, 0.6, 3),
            zone(Side::Ask, PressureType::Resistance, 102.0, 0.5, 3),
            zone(Side::Ask, PressureType::Resistance, 104.0, 0.55, 3),
        ];
        let alerts = generator.diff(&current, &previous, &flat_book(), 0);

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].alert_type, AlertType::Strengthening);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[1].alert_type, AlertType::Weakening);
        assert_eq!(alerts[1].severity, Severity::Medium);
        assert!(alerts[1].metadata.contains_key("previous_intensity"));
    }

    #[test]
    fn test_opposite_side_does_not_match() {
        let mut generator = AlertGenerator::default();
        let previous = vec![zone(Side::Ask, PressureType::Resistance, 100.0, 0.5, 3)];
        let current = vec![zone(Side::Bid, PressureType::Support, 100.0, 0.5, 3)];
        let alerts = generator.diff(&current, &previous, &flat_book(), 0);
        assert_eq!(alerts[0].alert_type, AlertType::Formation);
    }

    #[test]
    fn test_same_book_twice_has_no_lifecycle_alerts() {
        let bids: Vec<PriceLevel> = (0..10)
            .map(|i| PriceLevel::new(100.0 + 0.02 * i as f64, 60.0, Side::Bid, 0))
            .collect();
        let asks: Vec<PriceLevel> = [101.0, 103.0, 105.0, 107.0, 111.0]
            .iter()
            .map(|&p| PriceLevel::new(p, 10.0, Side::Ask, 0))
            .collect();
        let book = BookState::from_sides(bids, asks, 1, 0);

        let mut detector = ZoneDetector::default();
        let mut generator = AlertGenerator::new(AlertConfig::default().without_cooldown());

        let first = detector.detect(&book);
        let first_alerts = generator.diff(&first, &[], &book, 0);
        assert!(lifecycle(&first_alerts) > 0);

        let second = detector.detect(&book);
        let second_alerts = generator.diff(&second, &first, &book, SECOND);
        assert_eq!(lifecycle(&second_alerts), 0);
    }

    #[test]
    fn test_single_volume_spike() {
        // Nineteen levels of 1 and one of 19: the spike is exactly 10x the average
        let mut bids: Vec<PriceLevel> = (0..10).map(|i| PriceLevel::new(100.0 - i as f64, 1.0, Side::Bid, 0)).collect();
        bids[3].quantity = 19.0;
        let asks = (0..10).map(|i| PriceLevel::new(101.0 + i as f64, 1.0, Side::Ask, 0)).collect();
        let book = BookState::from_sides(bids, asks, 1, 0);

        let mut generator = AlertGenerator::default();
        let alerts = generator.diff(&[], &[], &book, 0);

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::VolumeSpike);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(alerts[0].zone.is_none());
        assert_eq!(alerts[0].metadata.get("price").map(String::as_str), Some("97"));
        assert!((alerts[0].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_metadata_serialization() {
        let bare = Alert::new(1, AlertType::VolumeSpike, Severity::Low, "spike");
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("metadata"));

        let tagged = bare.with_metadata("price", 97.5);
        let json = serde_json::to_string(&tagged).unwrap();
        assert!(json.contains(r#""metadata":{"price":"97.5"}"#));
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metadata.get("price").map(String::as_str), Some("97.5"));
    }

    #[test]
    fn test_cluster_formation() {
        let mut generator = AlertGenerator::default();
        let zones = vec![
            zone(Side::Ask, PressureType::Distribution, 102.0, 0.3, 6),
            zone(Side::Ask, PressureType::Distribution, 105.0, 0.3, 12),
            zone(Side::Ask, PressureType::Distribution, 108.0, 0.3, 5),
            zone(Side::Bid, PressureType::Accumulation, 98.0, 0.3, 20),
        ];
        let alerts: Vec<Alert> = generator
            .diff(&zones, &zones, &flat_book(), 0)
            .into_iter()
            .filter(|a| a.alert_type == AlertType::ClusterFormation)
            .collect();

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[1].severity, Severity::High);
    }

    #[test]
    fn test_cooldown_suppresses_repeats() {
        let mut generator = AlertGenerator::default();
        let current = vec![zone(Side::Bid, PressureType::Support, 99.0, 0.5, 3)];

        assert_eq!(generator.diff(&current, &[], &flat_book(), 0).len(), 1);
        assert!(generator.diff(&current, &[], &flat_book(), 2 * SECOND).is_empty());
        assert_eq!(generator.suppressed(), 1);

        // Window elapsed
        assert_eq!(generator.diff(&current, &[], &flat_book(), 6 * SECOND).len(), 1);
        assert_eq!(generator.count_by_type(AlertType::Formation), 2);
        assert_eq!(generator.emitted(), 2);
    }

    #[test]
    fn test_cooldown_disabled() {
        let mut generator = AlertGenerator::new(AlertConfig::default().without_cooldown());
        let current = vec![zone(Side::Bid, PressureType::Support, 99.0, 0.5, 3)];
        for _ in 0..3 {
            assert_eq!(generator.diff(&current, &[], &flat_book(), 0).len(), 1);
        }
        assert_eq!(generator.suppressed(), 0);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut generator = AlertGenerator::new(AlertConfig::default().without_cooldown());
        let current = vec![
            zone(Side::Bid, PressureType::Support, 99.0, 0.5, 3),
            zone(Side::Ask, PressureType::Resistance, 102.0, 0.5, 3),
        ];
        let first = generator.diff(&current, &[], &flat_book(), 0);
        let second = generator.diff(&current, &[], &flat_book(), 0);
        let ids: Vec<u64> = first.iter().chain(second.iter()).map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_price_bucket_is_relative() {
        assert_eq!(price_bucket(100.0, 0.001), price_bucket(100.0, 0.001));
        assert_ne!(price_bucket(100.0, 0.001), price_bucket(100.5, 0.001));
        assert_eq!(price_bucket(-1.0, 0.001), 0);
    }
}
