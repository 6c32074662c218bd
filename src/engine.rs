//! The analysis pipeline.
//!
//! [`PressureEngine`] owns every stateful component: the reconciler, the
//! connection monitor, the zone detector's history, the alert cooldown table
//! and the previous analysis result. Each applied snapshot or diff runs one
//! synchronous pass:
//!
//! ```text
//! bootstrap/apply → ZoneDetector::detect → StatsAggregator::compute
//!                 → AlertGenerator::diff → OverlayFeed::{heatmap, gradient_overlay}
//! ```
//!
//! The engine is caller-owned and single-threaded; there is no global
//! analyzer instance.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::alerts::{Alert, AlertConfig, AlertGenerator};
use crate::book::{
    ApplyOutcome, BackoffConfig, BookReconciler, ConnectionMonitor, ConnectionStatus, PollEvent, ReconcilerConfig,
    ReconcilerStats, ReconnectDecision,
};
use crate::error::{PressureError, Result};
use crate::overlay::{GradientSegment, HeatmapPoint, OverlayConfig, OverlayFeed};
use crate::source::{FeedEvent, SyntheticConfig, SyntheticFeed};
use crate::statistics::{RunningStats, Statistics, StatsAggregator};
use crate::types::{BookDiff, BookSnapshot, BookState};
use crate::zones::{inherit_first_seen, Zone, ZoneConfig, ZoneDetector};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reconciler: ReconcilerConfig,
    pub backoff: BackoffConfig,
    pub zones: ZoneConfig,
    pub alerts: AlertConfig,
    pub overlay: OverlayConfig,
    /// Fallback feed parameters; the base price follows the live mid
    pub synthetic: SyntheticConfig,
}

impl EngineConfig {
    pub fn with_depth_cap(mut self, depth_cap: usize) -> Self {
        self.reconciler.depth_cap = depth_cap;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_zones(mut self, zones: ZoneConfig) -> Self {
        self.zones = zones;
        self
    }

    pub fn with_alerts(mut self, alerts: AlertConfig) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_overlay(mut self, overlay: OverlayConfig) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_synthetic(mut self, synthetic: SyntheticConfig) -> Self {
        self.synthetic = synthetic;
        self
    }

    /// Reject settings no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.reconciler.depth_cap == 0 {
            return Err(PressureError::InvalidConfig("depth_cap must be > 0".into()));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(PressureError::InvalidConfig(format!(
                "max_delay_ms ({}) below base_delay_ms ({})",
                self.backoff.max_delay_ms, self.backoff.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_ratio) {
            return Err(PressureError::InvalidConfig(format!(
                "jitter_ratio must be in [0, 1], got {}",
                self.backoff.jitter_ratio
            )));
        }
        if self.zones.max_zones == 0 {
            return Err(PressureError::InvalidConfig("max_zones must be > 0".into()));
        }
        if self.alerts.match_tolerance <= 0.0 {
            return Err(PressureError::InvalidConfig("match_tolerance must be > 0".into()));
        }
        if self.alerts.weakening_ratio >= self.alerts.strengthening_ratio {
            return Err(PressureError::InvalidConfig(
                "weakening_ratio must be below strengthening_ratio".into(),
            ));
        }
        if self.overlay.min_opacity > self.overlay.max_opacity {
            return Err(PressureError::InvalidConfig("min_opacity above max_opacity".into()));
        }
        self.synthetic.validate()
    }

    /// Save as pretty-printed JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load from JSON; missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Output
// ============================================================================

/// Immutable output of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Sequence id of the book this pass ran on
    pub sequence: u64,
    pub timestamp_ns: i64,
    pub zones: Vec<Zone>,
    pub statistics: Statistics,
    pub alerts: Vec<Alert>,
    pub heatmap: Vec<HeatmapPoint>,
    pub overlays: Vec<GradientSegment>,
}

/// Engine counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub snapshots: u64,
    pub diffs: u64,
    /// Diffs applied without their own pass because a burst was coalesced
    pub coalesced_diffs: u64,
    pub stale_diffs: u64,
    pub analysis_passes: u64,
    pub gaps: u64,
    pub staleness_events: u64,
    pub transport_errors: u64,
    pub reconnects: u64,
    pub fallback_activations: u64,
    pub alerts_emitted: u64,
    /// Zones produced per pass
    pub zones_per_pass: RunningStats,
}

// ============================================================================
// Engine
// ============================================================================

pub struct PressureEngine {
    config: EngineConfig,
    reconciler: BookReconciler,
    monitor: ConnectionMonitor,
    detector: ZoneDetector,
    aggregator: StatsAggregator,
    alerts: AlertGenerator,
    overlay: OverlayFeed,
    previous: Option<AnalysisResult>,
    fallback: Option<SyntheticFeed>,
    last_transport_error: Option<PressureError>,
    stats: EngineStats,
}

impl Default for PressureEngine {
    fn default() -> Self {
        Self::build(EngineConfig::default())
    }
}

impl PressureEngine {
    /// Build an engine after validating `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        Self {
            reconciler: BookReconciler::with_config(config.reconciler.clone()),
            monitor: ConnectionMonitor::new(config.backoff.clone()),
            detector: ZoneDetector::new(config.zones.clone()),
            aggregator: StatsAggregator::new(config.alerts.match_tolerance),
            alerts: AlertGenerator::new(config.alerts.clone()),
            overlay: OverlayFeed::new(config.overlay.clone()),
            previous: None,
            fallback: None,
            last_transport_error: None,
            stats: EngineStats::default(),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bootstrap from a snapshot and run a pass.
    ///
    /// Clears any gap or staleness flag. On `InvalidSnapshot` the previous
    /// book is kept and the caller should retry.
    pub fn on_snapshot(&mut self, snapshot: &BookSnapshot) -> Result<AnalysisResult> {
        let book = self.reconciler.bootstrap(snapshot)?;
        self.monitor.on_connected(snapshot.timestamp_ns);
        self.last_transport_error = None;
        self.stats.snapshots += 1;
        Ok(self.analyze(book))
    }

    /// Apply one diff and run a pass. `Ok(None)` for a stale diff.
    pub fn on_diff(&mut self, diff: &BookDiff) -> Result<Option<AnalysisResult>> {
        match self.apply_diff(diff)? {
            Some(book) => Ok(Some(self.analyze(book))),
            None => Ok(None),
        }
    }

    /// Apply a burst of diffs in order and run a single pass over the result.
    ///
    /// The first failing diff aborts the burst and its error is returned.
    /// Diffs before it stay applied and still get their pass, so
    /// [`previous_result`](Self::previous_result) matches [`book`](Self::book).
    pub fn on_diffs(&mut self, diffs: &[BookDiff]) -> Result<Option<AnalysisResult>> {
        let mut latest = None;
        let mut applied = 0u64;
        let mut failure = None;
        for diff in diffs {
            match self.apply_diff(diff) {
                Ok(Some(book)) => {
                    latest = Some(book);
                    applied += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if applied > 1 {
            self.stats.coalesced_diffs += applied - 1;
        }
        let result = latest.map(|book| self.analyze(book));
        match failure {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Dispatch a decoded feed event.
    pub fn on_event(&mut self, event: &FeedEvent) -> Result<Option<AnalysisResult>> {
        match event {
            FeedEvent::Snapshot(snapshot) => self.on_snapshot(snapshot).map(Some),
            FeedEvent::Diff(diff) => self.on_diff(diff),
        }
    }

    /// Report a transport failure; schedules a reconnect or activates the
    /// synthetic fallback once attempts are exhausted.
    pub fn on_transport_error(&mut self, now_ns: i64, message: impl Into<String>) -> ReconnectDecision {
        let message = message.into();
        self.stats.transport_errors += 1;
        let decision = self.monitor.on_transport_error(now_ns, message.as_str());
        let err = PressureError::TransportError(message);
        log::debug!("{err} -> {decision:?}");
        self.last_transport_error = Some(err);
        if decision == ReconnectDecision::Fallback {
            self.activate_fallback(now_ns);
        }
        decision
    }

    /// Drive timers. A due reconnect is returned for the caller to act on;
    /// staleness marks the book for resync.
    pub fn poll(&mut self, now_ns: i64) -> Option<PollEvent> {
        let event = self.monitor.poll(now_ns)?;
        match event {
            PollEvent::Reconnect { attempt } => {
                self.stats.reconnects += 1;
                log::info!("Reconnecting (attempt {attempt})");
            }
            PollEvent::Stale { decision, .. } => {
                self.stats.staleness_events += 1;
                self.reconciler.mark_stale(now_ns);
                if decision == ReconnectDecision::Fallback {
                    self.activate_fallback(now_ns);
                }
            }
        }
        Some(event)
    }

    /// Caller-initiated connect. `false` if already connecting/connected.
    pub fn connect(&mut self) -> bool {
        self.monitor.connect()
    }

    /// Caller-initiated disconnect; cancels any pending reconnect.
    pub fn disconnect(&mut self) {
        self.monitor.disconnect();
    }

    #[inline]
    pub fn book(&self) -> &BookState {
        self.reconciler.book()
    }

    /// Connection state for status displays.
    pub fn status(&self) -> ConnectionStatus {
        self.monitor.status(self.reconciler.gap().copied())
    }

    #[inline]
    pub fn previous_result(&self) -> Option<&AnalysisResult> {
        self.previous.as_ref()
    }

    /// Most recent transport failure, kept until the next snapshot.
    #[inline]
    pub fn last_transport_error(&self) -> Option<&PressureError> {
        self.last_transport_error.as_ref()
    }

    #[inline]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    #[inline]
    pub fn reconciler_stats(&self) -> &ReconcilerStats {
        self.reconciler.stats()
    }

    /// Alerts held back by the cooldown.
    #[inline]
    pub fn suppressed_alerts(&self) -> u64 {
        self.alerts.suppressed()
    }

    /// A gap or staleness was detected; a fresh snapshot is required.
    #[inline]
    pub fn needs_resync(&self) -> bool {
        self.reconciler.needs_resync()
    }

    /// The synthetic feed, once reconnection has been exhausted.
    pub fn fallback_feed(&mut self) -> Option<&mut SyntheticFeed> {
        self.fallback.as_mut()
    }

    /// Drop the book, history and previous result. Counters are kept.
    pub fn reset(&mut self) {
        self.reconciler.reset();
        self.detector.clear_history();
        self.alerts.reset();
        self.previous = None;
    }

    fn apply_diff(&mut self, diff: &BookDiff) -> Result<Option<BookState>> {
        let gaps_before = self.reconciler.stats().gaps;
        match self.reconciler.apply(diff) {
            Ok(ApplyOutcome::Applied(book)) => {
                self.monitor.record_activity(diff.timestamp_ns);
                self.stats.diffs += 1;
                Ok(Some(book))
            }
            Ok(ApplyOutcome::Stale) => {
                self.stats.stale_diffs += 1;
                Ok(None)
            }
            Err(e) => {
                // Diffs refused while a gap is already open do not count again
                if self.reconciler.stats().gaps > gaps_before {
                    self.stats.gaps += 1;
                }
                Err(e)
            }
        }
    }

    fn analyze(&mut self, book: BookState) -> AnalysisResult {
        let now_ns = book.timestamp_ns;
        let previous_zones: &[Zone] = self.previous.as_ref().map(|r| r.zones.as_slice()).unwrap_or(&[]);

        let mut zones = self.detector.detect(&book);
        inherit_first_seen(&mut zones, previous_zones, self.config.alerts.match_tolerance);

        let statistics = self.aggregator.compute(&zones, &book, previous_zones, now_ns);
        let alerts = self.alerts.diff(&zones, previous_zones, &book, now_ns);
        let heatmap = self.overlay.heatmap(&book, &zones);
        let overlays = self.overlay.gradient_overlay(&zones);

        self.stats.analysis_passes += 1;
        self.stats.alerts_emitted += alerts.len() as u64;
        self.stats.zones_per_pass.update(zones.len() as f64);

        log::debug!("Pass seq={} {}", book.sequence_id, statistics.summary());

        let result = AnalysisResult {
            sequence: book.sequence_id,
            timestamp_ns: now_ns,
            zones,
            statistics,
            alerts,
            heatmap,
            overlays,
        };
        self.previous = Some(result.clone());
        result
    }

    fn activate_fallback(&mut self, now_ns: i64) {
        if self.fallback.is_some() {
            return;
        }
        let mid = self.reconciler.book().mid_price();
        let mut config = self.config.synthetic.clone().with_start(now_ns);
        if mid.is_finite() && mid > 0.0 {
            config = config.with_base_price(mid);
        }
        match SyntheticFeed::new(config) {
            Ok(feed) => {
                self.stats.fallback_activations += 1;
                self.fallback = Some(feed);
            }
            Err(e) => log::error!("Cannot start synthetic fallback: {e}"),
        }
    }
}
