//! Snapshot + diff order-book reconciler.
//!
//! Maintains a depth-bounded `BookState` from a bootstrap snapshot and an
//! ordered stream of incremental diffs:
//! - `LevelSet` per side for sorted O(log n) upserts and deletes
//! - Exchange-style sequence chaining with explicit gap reporting
//! - Derived fields (`max_quantity`, `price_range`) recomputed once per diff
//!
//! The reconciler never mutates the book on a failed bootstrap, a stale diff
//! or a sequence gap.

use serde::{Deserialize, Serialize};

use super::level_set::LevelSet;
use crate::error::{PressureError, Result};
use crate::types::{is_representable, BookConsistency, BookDiff, BookSnapshot, BookState, LevelUpdate, Side};

/// Default number of levels kept per side.
pub const DEFAULT_DEPTH_CAP: usize = 20;

/// Configuration for reconciler behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Maximum number of levels kept per side
    pub depth_cap: usize,

    /// Whether to log warnings for rejected entries and crossed books
    pub log_warnings: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            depth_cap: DEFAULT_DEPTH_CAP,
            log_warnings: true,
        }
    }
}

impl ReconcilerConfig {
    /// Create a new config with the given depth cap.
    pub fn new(depth_cap: usize) -> Self {
        Self {
            depth_cap,
            ..Default::default()
        }
    }

    /// Enable/disable warning logs.
    pub fn with_logging(mut self, log: bool) -> Self {
        self.log_warnings = log;
        self
    }
}

/// Why the reconciler stopped accepting diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapCause {
    /// A diff did not chain from the last applied sequence
    SequenceBreak { received_start: u64, received_end: u64 },
    /// No update arrived within the staleness window
    Staleness,
}

/// Gap report surfaced to status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapInfo {
    /// Next update id the reconciler was waiting for
    pub expected: u64,
    pub cause: GapCause,
    /// When the gap was detected (ns since epoch)
    pub detected_at_ns: i64,
    /// Time between the last applied update and detection
    pub duration_ns: i64,
}

impl GapInfo {
    /// The error returned to callers while this gap is outstanding.
    pub fn to_error(&self) -> PressureError {
        match self.cause {
            GapCause::SequenceBreak {
                received_start,
                received_end,
            } => PressureError::SequenceGap {
                expected: self.expected,
                received_start,
                received_end,
            },
            GapCause::Staleness => PressureError::StalenessTimeout {
                silent_ms: (self.duration_ns.max(0) / 1_000_000) as u64,
            },
        }
    }
}

/// Result of applying one diff.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Diff applied; carries the new book state
    Applied(BookState),
    /// Diff was entirely older than the current book and was ignored
    Stale,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

/// Statistics for monitoring reconciler health.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerStats {
    /// Snapshots successfully applied
    pub snapshots: u64,

    /// Snapshots rejected as invalid
    pub rejected_snapshots: u64,

    /// Diffs applied
    pub diffs_applied: u64,

    /// Diffs ignored because they were older than the book
    pub stale_diffs: u64,

    /// Sequence gaps detected
    pub gaps: u64,

    /// Individual diff entries skipped as malformed
    pub rejected_updates: u64,

    /// Levels dropped by the depth cap
    pub truncated_levels: u64,

    /// Crossed books observed after an update
    pub crossed_books: u64,

    /// Number of bid levels after the last update
    pub bid_levels: usize,

    /// Number of ask levels after the last update
    pub ask_levels: usize,

    /// Last timestamp processed (nanoseconds since epoch)
    pub last_timestamp: Option<i64>,
}

/// Order-book reconciler.
///
/// Turns a bootstrap snapshot plus an ordered sequence of diffs into a
/// consistent, depth-bounded [`BookState`].
#[derive(Debug, Clone)]
pub struct BookReconciler {
    config: ReconcilerConfig,

    bids: LevelSet,
    asks: LevelSet,

    /// Last applied update id (`None` = accept the next diff as baseline)
    last_sequence: Option<u64>,

    /// Next diff must straddle `last_sequence + 1` rather than start on it
    awaiting_first_diff: bool,

    bootstrapped: bool,

    /// Outstanding gap; diffs are refused until the next bootstrap
    gap: Option<GapInfo>,

    /// Cached published state
    state: BookState,

    stats: ReconcilerStats,
}

impl Default for BookReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl BookReconciler {
    /// Create a reconciler with the default depth cap of 20 levels per side.
    ///
    /// # Example
    /// ```
    /// use orderbook_pressure::{BookReconciler, BookSnapshot};
    ///
    /// let mut book = BookReconciler::new();
    /// let state = book
    ///     .bootstrap(&BookSnapshot::new(&[(100.0, 5.0), (99.0, 3.0)], &[(101.0, 4.0)]))
    ///     .unwrap();
    /// assert_eq!(state.max_quantity, 5.0);
    /// ```
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    /// Create a reconciler with custom configuration.
    pub fn with_config(config: ReconcilerConfig) -> Self {
        Self {
            config,
            bids: LevelSet::new(Side::Bid),
            asks: LevelSet::new(Side::Ask),
            last_sequence: None,
            awaiting_first_diff: false,
            bootstrapped: false,
            gap: None,
            state: BookState::default(),
            stats: ReconcilerStats::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Replace the book with a full snapshot.
    ///
    /// # Errors
    /// `InvalidSnapshot` if any price is non-finite, ≤ 0 or finer than the
    /// 1e-9 key resolution, or any quantity is non-finite or negative. The
    /// current book is left untouched.
    pub fn bootstrap(&mut self, snapshot: &BookSnapshot) -> Result<BookState> {
        if let Err(e) = validate_snapshot(snapshot) {
            self.stats.rejected_snapshots += 1;
            if self.config.log_warnings {
                log::warn!("Rejecting snapshot: {e}");
            }
            return Err(e);
        }

        self.bids.clear();
        self.asks.clear();

        let ts = snapshot.timestamp_ns;
        for update in &snapshot.bids {
            self.bids.upsert(update.price, update.quantity, ts);
        }
        for update in &snapshot.asks {
            self.asks.upsert(update.price, update.quantity, ts);
        }

        self.last_sequence = snapshot.last_update_id;
        self.awaiting_first_diff = snapshot.last_update_id.is_some();
        self.bootstrapped = true;
        self.gap = None;
        self.stats.snapshots += 1;

        self.finish_update(snapshot.last_update_id.unwrap_or(0), ts);

        log::info!(
            "Book bootstrapped: {} bids, {} asks, last_update_id={:?}",
            self.bids.len(),
            self.asks.len(),
            snapshot.last_update_id
        );

        Ok(self.state.clone())
    }

    /// Apply one incremental diff.
    ///
    /// Each entry with quantity 0 deletes its level (no-op if absent); any
    /// other entry upserts. Malformed entries are skipped and counted.
    ///
    /// # Errors
    /// - `NotBootstrapped` before the first snapshot
    /// - `SequenceGap` if the diff does not chain from the last applied
    ///   sequence; the book is not mutated and every later diff fails the
    ///   same way until `bootstrap` is called again
    /// - `StalenessTimeout` if the feed was marked stale
    pub fn apply(&mut self, diff: &BookDiff) -> Result<ApplyOutcome> {
        if !self.bootstrapped {
            return Err(PressureError::NotBootstrapped);
        }
        if let Some(gap) = &self.gap {
            return Err(gap.to_error());
        }

        if let Some(last) = self.last_sequence {
            if diff.sequence_end <= last {
                self.stats.stale_diffs += 1;
                log::debug!(
                    "Dropping stale diff {}..={} (last applied {})",
                    diff.sequence_start,
                    diff.sequence_end,
                    last
                );
                return Ok(ApplyOutcome::Stale);
            }

            let expected = last + 1;
            let chains = if self.awaiting_first_diff {
                diff.sequence_start <= expected && diff.sequence_end >= expected
            } else {
                diff.sequence_start == expected
            };

            if !chains {
                let gap = GapInfo {
                    expected,
                    cause: GapCause::SequenceBreak {
                        received_start: diff.sequence_start,
                        received_end: diff.sequence_end,
                    },
                    detected_at_ns: diff.timestamp_ns,
                    duration_ns: self.silence_until(diff.timestamp_ns),
                };
                self.stats.gaps += 1;
                log::warn!(
                    "Sequence gap: expected {}, received {}..={}; resync required",
                    expected,
                    diff.sequence_start,
                    diff.sequence_end
                );
                self.gap = Some(gap);
                return Err(gap.to_error());
            }
        }

        let ts = diff.timestamp_ns;
        self.apply_side(Side::Bid, &diff.bids, ts);
        self.apply_side(Side::Ask, &diff.asks, ts);

        self.last_sequence = Some(diff.sequence_end);
        self.awaiting_first_diff = false;
        self.stats.diffs_applied += 1;

        self.finish_update(diff.sequence_end, ts);

        Ok(ApplyOutcome::Applied(self.state.clone()))
    }

    /// Flag the feed as stale; diffs are refused until the next bootstrap.
    pub fn mark_stale(&mut self, now_ns: i64) {
        if !self.bootstrapped || self.gap.is_some() {
            return;
        }
        self.gap = Some(GapInfo {
            expected: self.last_sequence.map_or(0, |s| s + 1),
            cause: GapCause::Staleness,
            detected_at_ns: now_ns,
            duration_ns: self.silence_until(now_ns),
        });
        self.stats.gaps += 1;
    }

    fn apply_side(&mut self, side: Side, updates: &[LevelUpdate], ts: i64) {
        for update in updates {
            if !update.is_valid() {
                self.stats.rejected_updates += 1;
                if self.config.log_warnings {
                    log::warn!(
                        "Skipping malformed {} update: price={} quantity={}",
                        side.name(),
                        update.price,
                        update.quantity
                    );
                }
                continue;
            }

            let levels = match side {
                Side::Bid => &mut self.bids,
                Side::Ask => &mut self.asks,
            };
            if update.quantity == 0.0 {
                levels.remove(update.price);
            } else {
                levels.upsert(update.price, update.quantity, ts);
            }
        }
    }

    /// Truncate to the depth cap and rebuild the published state.
    fn finish_update(&mut self, sequence_id: u64, ts: i64) {
        let depth = self.config.depth_cap;
        let dropped = self.bids.truncate(depth) + self.asks.truncate(depth);
        self.stats.truncated_levels += dropped as u64;

        self.state = BookState {
            bids: self.bids.to_levels(depth),
            asks: self.asks.to_levels(depth),
            max_quantity: 0.0,
            price_range: Default::default(),
            sequence_id,
            timestamp_ns: ts,
        };
        self.state.recompute_derived();

        self.stats.bid_levels = self.bids.len();
        self.stats.ask_levels = self.asks.len();
        self.stats.last_timestamp = Some(ts);

        if self.state.check_consistency() == BookConsistency::Crossed {
            self.stats.crossed_books += 1;
            if self.config.log_warnings {
                log::warn!(
                    "Crossed book after update {}: bid={:?} ask={:?}",
                    sequence_id,
                    self.state.best_bid(),
                    self.state.best_ask()
                );
            }
        }
    }

    fn silence_until(&self, now_ns: i64) -> i64 {
        self.stats
            .last_timestamp
            .map_or(0, |last| now_ns.saturating_sub(last).max(0))
    }

    /// Current book state.
    #[inline]
    pub fn book(&self) -> &BookState {
        &self.state
    }

    /// Outstanding gap, if any.
    #[inline]
    pub fn gap(&self) -> Option<&GapInfo> {
        self.gap.as_ref()
    }

    #[inline]
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// True until a bootstrap has been applied after the last gap.
    #[inline]
    pub fn needs_resync(&self) -> bool {
        !self.bootstrapped || self.gap.is_some()
    }

    #[inline]
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Timestamp of the last applied snapshot or diff.
    #[inline]
    pub fn last_update_ns(&self) -> Option<i64> {
        self.stats.last_timestamp
    }

    pub fn stats(&self) -> &ReconcilerStats {
        &self.stats
    }

    /// Reset to the empty, un-bootstrapped state.
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_sequence = None;
        self.awaiting_first_diff = false;
        self.bootstrapped = false;
        self.gap = None;
        self.state = BookState::default();
        self.stats = ReconcilerStats::default();
    }
}

fn validate_snapshot(snapshot: &BookSnapshot) -> Result<()> {
    for (side, updates) in [(Side::Bid, &snapshot.bids), (Side::Ask, &snapshot.asks)] {
        for (i, update) in updates.iter().enumerate() {
            if update.price.is_finite() && update.price > 0.0 && !is_representable(update.price) {
                return Err(PressureError::InvalidSnapshot(format!(
                    "{} level {} price {:e} is outside the 1e-9 key resolution",
                    side.name(),
                    i,
                    update.price
                )));
            }
            if !update.is_valid() {
                return Err(PressureError::InvalidSnapshot(format!(
                    "{} level {} has price={} quantity={}",
                    side.name(),
                    i,
                    update.price,
                    update.quantity
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_snapshot() -> BookSnapshot {
        BookSnapshot::new(&[(100.0, 5.0), (99.0, 3.0)], &[(101.0, 4.0), (102.0, 2.0)])
    }

    fn quiet() -> BookReconciler {
        BookReconciler::with_config(ReconcilerConfig::default().with_logging(false))
    }

    #[test]
    fn test_bootstrap_derives_range_and_max() {
        let mut book = quiet();
        let state = book.bootstrap(&scenario_snapshot()).unwrap();

        assert_eq!(state.price_range.min, 99.0);
        assert_eq!(state.price_range.max, 102.0);
        assert_eq!(state.max_quantity, 5.0);
        assert!(state.satisfies_invariants());
        assert!(book.is_bootstrapped());
    }

    #[test]
    fn test_bootstrap_rejects_invalid_entries() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot()).unwrap();

        for bad in [(f64::NAN, 1.0), (100.0, -1.0), (100.0, f64::INFINITY), (-5.0, 1.0)] {
            let snapshot = BookSnapshot::new(&[bad], &[(101.0, 1.0)]);
            let err = book.bootstrap(&snapshot).unwrap_err();
            assert!(matches!(err, PressureError::InvalidSnapshot(_)));
        }

        // Failed bootstraps leave the previous book in place
        assert_eq!(book.book().bids.len(), 2);
        assert_eq!(book.stats().rejected_snapshots, 4);
    }

    #[test]
    fn test_bootstrap_skips_zero_quantity() {
        let mut book = quiet();
        let state = book
            .bootstrap(&BookSnapshot::new(&[(100.0, 5.0), (99.0, 0.0)], &[]))
            .unwrap();
        assert_eq!(state.bids.len(), 1);
    }

    #[test]
    fn test_zero_quantity_removes_level() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot()).unwrap();

        let outcome = book.apply(&BookDiff::new(1, 1).bid(99.0, 0.0)).unwrap();
        let ApplyOutcome::Applied(state) = outcome else {
            panic!("diff should apply");
        };

        let prices: Vec<f64> = state.bids.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![100.0]);
        assert_eq!(state.bids[0].quantity, 5.0);
    }

    #[test]
    fn test_zero_quantity_for_absent_price_is_noop() {
        let mut book = quiet();
        let before = book.bootstrap(&scenario_snapshot()).unwrap();
        book.apply(&BookDiff::new(1, 1).bid(98.5, 0.0)).unwrap();

        assert_eq!(book.book().bids, before.bids);
        assert_eq!(book.book().asks, before.asks);
    }

    #[test]
    fn test_upsert_updates_derived_fields() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot()).unwrap();
        book.apply(&BookDiff::new(1, 1).ask(105.0, 9.0).bid(100.0, 1.0))
            .unwrap();

        let state = book.book();
        assert_eq!(state.max_quantity, 9.0);
        assert_eq!(state.price_range.max, 105.0);
        assert_eq!(state.bids[0].quantity, 1.0);
        assert_eq!(state.sequence_id, 1);
    }

    #[test]
    fn test_depth_cap_enforced() {
        let mut book = BookReconciler::with_config(ReconcilerConfig::new(3).with_logging(false));
        book.bootstrap(&scenario_snapshot()).unwrap();

        let mut diff = BookDiff::new(1, 1);
        for i in 0..10 {
            diff = diff.bid(95.0 - i as f64, 1.0).ask(110.0 + i as f64, 1.0);
        }
        book.apply(&diff).unwrap();

        let state = book.book();
        assert_eq!(state.bids.len(), 3);
        assert_eq!(state.asks.len(), 3);
        assert_eq!(state.best_bid(), Some(100.0));
        assert_eq!(state.best_ask(), Some(101.0));
        assert!(state.satisfies_invariants());
    }

    #[test]
    fn test_gap_detection_does_not_mutate() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot().with_last_update_id(10)).unwrap();
        book.apply(&BookDiff::new(9, 11).bid(98.0, 1.0)).unwrap();

        let before = book.book().clone();
        let err = book
            .apply(&BookDiff::new(13, 14).bid(97.0, 1.0).with_timestamp(5_000))
            .unwrap_err();

        assert_eq!(
            err,
            PressureError::SequenceGap {
                expected: 12,
                received_start: 13,
                received_end: 14
            }
        );
        assert_eq!(book.book(), &before);
        assert!(book.gap().is_some());
        assert!(book.needs_resync());

        // Even a correctly chained diff is refused until re-bootstrap
        assert!(book.apply(&BookDiff::new(12, 12)).is_err());

        book.bootstrap(&scenario_snapshot().with_last_update_id(20)).unwrap();
        assert!(book.gap().is_none());
        assert!(book.apply(&BookDiff::new(21, 21).bid(98.0, 2.0)).is_ok());
    }

    #[test]
    fn test_gap_reports_duration() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot().with_last_update_id(1).with_timestamp(1_000))
            .unwrap();
        let _ = book.apply(&BookDiff::new(5, 5).with_timestamp(4_000));

        let gap = book.gap().unwrap();
        assert_eq!(gap.duration_ns, 3_000);
        assert_eq!(gap.detected_at_ns, 4_000);
    }

    #[test]
    fn test_first_diff_must_straddle_snapshot_id() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot().with_last_update_id(100)).unwrap();

        assert_eq!(book.apply(&BookDiff::new(90, 100)).unwrap(), ApplyOutcome::Stale);
        assert!(book.apply(&BookDiff::new(95, 105)).unwrap().is_applied());
        assert!(book.apply(&BookDiff::new(106, 110)).unwrap().is_applied());
        assert_eq!(book.last_sequence(), Some(110));
        assert_eq!(book.stats().stale_diffs, 1);
    }

    #[test]
    fn test_snapshot_without_id_accepts_baseline() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot()).unwrap();
        assert!(book.apply(&BookDiff::new(500, 502)).unwrap().is_applied());
        assert!(book.apply(&BookDiff::new(503, 503)).unwrap().is_applied());
        assert!(book.apply(&BookDiff::new(505, 505)).is_err());
    }

    #[test]
    fn test_apply_before_bootstrap_fails() {
        let mut book = quiet();
        assert_eq!(
            book.apply(&BookDiff::new(1, 1)).unwrap_err(),
            PressureError::NotBootstrapped
        );
    }

    #[test]
    fn test_malformed_diff_entries_are_skipped() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot()).unwrap();
        book.apply(
            &BookDiff::new(1, 1)
                .bid(f64::NAN, 1.0)
                .bid(98.0, -2.0)
                .bid(98.5, 2.0),
        )
        .unwrap();

        assert_eq!(book.stats().rejected_updates, 2);
        assert_eq!(book.book().bids.len(), 3);
    }

    #[test]
    fn test_sub_resolution_prices_rejected() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot().with_last_update_id(5)).unwrap();

        let tiny = BookSnapshot::new(&[(1.23451e-6, 5.0), (1.23454e-6, 3.0)], &[(1.3e-6, 4.0)]);
        let err = book.bootstrap(&tiny).unwrap_err();
        assert!(matches!(err, PressureError::InvalidSnapshot(ref msg) if msg.contains("resolution")));
        assert_eq!(book.book().bids.len(), 2);
        assert_eq!(book.stats().rejected_snapshots, 1);

        // In a diff the entry is skipped, the rest applies
        book.apply(&BookDiff::new(6, 6).bid(1.23451e-6, 5.0).bid(98.0, 1.0))
            .unwrap();
        assert_eq!(book.stats().rejected_updates, 1);
        assert_eq!(book.book().bids.len(), 3);
    }

    #[test]
    fn test_close_micro_prices_stay_distinct() {
        let mut book = quiet();
        let snapshot = BookSnapshot::new(&[(0.00012346, 5.0), (0.00012345, 3.0)], &[(0.00012350, 4.0)]);
        let state = book.bootstrap(&snapshot).unwrap();

        let bids: Vec<(f64, f64)> = state.bids.iter().map(|l| (l.price, l.quantity)).collect();
        assert_eq!(bids, vec![(0.00012346, 5.0), (0.00012345, 3.0)]);
        assert_eq!(state.total_bid_volume(), 8.0);
    }

    #[test]
    fn test_mark_stale_blocks_diffs() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot().with_timestamp(0)).unwrap();
        book.mark_stale(10_000_000_000);

        let err = book.apply(&BookDiff::new(1, 1)).unwrap_err();
        assert_eq!(err, PressureError::StalenessTimeout { silent_ms: 10_000 });
        assert!(err.requires_resync());
    }

    #[test]
    fn test_crossed_book_is_counted() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot()).unwrap();
        book.apply(&BookDiff::new(1, 1).bid(101.5, 1.0)).unwrap();
        assert_eq!(book.stats().crossed_books, 1);
    }

    #[test]
    fn test_reset() {
        let mut book = quiet();
        book.bootstrap(&scenario_snapshot()).unwrap();
        book.reset();
        assert!(!book.is_bootstrapped());
        assert!(book.book().is_empty());
        assert_eq!(book.stats().snapshots, 0);
    }
}
