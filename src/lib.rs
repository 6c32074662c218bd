//! # orderbook-pressure
//!
//! Order-book reconciliation and pressure-zone analysis for live depth feeds.
//!
//! The engine keeps a consistent, depth-bounded book from a bootstrap
//! snapshot plus sequenced diffs, then runs an ensemble of clustering and
//! statistical detectors over every update to produce support/resistance and
//! accumulation/distribution zones, aggregate statistics, alerts and a
//! heatmap feed for a presentation layer.
//!
//! ## Features
//!
//! - **Sequenced reconciliation**: gap detection, stale-diff dropping and
//!   depth capping over `BTreeMap`-backed price levels
//! - **Connection state machine**: exponential backoff with jitter, a
//!   staleness timer and a synthetic fallback feed, all driven by
//!   caller-supplied timestamps
//! - **Zone ensemble**: six candidate generators plus an idempotent merge pass
//! - **Statistics, alerts, overlays**: total functions that degrade to empty
//!   output on sparse input
//!
//! ## Quick Start
//!
//! ```rust
//! use orderbook_pressure::{BookDiff, BookSnapshot, PressureEngine};
//!
//! let mut engine = PressureEngine::default();
//!
//! let snapshot = BookSnapshot::new(&[(100.0, 5.0), (99.0, 3.0)], &[(101.0, 4.0), (102.0, 2.0)])
//!     .with_last_update_id(10);
//! let result = engine.on_snapshot(&snapshot).unwrap();
//! assert_eq!(engine.book().max_quantity, 5.0);
//! println!("{} zones", result.zones.len());
//!
//! // Quantity 0 removes a level
//! let diff = BookDiff::new(11, 11).bid(99.0, 0.0).with_timestamp(1_000_000);
//! engine.on_diff(&diff).unwrap();
//! assert_eq!(engine.book().bids.len(), 1);
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Core types: `BookState`, `PriceLevel`, `BookSnapshot`, `BookDiff`, `Side` |
//! | [`book`] | `BookReconciler`, `LevelSet`, `ConnectionMonitor` |
//! | [`zones`] | `ZoneDetector`, the six generators and the merge pass |
//! | [`statistics`] | `StatsAggregator`, `Statistics`, `DepthStats`, `RunningStats` |
//! | [`alerts`] | `AlertGenerator`, `Alert`, `AlertType`, `Severity` |
//! | [`overlay`] | `OverlayFeed`, `HeatmapPoint`, `GradientSegment` |
//! | [`source`] | `MarketDataSource`, `VecSource`, `SyntheticFeed` |
//! | [`engine`] | `PressureEngine`, `EngineConfig`, `AnalysisResult` |

pub mod alerts;
pub mod book;
pub mod engine;
pub mod error;
pub mod overlay;
pub mod source;
pub mod statistics;
pub mod types;
pub mod zones;

// Re-exports - Core types
pub use error::{PressureError, Result};
pub use types::{
    key_to_price, price_to_key, BookConsistency, BookDiff, BookSnapshot, BookState, LevelUpdate, PriceLevel,
    PriceRange, Side, PRICE_SCALE,
};

// Re-exports - Reconciliation
pub use book::{
    ApplyOutcome, BackoffConfig, BookReconciler, ConnectionMonitor, ConnectionState, ConnectionStatus, GapCause,
    GapInfo, LevelSet, PollEvent, ReconcilerConfig, ReconcilerStats, ReconnectDecision, DEFAULT_DEPTH_CAP,
};

// Re-exports - Zones
pub use zones::{PressureType, Zone, ZoneConfig, ZoneDetector, ZoneSource, ZoneType};

// Re-exports - Statistics
pub use statistics::{DepthStats, RunningStats, Statistics, StatsAggregator};

// Re-exports - Alerts
pub use alerts::{Alert, AlertConfig, AlertGenerator, AlertType, Severity};

// Re-exports - Overlay
pub use overlay::{GradientSegment, HeatmapPoint, OverlayConfig, OverlayFeed, RiskLevel};

// Re-exports - Source abstraction
pub use source::{FeedEvent, MarketDataSource, SourceMetadata, SyntheticConfig, SyntheticFeed, VecSource};

// Re-exports - Engine
pub use engine::{AnalysisResult, EngineConfig, EngineStats, PressureEngine};
