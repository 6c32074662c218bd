//! Order-book reconciliation module.
//!
//! This module keeps a consistent, bounded book from snapshots and diffs and
//! tracks the health of the feed that delivers them.

pub mod connection;
pub mod level_set;
pub mod reconciler;

pub use connection::{
    BackoffConfig, ConnectionMonitor, ConnectionState, ConnectionStatus, PollEvent,
    ReconnectDecision,
};
pub use level_set::LevelSet;
pub use reconciler::{
    ApplyOutcome, BookReconciler, GapCause, GapInfo, ReconcilerConfig, ReconcilerStats,
    DEFAULT_DEPTH_CAP,
};
