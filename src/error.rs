//! Error types for the order-book pressure engine.
//!
//! Clean error handling using `thiserror` for ergonomic error definitions.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, PressureError>;

/// Main error type for reconciliation and feed handling.
///
/// Only the book/feed layer can fail. Zone detection, statistics, alerts and
/// overlays are total functions and never produce an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PressureError {
    /// Snapshot contained a non-finite or negative price/quantity.
    /// Fatal to that bootstrap attempt; the caller must retry.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Diff does not chain from the last applied sequence.
    /// Non-fatal; the caller must re-bootstrap.
    #[error("Sequence gap: expected update {expected}, received {received_start}..={received_end}")]
    SequenceGap {
        expected: u64,
        received_start: u64,
        received_end: u64,
    },

    /// No update arrived within the staleness threshold.
    #[error("Feed stale: no update for {silent_ms} ms")]
    StalenessTimeout { silent_ms: u64 },

    /// Opaque failure surfaced by the transport collaborator.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A diff arrived before any snapshot was applied.
    #[error("Book not bootstrapped: a snapshot must be applied before diffs")]
    NotBootstrapped,

    /// Configuration could not be loaded or is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Generic(String),
}

impl PressureError {
    /// Create a generic error from any string-like type.
    pub fn generic(msg: impl Into<String>) -> Self {
        PressureError::Generic(msg.into())
    }

    /// Whether the caller should fetch a fresh snapshot before continuing.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            PressureError::SequenceGap { .. }
                | PressureError::StalenessTimeout { .. }
                | PressureError::NotBootstrapped
        )
    }
}

impl From<std::io::Error> for PressureError {
    fn from(err: std::io::Error) -> Self {
        PressureError::Generic(format!("IO error: {err}"))
    }
}

impl From<serde_json::Error> for PressureError {
    fn from(err: serde_json::Error) -> Self {
        PressureError::InvalidConfig(err.to_string())
    }
}

impl From<String> for PressureError {
    fn from(err: String) -> Self {
        PressureError::Generic(err)
    }
}

impl From<&str> for PressureError {
    fn from(err: &str) -> Self {
        PressureError::Generic(err.to_string())
    }
}
