#![forbid(unsafe_code)]
//! Error types for the reefstore cleaner.
//!
//! Defines `CleanerError` and a `Result<T>` alias used throughout the
//! workspace. Invariant violations (state-machine precondition failures,
//! counter underflow, `written_to` regression) are deliberately *not*
//! represented here: they cannot arise from valid input and are asserted
//! fatally at the violation site.

use thiserror::Error;

/// Unified error type for all cleaner operations.
#[derive(Debug, Error)]
pub enum CleanerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The segment has never been written (no header on disk).
    #[error("segment not found: {0}")]
    NotFound(String),

    /// The segment header exists but the requested region was never written.
    #[error("no data: {0}")]
    NoData(String),

    #[error("corrupt segment metadata on {segment}: {detail}")]
    Corruption { segment: String, detail: String },

    /// A collaborator transaction hit a retryable conflict. Callers other
    /// than `repeat_on_conflict` must not observe this variant.
    #[error("transient transaction conflict in {0}")]
    TransientConflict(&'static str),

    #[error("invalid config: {field} ({reason})")]
    InvalidConfig {
        field: &'static str,
        reason: &'static str,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// The cleaner is shutting down; backpressure waiters are released
    /// with this error.
    #[error("cleaner shutting down")]
    ShuttingDown,
}

impl CleanerError {
    /// Whether a `repeat_on_conflict` wrapper should replay the body.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConflict(_))
    }
}

/// Result alias using `CleanerError`.
pub type Result<T> = std::result::Result<T, CleanerError>;
