//! Error types for tracker matching and allocation.

use thiserror::Error;

/// Primary error type for the allocation engine.
#[derive(Debug, Error)]
pub enum AllocError {
    /// A tracker pattern failed to compile as a regex.
    #[error("invalid pattern for tracker {tracker_id}: {source}")]
    InvalidPattern {
        /// Tracker the offending pattern belongs to.
        tracker_id: String,
        /// Underlying regex compiler error.
        #[source]
        source: regex::Error,
    },
    /// The tracker list has no catch-all entry, or it is not last.
    #[error("tracker configuration has no trailing catch-all pattern")]
    MissingCatchAll,
}

/// Convenience alias for allocation-engine results.
pub type AllocResult<T> = Result<T, AllocError>;
