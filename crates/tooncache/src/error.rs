//! Error types for tooncache

use std::collections::TryReserveError;

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Failures surfaced by cache operations
///
/// Misses, erasing an absent key and running over capacity while entries are
/// pinned are all normal outcomes, not errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Growing the index or the slot arena for a new entry failed
    #[error("allocation failed while inserting entry: {0}")]
    AllocationFailed(#[from] TryReserveError),

    /// The entry's charge would push total usage past `usize::MAX`
    #[error("charge {charge} overflows cache usage {usage}")]
    ChargeOverflow {
        /// Charge of the rejected entry
        charge: usize,
        /// Usage at the time of the insert
        usage: usize,
    },
}

/// Invalid cache or filter configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Capacity of zero would evict every entry as soon as it is released
    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,

    /// Bits per key outside the supported range
    #[error("bits per key must be between 1 and {max}, got {got}")]
    BitsPerKey {
        /// Requested value
        got: usize,
        /// Largest accepted value
        max: usize,
    },
}
