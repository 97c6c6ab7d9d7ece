//! Error types surfaced by the store.
//!
//! Lock contention is retried internally and only becomes an error when the
//! store was built with [`with_lock_timeout`] and the deadline expires.
//! Every error leaves the store unchanged: mutations happen under the row
//! writer lock and are published by a single slot write.
//!
//! [`with_lock_timeout`]: crate::WideStore::with_lock_timeout

use std::time::Duration;
use thiserror::Error;

/// Failure to derive a canonical byte encoding for a value.
///
/// Produced by [`Intern::canonical_bytes`](crate::Intern::canonical_bytes)
/// implementations for payloads that have no deterministic byte form (for
/// example a float carrying a NaN with unspecified payload bits).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value has no deterministic byte encoding: {reason}")]
pub struct EncodingError {
    reason: String,
}

impl EncodingError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Every candidate row is full and the bit width is already at its
    /// maximum, so there is nowhere left to put the value.
    #[error("store is out of capacity: all candidate rows are full at maximum bit width")]
    OutOfCapacity,

    /// A lock could not be acquired before the configured deadline.
    /// The operation had no effect.
    #[error("lock acquisition timed out after {0:?}")]
    LockTimeout(Duration),

    /// The value could not be encoded for hashing.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}
