//! Error types for shard term handles.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by [`ShardTerms`](super::ShardTerms) itself, as opposed to
/// failures reported by the coordination store.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ShardTermsError {
    /// The handle was closed.
    #[error("Shard terms for {collection}/{shard} are closed")]
    Closed {
        /// Collection of the closed handle
        collection: String,
        /// Shard of the closed handle
        shard: String,
    },

    /// A replica identifier was rejected.
    #[error("Invalid replica name {name:?}: {reason}")]
    InvalidReplicaName {
        /// The offending identifier
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A collection or shard name was rejected.
    #[error("Invalid shard {collection:?}/{shard:?}: {reason}")]
    InvalidShardPath {
        /// The collection name given
        collection: String,
        /// The shard name given
        shard: String,
        /// Why it was rejected
        reason: String,
    },

    /// A mutation kept conflicting for longer than the retry budget.
    #[error("{operation} on {collection}/{shard} gave up after {elapsed:?}")]
    RetryTimeout {
        /// Collection being updated
        collection: String,
        /// Shard being updated
        shard: String,
        /// The operation that was retried
        operation: &'static str,
        /// Time spent retrying
        elapsed: Duration,
    },

    /// A stored record could not be decoded.
    #[error("Corrupt term record at {path}: {reason}")]
    CorruptRecord {
        /// Path of the record
        path: String,
        /// Decoder message
        reason: String,
    },

    /// Raising a term would overflow, which no valid record can require.
    #[error("Term of replica {replica:?} cannot be raised any further")]
    TermOverflow {
        /// The replica being raised
        replica: String,
    },
}

impl ShardTermsError {
    /// Check if this error indicates the handle was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, ShardTermsError::Closed { .. })
    }

    /// Check if this error was caused by a bad argument at the call site.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ShardTermsError::InvalidReplicaName { .. } | ShardTermsError::InvalidShardPath { .. }
        )
    }

    /// Check if this error indicates the retry budget ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShardTermsError::RetryTimeout { .. })
    }

    /// Check if this error indicates undecodable or unusable stored data.
    pub fn is_corrupt_record(&self) -> bool {
        matches!(
            self,
            ShardTermsError::CorruptRecord { .. } | ShardTermsError::TermOverflow { .. }
        )
    }
}

impl From<ShardTermsError> for crate::Error {
    fn from(err: ShardTermsError) -> Self {
        crate::Error::Shard(err)
    }
}
