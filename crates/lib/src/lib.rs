//!
//! Shard terms: per-replica freshness counters for a replicated shard.
//!
//! Every replica of a shard owns a non-negative integer *term*. The terms of
//! all replicas live in one record in a strongly consistent coordination
//! store, and a replica may lead only if its term is at least as high as every
//! other live replica's. This crate keeps that record correct while several
//! processes race to update it.
//!
//! ## Core Concepts
//!
//! * **Coordination stores (`coordination::CoordinationClient`)**: a pluggable
//!   store with versioned, compare-and-swap writes and one-shot watches.
//!   [`coordination::InMemoryStore`] and (feature `sqlite`)
//!   [`coordination::SqliteStore`] are provided.
//! * **Terms (`terms::Terms`)**: the replica to term mapping, with the pure
//!   helpers that compute each mutation.
//! * **Shard handles (`shard::ShardTerms`)**: one per (collection, shard) per
//!   process. A handle caches the record, applies mutations through a
//!   conflict-retry loop, follows remote changes through a watch, and fans
//!   changes out to listeners.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shard_terms::{ShardTerms, coordination::InMemoryStore};
//!
//! # async fn run() -> shard_terms::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let terms = ShardTerms::open("collection1", "shard1", store).await?;
//! terms.register_term("core_node1").await?;
//! terms.register_term("core_node2").await?;
//! terms.ensure_terms_is_higher("core_node1", ["core_node2"]).await?;
//! assert!(terms.can_become_leader("core_node1"));
//! terms.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordination;
pub mod shard;
pub mod terms;

pub use config::ShardTermsConfig;
pub use shard::{ListenerId, ShardTerms};
pub use terms::Terms;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured coordination store errors from the coordination module
    #[error(transparent)]
    Coordination(coordination::CoordinationError),

    /// Structured shard handle errors from the shard module
    #[error(transparent)]
    Shard(shard::ShardTermsError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Coordination(_) => "coordination",
            Error::Shard(_) => "shard",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a record was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Coordination(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates a create lost to an existing record.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Coordination(err) => err.is_already_exists(),
            _ => false,
        }
    }

    /// Check if this error indicates a version-guarded write was rejected.
    pub fn is_version_conflict(&self) -> bool {
        match self {
            Error::Coordination(err) => err.is_version_conflict(),
            _ => false,
        }
    }

    /// Check if this error is a connectivity fault with the store.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Coordination(err) => err.is_connection_error(),
            _ => false,
        }
    }

    /// Check if this error indicates the handle was closed.
    pub fn is_closed(&self) -> bool {
        match self {
            Error::Shard(err) => err.is_closed(),
            _ => false,
        }
    }

    /// Check if this error was caused by a bad argument.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Error::Shard(err) => err.is_invalid_input(),
            _ => false,
        }
    }

    /// Check if this error indicates a retry budget ran out.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Shard(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error indicates stored data could not be decoded.
    pub fn is_corrupt_record(&self) -> bool {
        match self {
            Error::Shard(err) => err.is_corrupt_record(),
            _ => false,
        }
    }
}
