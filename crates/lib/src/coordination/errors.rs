//! Error types for the coordination store.
//!
//! These mirror the failure modes of a strongly consistent store with
//! versioned writes: missing records, lost races on create or on a
//! version-guarded write, and loss of the connection itself.

use thiserror::Error;

use super::Version;

/// Errors that can occur while talking to a coordination store.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// No record exists at the path.
    #[error("No record at {path}")]
    NotFound {
        /// The path that was looked up
        path: String,
    },

    /// A create raced with another writer and lost.
    #[error("Record already exists at {path}")]
    AlreadyExists {
        /// The path that already holds a record
        path: String,
    },

    /// A version-guarded write was rejected because the record moved on.
    #[error("Version conflict at {path}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The path that was written
        path: String,
        /// The version the writer based its change on
        expected: Version,
        /// The version the store currently holds
        actual: Version,
    },

    /// The connection or session to the store is gone.
    #[error("Connection to coordination store lost: {reason}")]
    ConnectionLoss {
        /// Description of the failure
        reason: String,
    },

    /// The SQL backing store failed.
    #[cfg(feature = "sqlite")]
    #[error("SQL store error: {reason}")]
    Sql {
        /// Context for the failing statement
        reason: String,
        /// The underlying sqlx error, if any
        #[source]
        source: Option<sqlx::Error>,
    },
}

impl CoordinationError {
    /// Check if this error indicates the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoordinationError::NotFound { .. })
    }

    /// Check if this error indicates a create lost to an existing record.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, CoordinationError::AlreadyExists { .. })
    }

    /// Check if this error indicates a version-guarded write was rejected.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, CoordinationError::VersionConflict { .. })
    }

    /// Check if this error is a connectivity fault rather than a logical outcome.
    pub fn is_connection_error(&self) -> bool {
        match self {
            CoordinationError::ConnectionLoss { .. } => true,
            #[cfg(feature = "sqlite")]
            CoordinationError::Sql { .. } => true,
            _ => false,
        }
    }

    /// Get the path this error is about, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            CoordinationError::NotFound { path }
            | CoordinationError::AlreadyExists { path }
            | CoordinationError::VersionConflict { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl From<CoordinationError> for crate::Error {
    fn from(err: CoordinationError) -> Self {
        crate::Error::Coordination(err)
    }
}
