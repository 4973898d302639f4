//! Coordination store abstraction.
//!
//! This module provides the [`CoordinationClient`] trait and its implementations.
//! A coordination store holds small records at string paths, assigns every
//! record a [`Version`] on each successful write, and accepts a write only if
//! the writer names the version it read. It also offers one-shot watches that
//! fire on the next change to a path.
//!
//! Shard term handling (`crate::shard`) is written purely against this trait,
//! so any strongly consistent store offering these semantics can back it.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;

pub mod errors;
pub mod in_memory;
#[cfg(feature = "sqlite")]
pub mod sql;

pub use errors::CoordinationError;
pub use in_memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sql::{SqliteStore, SqliteStoreOptions};

/// Root under which per-collection records live.
pub const COLLECTIONS_ROOT: &str = "/collections";

/// Builds the path of the shard term record for a collection and shard.
pub fn terms_path(collection: &str, shard: &str) -> String {
    format!("{COLLECTIONS_ROOT}/{collection}/terms/{shard}")
}

/// Opaque store-assigned version of a record.
///
/// Versions are assigned by the store and only compared for equality by
/// writers. Both bundled stores draw them from a store-wide counter, so a
/// later write always carries a larger version, even across a delete and
/// recreate of the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Wraps a raw store version.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A record was created at the path.
    Created,
    /// The record's contents were replaced.
    DataChanged,
    /// The record was deleted.
    Deleted,
}

/// Notification delivered to a [`Watcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The watched path
    pub path: String,
    /// The kind of change observed
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub(crate) fn new(path: impl Into<String>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

enum WatcherKind {
    Callback(Box<dyn FnOnce(WatchEvent) + Send>),
    Channel(mpsc::UnboundedSender<WatchEvent>),
}

/// One-shot subscription to the next change on a path.
///
/// A watcher fires at most once. Re-arming is the caller's responsibility:
/// register a fresh watcher after each notification.
pub struct Watcher {
    kind: WatcherKind,
}

impl Watcher {
    /// Creates a watcher that invokes `callback` on the next change.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(WatchEvent) + Send + 'static,
    {
        Self {
            kind: WatcherKind::Callback(Box::new(callback)),
        }
    }

    /// Creates a watcher that forwards the next change into a channel.
    ///
    /// Channel watchers report themselves inactive once the receiver is
    /// dropped, which lets stores discard them without waiting for a change.
    pub fn channel(sender: mpsc::UnboundedSender<WatchEvent>) -> Self {
        Self {
            kind: WatcherKind::Channel(sender),
        }
    }

    /// Whether anyone is still listening for this notification.
    pub fn is_active(&self) -> bool {
        match &self.kind {
            WatcherKind::Callback(_) => true,
            WatcherKind::Channel(sender) => !sender.is_closed(),
        }
    }

    /// Delivers the notification, consuming the watcher.
    pub fn fire(self, event: WatchEvent) {
        match self.kind {
            WatcherKind::Callback(callback) => callback(event),
            WatcherKind::Channel(sender) => {
                // Receiver gone means the subscriber was closed; nothing to do.
                let _ = sender.send(event);
            }
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            WatcherKind::Callback(_) => "callback",
            WatcherKind::Channel(_) => "channel",
        };
        f.debug_struct("Watcher")
            .field("kind", &kind)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Client for a strongly consistent store with versioned writes.
///
/// All implementations must be `Send` and `Sync` so a single client can be
/// shared by every shard handle in a process.
///
/// ## Error contract
///
/// - `read` fails with [`CoordinationError::NotFound`] when no record exists.
/// - `create` fails with [`CoordinationError::AlreadyExists`] when one does.
/// - `write` fails with [`CoordinationError::VersionConflict`] when
///   `expected` is stale and with [`CoordinationError::NotFound`] when the
///   record was deleted underneath the writer.
/// - Any operation may fail with [`CoordinationError::ConnectionLoss`].
#[async_trait]
pub trait CoordinationClient: Send + Sync + fmt::Debug {
    /// Reads a record and the version it was read at.
    async fn read(&self, path: &str) -> Result<(Vec<u8>, Version)>;

    /// Creates a record that must not already exist.
    async fn create(&self, path: &str, data: Vec<u8>) -> Result<Version>;

    /// Replaces a record if its current version is `expected`.
    ///
    /// # Returns
    /// The version assigned to the new contents.
    async fn write(&self, path: &str, data: Vec<u8>, expected: Version) -> Result<Version>;

    /// Deletes a record. Deleting a missing record fails with `NotFound`.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Arms a one-shot watcher on `path`.
    ///
    /// The path need not exist yet; creation counts as a change. The watcher
    /// fires at most once, on the first change after this call returns.
    async fn watch(&self, path: &str, watcher: Watcher) -> Result<()>;
}
