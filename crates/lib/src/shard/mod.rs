//! Shard term handles.
//!
//! A [`ShardTerms`] handle tracks the term record of one (collection, shard)
//! pair for the lifetime of the handle. It owns:
//!
//! * a cached copy of the record and the compare-and-swap primitive
//!   (`store`),
//! * the retry loops behind every mutation (`update`),
//! * a background task that follows the store's watch (`watcher`),
//! * the registry of change listeners (`listeners`).
//!
//! Several handles may exist for the same shard, in one process or many.
//! Each keeps its own cache, watch, and listeners; they agree through the
//! store's version checks alone.
//!
//! Handles must be opened inside a tokio runtime.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span};

use crate::Result;
use crate::config::ShardTermsConfig;
use crate::coordination::{CoordinationClient, Version, Watcher, terms_path};
use crate::terms::{Terms, invalid_identifier};

pub mod errors;
mod listeners;
mod store;
mod update;
mod watcher;

pub use errors::ShardTermsError;
pub use listeners::ListenerId;

use listeners::ListenerRegistry;
use store::TermStore;

/// State shared between a handle and its watch task.
pub(crate) struct Inner {
    collection: String,
    shard: String,
    config: ShardTermsConfig,
    store: TermStore,
    listeners: ListenerRegistry,
    closed: AtomicBool,
}

impl Inner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ShardTermsError::Closed {
                collection: self.collection.clone(),
                shard: self.shard.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Hands the current cached mapping to listeners if they have not seen it.
    pub(crate) fn publish(&self) {
        if self.is_closed() {
            return;
        }
        let snapshot = self.store.read();
        self.listeners.deliver(snapshot.generation, &snapshot.terms);
    }
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("collection", &self.collection)
            .field("shard", &self.shard)
            .field("path", &self.store.path())
            .field("listeners", &self.listeners)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn check_replica(replica: &str) -> Result<()> {
    match invalid_identifier(replica) {
        Some(reason) => Err(ShardTermsError::InvalidReplicaName {
            name: replica.to_string(),
            reason: reason.to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Handle on the term record of one shard.
///
/// Mutations are async and retry internally on version conflicts; they
/// either succeed (possibly without writing, when the change is already in
/// place) or fail with a connectivity, timeout, or misuse error. Reads are
/// served from the cache and never touch the store.
///
/// Closing the handle, explicitly or by dropping it, stops the watch and
/// drops all listeners. Mutations on a closed handle fail with
/// [`ShardTermsError::Closed`].
pub struct ShardTerms {
    inner: Arc<Inner>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ShardTerms {
    /// Opens a handle with the default configuration.
    pub async fn open(
        collection: impl Into<String>,
        shard: impl Into<String>,
        client: Arc<dyn CoordinationClient>,
    ) -> Result<Self> {
        Self::open_with_config(collection, shard, client, ShardTermsConfig::default()).await
    }

    /// Opens a handle: arms the watch, loads the current record (if any), and
    /// starts following changes.
    pub async fn open_with_config(
        collection: impl Into<String>,
        shard: impl Into<String>,
        client: Arc<dyn CoordinationClient>,
        config: ShardTermsConfig,
    ) -> Result<Self> {
        let collection = collection.into();
        let shard = shard.into();
        if let Some(reason) = invalid_identifier(&collection).or_else(|| invalid_identifier(&shard))
        {
            return Err(ShardTermsError::InvalidShardPath {
                collection,
                shard,
                reason: reason.to_string(),
            }
            .into());
        }

        let path = terms_path(&collection, &shard);
        let inner = Arc::new(Inner {
            store: TermStore::new(client, path),
            listeners: ListenerRegistry::new(),
            closed: AtomicBool::new(false),
            collection,
            shard,
            config,
        });

        // Arm before the first read so no change can slip in between.
        let (sender, events) = mpsc::unbounded_channel();
        inner
            .store
            .client()
            .watch(inner.store.path(), Watcher::channel(sender.clone()))
            .await?;
        inner.store.refresh().await?;
        inner.publish();

        let span = info_span!(
            "shard_terms_watch",
            collection = %inner.collection,
            shard = %inner.shard
        );
        let task = tokio::spawn(watcher::run(Arc::clone(&inner), sender, events).instrument(span));

        info!(
            collection = %inner.collection,
            shard = %inner.shard,
            replicas = inner.store.read().terms.len(),
            "opened shard terms"
        );
        Ok(Self {
            inner,
            watch_task: Mutex::new(Some(task)),
        })
    }

    /// The collection this handle tracks.
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// The shard this handle tracks.
    pub fn shard(&self) -> &str {
        &self.inner.shard
    }

    /// Store path of the term record.
    pub fn path(&self) -> &str {
        self.inner.store.path()
    }

    /// The configuration this handle was opened with.
    pub fn config(&self) -> &ShardTermsConfig {
        &self.inner.config
    }

    /// Registers `replica` with term 0 if it is not registered yet.
    ///
    /// An existing term is never overwritten, so calling this again is a
    /// no-op. Creates the record if it does not exist.
    pub async fn register_term(&self, replica: &str) -> Result<()> {
        check_replica(replica)?;
        self.inner
            .update("register_term", |terms| Ok(terms.register(replica)))
            .await
    }

    /// Raises `replica` strictly above every registered replica that is not
    /// in `excluded`.
    ///
    /// Used by a newly promoted leader: replicas in `excluded` are treated as
    /// stale and ignored when computing the new floor, and their terms are
    /// left untouched. Does not write when the replica already outranks
    /// every trusted replica. Fails without writing if the new term would
    /// overflow.
    pub async fn ensure_terms_is_higher<I, S>(&self, replica: &str, excluded: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        check_replica(replica)?;
        let excluded: HashSet<String> = excluded
            .into_iter()
            .map(|r| r.as_ref().to_string())
            .collect();
        self.inner
            .update("ensure_terms_is_higher", |terms| {
                terms.increase_term(replica, &excluded)
            })
            .await
    }

    /// Raises `replica` to the highest term currently held by any replica.
    ///
    /// Used by a replica that caught up with its leader. Never lowers a term.
    pub async fn set_equals_to_max(&self, replica: &str) -> Result<()> {
        check_replica(replica)?;
        self.inner
            .update("set_equals_to_max", |terms| {
                Ok(terms.set_equals_to_max(replica))
            })
            .await
    }

    /// Removes `replica` from the record, e.g. once it is decommissioned.
    pub async fn remove_term(&self, replica: &str) -> Result<()> {
        check_replica(replica)?;
        self.inner
            .update("remove_term", |terms| Ok(terms.remove(replica)))
            .await
    }

    /// Re-reads the record from the store now instead of waiting for the watch.
    pub async fn refresh_terms(&self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.inner.store.refresh().await? {
            self.inner.publish();
        }
        Ok(())
    }

    /// Snapshot of the cached mapping.
    pub fn get_terms(&self) -> Terms {
        self.inner.store.read().terms
    }

    /// Cached term of `replica`.
    pub fn get_term(&self, replica: &str) -> Option<u64> {
        self.inner.store.read().terms.get(replica)
    }

    /// Highest cached term.
    pub fn highest_term(&self) -> Option<u64> {
        self.inner.store.read().terms.max_term()
    }

    /// Store version of the cached mapping, if the record is known to exist.
    pub fn version(&self) -> Option<Version> {
        self.inner.store.read().version
    }

    /// See [`Terms::can_become_leader`].
    pub fn can_become_leader(&self, replica: &str) -> bool {
        self.inner.store.read().terms.can_become_leader(replica)
    }

    /// See [`Terms::skip_sending_updates_to`].
    pub fn skip_sending_updates_to(&self, replica: &str) -> bool {
        self.inner.store.read().terms.skip_sending_updates_to(replica)
    }

    /// Registers a callback invoked with the new mapping whenever the cached
    /// mapping changes, through a local write or a remote one.
    ///
    /// Returning `false` from the callback unregisters it after that call.
    /// Callbacks run on the task that observed the change, one at a time, in
    /// registration order. A callback that panics is unregistered.
    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: FnMut(&Terms) -> bool + Send + 'static,
    {
        self.inner.ensure_open()?;
        Ok(self.inner.listeners.add(listener))
    }

    /// Unregisters a listener. Returns whether it was still registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Number of registered listeners.
    pub fn num_listeners(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stops following the record and drops every listener.
    ///
    /// In-flight mutations stop at their next retry. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.watch_task.lock().unwrap().take() {
            task.abort();
        }
        self.inner.listeners.clear();
        debug!(
            collection = %self.inner.collection,
            shard = %self.inner.shard,
            "closed shard terms"
        );
    }
}

impl Drop for ShardTerms {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ShardTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardTerms")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
