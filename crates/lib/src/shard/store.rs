//! Cached view of one shard term record and the compare-and-swap primitive.
//!
//! [`TermStore`] is the only place that writes the record. It remembers the
//! last `(terms, version)` pair it saw and refuses to move that cache
//! backwards: a refresh or write that lands with an older version than the
//! cache is ignored. Each change to the cached mapping bumps a local
//! generation counter that listener delivery uses for ordering.
//!
//! Versions alone cannot order results around a deletion, since the cache
//! forgets the version when the record disappears. Every store operation
//! therefore takes a ticket when it starts; once a read has observed the
//! record missing, results of operations that started before that read are
//! discarded.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace};

use crate::Result;
use crate::coordination::{CoordinationClient, Version};
use crate::terms::{Terms, codec};

/// A point-in-time copy of the cache.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) terms: Terms,
    /// Store version the terms were read or written at; `None` when the
    /// record is not known to exist
    pub(crate) version: Option<Version>,
    /// Bumped whenever `terms` changes
    pub(crate) generation: u64,
}

/// Result of a compare-and-swap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CasOutcome {
    /// The write was accepted at this version.
    Applied(Version),
    /// The base state was stale; the cache now holds fresher state.
    Conflict,
}

#[derive(Debug, Default)]
struct Cache {
    snapshot: Snapshot,
    /// Next operation ticket to hand out
    next_ticket: u64,
    /// Ticket of the operation whose result the snapshot holds
    installed: u64,
    /// Ticket of the read that last found the record missing
    reset: u64,
}

impl Cache {
    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

#[derive(Debug)]
pub(crate) struct TermStore {
    client: Arc<dyn CoordinationClient>,
    path: String,
    cache: Mutex<Cache>,
}

impl TermStore {
    pub(crate) fn new(client: Arc<dyn CoordinationClient>, path: String) -> Self {
        Self {
            client,
            path,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub(crate) fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Returns the cached state without touching the store.
    pub(crate) fn read(&self) -> Snapshot {
        self.cache.lock().unwrap().snapshot.clone()
    }

    fn ticket(&self) -> u64 {
        self.cache.lock().unwrap().ticket()
    }

    /// Installs `terms` read or written at `version` by the operation holding
    /// `ticket`, unless the cache already holds that version or a later one,
    /// or the operation started before the record was last seen missing.
    ///
    /// # Returns
    /// Whether the cached mapping changed.
    fn install(&self, ticket: u64, terms: Terms, version: Version) -> bool {
        let mut cache = self.cache.lock().unwrap();
        if ticket < cache.reset {
            trace!(path = %self.path, %version, "ignoring terms from before a deletion");
            return false;
        }
        if cache.snapshot.version.is_some_and(|cached| cached >= version) {
            trace!(path = %self.path, %version, "ignoring stale terms");
            return false;
        }
        let snapshot = &mut cache.snapshot;
        let changed = snapshot.terms != terms;
        snapshot.terms = terms;
        snapshot.version = Some(version);
        if changed {
            snapshot.generation += 1;
        }
        cache.installed = ticket;
        changed
    }

    /// Resets the cache after the read holding `ticket` found no record.
    ///
    /// Skipped when the cache holds the result of a later operation.
    fn reset(&self, ticket: u64) -> bool {
        let mut cache = self.cache.lock().unwrap();
        if cache.installed > ticket {
            return false;
        }
        cache.reset = cache.reset.max(ticket);
        if cache.snapshot.version.is_none() {
            return false;
        }
        debug!(path = %self.path, "term record is gone; resetting cache");
        let snapshot = &mut cache.snapshot;
        let changed = !snapshot.terms.is_empty();
        snapshot.terms = Terms::new();
        snapshot.version = None;
        if changed {
            snapshot.generation += 1;
        }
        cache.installed = ticket;
        changed
    }

    /// Re-reads the record from the store, replacing the cache.
    ///
    /// A missing record resets the cache to an empty mapping with no
    /// version, unless the cache took in a newer result meanwhile.
    ///
    /// # Returns
    /// Whether the cached mapping changed.
    pub(crate) async fn refresh(&self) -> Result<bool> {
        let ticket = self.ticket();
        match self.client.read(&self.path).await {
            Ok((bytes, version)) => {
                let terms = codec::decode(&self.path, &bytes)?;
                Ok(self.install(ticket, terms, version))
            }
            Err(e) if e.is_not_found() => Ok(self.reset(ticket)),
            Err(e) => Err(e),
        }
    }

    /// Attempts to replace the record with `new_terms`, guarded by the
    /// version of `base`, the snapshot `new_terms` was computed from.
    ///
    /// When `base` has no version the record is created instead. Version
    /// conflicts, lost creates, and a record deleted underneath the write all
    /// refresh the cache and report [`CasOutcome::Conflict`]; the caller
    /// recomputes against the fresh state. Connectivity failures propagate
    /// without touching the cache.
    pub(crate) async fn compare_and_swap(
        &self,
        base: &Snapshot,
        new_terms: &Terms,
    ) -> Result<CasOutcome> {
        let bytes = codec::encode(new_terms)?;
        let ticket = self.ticket();
        let result = match base.version {
            Some(expected) => self.client.write(&self.path, bytes, expected).await,
            None => self.client.create(&self.path, bytes).await,
        };

        match result {
            Ok(version) => {
                self.install(ticket, new_terms.clone(), version);
                // A deletion observed while the write was in flight discards
                // its result; read back what the store holds now.
                if self.read().version.is_none_or(|cached| cached < version) {
                    self.refresh().await?;
                }
                Ok(CasOutcome::Applied(version))
            }
            Err(e) if e.is_version_conflict() || e.is_already_exists() => {
                trace!(path = %self.path, error = %e, "compare-and-swap lost a race");
                self.refresh().await?;
                Ok(CasOutcome::Conflict)
            }
            Err(e) if e.is_not_found() => {
                info!(path = %self.path, "term record was deleted; it will be recreated");
                self.refresh().await?;
                Ok(CasOutcome::Conflict)
            }
            Err(e) => Err(e),
        }
    }
}
