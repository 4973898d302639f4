//! Registry of term-change listeners for one shard handle.
//!
//! Listeners are plain callbacks returning `true` to stay registered and
//! `false` to be dropped after the current invocation. Delivery is serialized
//! per registry and tagged with the cache generation being delivered, so a
//! listener never observes an older mapping after a newer one.
//!
//! The entry list lock is only held for bookkeeping, never while a callback
//! runs, so a callback may add or remove listeners on the same registry.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{trace, warn};

use crate::terms::Terms;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Callback = Box<dyn FnMut(&Terms) -> bool + Send>;

struct Entry {
    id: ListenerId,
    callback: Arc<Mutex<Callback>>,
}

pub(crate) struct ListenerRegistry {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
    /// Generation of the last delivered mapping; held for the whole delivery
    delivered: Mutex<u64>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            delivered: Mutex::new(0),
        }
    }

    pub(crate) fn add<F>(&self, callback: F) -> ListenerId
    where
        F: FnMut(&Terms) -> bool + Send + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().unwrap().push(Entry {
            id,
            callback: Arc::new(Mutex::new(Box::new(callback))),
        });
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Delivers `terms` to every listener, in registration order.
    ///
    /// Skipped if a mapping of the same or a later generation was already
    /// delivered. Listeners registered while delivery is in progress are not
    /// invoked for this mapping.
    pub(crate) fn deliver(&self, generation: u64, terms: &Terms) {
        let mut delivered = self.delivered.lock().unwrap();
        if generation <= *delivered {
            return;
        }
        *delivered = generation;

        let snapshot: Vec<(ListenerId, Arc<Mutex<Callback>>)> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|entry| (entry.id, Arc::clone(&entry.callback)))
            .collect();
        trace!(generation, listeners = snapshot.len(), "delivering terms");

        for (id, callback) in snapshot {
            let keep = {
                let mut callback = callback.lock().unwrap();
                catch_unwind(AssertUnwindSafe(|| (*callback)(terms)))
            };
            match keep {
                Ok(true) => {}
                Ok(false) => {
                    trace!(%id, "listener asked to be removed");
                    self.remove(id);
                }
                Err(_) => {
                    warn!(%id, "listener panicked; removing it");
                    self.remove(id);
                }
            }
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
