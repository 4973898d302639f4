//! In-memory coordination store.
//!
//! This module provides an in-process implementation of [`CoordinationClient`]
//! suitable for testing, development, and for sharing one linearizable record
//! set between several handles inside a single process. Every operation takes
//! a single lock, so writes are trivially linearizable.
//!
//! Watch notifications are delivered after the lock is released, on the
//! calling task, so a watcher callback may itself call back into the store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::errors::CoordinationError;
use super::{CoordinationClient, Version, WatchEvent, WatchEventKind, Watcher};
use crate::Result;

#[derive(Debug)]
struct Record {
    data: Vec<u8>,
    version: Version,
}

#[derive(Debug)]
struct State {
    records: HashMap<String, Record>,
    /// Armed one-shot watchers by path
    watchers: HashMap<String, Vec<Watcher>>,
    /// Store-wide revision counter; every mutation takes the next value
    revision: u64,
    connected: bool,
}

impl State {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(CoordinationError::ConnectionLoss {
                reason: "in-memory store is disconnected".to_string(),
            }
            .into())
        }
    }

    fn next_version(&mut self) -> Version {
        self.revision += 1;
        Version::new(self.revision)
    }

    fn take_watchers(&mut self, path: &str) -> Vec<Watcher> {
        self.watchers.remove(path).unwrap_or_default()
    }
}

/// A linearizable in-memory record store with one-shot watches.
///
/// Besides the [`CoordinationClient`] operations it supports fault
/// injection: [`disconnect`](Self::disconnect) makes every operation fail
/// with [`CoordinationError::ConnectionLoss`] until
/// [`reconnect`](Self::reconnect) is called.
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new, empty, connected store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                records: HashMap::new(),
                watchers: HashMap::new(),
                revision: 0,
                connected: true,
            }),
        }
    }

    /// Simulates loss of the connection to the store.
    pub fn disconnect(&self) {
        debug!("in-memory store disconnected");
        self.state.lock().unwrap().connected = false;
    }

    /// Restores the connection after [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        debug!("in-memory store reconnected");
        self.state.lock().unwrap().connected = true;
    }

    /// Whether operations currently succeed.
    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of watchers armed on `path` whose subscriber is still alive.
    pub fn active_watchers(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .watchers
            .get(path)
            .map(|watchers| watchers.iter().filter(|w| w.is_active()).count())
            .unwrap_or(0)
    }

    fn fire(watchers: Vec<Watcher>, path: &str, kind: WatchEventKind) {
        if !watchers.is_empty() {
            trace!(path, ?kind, count = watchers.len(), "firing watchers");
        }
        for watcher in watchers {
            watcher.fire(WatchEvent::new(path, kind));
        }
    }
}

#[async_trait]
impl CoordinationClient for InMemoryStore {
    async fn read(&self, path: &str) -> Result<(Vec<u8>, Version)> {
        let state = self.state.lock().unwrap();
        state.ensure_connected()?;
        match state.records.get(path) {
            Some(record) => Ok((record.data.clone(), record.version)),
            None => Err(CoordinationError::NotFound {
                path: path.to_string(),
            }
            .into()),
        }
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> Result<Version> {
        let (version, watchers) = {
            let mut state = self.state.lock().unwrap();
            state.ensure_connected()?;
            if state.records.contains_key(path) {
                return Err(CoordinationError::AlreadyExists {
                    path: path.to_string(),
                }
                .into());
            }
            let version = state.next_version();
            state
                .records
                .insert(path.to_string(), Record { data, version });
            (version, state.take_watchers(path))
        };
        Self::fire(watchers, path, WatchEventKind::Created);
        Ok(version)
    }

    async fn write(&self, path: &str, data: Vec<u8>, expected: Version) -> Result<Version> {
        let (version, watchers) = {
            let mut state = self.state.lock().unwrap();
            state.ensure_connected()?;
            let actual = match state.records.get(path) {
                Some(record) => record.version,
                None => {
                    return Err(CoordinationError::NotFound {
                        path: path.to_string(),
                    }
                    .into());
                }
            };
            if actual != expected {
                return Err(CoordinationError::VersionConflict {
                    path: path.to_string(),
                    expected,
                    actual,
                }
                .into());
            }
            let version = state.next_version();
            state
                .records
                .insert(path.to_string(), Record { data, version });
            (version, state.take_watchers(path))
        };
        Self::fire(watchers, path, WatchEventKind::DataChanged);
        Ok(version)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let watchers = {
            let mut state = self.state.lock().unwrap();
            state.ensure_connected()?;
            if state.records.remove(path).is_none() {
                return Err(CoordinationError::NotFound {
                    path: path.to_string(),
                }
                .into());
            }
            // Deletion consumes a revision so a recreated record sorts after it.
            state.next_version();
            state.take_watchers(path)
        };
        Self::fire(watchers, path, WatchEventKind::Deleted);
        Ok(())
    }

    async fn watch(&self, path: &str, watcher: Watcher) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ensure_connected()?;
        let armed = state.watchers.entry(path.to_string()).or_default();
        // Drop watchers whose subscribers have gone away.
        armed.retain(Watcher::is_active);
        armed.push(watcher);
        Ok(())
    }
}
