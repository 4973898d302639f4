//! Cache consistency when the watch task and a caller race on one handle.
//!
//! The stores below wrap [`InMemoryStore`] and stretch or pause reads so the
//! interleavings that matter happen every run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use shard_terms::coordination::{CoordinationClient, InMemoryStore, Version, Watcher};
use shard_terms::{Result, Terms};
use tokio::sync::Notify;

use crate::helpers::{open, terms, wait_for};

/// Store whose reads all take `delay` before looking at the records.
#[derive(Debug)]
struct SlowReads {
    inner: InMemoryStore,
    delay: Duration,
}

#[async_trait]
impl CoordinationClient for SlowReads {
    async fn read(&self, path: &str) -> Result<(Vec<u8>, Version)> {
        tokio::time::sleep(self.delay).await;
        self.inner.read(path).await
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> Result<Version> {
        self.inner.create(path, data).await
    }

    async fn write(&self, path: &str, data: Vec<u8>, expected: Version) -> Result<Version> {
        self.inner.write(path, data, expected).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path).await
    }

    async fn watch(&self, path: &str, watcher: Watcher) -> Result<()> {
        self.inner.watch(path, watcher).await
    }
}

/// Store that can hold one read after it fetched its result, until released.
#[derive(Debug, Default)]
struct GatedReads {
    inner: InMemoryStore,
    hold_next: AtomicBool,
    fetched: Notify,
    release: Notify,
}

#[async_trait]
impl CoordinationClient for GatedReads {
    async fn read(&self, path: &str) -> Result<(Vec<u8>, Version)> {
        let result = self.inner.read(path).await;
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.fetched.notify_one();
            self.release.notified().await;
        }
        result
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> Result<Version> {
        self.inner.create(path, data).await
    }

    async fn write(&self, path: &str, data: Vec<u8>, expected: Version) -> Result<Version> {
        self.inner.write(path, data, expected).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path).await
    }

    async fn watch(&self, path: &str, watcher: Watcher) -> Result<()> {
        self.inner.watch(path, watcher).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_noop_rechecked_while_watch_refreshes() {
    let store: Arc<dyn CoordinationClient> = Arc::new(SlowReads {
        inner: InMemoryStore::new(),
        delay: Duration::from_millis(200),
    });
    let leader = open(&store, "slowReads", "shard1").await;
    let follower = open(&store, "slowReads", "shard1").await;

    leader.register_term("leader").await.unwrap();
    leader.register_term("follower").await.unwrap();
    wait_for(terms(&[("follower", 0), ("leader", 0)]), || follower.get_terms()).await;

    // The follower's watch is still reading the promotion when the follower
    // catches up, so its cache says there is nothing to do.
    leader
        .ensure_terms_is_higher("leader", ["follower"])
        .await
        .unwrap();
    follower.set_equals_to_max("follower").await.unwrap();

    let expected = terms(&[("follower", 1), ("leader", 1)]);
    assert_eq!(follower.get_terms(), expected);
    let (bytes, _) = store.read(follower.path()).await.unwrap();
    assert_eq!(serde_json::from_slice::<Terms>(&bytes).unwrap(), expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_read_from_before_deletion_does_not_resurrect() {
    let gated = Arc::new(GatedReads::default());
    let store: Arc<dyn CoordinationClient> = gated.clone();
    let handle = Arc::new(open(&store, "gatedReads", "shard1").await);
    handle.register_term("rep1").await.unwrap();
    // Let the watch settle on the create.
    tokio::time::sleep(Duration::from_millis(100)).await;

    gated.hold_next.store(true, Ordering::SeqCst);
    let refreshing = Arc::clone(&handle);
    let task = tokio::spawn(async move { refreshing.refresh_terms().await });
    gated.fetched.notified().await;

    store.delete(handle.path()).await.unwrap();
    wait_for(None, || handle.version()).await;

    gated.release.notify_one();
    task.await.unwrap().unwrap();

    assert!(handle.get_terms().is_empty());
    assert_eq!(handle.version(), None);
    assert!(store.read(handle.path()).await.unwrap_err().is_not_found());

    // The next registration recreates the record as usual.
    handle.register_term("rep2").await.unwrap();
    assert_eq!(handle.get_terms(), terms(&[("rep2", 0)]));
}
