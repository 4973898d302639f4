use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use shard_terms::{ShardTermsConfig, Terms};

use crate::helpers::{open, open_with_config, terms, test_store, wait_for};

fn counting_listener(calls: &Arc<AtomicUsize>) -> impl FnMut(&Terms) -> bool + Send + 'static {
    let calls = Arc::clone(calls);
    move |_| calls.fetch_add(1, Ordering::SeqCst) + 1 < 2
}

#[tokio::test(flavor = "multi_thread")]
async fn test_core_term_watcher() {
    let store = test_store().await;
    let leader = open(&store, "coreTermWatch", "shard1").await;
    let replica = open(&store, "coreTermWatch", "shard1").await;

    let calls = Arc::new(AtomicUsize::new(0));
    replica.add_listener(counting_listener(&calls)).unwrap();
    assert_eq!(replica.num_listeners(), 1);

    leader.register_term("replica1").await.unwrap();
    wait_for(1, || calls.load(Ordering::SeqCst)).await;

    leader
        .ensure_terms_is_higher("leader", ["replica1"])
        .await
        .unwrap();
    wait_for(2, || calls.load(Ordering::SeqCst)).await;
    wait_for(0, || replica.num_listeners()).await;

    leader.set_equals_to_max("replica1").await.unwrap();
    wait_for(terms(&[("leader", 1), ("replica1", 1)]), || replica.get_terms()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listener_sees_local_writes() {
    let store = test_store().await;
    let handle = open(&store, "localListener", "shard1").await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    handle
        .add_listener(move |terms| {
            log.lock().unwrap().push(terms.clone());
            true
        })
        .unwrap();

    handle.register_term("rep1").await.unwrap();
    handle.ensure_terms_is_higher("rep1", ["rep2"]).await.unwrap();
    // Already registered: no change, no delivery.
    handle.register_term("rep1").await.unwrap();

    let expected = vec![terms(&[("rep1", 0)]), terms(&[("rep1", 1)])];
    wait_for(expected, || seen.lock().unwrap().clone()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listeners_without_inline_notification() {
    let store = test_store().await;
    let config = ShardTermsConfig {
        notify_on_local_write: false,
        ..Default::default()
    };
    let handle = open_with_config(&store, "deferredListener", "shard1", config).await;

    let latest = Arc::new(Mutex::new(None));
    let log = Arc::clone(&latest);
    handle
        .add_listener(move |terms| {
            *log.lock().unwrap() = terms.get("rep1");
            true
        })
        .unwrap();

    handle.register_term("rep1").await.unwrap();
    handle.ensure_terms_is_higher("rep1", Vec::<&str>::new()).await.unwrap();
    // The watch delivers the local write instead.
    wait_for(Some(1), || *latest.lock().unwrap()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panicking_listener_does_not_block_others() {
    let store = test_store().await;
    let handle = open(&store, "panickingListener", "shard1").await;

    handle
        .add_listener(|_| panic!("listener failure"))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    handle
        .add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();
    assert_eq!(handle.num_listeners(), 2);

    handle.register_term("rep1").await.unwrap();
    wait_for(1, || calls.load(Ordering::SeqCst)).await;
    assert_eq!(handle.num_listeners(), 1);

    // The cache is intact and later deliveries still flow.
    assert_eq!(handle.get_terms(), terms(&[("rep1", 0)]));
    handle.set_equals_to_max("rep2").await.unwrap();
    wait_for(2, || calls.load(Ordering::SeqCst)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_listener() {
    let store = test_store().await;
    let handle = open(&store, "removeListener", "shard1").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let id = handle
        .add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();
    assert!(handle.remove_listener(id));
    assert!(!handle.remove_listener(id));
    assert_eq!(handle.num_listeners(), 0);

    handle.register_term("rep1").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
