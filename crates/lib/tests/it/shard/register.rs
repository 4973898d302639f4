use std::sync::Arc;

use shard_terms::coordination::CoordinationClient;

use crate::helpers::{open, terms, test_store, wait_for};

#[tokio::test(flavor = "multi_thread")]
async fn test_register_term() {
    register_term_scenario(test_store().await).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "multi_thread")]
async fn test_register_term_on_sqlite() {
    register_term_scenario(crate::helpers::sqlite_store().await).await;
}

async fn register_term_scenario(store: Arc<dyn CoordinationClient>) {
    let collection = "registerTerm";
    let rep1_terms = open(&store, collection, "shard1").await;
    let rep2_terms = open(&store, collection, "shard1").await;

    rep1_terms.register_term("rep1").await.unwrap();
    rep2_terms.register_term("rep2").await.unwrap();
    {
        let fresh = open(&store, collection, "shard1").await;
        assert_eq!(fresh.get_term("rep1"), Some(0));
        assert_eq!(fresh.get_term("rep2"), Some(0));
        fresh.close();
    }

    rep1_terms
        .ensure_terms_is_higher("rep1", ["rep2"])
        .await
        .unwrap();
    assert_eq!(rep1_terms.get_term("rep1"), Some(1));
    assert_eq!(rep1_terms.get_term("rep2"), Some(0));

    // registerTerm does not override the current value
    rep1_terms.register_term("rep1").await.unwrap();
    assert_eq!(rep1_terms.get_term("rep1"), Some(1));

    rep2_terms.set_equals_to_max("rep2").await.unwrap();
    assert_eq!(rep2_terms.get_term("rep2"), Some(1));
    rep2_terms.register_term("rep2").await.unwrap();
    assert_eq!(rep2_terms.get_term("rep2"), Some(1));

    // Both handles must stay updated by their watches
    let expected = terms(&[("rep1", 1), ("rep2", 1)]);
    wait_for(expected.clone(), || rep1_terms.get_terms()).await;
    wait_for(expected, || rep2_terms.get_terms()).await;

    rep1_terms.close();
    rep2_terms.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_register_without_change_does_not_write() {
    let store = test_store().await;
    let handle = open(&store, "registerNoop", "shard1").await;
    assert_eq!(handle.version(), None);

    handle.register_term("rep1").await.unwrap();
    let version = handle.version();
    assert!(version.is_some());

    handle.register_term("rep1").await.unwrap();
    assert_eq!(handle.version(), version);
    assert_eq!(store.read(handle.path()).await.unwrap().1, version.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_participation_of_shards() {
    let store = test_store().await;
    let collection = "collection1";

    let shard2 = open(&store, collection, "shard2").await;
    shard2.register_term("replica1").await.unwrap();
    shard2.register_term("replica2").await.unwrap();
    shard2
        .ensure_terms_is_higher("replica1", ["replica2"])
        .await
        .unwrap();
    shard2.close();

    // Records are per shard: shard1 is untouched by shard2's updates.
    let shard1 = open(&store, collection, "shard1").await;
    assert!(shard1.get_terms().is_empty());
    shard1.register_term("replica1").await.unwrap();
    shard1.register_term("replica2").await.unwrap();
    assert_eq!(
        shard1.get_terms(),
        terms(&[("replica1", 0), ("replica2", 0)])
    );

    let shard2 = open(&store, collection, "shard2").await;
    assert_eq!(
        shard2.get_terms(),
        terms(&[("replica1", 1), ("replica2", 0)])
    );
}
