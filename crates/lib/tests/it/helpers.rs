use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use shard_terms::{
    ShardTerms, ShardTermsConfig, Terms,
    coordination::{CoordinationClient, InMemoryStore},
};

/// How long convergence assertions wait before failing.
pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates a store based on the TEST_BACKEND env var.
///
/// Supported values:
/// - "inmemory" or unset: InMemoryStore (default)
/// - "sqlite": in-memory SQLite store (requires `sqlite` feature)
///
/// # Panics
/// Panics if TEST_BACKEND=sqlite but the `sqlite` feature is not enabled.
pub async fn test_store() -> Arc<dyn CoordinationClient> {
    match std::env::var("TEST_BACKEND").as_deref() {
        Ok("sqlite") => {
            #[cfg(feature = "sqlite")]
            {
                sqlite_store().await
            }
            #[cfg(not(feature = "sqlite"))]
            {
                panic!("TEST_BACKEND=sqlite requires the 'sqlite' feature to be enabled")
            }
        }
        _ => Arc::new(InMemoryStore::new()),
    }
}

/// Creates an in-memory SQLite store that polls its watches every 10ms.
#[cfg(feature = "sqlite")]
pub async fn sqlite_store() -> Arc<dyn CoordinationClient> {
    use shard_terms::coordination::{SqliteStore, SqliteStoreOptions};
    let options = SqliteStoreOptions {
        poll_interval_ms: 10,
        ..Default::default()
    };
    Arc::new(
        SqliteStore::in_memory(options)
            .await
            .expect("Failed to create SQLite store"),
    )
}

/// Opens a handle on `collection`/`shard` with the default configuration.
pub async fn open(store: &Arc<dyn CoordinationClient>, collection: &str, shard: &str) -> ShardTerms {
    ShardTerms::open(collection, shard, Arc::clone(store))
        .await
        .expect("Failed to open shard terms")
}

/// Opens a handle with a custom configuration.
pub async fn open_with_config(
    store: &Arc<dyn CoordinationClient>,
    collection: &str,
    shard: &str,
    config: ShardTermsConfig,
) -> ShardTerms {
    ShardTerms::open_with_config(collection, shard, Arc::clone(store), config)
        .await
        .expect("Failed to open shard terms")
}

/// Builds a mapping from literal pairs.
pub fn terms(pairs: &[(&str, u64)]) -> Terms {
    pairs.iter().map(|(r, t)| (*r, *t)).collect()
}

/// Polls `actual` until it returns `expected` or `timeout` elapses, then
/// asserts equality.
pub async fn wait_for_within<T, F>(timeout: Duration, expected: T, mut actual: F)
where
    T: PartialEq + Debug,
    F: FnMut() -> T,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if actual() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(actual(), expected);
}

/// [`wait_for_within`] with [`CONVERGENCE_TIMEOUT`].
pub async fn wait_for<T, F>(expected: T, actual: F)
where
    T: PartialEq + Debug,
    F: FnMut() -> T,
{
    wait_for_within(CONVERGENCE_TIMEOUT, expected, actual).await
}
