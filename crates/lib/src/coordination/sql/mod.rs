//! SQLite-backed coordination store.
//!
//! [`SqliteStore`] keeps records in a SQLite database through sqlx. Several
//! processes can open the same database file and coordinate through it:
//! every mutation runs in its own transaction that first bumps the store-wide
//! revision counter (taking SQLite's write lock), then applies the
//! version-guarded change, so writes are serialized by the database itself.
//!
//! SQLite has no change notifications, so watches are implemented by polling
//! the watched record's version on a background task until it moves.

/// Schema definition.
pub mod schema;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::errors::CoordinationError;
use super::{CoordinationClient, Version, WatchEvent, WatchEventKind, Watcher};
use crate::Result;

/// Extension trait for sqlx Result types to simplify error handling.
///
/// Converts sqlx errors to `CoordinationError::Sql` with a context message.
pub(crate) trait SqlxResultExt<T> {
    /// Convert sqlx error to CoordinationError with context message.
    fn sql_context(self, context: &str) -> Result<T>;
}

impl<T> SqlxResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn sql_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            CoordinationError::Sql {
                reason: format!("{context}: {e}"),
                source: Some(e),
            }
            .into()
        })
    }
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_max_connections() -> u32 {
    5
}

/// Tuning for [`SqliteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteStoreOptions {
    /// How often an armed watch re-reads the watched record's version.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Connection pool size for file-backed databases.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_connections: default_max_connections(),
        }
    }
}

impl SqliteStoreOptions {
    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Coordination store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    options: SqliteStoreOptions,
}

impl SqliteStore {
    /// Open a SQLite database file, creating it and the schema if needed.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use shard_terms::coordination::{SqliteStore, SqliteStoreOptions};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let store = SqliteStore::open("terms.db", SqliteStoreOptions::default())
    ///         .await
    ///         .unwrap();
    /// }
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P, options: SqliteStoreOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            // WAL lets readers proceed while a writer holds the lock
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await
            .sql_context("Failed to open SQLite database")?;

        Self::with_pool(pool, options).await
    }

    /// Connect using a sqlx SQLite URL (e.g. `sqlite:./terms.db`).
    pub async fn connect(url: &str, options: SqliteStoreOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::from_str(url)
            .sql_context("Invalid SQLite URL")?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await
            .sql_context("Failed to connect to SQLite")?;

        Self::with_pool(pool, options).await
    }

    /// Create a private in-memory database.
    ///
    /// The database lives as long as this store (and its clones). A single
    /// connection is used whatever `options.max_connections` says, since
    /// shared-cache in-memory databases report table-lock errors instead of
    /// waiting when connections contend.
    pub async fn in_memory(options: SqliteStoreOptions) -> Result<Self> {
        let unique_id = uuid::Uuid::new_v4();
        let url = format!("sqlite:file:mem_{unique_id}?mode=memory&cache=shared");
        let connect = SqliteConnectOptions::from_str(&url).sql_context("Invalid SQLite URL")?;

        // The in-memory database is destroyed when its last connection
        // closes, so the one connection must never be reaped.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await
            .sql_context("Failed to create in-memory SQLite database")?;

        Self::with_pool(pool, options).await
    }

    async fn with_pool(pool: SqlitePool, options: SqliteStoreOptions) -> Result<Self> {
        schema::initialize(&pool).await?;
        debug!(?options, "SQLite coordination store ready");
        Ok(Self { pool, options })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The options this store was opened with.
    pub fn options(&self) -> &SqliteStoreOptions {
        &self.options
    }

    /// Close the pool. Armed watches stop polling and never fire.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn current_version(pool: &SqlitePool, path: &str) -> Result<Option<Version>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM records WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await
        .sql_context("Failed to read record version")?;
    Ok(row.map(|(version,)| Version::new(version as u64)))
}

/// Bumps the revision counter inside `tx` and returns the new value.
async fn next_version(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<Version> {
    let (value,): (i64,) =
        sqlx::query_as("UPDATE store_revision SET value = value + 1 WHERE id = 0 RETURNING value")
            .fetch_one(&mut **tx)
            .await
            .sql_context("Failed to bump store revision")?;
    Ok(Version::new(value as u64))
}

#[async_trait]
impl CoordinationClient for SqliteStore {
    async fn read(&self, path: &str) -> Result<(Vec<u8>, Version)> {
        let row: Option<(Vec<u8>, i64)> =
            sqlx::query_as("SELECT data, version FROM records WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await
                .sql_context("Failed to read record")?;

        match row {
            Some((data, version)) => Ok((data, Version::new(version as u64))),
            None => Err(CoordinationError::NotFound {
                path: path.to_string(),
            }
            .into()),
        }
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> Result<Version> {
        let mut tx = self
            .pool
            .begin()
            .await
            .sql_context("Failed to begin transaction")?;
        let version = next_version(&mut tx).await?;

        let inserted = sqlx::query(
            "INSERT INTO records (path, data, version) VALUES (?, ?, ?)
             ON CONFLICT(path) DO NOTHING",
        )
        .bind(path)
        .bind(data)
        .bind(version.get() as i64)
        .execute(&mut *tx)
        .await
        .sql_context("Failed to insert record")?;

        if inserted.rows_affected() == 0 {
            // Dropping the transaction rolls back the revision bump.
            return Err(CoordinationError::AlreadyExists {
                path: path.to_string(),
            }
            .into());
        }

        tx.commit().await.sql_context("Failed to commit create")?;
        trace!(path, %version, "created record");
        Ok(version)
    }

    async fn write(&self, path: &str, data: Vec<u8>, expected: Version) -> Result<Version> {
        let mut tx = self
            .pool
            .begin()
            .await
            .sql_context("Failed to begin transaction")?;
        let version = next_version(&mut tx).await?;

        let updated = sqlx::query("UPDATE records SET data = ?, version = ? WHERE path = ? AND version = ?")
            .bind(data)
            .bind(version.get() as i64)
            .bind(path)
            .bind(expected.get() as i64)
            .execute(&mut *tx)
            .await
            .sql_context("Failed to update record")?;

        if updated.rows_affected() == 0 {
            let actual: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM records WHERE path = ?")
                    .bind(path)
                    .fetch_optional(&mut *tx)
                    .await
                    .sql_context("Failed to read record version")?;
            return Err(match actual {
                Some((actual,)) => CoordinationError::VersionConflict {
                    path: path.to_string(),
                    expected,
                    actual: Version::new(actual as u64),
                },
                None => CoordinationError::NotFound {
                    path: path.to_string(),
                },
            }
            .into());
        }

        tx.commit().await.sql_context("Failed to commit write")?;
        trace!(path, %expected, %version, "wrote record");
        Ok(version)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .sql_context("Failed to begin transaction")?;
        next_version(&mut tx).await?;

        let deleted = sqlx::query("DELETE FROM records WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await
            .sql_context("Failed to delete record")?;

        if deleted.rows_affected() == 0 {
            return Err(CoordinationError::NotFound {
                path: path.to_string(),
            }
            .into());
        }

        tx.commit().await.sql_context("Failed to commit delete")?;
        Ok(())
    }

    async fn watch(&self, path: &str, watcher: Watcher) -> Result<()> {
        let baseline = current_version(&self.pool, path).await?;
        let pool = self.pool.clone();
        let path = path.to_string();
        let mut ticker = tokio::time::interval(self.options.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if !watcher.is_active() || pool.is_closed() {
                    trace!(path = %path, "watch abandoned");
                    return;
                }
                let current = match current_version(&pool, &path).await {
                    Ok(current) => current,
                    Err(e) => {
                        debug!(path = %path, error = %e, "watch poll failed, retrying");
                        continue;
                    }
                };
                if current == baseline {
                    continue;
                }
                let kind = match (baseline, current) {
                    (None, Some(_)) => WatchEventKind::Created,
                    (Some(_), None) => WatchEventKind::Deleted,
                    _ => WatchEventKind::DataChanged,
                };
                watcher.fire(WatchEvent::new(path, kind));
                return;
            }
        });

        Ok(())
    }
}
