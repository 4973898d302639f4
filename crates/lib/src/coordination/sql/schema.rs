//! SQL schema for the SQLite coordination store.
//!
//! The schema is tiny: one table of records keyed by path and a single-row
//! revision counter. Every mutation bumps the counter inside its transaction
//! and stamps the record with the new value, which makes versions unique and
//! increasing across the whole store.
//!
//! ## Adding a New Migration
//!
//! 1. Increment `SCHEMA_VERSION`
//! 2. Add the statements for the new version to `initialize`
//! 3. Document what the migration does

use sqlx::SqlitePool;

use super::SqlxResultExt;
use crate::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// SQL statements to create the schema tables.
pub const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // Single row (id = 0) holding the last assigned version
    "CREATE TABLE IF NOT EXISTS store_revision (
        id INTEGER PRIMARY KEY,
        value INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS records (
        path TEXT PRIMARY KEY NOT NULL,
        data BLOB NOT NULL,
        version INTEGER NOT NULL
    )",
];

/// Creates the tables if needed and seeds the revision counter.
pub async fn initialize(pool: &SqlitePool) -> Result<()> {
    for statement in CREATE_TABLES {
        sqlx::query(statement)
            .execute(pool)
            .await
            .sql_context("Failed to create schema")?;
    }

    sqlx::query("INSERT OR IGNORE INTO store_revision (id, value) VALUES (0, 0)")
        .execute(pool)
        .await
        .sql_context("Failed to seed revision counter")?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await
        .sql_context("Failed to record schema version")?;

    Ok(())
}
