//! Idempotent schema setup for the local store and the index databases.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create both databases and their tables. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let store = db::connect(&config.db.path).await?;
    migrate_store(&store).await?;
    store.close().await;

    let index = db::connect(&config.index.path).await?;
    migrate_index(&index).await?;
    index.close().await;
    Ok(())
}

pub async fn migrate_store(pool: &SqlitePool) -> Result<()> {
    // One row per (ticker, component); a write replaces the row.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            ticker TEXT NOT NULL,
            component TEXT NOT NULL,
            source TEXT NOT NULL,
            body TEXT NOT NULL,
            body_hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            fetched_at INTEGER NOT NULL,
            indexed_version INTEGER,
            PRIMARY KEY (ticker, component)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn migrate_index(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_units (
            id TEXT PRIMARY KEY,
            ticker TEXT NOT NULL,
            component TEXT NOT NULL,
            category TEXT NOT NULL,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            source TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_units_ticker_component ON index_units(ticker, component)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
