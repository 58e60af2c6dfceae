//! SQLite-backed [`LocalStore`].
//!
//! One `artifacts` row per (ticker, component). Writes are single-statement
//! upserts, so a reader never observes a half-written artifact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ticker_mirror_core::models::{Component, Entity, Inspection, LocalArtifact, Payload};
use ticker_mirror_core::store::{ArtifactSummary, LocalStore};

use crate::db::{from_micros, to_micros, truncate_to_micros};

pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn body_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

fn parse_component(row: &SqliteRow) -> Result<Component> {
    let name: String = row.get("component");
    Ok(name.parse::<Component>()?)
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn read(&self, entity: &Entity, component: Component) -> Result<Option<LocalArtifact>> {
        let row = sqlx::query(
            r#"
            SELECT ticker, component, source, body, metadata_json, fetched_at, indexed_version
            FROM artifacts
            WHERE ticker = ? AND component = ?
            "#,
        )
        .bind(&entity.ticker)
        .bind(component.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata_json: String = row.get("metadata_json");
        let metadata: serde_json::Value = serde_json::from_str(&metadata_json)
            .with_context(|| format!("corrupt metadata for {}:{}", entity.ticker, component))?;
        let indexed_version: Option<i64> = row.get("indexed_version");

        Ok(Some(LocalArtifact {
            ticker: row.get("ticker"),
            component: parse_component(&row)?,
            payload: Payload {
                source: row.get("source"),
                body: row.get("body"),
                metadata,
            },
            fetched_at: from_micros(row.get("fetched_at")),
            indexed_version: indexed_version.map(from_micros),
        }))
    }

    async fn inspect(&self, entity: &Entity, component: Component) -> Result<Inspection> {
        let row = sqlx::query(
            "SELECT fetched_at, indexed_version FROM artifacts WHERE ticker = ? AND component = ?",
        )
        .bind(&entity.ticker)
        .bind(component.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            None => Inspection::Absent,
            Some(row) => {
                let fetched_at: i64 = row.get("fetched_at");
                let indexed_version: Option<i64> = row.get("indexed_version");
                Inspection::Present {
                    last_modified: from_micros(fetched_at),
                    index_synced: indexed_version == Some(fetched_at),
                }
            }
        })
    }

    async fn write(
        &self,
        entity: &Entity,
        component: Component,
        payload: &Payload,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let at = truncate_to_micros(at);
        sqlx::query(
            r#"
            INSERT INTO artifacts (ticker, component, source, body, body_hash,
                                   metadata_json, fetched_at, indexed_version)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(ticker, component) DO UPDATE SET
                source = excluded.source,
                body = excluded.body,
                body_hash = excluded.body_hash,
                metadata_json = excluded.metadata_json,
                fetched_at = excluded.fetched_at,
                indexed_version = NULL
            "#,
        )
        .bind(&entity.ticker)
        .bind(component.as_str())
        .bind(&payload.source)
        .bind(&payload.body)
        .bind(body_hash(&payload.body))
        .bind(payload.metadata.to_string())
        .bind(to_micros(at))
        .execute(&self.pool)
        .await?;

        Ok(at)
    }

    async fn mark_indexed(
        &self,
        entity: &Entity,
        component: Component,
        version: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE artifacts SET indexed_version = fetched_at
            WHERE ticker = ? AND component = ? AND fetched_at = ?
            "#,
        )
        .bind(&entity.ticker)
        .bind(component.as_str())
        .bind(to_micros(version))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, ticker: Option<&str>) -> Result<Vec<ArtifactSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, component, fetched_at, indexed_version, length(CAST(body AS BLOB)) AS bytes
            FROM artifacts
            WHERE (?1 IS NULL OR ticker = ?1)
            ORDER BY ticker, component
            "#,
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let fetched_at: i64 = row.get("fetched_at");
                let indexed_version: Option<i64> = row.get("indexed_version");
                let bytes: i64 = row.get("bytes");
                Ok(ArtifactSummary {
                    ticker: row.get("ticker"),
                    component: parse_component(row)?,
                    fetched_at: from_micros(fetched_at),
                    index_synced: indexed_version == Some(fetched_at),
                    bytes: bytes as usize,
                })
            })
            .collect()
    }
}
