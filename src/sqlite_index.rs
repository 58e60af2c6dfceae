//! SQLite-backed index with brute-force cosine search.
//!
//! Vectors are stored as little-endian f32 BLOBs next to the unit metadata.
//! Queries load the rows matching the filter and rank them in process, which
//! is plenty for a per-ticker namespace of a few hundred units.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use ticker_mirror_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ticker_mirror_core::index::{IndexReader, IndexWriter};
use ticker_mirror_core::models::{
    Component, DataCategory, IndexFilter, IndexMatch, IndexRecord, UnitMetadata,
};

use crate::db::{from_micros, to_micros};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Unit counts per ticker, for the `stats` report.
    pub async fn counts_by_ticker(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT ticker, COUNT(*) AS n FROM index_units GROUP BY ticker ORDER BY ticker",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| (r.get("ticker"), r.get("n"))).collect())
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &IndexFilter) {
    qb.push(" WHERE ticker = ").push_bind(filter.ticker.clone());
    if let Some(component) = filter.component {
        qb.push(" AND component = ").push_bind(component.as_str());
    }
    if let Some(category) = filter.category {
        qb.push(" AND category = ").push_bind(category.as_str());
    }
}

fn row_metadata(row: &SqliteRow) -> Result<UnitMetadata> {
    let component: String = row.get("component");
    let category: String = row.get("category");
    let position: i64 = row.get("position");
    Ok(UnitMetadata {
        ticker: row.get("ticker"),
        component: component.parse::<Component>()?,
        category: category
            .parse::<DataCategory>()
            .map_err(anyhow::Error::msg)?,
        position: position as u32,
        text: row.get("text"),
        source: row.get("source"),
        fetched_at: from_micros(row.get("fetched_at")),
    })
}

#[async_trait]
impl IndexReader for SqliteIndex {
    async fn query(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<IndexMatch>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, ticker, component, category, position, text, source, fetched_at, embedding FROM index_units",
        );
        push_filter(&mut qb, filter);
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut matches = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                Ok(IndexMatch {
                    id: row.get("id"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    metadata: row_metadata(row)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn list_ids(&self, filter: &IndexFilter) -> Result<Vec<String>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM index_units");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn count(&self, filter: Option<&IndexFilter>) -> Result<usize> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM index_units");
        if let Some(filter) = filter {
            push_filter(&mut qb, filter);
        }
        let row = qb.build().fetch_one(&self.pool).await?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }
}

#[async_trait]
impl IndexWriter for SqliteIndex {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let meta = &record.metadata;
            sqlx::query(
                r#"
                INSERT INTO index_units (id, ticker, component, category, position, text,
                                         source, fetched_at, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    ticker = excluded.ticker,
                    component = excluded.component,
                    category = excluded.category,
                    position = excluded.position,
                    text = excluded.text,
                    source = excluded.source,
                    fetched_at = excluded.fetched_at,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&record.id)
            .bind(&meta.ticker)
            .bind(meta.component.as_str())
            .bind(meta.category.as_str())
            .bind(meta.position as i64)
            .bind(&meta.text)
            .bind(&meta.source)
            .bind(to_micros(meta.fetched_at))
            .bind(record.vector.len() as i64)
            .bind(vec_to_blob(&record.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM index_units WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }
}
