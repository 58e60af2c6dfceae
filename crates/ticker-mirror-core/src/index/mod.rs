//! Remote index client abstraction.
//!
//! The index is split into a read half and a write half. The inference
//! reader is handed an [`IndexReader`] only, so it has no way to mutate the
//! index; the control plane holds an [`IndexWriter`].
//!
//! Writes are atomic per id: a concurrent reader sees either the old record
//! or the new one for any given id, never a mix.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexFilter, IndexMatch, IndexRecord};

#[async_trait]
pub trait IndexReader: Send + Sync {
    /// Top `top_k` matches for `vector` within `filter`, best first.
    async fn query(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<IndexMatch>>;

    /// Every id currently stored within `filter`, sorted.
    async fn list_ids(&self, filter: &IndexFilter) -> Result<Vec<String>>;

    /// Number of records within `filter`, or in the whole index when `None`.
    async fn count(&self, filter: Option<&IndexFilter>) -> Result<usize>;
}

#[async_trait]
pub trait IndexWriter: IndexReader {
    /// Insert or overwrite records by id.
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()>;

    /// Delete records by id; unknown ids are ignored. Returns how many
    /// records were removed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize>;
}
