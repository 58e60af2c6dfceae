//! In-memory index with brute-force cosine search.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{IndexFilter, IndexMatch, IndexRecord};

use super::{IndexReader, IndexWriter};

#[derive(Default)]
pub struct InMemoryIndex {
    records: RwLock<BTreeMap<String, IndexRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the whole index, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<String, IndexRecord> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl IndexReader for InMemoryIndex {
    async fn query(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<IndexMatch>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut matches: Vec<IndexMatch> = records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| IndexMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();
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
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn count(&self, filter: Option<&IndexFilter>) -> Result<usize> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(match filter {
            None => records.len(),
            Some(f) => records.values().filter(|r| f.matches(&r.metadata)).count(),
        })
    }
}

#[async_trait]
impl IndexWriter for InMemoryIndex {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        let mut stored = self.records.write().unwrap_or_else(|e| e.into_inner());
        for r in records {
            stored.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let mut stored = self.records.write().unwrap_or_else(|e| e.into_inner());
        Ok(ids.iter().filter(|id| stored.remove(*id).is_some()).count())
    }
}
