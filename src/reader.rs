//! Read-only retrieval over the index.
//!
//! [`InferenceReader`] holds an embedder and an [`IndexReader`] handle and
//! nothing else: it cannot reach the local store, the pipeline, or any write
//! half of the index.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use ticker_mirror_core::embedding::{embed_one, Embedder};
use ticker_mirror_core::index::IndexReader;
use ticker_mirror_core::models::{DataCategory, IndexFilter, IndexMatch};
use ticker_mirror_core::registry::normalize_identifier;
use ticker_mirror_core::{Error, Result, Step};

use crate::pipeline::{bounded, StepTimeouts};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
/// A truncated trailing match is kept only when more than this many chars fit.
const MIN_TAIL_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub ticker: String,
    pub query: String,
    pub matches: Vec<IndexMatch>,
}

impl RetrievalResult {
    pub fn has_results(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Match texts joined best-first, capped at `max_chars` characters.
    pub fn context(&self, max_chars: usize) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut used = 0;
        for m in &self.matches {
            let text = &m.metadata.text;
            let len = text.chars().count();
            if used + len > max_chars {
                let remaining = max_chars.saturating_sub(used);
                if remaining > MIN_TAIL_CHARS {
                    let head: String = text.chars().take(remaining).collect();
                    parts.push(format!("{}...", head));
                }
                break;
            }
            parts.push(text.clone());
            used += len;
        }
        parts.join(CONTEXT_SEPARATOR)
    }
}

#[derive(Clone)]
pub struct InferenceReader {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn IndexReader>,
    timeouts: StepTimeouts,
}

impl InferenceReader {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn IndexReader>) -> Self {
        Self {
            embedder,
            index,
            timeouts: StepTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: StepTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Top `top_k` units for `query` within the ticker's namespace.
    ///
    /// A blank query returns no matches without calling the embedder.
    pub async fn retrieve(
        &self,
        identifier: &str,
        query: &str,
        top_k: usize,
        category: Option<DataCategory>,
    ) -> Result<RetrievalResult> {
        let ticker = normalize_identifier(identifier);
        if ticker.is_empty() {
            return Err(Error::unresolved(identifier, "identifier is empty"));
        }

        let mut result = RetrievalResult {
            ticker,
            query: query.to_string(),
            matches: Vec::new(),
        };
        if query.trim().is_empty() || top_k == 0 {
            return Ok(result);
        }

        let vector = bounded(
            Step::Embed,
            &self.timeouts,
            None,
            embed_one(self.embedder.as_ref(), query),
        )
        .await?
        .map_err(|e| Error::embedding("embed query", e))?;

        let filter = IndexFilter::ticker(&result.ticker).with_category(category);
        result.matches = bounded(
            Step::Index,
            &self.timeouts,
            None,
            self.index.query(&vector, &filter, top_k),
        )
        .await?
        .map_err(|e| Error::index(format!("query {}", result.ticker), e))?;

        debug!(ticker = %result.ticker, matches = result.matches.len(), "retrieved");
        Ok(result)
    }
}
