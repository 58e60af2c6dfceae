//! Fetch → persist → chunk → embed → upsert → reconcile.
//!
//! ```text
//!   fetch ──▶ write artifact (marker cleared) ──▶ build units ──▶ embed (batched)
//!                                                                    │
//!   mark_indexed ◀── delete orphans ◀── list ids ◀── upsert ◀────────┘
//! ```
//!
//! The artifact is durable before the index is touched. Any failure after
//! that point leaves the marker cleared, so the next call rebuilds the index
//! mirror from disk ([`Pipeline::reindex`]) instead of fetching again.
//!
//! Failure mapping:
//!
//! | Step | Error | Component status |
//! |------|-------|------------------|
//! | fetch | any, or timeout | `fetch_failed` |
//! | write / read / mark | any, or timeout | fatal, aborts the call |
//! | embed / upsert / list / delete | any, or timeout | `partially_updated` |

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ticker_mirror_core::chunk::{build_units, ChunkingParams};
use ticker_mirror_core::clock::Clock;
use ticker_mirror_core::embedding::Embedder;
use ticker_mirror_core::fetch::FetcherRegistry;
use ticker_mirror_core::index::IndexWriter;
use ticker_mirror_core::models::{
    Component, Entity, IndexFilter, IndexRecord, Payload, UnitMetadata,
};
use ticker_mirror_core::outcome::{ComponentReport, ComponentStatus};
use ticker_mirror_core::staleness::Staleness;
use ticker_mirror_core::store::LocalStore;
use ticker_mirror_core::{Error, Result, Step};

/// Upper bound for each external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimeouts {
    pub storage: Duration,
    pub fetch: Duration,
    pub embed: Duration,
    pub index: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            storage: Duration::from_secs(10),
            fetch: Duration::from_secs(120),
            embed: Duration::from_secs(120),
            index: Duration::from_secs(30),
        }
    }
}

impl StepTimeouts {
    pub fn for_step(&self, step: Step) -> Duration {
        match step {
            Step::Storage => self.storage,
            Step::Fetch => self.fetch,
            Step::Embed => self.embed,
            Step::Index => self.index,
        }
    }
}

/// Run `fut` until the step budget or the caller deadline, whichever is
/// earlier. Elapsing yields [`Error::Timeout`]. A budget too large to
/// represent as an instant means no step limit.
pub async fn bounded<F: Future>(
    step: Step,
    timeouts: &StepTimeouts,
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output> {
    let started = Instant::now();
    let budget = started.checked_add(timeouts.for_step(step));
    let until = match (budget, deadline) {
        (Some(budget), Some(deadline)) => Some(budget.min(deadline)),
        (budget, deadline) => budget.or(deadline),
    };
    let Some(until) = until else {
        return Ok(fut.await);
    };
    tokio::time::timeout_at(until, fut)
        .await
        .map_err(|_| Error::Timeout {
            step,
            after_ms: started.elapsed().as_millis(),
        })
}

/// Deadline `secs` from now, or `None` when that instant is unrepresentable.
pub fn deadline_after(secs: u64) -> Option<Instant> {
    Instant::now().checked_add(Duration::from_secs(secs))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub upserted: usize,
    pub deleted: usize,
}

pub struct Pipeline {
    fetchers: FetcherRegistry,
    store: Arc<dyn LocalStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn IndexWriter>,
    clock: Arc<dyn Clock>,
    chunking: ChunkingParams,
    batch_size: usize,
    timeouts: StepTimeouts,
}

impl Pipeline {
    pub fn new(
        fetchers: FetcherRegistry,
        store: Arc<dyn LocalStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn IndexWriter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetchers,
            store,
            embedder,
            index,
            clock,
            chunking: ChunkingParams::default(),
            batch_size: 32,
            timeouts: StepTimeouts::default(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingParams) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeouts(mut self, timeouts: StepTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> &StepTimeouts {
        &self.timeouts
    }

    /// Fetch a new artifact, persist it, and mirror it into the index.
    ///
    /// Returns `Err` only for fatal (storage) failures; fetch and index
    /// failures are recorded in the returned report.
    pub async fn refresh(
        &self,
        entity: &Entity,
        component: Component,
        staleness: Staleness,
        deadline: Option<Instant>,
    ) -> Result<ComponentReport> {
        let payload = match self.fetch(entity, component, deadline).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(ticker = %entity.ticker, %component, error = %e.detail(), "fetch failed");
                let mut report =
                    ComponentReport::new(component, staleness, ComponentStatus::FetchFailed);
                report.detail = Some(e.detail());
                return Ok(report);
            }
        };

        let now = self.clock.now();
        let version = bounded(
            Step::Storage,
            &self.timeouts,
            deadline,
            self.store.write(entity, component, &payload, now),
        )
        .await?
        .map_err(|e| Error::storage(format!("write {}:{}", entity.ticker, component), e))?;
        info!(ticker = %entity.ticker, %component, bytes = payload.body.len(), "artifact persisted");

        let mut report = self
            .sync_report(entity, component, staleness, &payload, version, ComponentStatus::Updated, deadline)
            .await?;
        report.updated = true;
        Ok(report)
    }

    /// Rebuild the index mirror for the artifact already on disk.
    pub async fn reindex(
        &self,
        entity: &Entity,
        component: Component,
        staleness: Staleness,
        deadline: Option<Instant>,
    ) -> Result<ComponentReport> {
        let artifact = bounded(
            Step::Storage,
            &self.timeouts,
            deadline,
            self.store.read(entity, component),
        )
        .await?
        .map_err(|e| Error::storage(format!("read {}:{}", entity.ticker, component), e))?;

        let Some(artifact) = artifact else {
            return self.refresh(entity, component, Staleness::Missing, deadline).await;
        };
        info!(ticker = %entity.ticker, %component, "reindexing from local artifact");

        self.sync_report(
            entity,
            component,
            staleness,
            &artifact.payload,
            artifact.fetched_at,
            ComponentStatus::Reindexed,
            deadline,
        )
        .await
    }

    async fn fetch(
        &self,
        entity: &Entity,
        component: Component,
        deadline: Option<Instant>,
    ) -> Result<Payload> {
        let fetcher = self
            .fetchers
            .get(component)
            .ok_or_else(|| Error::fetch(component, format!("no fetcher bound to {}", component)))?;
        debug!(ticker = %entity.ticker, %component, fetcher = fetcher.name(), "fetching");
        bounded(Step::Fetch, &self.timeouts, deadline, fetcher.fetch(entity, component))
            .await?
            .map_err(|e| Error::fetch(component, e))
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_report(
        &self,
        entity: &Entity,
        component: Component,
        staleness: Staleness,
        payload: &Payload,
        version: DateTime<Utc>,
        success: ComponentStatus,
        deadline: Option<Instant>,
    ) -> Result<ComponentReport> {
        let mut report = ComponentReport::new(component, staleness, success);
        report.last_modified = Some(version);

        match self.sync(entity, component, payload, version, deadline).await {
            Ok(stats) => {
                report.units_upserted = stats.upserted;
                report.units_deleted = stats.deleted;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(ticker = %entity.ticker, %component, error = %e.detail(), "index sync incomplete");
                report.status = ComponentStatus::PartiallyUpdated;
                report.detail = Some(e.detail());
            }
        }
        Ok(report)
    }

    /// Make the index hold exactly the units derivable from `payload`, then
    /// mark `version` as mirrored.
    pub async fn sync(
        &self,
        entity: &Entity,
        component: Component,
        payload: &Payload,
        version: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<SyncStats> {
        let ticker = entity.ticker.as_str();
        let units = build_units(ticker, component, &payload.body, &self.chunking);

        let mut records = Vec::with_capacity(units.len());
        for batch in units.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|u| u.text.clone()).collect();
            let vectors = bounded(Step::Embed, &self.timeouts, deadline, self.embedder.embed(&texts))
                .await?
                .map_err(|e| Error::embedding(format!("embed {}:{}", ticker, component), e))?;
            if vectors.len() != batch.len() {
                return Err(Error::embedding(
                    format!("embed {}:{}", ticker, component),
                    format!("{} vectors for {} inputs", vectors.len(), batch.len()),
                ));
            }
            for (unit, vector) in batch.iter().zip(vectors) {
                records.push(IndexRecord {
                    id: unit.id.clone(),
                    vector,
                    metadata: UnitMetadata {
                        ticker: ticker.to_string(),
                        component,
                        category: component.category(),
                        position: unit.position,
                        text: unit.text.clone(),
                        source: payload.source.clone(),
                        fetched_at: version,
                    },
                });
            }
        }

        let index_err = |what: &str, e: anyhow::Error| {
            Error::index(format!("{} {}:{}", what, ticker, component), e)
        };

        if !records.is_empty() {
            bounded(Step::Index, &self.timeouts, deadline, self.index.upsert(&records))
                .await?
                .map_err(|e| index_err("upsert", e))?;
        }

        let filter = IndexFilter::component(ticker, component);
        let existing = bounded(Step::Index, &self.timeouts, deadline, self.index.list_ids(&filter))
            .await?
            .map_err(|e| index_err("list", e))?;
        let current: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let orphans: Vec<String> = existing
            .into_iter()
            .filter(|id| !current.contains(id.as_str()))
            .collect();

        let deleted = if orphans.is_empty() {
            0
        } else {
            bounded(Step::Index, &self.timeouts, deadline, self.index.delete_by_ids(&orphans))
                .await?
                .map_err(|e| index_err("delete", e))?
        };

        bounded(
            Step::Storage,
            &self.timeouts,
            deadline,
            self.store.mark_indexed(entity, component, version),
        )
        .await?
        .map_err(|e| Error::storage(format!("mark {}:{}", ticker, component), e))?;

        debug!(ticker, %component, upserted = records.len(), deleted, "index in sync");
        Ok(SyncStats {
            upserted: records.len(),
            deleted,
        })
    }
}
