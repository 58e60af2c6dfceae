//! Control-plane manager: the only writer of the local store and the index.
//!
//! [`ControlPlane::ensure_fresh`] resolves the entity once, then handles every
//! requested component in its own task:
//!
//! ```text
//!  classify ──Fresh + synced──────────────────────────────▶ fresh
//!     │
//!     ├─Fresh, index out of sync ─▶ lock ─▶ re-inspect ─▶ reindex from disk
//!     │
//!     └─Missing / Stale ──────────▶ lock ─▶ re-inspect ─▶ fetch pipeline
//! ```
//!
//! The re-inspection after taking the per-key lock lets a caller that queued
//! behind a concurrent run for the same key report `fresh` instead of
//! fetching a second time.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

use ticker_mirror_core::clock::Clock;
use ticker_mirror_core::models::{Component, DataChecklist, Entity, ExternalId, Inspection};
use ticker_mirror_core::outcome::{ComponentReport, ComponentStatus, OrchestrationResult};
use ticker_mirror_core::policy::FreshnessPolicy;
use ticker_mirror_core::registry::EntityRegistry;
use ticker_mirror_core::staleness::{FreshnessReport, Staleness, StalenessEvaluator};
use ticker_mirror_core::store::LocalStore;
use ticker_mirror_core::{Error, Result, Step};

use crate::locks::KeyedLocks;
use crate::pipeline::{bounded, Pipeline};

#[derive(Clone)]
pub struct ControlPlane {
    registry: Arc<EntityRegistry>,
    evaluator: StalenessEvaluator,
    pipeline: Arc<Pipeline>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
}

impl ControlPlane {
    pub fn new(
        registry: Arc<EntityRegistry>,
        policy: FreshnessPolicy,
        store: Arc<dyn LocalStore>,
        pipeline: Pipeline,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            evaluator: StalenessEvaluator::new(policy, store),
            pipeline: Arc::new(pipeline),
            locks: Arc::new(KeyedLocks::new()),
            clock,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        self.evaluator.policy()
    }

    /// Bring every component in `checklist` up to policy for one entity.
    ///
    /// Fails fast on unresolvable entities (before any storage or index
    /// access) and on storage errors. Component-scoped failures are recorded
    /// in the result; if every requested component failed the call returns
    /// [`Error::AllComponentsFailed`] carrying the full report.
    #[tracing::instrument(skip(self, checklist, external, deadline))]
    pub async fn ensure_fresh(
        &self,
        identifier: &str,
        checklist: &DataChecklist,
        force_refresh: bool,
        external: Option<&ExternalId>,
        deadline: Option<Instant>,
    ) -> Result<OrchestrationResult> {
        let entity = self.registry.resolve(identifier, external)?;
        let started_at = self.clock.now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let components = checklist.components();
        info!(%run_id, ticker = %entity.ticker, components = components.len(), "ensure_fresh");

        let mut tasks = JoinSet::new();
        for component in components {
            let this = self.clone();
            let entity = entity.clone();
            tasks.spawn(async move {
                let report = this
                    .ensure_component(&entity, component, force_refresh, deadline)
                    .await;
                (component, report)
            });
        }

        let mut reports = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (component, report) = match joined {
                Ok(done) => done,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => continue,
            };
            match report {
                Ok(report) => {
                    reports.insert(component, report);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        let result = OrchestrationResult {
            run_id,
            ticker: entity.ticker.clone(),
            market: entity.market,
            components: reports,
            started_at,
            finished_at: self.clock.now(),
        };
        info!(
            ticker = %result.ticker,
            fresh = result.fresh().len(),
            refetched = result.refetched().len(),
            failed = result.failed().len(),
            "ensure_fresh done"
        );

        if result.all_failed() {
            return Err(Error::AllComponentsFailed {
                ticker: result.ticker.clone(),
                report: Box::new(result),
            });
        }
        Ok(result)
    }

    async fn ensure_component(
        &self,
        entity: &Entity,
        component: Component,
        force_refresh: bool,
        deadline: Option<Instant>,
    ) -> Result<ComponentReport> {
        let before = self.inspect(entity, component, deadline).await?;
        let staleness = if force_refresh {
            Staleness::Stale
        } else {
            let staleness =
                self.evaluator
                    .classify_inspection(component, &before, self.clock.now());
            if let Some(report) = fresh_report(component, staleness, &before) {
                return Ok(report);
            }
            staleness
        };
        debug!(ticker = %entity.ticker, %component, %staleness, "needs work");

        let _guard = self.locks.lock(&entity.ticker, component).await;

        let current = self.inspect(entity, component, deadline).await?;
        if let Inspection::Present {
            last_modified,
            index_synced: true,
        } = current
        {
            // a forced call only yields to a write that landed while it waited
            let settled = if force_refresh {
                before.last_modified() != Some(last_modified)
            } else {
                self.evaluator
                    .classify_inspection(component, &current, self.clock.now())
                    == Staleness::Fresh
            };
            if settled {
                debug!(ticker = %entity.ticker, %component, "refreshed by a concurrent run");
                let mut report = ComponentReport::new(component, staleness, ComponentStatus::Fresh);
                report.last_modified = Some(last_modified);
                return Ok(report);
            }
        }

        let fresh_on_disk = !force_refresh
            && self
                .evaluator
                .classify_inspection(component, &current, self.clock.now())
                == Staleness::Fresh;
        if fresh_on_disk {
            self.pipeline
                .reindex(entity, component, staleness, deadline)
                .await
        } else {
            self.pipeline
                .refresh(entity, component, staleness, deadline)
                .await
        }
    }

    async fn inspect(
        &self,
        entity: &Entity,
        component: Component,
        deadline: Option<Instant>,
    ) -> Result<Inspection> {
        bounded(
            Step::Storage,
            self.pipeline.timeouts(),
            deadline,
            self.evaluator.inspector().inspect(entity, component),
        )
        .await?
    }

    /// Freshness of every component for one entity. Read-only.
    pub async fn status(
        &self,
        identifier: &str,
        external: Option<&ExternalId>,
    ) -> Result<FreshnessReport> {
        let entity = self.registry.resolve(identifier, external)?;
        self.evaluator
            .report(&entity, &Component::ALL, self.clock.now())
            .await
    }
}

/// A Fresh component whose index mirror is complete needs no work.
fn fresh_report(
    component: Component,
    staleness: Staleness,
    inspection: &Inspection,
) -> Option<ComponentReport> {
    match (staleness, inspection) {
        (
            Staleness::Fresh,
            Inspection::Present {
                last_modified,
                index_synced: true,
            },
        ) => {
            let mut report = ComponentReport::new(component, staleness, ComponentStatus::Fresh);
            report.last_modified = Some(*last_modified);
            Some(report)
        }
        _ => None,
    }
}
