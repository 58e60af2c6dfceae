//! Per-call orchestration outcome.
//!
//! An [`OrchestrationResult`] is built once per `ensure_fresh` call and never
//! persisted. Each requested component gets exactly one [`ComponentReport`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Component, Market};
use crate::staleness::Staleness;

/// Final status of one component after an orchestration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Local data was within policy and already mirrored; nothing ran.
    Fresh,
    /// Fetched, persisted, and reindexed.
    Updated,
    /// Local data was fresh but its index mirror was incomplete; rebuilt from disk.
    Reindexed,
    /// The fetch failed; the previous artifact (if any) is untouched.
    FetchFailed,
    /// Persisted locally but the index mirror could not be completed.
    PartiallyUpdated,
}

impl ComponentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentStatus::Fresh => "fresh",
            ComponentStatus::Updated => "updated",
            ComponentStatus::Reindexed => "reindexed",
            ComponentStatus::FetchFailed => "fetch_failed",
            ComponentStatus::PartiallyUpdated => "partially_updated",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ComponentStatus::FetchFailed | ComponentStatus::PartiallyUpdated
        )
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentReport {
    pub component: Component,
    /// Classification before any work ran.
    pub staleness: Staleness,
    pub status: ComponentStatus,
    /// True when a new artifact was persisted during this call.
    pub updated: bool,
    pub units_upserted: usize,
    pub units_deleted: usize,
    /// Timestamp of the artifact on disk after the call.
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentReport {
    pub fn new(component: Component, staleness: Staleness, status: ComponentStatus) -> Self {
        Self {
            component,
            staleness,
            status,
            updated: false,
            units_upserted: 0,
            units_deleted: 0,
            last_modified: None,
            detail: None,
        }
    }
}

/// Aggregate output of one `ensure_fresh` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationResult {
    pub run_id: String,
    pub ticker: String,
    pub market: Market,
    pub components: BTreeMap<Component, ComponentReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OrchestrationResult {
    pub fn status(&self, component: Component) -> Option<ComponentStatus> {
        self.components.get(&component).map(|r| r.status)
    }

    fn with_status(&self, pred: impl Fn(ComponentStatus) -> bool) -> Vec<Component> {
        self.components
            .values()
            .filter(|r| pred(r.status))
            .map(|r| r.component)
            .collect()
    }

    /// Components that needed no work.
    pub fn fresh(&self) -> Vec<Component> {
        self.with_status(|s| s == ComponentStatus::Fresh)
    }

    /// Components that were fetched and persisted during this call.
    pub fn refetched(&self) -> Vec<Component> {
        self.components
            .values()
            .filter(|r| r.updated)
            .map(|r| r.component)
            .collect()
    }

    /// Components whose index mirror is complete after this call.
    pub fn indexed(&self) -> Vec<Component> {
        self.with_status(|s| {
            matches!(s, ComponentStatus::Updated | ComponentStatus::Reindexed)
        })
    }

    pub fn failed(&self) -> Vec<Component> {
        self.with_status(ComponentStatus::is_failure)
    }

    /// True when every requested component ended in a failure status.
    /// An empty result is never a total failure.
    pub fn all_failed(&self) -> bool {
        !self.components.is_empty() && self.components.values().all(|r| r.status.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }
}
