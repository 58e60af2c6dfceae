//! Local store inspection and staleness classification.
//!
//! ```text
//!   inspect(entity, component)
//!          │
//!    ┌─────┴──────┐
//!  Absent      Present { last_modified }
//!    │             │
//!  Missing   age = now − last_modified   (negative ages count as zero)
//!                  │
//!          age > max_age ? ── yes ──▶ Stale
//!                  │
//!                  no ─────────────▶ Fresh   (age == max_age is Fresh)
//! ```
//!
//! `force_refresh` short-circuits every component to `Stale` without touching
//! the store.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Component, Entity, Inspection};
use crate::policy::FreshnessPolicy;
use crate::store::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    Missing,
    Stale,
    Fresh,
}

impl Staleness {
    pub fn as_str(self) -> &'static str {
        match self {
            Staleness::Missing => "missing",
            Staleness::Stale => "stale",
            Staleness::Fresh => "fresh",
        }
    }

    pub fn needs_refresh(self) -> bool {
        self != Staleness::Fresh
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Age of an artifact at `now`, clamped at zero for timestamps in the future.
pub fn artifact_age(last_modified: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - last_modified).max(Duration::zero())
}

/// Fresh iff `age <= max_age`.
pub fn classify_age(last_modified: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> Staleness {
    if artifact_age(last_modified, now) > max_age {
        Staleness::Stale
    } else {
        Staleness::Fresh
    }
}

/// Local store inspector. Store I/O errors surface as `StorageUnavailable`.
#[derive(Clone)]
pub struct Inspector {
    store: Arc<dyn LocalStore>,
}

impl Inspector {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub async fn inspect(&self, entity: &Entity, component: Component) -> Result<Inspection> {
        self.store.inspect(entity, component).await.map_err(|e| {
            Error::storage(format!("inspect {}:{}", entity.ticker, component), e)
        })
    }
}

/// Policy lookup plus inspection.
#[derive(Clone)]
pub struct StalenessEvaluator {
    policy: FreshnessPolicy,
    inspector: Inspector,
}

impl StalenessEvaluator {
    pub fn new(policy: FreshnessPolicy, store: Arc<dyn LocalStore>) -> Self {
        Self {
            policy,
            inspector: Inspector::new(store),
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    /// Classify an inspection that has already been made.
    pub fn classify_inspection(
        &self,
        component: Component,
        inspection: &Inspection,
        now: DateTime<Utc>,
    ) -> Staleness {
        match inspection {
            Inspection::Absent => Staleness::Missing,
            Inspection::Present { last_modified, .. } => {
                classify_age(*last_modified, now, self.policy.max_age(component))
            }
        }
    }

    /// Inspect and classify one component.
    pub async fn classify(
        &self,
        entity: &Entity,
        component: Component,
        now: DateTime<Utc>,
        force_refresh: bool,
    ) -> Result<Staleness> {
        if force_refresh {
            return Ok(Staleness::Stale);
        }
        let inspection = self.inspector.inspect(entity, component).await?;
        Ok(self.classify_inspection(component, &inspection, now))
    }

    /// Freshness of every listed component, without refreshing anything.
    pub async fn report(
        &self,
        entity: &Entity,
        components: &[Component],
        now: DateTime<Utc>,
    ) -> Result<FreshnessReport> {
        let mut entries = Vec::with_capacity(components.len());
        for &component in components {
            let inspection = self.inspector.inspect(entity, component).await?;
            let max_age = self.policy.max_age(component);
            let staleness = self.classify_inspection(component, &inspection, now);
            let (last_modified, index_synced) = match inspection {
                Inspection::Absent => (None, false),
                Inspection::Present {
                    last_modified,
                    index_synced,
                } => (Some(last_modified), index_synced),
            };
            entries.push(FreshnessEntry {
                component,
                staleness,
                last_modified,
                age_secs: last_modified.map(|lm| artifact_age(lm, now).num_seconds()),
                max_age_secs: max_age.num_seconds(),
                index_synced,
            });
        }
        Ok(FreshnessReport {
            ticker: entity.ticker.clone(),
            generated_at: now,
            entries,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessEntry {
    pub component: Component,
    pub staleness: Staleness,
    pub last_modified: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub max_age_secs: i64,
    pub index_synced: bool,
}

impl FreshnessEntry {
    pub fn exists(&self) -> bool {
        self.last_modified.is_some()
    }
}

impl fmt::Display for FreshnessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(age) = self.age_secs else {
            return write!(f, "{}: NOT FOUND", self.component);
        };
        let state = match self.staleness {
            Staleness::Fresh => "FRESH",
            _ => "STALE",
        };
        write!(
            f,
            "{}: {} (age: {}, max: {})",
            self.component,
            state,
            format_secs(age),
            format_secs(self.max_age_secs)
        )?;
        if !self.index_synced {
            f.write_str(" [index out of sync]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessReport {
    pub ticker: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<FreshnessEntry>,
}

impl fmt::Display for FreshnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "  {}", entry)?;
        }
        Ok(())
    }
}

/// Compact duration: `2d4h`, `3h12m`, `5m`, `42s`.
pub fn format_secs(secs: i64) -> String {
    let secs = secs.max(0);
    let (d, h, m) = (secs / 86_400, (secs % 86_400) / 3_600, (secs % 3_600) / 60);
    match (d, h, m) {
        (0, 0, 0) => format!("{}s", secs),
        (0, 0, m) => format!("{}m", m),
        (0, h, 0) => format!("{}h", h),
        (0, h, m) => format!("{}h{}m", h, m),
        (d, 0, _) => format!("{}d", d),
        (d, h, _) => format!("{}d{}h", d, h),
    }
}
