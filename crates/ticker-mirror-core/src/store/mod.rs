//! Durable local store abstraction.
//!
//! The local store is the single source of truth: every index unit is
//! derived from the artifact held here, and the control plane never writes
//! to the index without first persisting (or confirming) that artifact.
//!
//! Each artifact carries an `indexed_version` marker recording which
//! `fetched_at` was last mirrored into the index. A write always clears the
//! marker; the pipeline sets it after a successful upsert and reconcile.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Component, Entity, Inspection, LocalArtifact, Payload};

/// One row of the store listing used by status and stats output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactSummary {
    pub ticker: String,
    pub component: Component,
    pub fetched_at: DateTime<Utc>,
    pub index_synced: bool,
    pub bytes: usize,
}

/// Abstract local store backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`read`](LocalStore::read) | Load the artifact for (entity, component) |
/// | [`inspect`](LocalStore::inspect) | Existence + last-modified, without the body |
/// | [`write`](LocalStore::write) | Replace the artifact, returning its timestamp |
/// | [`mark_indexed`](LocalStore::mark_indexed) | Record that a version is mirrored |
/// | [`list`](LocalStore::list) | Summaries of stored artifacts |
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn read(&self, entity: &Entity, component: Component) -> Result<Option<LocalArtifact>>;

    async fn inspect(&self, entity: &Entity, component: Component) -> Result<Inspection> {
        Ok(match self.read(entity, component).await? {
            None => Inspection::Absent,
            Some(artifact) => Inspection::Present {
                last_modified: artifact.fetched_at,
                index_synced: artifact.is_index_synced(),
            },
        })
    }

    /// Replace the artifact for (entity, component). The write must be
    /// durable when this returns. Returns the stored timestamp (`at`).
    async fn write(
        &self,
        entity: &Entity,
        component: Component,
        payload: &Payload,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;

    /// Mark `version` as mirrored. A no-op when the stored artifact is no
    /// longer that version.
    async fn mark_indexed(
        &self,
        entity: &Entity,
        component: Component,
        version: DateTime<Utc>,
    ) -> Result<()>;

    /// Summaries for one ticker, or for every ticker when `None`.
    async fn list(&self, ticker: Option<&str>) -> Result<Vec<ArtifactSummary>>;
}
