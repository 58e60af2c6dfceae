//! In-memory [`LocalStore`] for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Component, Entity, LocalArtifact, Payload};

use super::{ArtifactSummary, LocalStore};

type Key = (String, Component);

#[derive(Default)]
pub struct InMemoryLocalStore {
    artifacts: RwLock<BTreeMap<Key, LocalArtifact>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored artifact, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<Key, LocalArtifact> {
        self.artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Seed an artifact directly, bypassing the control plane.
    pub fn insert(&self, artifact: LocalArtifact) {
        let key = (artifact.ticker.clone(), artifact.component);
        self.artifacts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, artifact);
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn read(&self, entity: &Entity, component: Component) -> Result<Option<LocalArtifact>> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        Ok(artifacts.get(&(entity.ticker.clone(), component)).cloned())
    }

    async fn write(
        &self,
        entity: &Entity,
        component: Component,
        payload: &Payload,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.insert(LocalArtifact {
            ticker: entity.ticker.clone(),
            component,
            payload: payload.clone(),
            fetched_at: at,
            indexed_version: None,
        });
        Ok(at)
    }

    async fn mark_indexed(
        &self,
        entity: &Entity,
        component: Component,
        version: DateTime<Utc>,
    ) -> Result<()> {
        let mut artifacts = self.artifacts.write().unwrap_or_else(|e| e.into_inner());
        if let Some(artifact) = artifacts.get_mut(&(entity.ticker.clone(), component)) {
            if artifact.fetched_at == version {
                artifact.indexed_version = Some(version);
            }
        }
        Ok(())
    }

    async fn list(&self, ticker: Option<&str>) -> Result<Vec<ArtifactSummary>> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        Ok(artifacts
            .values()
            .filter(|a| ticker.map_or(true, |t| a.ticker == t))
            .map(|a| ArtifactSummary {
                ticker: a.ticker.clone(),
                component: a.component,
                fetched_at: a.fetched_at,
                index_synced: a.is_index_synced(),
                bytes: a.payload.body.len(),
            })
            .collect())
    }
}
