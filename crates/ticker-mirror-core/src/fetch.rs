//! External fetcher trait and the per-component fetcher table.
//!
//! Each [`Component`] is bound to exactly one [`Fetcher`]; the pipeline
//! dispatches through the table by enum key.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Component, Entity, Payload};

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short name used in logs (e.g. `"sec-edgar"`).
    fn name(&self) -> &str;

    async fn fetch(&self, entity: &Entity, component: Component) -> Result<Payload>;
}

#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: BTreeMap<Component, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `fetcher` to `component`, replacing any previous binding.
    pub fn with(mut self, component: Component, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.insert(component, fetcher);
        self
    }

    /// Bind one fetcher to several components.
    pub fn with_all(
        mut self,
        components: impl IntoIterator<Item = Component>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        for c in components {
            self.fetchers.insert(c, fetcher.clone());
        }
        self
    }

    pub fn get(&self, component: Component) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(&component).cloned()
    }

    pub fn components(&self) -> impl Iterator<Item = Component> + '_ {
        self.fetchers.keys().copied()
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.fetchers.iter().map(|(c, fetcher)| (c.as_str(), fetcher.name())))
            .finish()
    }
}
