//! Wires configuration into the concrete SQLite-backed engine.

use std::sync::Arc;

use anyhow::Result;

use ticker_mirror_core::clock::{Clock, SystemClock};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::fetchers::build_fetchers;
use crate::manager::ControlPlane;
use crate::migrate::{migrate_index, migrate_store};
use crate::orchestrate::Orchestrator;
use crate::pipeline::Pipeline;
use crate::reader::InferenceReader;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_store::SqliteLocalStore;

pub struct App {
    pub store: Arc<SqliteLocalStore>,
    pub index: Arc<SqliteIndex>,
    pub orchestrator: Orchestrator,
}

impl App {
    /// Open both databases (running migrations) and assemble the engine.
    pub async fn open(config: &Config) -> Result<Self> {
        let store_pool = db::connect(&config.db.path).await?;
        migrate_store(&store_pool).await?;
        let index_pool = db::connect(&config.index.path).await?;
        migrate_index(&index_pool).await?;

        let store = Arc::new(SqliteLocalStore::new(store_pool));
        let index = Arc::new(SqliteIndex::new(index_pool));
        let embedder = create_embedder(&config.embedding)?;
        let fetchers = build_fetchers(&config.fetchers)?;
        let timeouts = config.step_timeouts();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let pipeline = Pipeline::new(
            fetchers,
            store.clone(),
            embedder.clone(),
            index.clone(),
            clock.clone(),
        )
        .with_chunking(config.chunking.params())
        .with_batch_size(config.embedding.batch_size)
        .with_timeouts(timeouts);

        let control = ControlPlane::new(
            Arc::new(config.registry()?),
            config.freshness.policy()?,
            store.clone(),
            pipeline,
            clock,
        );
        let reader = InferenceReader::new(embedder, index.clone()).with_timeouts(timeouts);

        Ok(Self {
            store,
            index,
            orchestrator: Orchestrator::new(control, reader, config.retrieval.max_context_chars),
        })
    }

    pub fn control(&self) -> &ControlPlane {
        self.orchestrator.control()
    }

    pub fn reader(&self) -> &InferenceReader {
        self.orchestrator.reader()
    }
}
