//! End-to-end tests for the control plane and the inference reader.
//!
//! Everything runs against the in-memory store and index from
//! `ticker-mirror-core`, a deterministic hashed embedder, and a manual clock,
//! so freshness ages and stable ids are exact.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use ticker_mirror::manager::ControlPlane;
use ticker_mirror::orchestrate::Orchestrator;
use ticker_mirror::pipeline::{Pipeline, StepTimeouts};
use ticker_mirror::reader::InferenceReader;
use ticker_mirror_core::chunk::{build_units, ChunkingParams};
use ticker_mirror_core::clock::ManualClock;
use ticker_mirror_core::embedding::{Embedder, HashedEmbedder};
use ticker_mirror_core::fetch::{Fetcher, FetcherRegistry};
use ticker_mirror_core::index::memory::InMemoryIndex;
use ticker_mirror_core::index::{IndexReader, IndexWriter};
use ticker_mirror_core::models::{
    Component, DataCategory, DataChecklist, Entity, IndexFilter, IndexMatch, IndexRecord,
    LocalArtifact, Payload,
};
use ticker_mirror_core::outcome::ComponentStatus;
use ticker_mirror_core::policy::FreshnessPolicy;
use ticker_mirror_core::registry::EntityRegistry;
use ticker_mirror_core::staleness::Staleness;
use ticker_mirror_core::store::memory::InMemoryLocalStore;
use ticker_mirror_core::store::{ArtifactSummary, LocalStore};
use ticker_mirror_core::Error;

// ─── Test Fetcher ───────────────────────────────────────────────────

/// Serves a scripted body per component and counts every call.
struct ScriptedFetcher {
    bodies: Mutex<HashMap<Component, String>>,
    failing: Mutex<HashSet<Component>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn new() -> Self {
        let mut bodies = HashMap::new();
        bodies.insert(Component::Price, price_body(&[("2026-03-02", 227.5), ("2026-02-27", 225.1)]));
        bodies.insert(
            Component::Info,
            r#"{"name": "Apple Inc.", "sector": "Technology", "employees": 161000}"#.to_string(),
        );
        bodies.insert(
            Component::IncomeStmt,
            r#"[{"period": "2025", "revenue": 416161, "net_income": 112010}]"#.to_string(),
        );
        bodies.insert(
            Component::Unstructured,
            "Apple designs and sells smartphones, personal computers, and wearables.\n\n\
             Services revenue grew on the App Store and cloud subscriptions.\n\n\
             The company faces supply chain concentration risk in Asia."
                .to_string(),
        );
        Self {
            bodies: Mutex::new(bodies),
            failing: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    fn set_body(&self, component: Component, body: String) {
        self.bodies.lock().unwrap().insert(component, body);
    }

    fn fail(&self, component: Component) {
        self.failing.lock().unwrap().insert(component);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, _entity: &Entity, component: Component) -> Result<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&component) {
            bail!("upstream returned 503 for {}", component);
        }
        let body = self.bodies.lock().unwrap().get(&component).cloned();
        match body {
            Some(body) => Ok(Payload::text("scripted", body)),
            None => bail!("no scripted body for {}", component),
        }
    }
}

fn price_body(rows: &[(&str, f64)]) -> String {
    let rows: Vec<serde_json::Value> = rows
        .iter()
        .map(|(date, close)| serde_json::json!({ "date": date, "close": close }))
        .collect();
    serde_json::Value::Array(rows).to_string()
}

// ─── Test Embedder ──────────────────────────────────────────────────

/// Hashed embedder that can be switched into a failing mode.
struct FlakyEmbedder {
    inner: HashedEmbedder,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    fn new() -> Self {
        Self {
            inner: HashedEmbedder::new(64),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky-hashed"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("embedding service unavailable");
        }
        self.inner.embed(texts).await
    }
}

// ─── Counting Collaborators ─────────────────────────────────────────

/// Local store that counts calls and can be made unavailable.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryLocalStore,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl CountingStore {
    fn touch(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            bail!("database is locked");
        }
        Ok(())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStore for CountingStore {
    async fn read(&self, entity: &Entity, component: Component) -> Result<Option<LocalArtifact>> {
        self.touch()?;
        self.inner.read(entity, component).await
    }

    async fn write(
        &self,
        entity: &Entity,
        component: Component,
        payload: &Payload,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.touch()?;
        self.inner.write(entity, component, payload, at).await
    }

    async fn mark_indexed(
        &self,
        entity: &Entity,
        component: Component,
        version: DateTime<Utc>,
    ) -> Result<()> {
        self.touch()?;
        self.inner.mark_indexed(entity, component, version).await
    }

    async fn list(&self, ticker: Option<&str>) -> Result<Vec<ArtifactSummary>> {
        self.touch()?;
        self.inner.list(ticker).await
    }
}

/// Index that counts reads and writes separately. Deletes can be switched
/// off to fail a sync after its upsert.
#[derive(Default)]
struct CountingIndex {
    inner: InMemoryIndex,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failing_deletes: AtomicBool,
}

impl CountingIndex {
    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn ids(&self, ticker: &str, component: Component) -> BTreeSet<String> {
        self.inner
            .snapshot()
            .into_values()
            .filter(|r| r.metadata.ticker == ticker && r.metadata.component == component)
            .map(|r| r.id)
            .collect()
    }
}

#[async_trait]
impl IndexReader for CountingIndex {
    async fn query(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        top_k: usize,
    ) -> Result<Vec<IndexMatch>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.query(vector, filter, top_k).await
    }

    async fn list_ids(&self, filter: &IndexFilter) -> Result<Vec<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_ids(filter).await
    }

    async fn count(&self, filter: Option<&IndexFilter>) -> Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.count(filter).await
    }
}

#[async_trait]
impl IndexWriter for CountingIndex {
    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(records).await
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing_deletes.load(Ordering::SeqCst) {
            bail!("index connection reset");
        }
        self.inner.delete_by_ids(ids).await
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct Harness {
    store: Arc<CountingStore>,
    index: Arc<CountingIndex>,
    fetcher: Arc<ScriptedFetcher>,
    embedder: Arc<FlakyEmbedder>,
    clock: Arc<ManualClock>,
    control: ControlPlane,
    reader: InferenceReader,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 21, 0, 0).unwrap()
}

fn harness() -> Harness {
    harness_with(StepTimeouts::default())
}

fn harness_with(timeouts: StepTimeouts) -> Harness {
    let store = Arc::new(CountingStore::default());
    let index = Arc::new(CountingIndex::default());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let embedder = Arc::new(FlakyEmbedder::new());
    let clock = Arc::new(ManualClock::new(t0()));

    let fetchers = FetcherRegistry::new().with_all(Component::ALL, fetcher.clone());
    let pipeline = Pipeline::new(
        fetchers,
        store.clone(),
        embedder.clone(),
        index.clone(),
        clock.clone(),
    )
    .with_timeouts(timeouts);
    let control = ControlPlane::new(
        Arc::new(EntityRegistry::builtin()),
        FreshnessPolicy::default(),
        store.clone(),
        pipeline,
        clock.clone(),
    );
    let reader = InferenceReader::new(embedder.clone(), index.clone()).with_timeouts(timeouts);

    Harness {
        store,
        index,
        fetcher,
        embedder,
        clock,
        control,
        reader,
    }
}

fn price_only() -> DataChecklist {
    DataChecklist::only(Component::Price)
}

fn expected_ids(h: &Harness, component: Component) -> BTreeSet<String> {
    let body = h.fetcher.bodies.lock().unwrap()[&component].clone();
    build_units("AAPL", component, &body, &ChunkingParams::default())
        .into_iter()
        .map(|u| u.id)
        .collect()
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_store_price_is_fetched_and_mirrored() {
    let h = harness();

    let result = h
        .control
        .ensure_fresh("aapl", &price_only(), false, None, None)
        .await
        .unwrap();

    assert_eq!(result.ticker, "AAPL");
    let report = &result.components[&Component::Price];
    assert_eq!(report.staleness, Staleness::Missing);
    assert_eq!(report.status, ComponentStatus::Updated);
    assert!(report.updated);
    assert_eq!(report.units_upserted, 2);
    assert_eq!(report.units_deleted, 0);
    assert_eq!(report.last_modified, Some(t0()));

    let ids = h.index.ids("AAPL", Component::Price);
    assert!(ids.iter().next().unwrap().starts_with("AAPL:price:0000:"));
    assert_eq!(ids, expected_ids(&h, Component::Price));

    let stored = h.store.inner.snapshot();
    let artifact = &stored[&("AAPL".to_string(), Component::Price)];
    assert!(artifact.is_index_synced());
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_fresh_component_does_no_work() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();
    let writes = h.index.writes();

    h.clock.advance(chrono::Duration::hours(1));
    let result = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    assert_eq!(result.status(Component::Price), Some(ComponentStatus::Fresh));
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.index.writes(), writes);
}

#[tokio::test]
async fn test_freshness_boundary_is_inclusive() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    h.clock.set(t0() + chrono::Duration::hours(24));
    let at_limit = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();
    assert_eq!(at_limit.status(Component::Price), Some(ComponentStatus::Fresh));
    assert_eq!(h.fetcher.calls(), 1);

    h.clock
        .set(t0() + chrono::Duration::hours(24) + chrono::Duration::seconds(1));
    let past_limit = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();
    let report = &past_limit.components[&Component::Price];
    assert_eq!(report.staleness, Staleness::Stale);
    assert_eq!(report.status, ComponentStatus::Updated);
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_unchanged_content_keeps_ids_and_deletes_nothing() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();
    let before = h.index.ids("AAPL", Component::Price);

    h.clock.advance(chrono::Duration::days(2));
    let result = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    let report = &result.components[&Component::Price];
    assert_eq!(report.status, ComponentStatus::Updated);
    assert_eq!(report.units_deleted, 0);
    assert_eq!(h.index.ids("AAPL", Component::Price), before);
}

#[tokio::test]
async fn test_changed_content_reconciles_orphans() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &DataChecklist::new([Component::Price, Component::Info], false), false, None, None)
        .await
        .unwrap();
    let info_before = h.index.ids("AAPL", Component::Info);
    assert_eq!(h.index.ids("AAPL", Component::Price).len(), 2);

    h.fetcher
        .set_body(Component::Price, price_body(&[("2026-03-03", 230.0)]));
    h.clock.advance(chrono::Duration::seconds(1));
    let result = h
        .control
        .ensure_fresh("AAPL", &price_only(), true, None, None)
        .await
        .unwrap();

    let report = &result.components[&Component::Price];
    assert_eq!(report.status, ComponentStatus::Updated);
    assert_eq!(report.units_upserted, 1);
    assert_eq!(report.units_deleted, 2);
    assert_eq!(
        h.index.ids("AAPL", Component::Price),
        expected_ids(&h, Component::Price)
    );
    assert_eq!(h.index.ids("AAPL", Component::Info), info_before);
}

#[tokio::test]
async fn test_force_refresh_refetches_fresh_data() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    h.clock.advance(chrono::Duration::minutes(1));
    let result = h
        .control
        .ensure_fresh("AAPL", &price_only(), true, None, None)
        .await
        .unwrap();

    let report = &result.components[&Component::Price];
    assert_eq!(report.staleness, Staleness::Stale);
    assert_eq!(report.status, ComponentStatus::Updated);
    assert_eq!(h.fetcher.calls(), 2);
    assert_eq!(
        report.last_modified,
        Some(t0() + chrono::Duration::minutes(1))
    );
}

#[tokio::test]
async fn test_force_refresh_at_same_instant() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    let result = h
        .control
        .ensure_fresh("AAPL", &price_only(), true, None, None)
        .await
        .unwrap();

    assert_eq!(result.status(Component::Price), Some(ComponentStatus::Updated));
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_force_refresh_after_clock_steps_back() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    h.clock.set(t0() - chrono::Duration::hours(1));
    let result = h
        .control
        .ensure_fresh("AAPL", &price_only(), true, None, None)
        .await
        .unwrap();

    let report = &result.components[&Component::Price];
    assert_eq!(report.status, ComponentStatus::Updated);
    assert_eq!(h.fetcher.calls(), 2);
    assert_eq!(report.last_modified, Some(t0() - chrono::Duration::hours(1)));
    assert_eq!(
        h.index.ids("AAPL", Component::Price),
        expected_ids(&h, Component::Price)
    );
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_component() {
    let h = harness();
    h.fetcher.fail(Component::IncomeStmt);

    let checklist = DataChecklist::new([Component::Price, Component::IncomeStmt], false);
    let result = h
        .control
        .ensure_fresh("AAPL", &checklist, false, None, None)
        .await
        .unwrap();

    assert_eq!(result.status(Component::Price), Some(ComponentStatus::Updated));
    let failed = &result.components[&Component::IncomeStmt];
    assert_eq!(failed.status, ComponentStatus::FetchFailed);
    assert!(failed.detail.as_deref().unwrap().contains("503"));
    assert!(!h
        .store
        .inner
        .snapshot()
        .contains_key(&("AAPL".to_string(), Component::IncomeStmt)));
    assert!(h.index.ids("AAPL", Component::IncomeStmt).is_empty());
    assert!(!result.all_failed());
}

#[tokio::test]
async fn test_fetch_failure_keeps_previous_artifact() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();
    let before = h.store.inner.snapshot();
    let ids = h.index.ids("AAPL", Component::Price);

    h.fetcher.fail(Component::Price);
    h.clock.advance(chrono::Duration::days(3));
    let err = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap_err();

    match err {
        Error::AllComponentsFailed { ticker, report } => {
            assert_eq!(ticker, "AAPL");
            assert_eq!(report.status(Component::Price), Some(ComponentStatus::FetchFailed));
        }
        other => panic!("expected AllComponentsFailed, got {other:?}"),
    }
    assert_eq!(h.store.inner.snapshot(), before);
    assert_eq!(h.index.ids("AAPL", Component::Price), ids);
}

#[tokio::test]
async fn test_unresolved_entity_touches_nothing() {
    let h = harness();

    let err = h
        .control
        .ensure_fresh("XYZ", &DataChecklist::all(), false, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnresolvedEntity { .. }));
    assert_eq!(h.store.calls(), 0);
    assert_eq!(h.index.reads() + h.index.writes(), 0);
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_storage_failure_is_fatal() {
    let h = harness();
    h.store.down.store(true, Ordering::SeqCst);

    let err = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StorageUnavailable { .. }));
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_index_failure_then_reindex_without_refetch() {
    let h = harness();
    h.embedder.failing.store(true, Ordering::SeqCst);

    let err = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap_err();
    let Error::AllComponentsFailed { report, .. } = err else {
        panic!("expected AllComponentsFailed");
    };
    let partial = &report.components[&Component::Price];
    assert_eq!(partial.status, ComponentStatus::PartiallyUpdated);
    assert!(partial.updated);

    let stored = h.store.inner.snapshot();
    let artifact = &stored[&("AAPL".to_string(), Component::Price)];
    assert!(!artifact.is_index_synced());
    assert!(h.index.ids("AAPL", Component::Price).is_empty());

    h.embedder.failing.store(false, Ordering::SeqCst);
    let result = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    let report = &result.components[&Component::Price];
    assert_eq!(report.staleness, Staleness::Fresh);
    assert_eq!(report.status, ComponentStatus::Reindexed);
    assert!(!report.updated);
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(
        h.index.ids("AAPL", Component::Price),
        expected_ids(&h, Component::Price)
    );
    let stored = h.store.inner.snapshot();
    assert!(stored[&("AAPL".to_string(), Component::Price)].is_index_synced());
}

#[tokio::test]
async fn test_failed_reconcile_is_repaired_from_disk() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();
    let old_ids = h.index.ids("AAPL", Component::Price);
    assert_eq!(old_ids.len(), 2);

    h.fetcher
        .set_body(Component::Price, price_body(&[("2026-03-03", 230.0)]));
    h.index.failing_deletes.store(true, Ordering::SeqCst);
    h.clock.advance(chrono::Duration::seconds(1));
    let err = h
        .control
        .ensure_fresh("AAPL", &price_only(), true, None, None)
        .await
        .unwrap_err();

    let Error::AllComponentsFailed { report, .. } = err else {
        panic!("expected AllComponentsFailed");
    };
    let partial = &report.components[&Component::Price];
    assert_eq!(partial.status, ComponentStatus::PartiallyUpdated);
    assert!(partial.updated);
    // new units landed next to the orphans they replace
    let mixed = h.index.ids("AAPL", Component::Price);
    assert_eq!(mixed.len(), 3);
    assert!(old_ids.is_subset(&mixed));

    h.index.failing_deletes.store(false, Ordering::SeqCst);
    let result = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    let report = &result.components[&Component::Price];
    assert_eq!(report.status, ComponentStatus::Reindexed);
    assert_eq!(report.units_deleted, 2);
    assert_eq!(h.fetcher.calls(), 2);
    assert_eq!(
        h.index.ids("AAPL", Component::Price),
        expected_ids(&h, Component::Price)
    );
    let stored = h.store.inner.snapshot();
    assert!(stored[&("AAPL".to_string(), Component::Price)].is_index_synced());
}

#[tokio::test]
async fn test_every_component_failing_is_an_error() {
    let h = harness();
    h.fetcher.fail(Component::Price);
    h.fetcher.fail(Component::Info);

    let checklist = DataChecklist::new([Component::Price, Component::Info], false);
    let err = h
        .control
        .ensure_fresh("AAPL", &checklist, false, None, None)
        .await
        .unwrap_err();

    let Error::AllComponentsFailed { report, .. } = err else {
        panic!("expected AllComponentsFailed");
    };
    assert_eq!(report.components.len(), 2);
    assert_eq!(report.failed(), vec![Component::Price, Component::Info]);
}

#[tokio::test]
async fn test_empty_checklist_is_a_no_op() {
    let h = harness();

    let result = h
        .control
        .ensure_fresh("AAPL", &DataChecklist::new([], false), false, None, None)
        .await
        .unwrap();

    assert!(result.components.is_empty());
    assert_eq!(h.fetcher.calls(), 0);
    assert_eq!(h.store.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_fetch_once() {
    let h = harness();
    h.fetcher.set_delay(Duration::from_millis(50));

    let a = h.control.clone();
    let b = h.control.clone();
    let first =
        tokio::spawn(async move { a.ensure_fresh("AAPL", &price_only(), false, None, None).await });
    let second =
        tokio::spawn(async move { b.ensure_fresh("AAPL", &price_only(), false, None, None).await });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(h.fetcher.calls(), 1);
    let mut statuses = vec![
        first.status(Component::Price).unwrap(),
        second.status(Component::Price).unwrap(),
    ];
    statuses.sort_by_key(|s| s.as_str());
    assert_eq!(statuses, vec![ComponentStatus::Fresh, ComponentStatus::Updated]);
    assert_eq!(
        h.index.ids("AAPL", Component::Price),
        expected_ids(&h, Component::Price)
    );
}

#[tokio::test]
async fn test_deadline_bounds_a_slow_fetch() {
    let h = harness();
    h.fetcher.set_delay(Duration::from_secs(5));

    let deadline = Instant::now() + Duration::from_millis(50);
    let err = h
        .control
        .ensure_fresh("AAPL", &price_only(), false, None, Some(deadline))
        .await
        .unwrap_err();

    let Error::AllComponentsFailed { report, .. } = err else {
        panic!("expected AllComponentsFailed");
    };
    let failed = &report.components[&Component::Price];
    assert_eq!(failed.status, ComponentStatus::FetchFailed);
    assert!(failed.detail.as_deref().unwrap().contains("timed out"));
    assert!(h.store.inner.snapshot().is_empty());
}

#[tokio::test]
async fn test_fetch_step_budget_applies_without_deadline() {
    let timeouts = StepTimeouts {
        fetch: Duration::from_millis(50),
        ..StepTimeouts::default()
    };
    let h = harness_with(timeouts);
    h.fetcher.set_delay(Duration::from_secs(5));

    let checklist = DataChecklist::new([Component::Price, Component::Info], false);
    let err = h
        .control
        .ensure_fresh("AAPL", &checklist, false, None, None)
        .await
        .unwrap_err();

    let Error::AllComponentsFailed { report, .. } = err else {
        panic!("expected AllComponentsFailed");
    };
    assert_eq!(report.failed().len(), 2);
}

#[tokio::test]
async fn test_retrieve_is_read_only() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &DataChecklist::all(), false, None, None)
        .await
        .unwrap();

    let store_before = h.store.inner.snapshot();
    let index_before = h.index.inner.snapshot();
    let store_calls = h.store.calls();
    let writes = h.index.writes();

    let result = h
        .reader
        .retrieve("aapl", "services revenue App Store", 3, None)
        .await
        .unwrap();

    assert_eq!(result.ticker, "AAPL");
    assert!(result.has_results());
    assert!(result.matches.len() <= 3);
    assert!(result.matches.iter().all(|m| m.metadata.ticker == "AAPL"));
    assert!(result
        .matches
        .iter()
        .any(|m| m.metadata.text.contains("Services revenue")));

    assert_eq!(h.store.inner.snapshot(), store_before);
    assert_eq!(h.index.inner.snapshot(), index_before);
    assert_eq!(h.store.calls(), store_calls);
    assert_eq!(h.index.writes(), writes);
}

#[tokio::test]
async fn test_retrieve_category_filter() {
    let h = harness();
    h.control
        .ensure_fresh("AAPL", &DataChecklist::all(), false, None, None)
        .await
        .unwrap();

    let narrative = h
        .reader
        .retrieve("AAPL", "revenue", 10, Some(DataCategory::Narrative))
        .await
        .unwrap();
    assert!(narrative.has_results());
    assert!(narrative
        .matches
        .iter()
        .all(|m| m.metadata.component == Component::Unstructured));

    let numeric = h
        .reader
        .retrieve("AAPL", "revenue", 10, Some(DataCategory::NarratedNumeric))
        .await
        .unwrap();
    assert!(numeric
        .matches
        .iter()
        .all(|m| m.metadata.component.is_structured()));
}

#[tokio::test]
async fn test_retrieve_unknown_ticker_and_blank_query() {
    let h = harness();

    let none = h.reader.retrieve("MSFT", "revenue", 5, None).await.unwrap();
    assert_eq!(none.ticker, "MSFT");
    assert!(!none.has_results());

    let embeds = h.embedder.calls.load(Ordering::SeqCst);
    let blank = h.reader.retrieve("AAPL", "   ", 5, None).await.unwrap();
    assert!(!blank.has_results());
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embeds);
}

// ─── Orchestrate ────────────────────────────────────────────────────

fn orchestrator(h: &Harness) -> Orchestrator {
    Orchestrator::new(h.control.clone(), h.reader.clone(), 10_000)
}

#[tokio::test]
async fn test_orchestrate_ensures_then_retrieves() {
    let h = harness();
    let orchestrator = orchestrator(&h);

    let report = orchestrator
        .orchestrate(
            "aapl",
            "supply chain risk",
            &DataChecklist::new(
                [Component::Price, Component::IncomeStmt, Component::Info],
                true,
            ),
            false,
            None,
            3,
        )
        .await
        .unwrap();

    assert_eq!(report.control.ticker, "AAPL");
    assert_eq!(report.control.components.len(), 4);
    assert!(report.control.is_success());
    assert_eq!(report.retrieval.ticker, "AAPL");
    assert!(report.retrieval.has_results());
    assert!(!report.context.is_empty());
    assert!(report.context.contains(&report.retrieval.matches[0].metadata.text));
}

#[tokio::test]
async fn test_orchestrate_retrieves_after_every_component_failed() {
    let h = harness();
    let orchestrator = orchestrator(&h);
    h.control
        .ensure_fresh("AAPL", &price_only(), false, None, None)
        .await
        .unwrap();

    h.fetcher.fail(Component::Price);
    h.clock.advance(chrono::Duration::days(2));
    let report = orchestrator
        .orchestrate("AAPL", "close price", &price_only(), false, None, 5)
        .await
        .unwrap();

    assert!(report.control.all_failed());
    assert_eq!(
        report.control.status(Component::Price),
        Some(ComponentStatus::FetchFailed)
    );
    assert_eq!(report.retrieval.matches.len(), 2);
    assert!(report
        .retrieval
        .matches
        .iter()
        .all(|m| m.metadata.component == Component::Price));
    assert!(!report.context.is_empty());
}

#[tokio::test]
async fn test_orchestrate_unresolved_entity() {
    let h = harness();

    let err = orchestrator(&h)
        .orchestrate("XYZ", "revenue", &DataChecklist::all(), false, None, 3)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnresolvedEntity { .. }));
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}
