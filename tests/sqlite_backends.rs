//! SQLite local store and index backends against real database files.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use ticker_mirror::db;
use ticker_mirror::manager::ControlPlane;
use ticker_mirror::migrate::{migrate_index, migrate_store};
use ticker_mirror::pipeline::Pipeline;
use ticker_mirror::reader::InferenceReader;
use ticker_mirror::sqlite_index::SqliteIndex;
use ticker_mirror::sqlite_store::SqliteLocalStore;
use ticker_mirror_core::clock::ManualClock;
use ticker_mirror_core::embedding::HashedEmbedder;
use ticker_mirror_core::fetch::FetcherRegistry;
use ticker_mirror_core::index::{IndexReader, IndexWriter};
use ticker_mirror_core::models::{
    Component, DataCategory, DataChecklist, Entity, IndexFilter, IndexRecord, Inspection,
    Payload, UnitMetadata,
};
use ticker_mirror_core::outcome::ComponentStatus;
use ticker_mirror_core::policy::FreshnessPolicy;
use ticker_mirror_core::registry::EntityRegistry;
use ticker_mirror_core::store::LocalStore;

async fn open_store(tmp: &TempDir) -> SqliteLocalStore {
    let pool = db::connect(&tmp.path().join("artifacts.sqlite"))
        .await
        .unwrap();
    migrate_store(&pool).await.unwrap();
    SqliteLocalStore::new(pool)
}

async fn open_index(tmp: &TempDir) -> SqliteIndex {
    let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
    migrate_index(&pool).await.unwrap();
    SqliteIndex::new(pool)
}

fn aapl() -> Entity {
    Entity::us("AAPL", "0000320193")
}

fn record(id: &str, ticker: &str, component: Component, text: &str, vector: Vec<f32>) -> IndexRecord {
    IndexRecord {
        id: id.to_string(),
        vector,
        metadata: UnitMetadata {
            ticker: ticker.to_string(),
            component,
            category: component.category(),
            position: 0,
            text: text.to_string(),
            source: "test".to_string(),
            fetched_at: Utc::now(),
        },
    }
}

// ─── Local Store ────────────────────────────────────────────────────

#[tokio::test]
async fn test_store_write_read_and_marker() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let entity = aapl();

    assert_eq!(
        store.inspect(&entity, Component::Price).await.unwrap(),
        Inspection::Absent
    );
    assert!(store.read(&entity, Component::Price).await.unwrap().is_none());

    let payload = Payload::text("test", r#"[{"close": 227.5}]"#)
        .with_metadata(serde_json::json!({ "currency": "USD" }));
    let at = DateTime::from_timestamp(1_772_000_000, 123_456_789).unwrap();
    let version = store
        .write(&entity, Component::Price, &payload, at)
        .await
        .unwrap();
    assert_eq!(version.timestamp_subsec_nanos(), 123_456_000);

    let artifact = store.read(&entity, Component::Price).await.unwrap().unwrap();
    assert_eq!(artifact.payload, payload);
    assert_eq!(artifact.fetched_at, version);
    assert!(!artifact.is_index_synced());

    store
        .mark_indexed(&entity, Component::Price, version)
        .await
        .unwrap();
    assert_eq!(
        store.inspect(&entity, Component::Price).await.unwrap(),
        Inspection::Present {
            last_modified: version,
            index_synced: true,
        }
    );
}

#[tokio::test]
async fn test_store_rewrite_clears_marker_and_stale_mark_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let entity = aapl();
    let t1 = Utc::now();
    let t2 = t1 + Duration::hours(1);

    let v1 = store
        .write(&entity, Component::Info, &Payload::text("test", "first"), t1)
        .await
        .unwrap();
    store.mark_indexed(&entity, Component::Info, v1).await.unwrap();

    let v2 = store
        .write(&entity, Component::Info, &Payload::text("test", "second"), t2)
        .await
        .unwrap();
    let artifact = store.read(&entity, Component::Info).await.unwrap().unwrap();
    assert_eq!(artifact.payload.body, "second");
    assert!(!artifact.is_index_synced());

    // A late mark for the old version must not flag the new body as mirrored.
    store.mark_indexed(&entity, Component::Info, v1).await.unwrap();
    assert!(!store
        .read(&entity, Component::Info)
        .await
        .unwrap()
        .unwrap()
        .is_index_synced());

    store.mark_indexed(&entity, Component::Info, v2).await.unwrap();
    assert!(store
        .read(&entity, Component::Info)
        .await
        .unwrap()
        .unwrap()
        .is_index_synced());
}

#[tokio::test]
async fn test_store_list() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let now = Utc::now();

    store
        .write(&aapl(), Component::Price, &Payload::text("test", "abc"), now)
        .await
        .unwrap();
    store
        .write(
            &Entity::us("MSFT", "0000789019"),
            Component::Info,
            &Payload::text("test", "hello"),
            now,
        )
        .await
        .unwrap();

    let all = store.list(None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].ticker, "AAPL");
    assert_eq!(all[0].bytes, 3);
    assert!(!all[0].index_synced);

    let msft = store.list(Some("MSFT")).await.unwrap();
    assert_eq!(msft.len(), 1);
    assert_eq!(msft[0].component, Component::Info);
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("artifacts.sqlite"))
        .await
        .unwrap();
    migrate_store(&pool).await.unwrap();
    migrate_store(&pool).await.unwrap();

    let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
    migrate_index(&pool).await.unwrap();
    migrate_index(&pool).await.unwrap();
}

// ─── Index ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_index_upsert_query_and_namespaces() {
    let tmp = TempDir::new().unwrap();
    let index = open_index(&tmp).await;

    index
        .upsert(&[
            record("AAPL:price:0000:a", "AAPL", Component::Price, "close 227", vec![1.0, 0.0]),
            record("AAPL:unstructured:0000:b", "AAPL", Component::Unstructured, "risk", vec![0.0, 1.0]),
            record("MSFT:price:0000:c", "MSFT", Component::Price, "close 410", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

    let matches = index
        .query(&[1.0, 0.1], &IndexFilter::ticker("AAPL"), 5)
        .await
        .unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].id, "AAPL:price:0000:a");
    assert!(matches.iter().all(|m| m.metadata.ticker == "AAPL"));

    let narrative = index
        .query(
            &[1.0, 0.0],
            &IndexFilter::ticker("AAPL").with_category(Some(DataCategory::Narrative)),
            5,
        )
        .await
        .unwrap();
    assert_eq!(narrative.len(), 1);
    assert_eq!(narrative[0].metadata.component, Component::Unstructured);

    assert_eq!(index.count(None).await.unwrap(), 3);
    assert_eq!(
        index
            .count(Some(&IndexFilter::component("AAPL", Component::Price)))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        index.counts_by_ticker().await.unwrap(),
        vec![("AAPL".to_string(), 2), ("MSFT".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_index_upsert_overwrites_and_delete_ignores_unknown() {
    let tmp = TempDir::new().unwrap();
    let index = open_index(&tmp).await;

    index
        .upsert(&[record("AAPL:info:0000:a", "AAPL", Component::Info, "old", vec![1.0])])
        .await
        .unwrap();
    index
        .upsert(&[record("AAPL:info:0000:a", "AAPL", Component::Info, "new", vec![1.0])])
        .await
        .unwrap();

    let matches = index
        .query(&[1.0], &IndexFilter::ticker("AAPL"), 5)
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].metadata.text, "new");

    let removed = index
        .delete_by_ids(&["AAPL:info:0000:a".to_string(), "AAPL:info:0001:zz".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(index
        .list_ids(&IndexFilter::ticker("AAPL"))
        .await
        .unwrap()
        .is_empty());
}

// ─── Control Plane over SQLite ──────────────────────────────────────

struct FixedFetcher;

#[async_trait::async_trait]
impl ticker_mirror_core::fetch::Fetcher for FixedFetcher {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch(&self, _entity: &Entity, _component: Component) -> anyhow::Result<Payload> {
        Ok(Payload::text(
            "fixed",
            r#"[{"date": "2026-03-02", "close": 227.5}, {"date": "2026-02-27", "close": 225.1}]"#,
        ))
    }
}

#[tokio::test]
async fn test_ensure_and_retrieve_over_sqlite() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(open_store(&tmp).await);
    let index = Arc::new(open_index(&tmp).await);
    let embedder = Arc::new(HashedEmbedder::new(128));
    let clock = Arc::new(ManualClock::new(Utc::now()));

    let pipeline = Pipeline::new(
        FetcherRegistry::new().with(Component::Price, Arc::new(FixedFetcher)),
        store.clone(),
        embedder.clone(),
        index.clone(),
        clock.clone(),
    );
    let control = ControlPlane::new(
        Arc::new(EntityRegistry::builtin()),
        FreshnessPolicy::default(),
        store.clone(),
        pipeline,
        clock.clone(),
    );

    let checklist = DataChecklist::only(Component::Price);
    let first = control
        .ensure_fresh("AAPL", &checklist, false, None, None)
        .await
        .unwrap();
    assert_eq!(first.status(Component::Price), Some(ComponentStatus::Updated));

    // Stored timestamps are truncated to microseconds; freshness and the
    // index marker must still line up on the next call.
    let second = control
        .ensure_fresh("AAPL", &checklist, false, None, None)
        .await
        .unwrap();
    assert_eq!(second.status(Component::Price), Some(ComponentStatus::Fresh));

    let ids = index
        .list_ids(&IndexFilter::component("AAPL", Component::Price))
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids[0].starts_with("AAPL:price:0000:"));

    let reader = InferenceReader::new(embedder, index.clone());
    let result = reader.retrieve("AAPL", "close 227.5", 1, None).await.unwrap();
    assert_eq!(result.matches.len(), 1);
}
