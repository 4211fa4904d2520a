// Path: crates/cache/tests/orchestrator.rs

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_api::query::FieldQuery;
use strata_api::storage::{DurableStore, PoiFilter, StorageError, StoreOp, VersionRow};
use strata_cache::{CacheError, CacheOrchestrator};
use strata_storage::MemoryStore;
use strata_types::config::CacheConfig;
use strata_types::{keys, Height, ProofOfIndex};
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: String,
    v: i64,
}

fn item(id: &str, v: i64) -> Item {
    Item { id: id.into(), v }
}

/// Wraps a [`MemoryStore`], recording every batch and optionally holding
/// `apply` until released.
struct TestStore {
    inner: MemoryStore,
    gated: AtomicBool,
    entered: Notify,
    release: Semaphore,
    batches: Mutex<Vec<Vec<StoreOp>>>,
}

impl TestStore {
    fn new(gated: bool) -> Self {
        Self {
            inner: MemoryStore::new(),
            gated: AtomicBool::new(gated),
            entered: Notify::new(),
            release: Semaphore::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DurableStore for TestStore {
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release
                .acquire()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?
                .forget();
        }
        self.batches.lock().push(ops.clone());
        self.inner.apply(ops).await
    }

    async fn find_entity(&self, entity: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.inner.find_entity(entity, id).await
    }

    async fn find_entity_at(
        &self,
        entity: &str,
        id: &str,
        height: Height,
    ) -> Result<Option<Value>, StorageError> {
        self.inner.find_entity_at(entity, id, height).await
    }

    async fn entity_versions(&self, entity: &str, id: &str) -> Result<Vec<VersionRow>, StorageError> {
        self.inner.entity_versions(entity, id).await
    }

    async fn query_entities(
        &self,
        entity: &str,
        query: &FieldQuery,
        exclude_ids: &BTreeSet<String>,
    ) -> Result<Vec<(String, Value)>, StorageError> {
        self.inner.query_entities(entity, query, exclude_ids).await
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get_metadata(key).await
    }

    async fn get_poi(&self, id: Height) -> Result<Option<ProofOfIndex>, StorageError> {
        self.inner.get_poi(id).await
    }

    async fn poi_range(
        &self,
        start: Height,
        end: Height,
        limit: usize,
    ) -> Result<Vec<ProofOfIndex>, StorageError> {
        self.inner.poi_range(start, end, limit).await
    }

    async fn poi_before(&self, height: Height, limit: usize) -> Result<Vec<ProofOfIndex>, StorageError> {
        self.inner.poi_before(height, limit).await
    }

    async fn latest_poi(&self, filter: PoiFilter) -> Result<Option<ProofOfIndex>, StorageError> {
        self.inner.latest_poi(filter).await
    }

    async fn first_poi(&self, filter: PoiFilter) -> Result<Option<ProofOfIndex>, StorageError> {
        self.inner.first_poi(filter).await
    }
}

fn setup(config: CacheConfig) -> (Arc<MemoryStore>, Arc<CacheOrchestrator>) {
    let store = Arc::new(MemoryStore::new());
    let orch = CacheOrchestrator::new(store.clone(), config);
    (store, orch)
}

#[tokio::test]
async fn historical_reads_span_cache_and_store() {
    let (store, orch) = setup(CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", true).unwrap();

    items.set("e1", item("e1", 1), 1).await.unwrap();
    orch.set_flush_boundary(1);
    orch.flush_cache(true).await.unwrap();

    items.set("e1", item("e1", 2), 5).await.unwrap();
    assert_eq!(items.get("e1").await.unwrap(), Some(item("e1", 2)));
    assert_eq!(items.get_at("e1", 3).await.unwrap(), Some(item("e1", 1)));

    orch.set_flush_boundary(5);
    orch.flush_cache(true).await.unwrap();
    let rows = store.entity_versions("Item", "e1").await.unwrap();
    let ranges: Vec<_> = rows.iter().map(|r| (r.start_height, r.end_height)).collect();
    assert_eq!(ranges, vec![(1, Some(5)), (5, None)]);
    assert_eq!(items.get_at("e1", 4).await.unwrap(), Some(item("e1", 1)));
}

#[tokio::test]
async fn removal_window_closes_before_a_new_value() {
    let (store, orch) = setup(CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", true).unwrap();
    items.set("e1", item("e1", 1), 1).await.unwrap();
    orch.set_flush_boundary(1);
    orch.flush_cache(true).await.unwrap();

    items.remove("e1", 4).await.unwrap();
    assert_eq!(items.get("e1").await.unwrap(), None);
    items.set("e1", item("e1", 9), 6).await.unwrap();
    assert_eq!(items.get("e1").await.unwrap(), Some(item("e1", 9)));

    orch.set_flush_boundary(6);
    orch.flush_cache(true).await.unwrap();
    let rows = store.entity_versions("Item", "e1").await.unwrap();
    let ranges: Vec<_> = rows.iter().map(|r| (r.start_height, r.end_height)).collect();
    assert_eq!(ranges, vec![(1, Some(4)), (6, None)]);
    assert_eq!(items.get_at("e1", 5).await.unwrap(), None);
    assert_eq!(items.get("e1").await.unwrap(), Some(item("e1", 9)));
}

#[tokio::test]
async fn out_of_order_writes_are_rejected() {
    let (_, orch) = setup(CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", true).unwrap();
    items.set("e1", item("e1", 1), 5).await.unwrap();
    let err = items.set("e1", item("e1", 2), 4).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::OutOfOrder {
            current: 5,
            attempted: 4,
            ..
        }
    ));
    assert_eq!(items.get("e1").await.unwrap(), Some(item("e1", 1)));
}

#[tokio::test]
async fn writes_below_a_pending_removal_are_rejected() {
    let (store, orch) = setup(CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", true).unwrap();
    items.set("e1", item("e1", 1), 1).await.unwrap();
    orch.set_flush_boundary(1);
    orch.flush_cache(true).await.unwrap();

    items.remove("e1", 10).await.unwrap();
    let err = items.set("e1", item("e1", 2), 5).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::OutOfOrder {
            current: 10,
            attempted: 5,
            ..
        }
    ));
    let err = items.remove("e1", 5).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::OutOfOrder {
            current: 10,
            attempted: 5,
            ..
        }
    ));
    assert_eq!(items.get("e1").await.unwrap(), None);

    orch.set_flush_boundary(10);
    orch.flush_cache(true).await.unwrap();
    let rows = store.entity_versions("Item", "e1").await.unwrap();
    let ranges: Vec<_> = rows.iter().map(|r| (r.start_height, r.end_height)).collect();
    assert_eq!(ranges, vec![(1, Some(10))]);
}

#[tokio::test]
async fn flushing_nothing_touches_nothing() {
    let (store, orch) = setup(CacheConfig::default());
    orch.register_entity::<Item>("Item", false).unwrap();
    orch.flush_cache(true).await.unwrap();
    orch.flush_cache(false).await.unwrap();
    assert_eq!(store.apply_calls(), 0);
    assert_eq!(orch.flushable_record_count(), 0);
}

#[tokio::test]
async fn reads_see_unflushed_writes() {
    let (store, orch) = setup(CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", false).unwrap();
    items.set("a", item("a", 1), 3).await.unwrap();
    assert_eq!(items.get("a").await.unwrap(), Some(item("a", 1)));
    items.remove("a", 3).await.unwrap();
    assert_eq!(items.get("a").await.unwrap(), None);
    assert_eq!(store.apply_calls(), 0);
}

#[tokio::test]
async fn field_queries_merge_pending_and_stored_rows() {
    let (_, orch) = setup(CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", false).unwrap();
    for (id, v) in [("a", 1), ("b", 5), ("c", 3)] {
        items.set(id, item(id, v), 1).await.unwrap();
    }
    orch.flush_cache(true).await.unwrap();

    items.set("b", item("b", 0), 2).await.unwrap();
    items.set("d", item("d", 4), 2).await.unwrap();
    items.remove("c", 2).await.unwrap();

    let query = FieldQuery::new()
        .filter("v", strata_api::query::FilterOp::Gte, json!(1))
        .order_by("v", strata_api::query::OrderDirection::Desc);
    let ids: Vec<_> = items
        .get_by_fields(&query)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec!["d", "a"]);

    let first = items
        .get_by_fields(&FieldQuery::new().order_by("id", Default::default()).limit(2))
        .await
        .unwrap();
    let ids: Vec<_> = first.into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn failed_flush_leaves_caches_untouched() {
    let (store, orch) = setup(CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", true).unwrap();
    items.set("e1", item("e1", 1), 1).await.unwrap();
    orch.metadata()
        .set(keys::LAST_PROCESSED_HEIGHT, json!(1))
        .await;
    orch.metadata().increment(keys::PROCESSED_BLOCK_COUNT, 1).await;
    let before = orch.flushable_record_count();

    store.fail_next_apply("connection reset");
    let err = orch.flush_cache(true).await.unwrap_err();
    assert!(matches!(err, CacheError::Storage(StorageError::Backend(_))));
    assert_eq!(orch.flushable_record_count(), before);
    assert_eq!(items.get("e1").await.unwrap(), Some(item("e1", 1)));
    assert!(store.find_entity("Item", "e1").await.unwrap().is_none());

    orch.flush_cache(true).await.unwrap();
    assert_eq!(orch.flushable_record_count(), 0);
    assert!(store.find_entity("Item", "e1").await.unwrap().is_some());
    assert_eq!(
        store.get_metadata(keys::PROCESSED_BLOCK_COUNT).await.unwrap(),
        Some(json!(1))
    );
}

#[tokio::test]
async fn ordered_flush_replays_by_operation_index() {
    let store = Arc::new(TestStore::new(false));
    let config = CacheConfig {
        ordered_flush: true,
        ..CacheConfig::default()
    };
    let orch = CacheOrchestrator::new(store.clone(), config);
    let pools = orch.register_entity::<Item>("Pool", false).unwrap();
    let swaps = orch.register_entity::<Item>("Swap", false).unwrap();

    swaps.set("s1", item("s1", 1), 1).await.unwrap();
    pools.set("p1", item("p1", 1), 1).await.unwrap();
    swaps.remove("s1", 1).await.unwrap();
    pools.set("p2", item("p2", 2), 1).await.unwrap();

    orch.flush_cache(true).await.unwrap();
    let batches = store.batches.lock().clone();
    assert_eq!(batches.len(), 1);
    let order: Vec<String> = batches[0]
        .iter()
        .map(|op| match op {
            StoreOp::Upsert { entity, id, .. } => format!("upsert {entity}/{id}"),
            StoreOp::Delete { entity, id } => format!("delete {entity}/{id}"),
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        order,
        vec!["upsert Pool/p1", "delete Swap/s1", "upsert Pool/p2"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_forced_flushes_share_the_inflight_transaction() {
    let store = Arc::new(TestStore::new(true));
    let orch = CacheOrchestrator::new(store.clone(), CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", true).unwrap();
    items.set("e1", item("e1", 1), 1).await.unwrap();

    let first = tokio::spawn({
        let orch = orch.clone();
        async move { orch.flush_cache(true).await }
    });
    store.entered.notified().await;

    let second = tokio::spawn({
        let orch = orch.clone();
        async move { orch.flush_cache(true).await }
    });
    let third = tokio::spawn({
        let orch = orch.clone();
        async move { orch.flush_cache(true).await }
    });
    let reader = tokio::spawn({
        let items = items.clone();
        async move { items.get("e1").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!first.is_finished());
    assert!(!second.is_finished());
    assert!(!third.is_finished());
    assert!(!reader.is_finished());

    store.release.add_permits(1);
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    third.await.unwrap().unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), Some(item("e1", 1)));

    assert_eq!(store.inner.apply_calls(), 1);
    assert_eq!(orch.flushable_record_count(), 0);
}

#[tokio::test]
async fn reset_discards_everything_pending() {
    let (store, orch) = setup(CacheConfig::default());
    let items = orch.register_entity::<Item>("Item", true).unwrap();
    items.set("e1", item("e1", 1), 1).await.unwrap();
    orch.poi()
        .bulk_upsert(vec![ProofOfIndex::created(
            1,
            vec![1],
            strata_types::Hash32([1; 32]),
        )])
        .await
        .unwrap();
    orch.reset_cache().await;
    assert_eq!(orch.flushable_record_count(), 0);
    orch.flush_cache(true).await.unwrap();
    assert_eq!(store.apply_calls(), 0);
    assert_eq!(items.get("e1").await.unwrap(), None);
}
