// Path: crates/storage/tests/redb_store.rs

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use strata_api::mmr::MmrDb;
use strata_api::query::{FieldQuery, OrderDirection};
use strata_api::storage::{DurableStore, PoiFilter, StoreOp, VersionRow};
use strata_storage::{MemoryStore, RedbStore};
use strata_types::{keys, Hash32, ProofOfIndex};

fn history_ops() -> Vec<Vec<StoreOp>> {
    let row = |id: &str, v: i64, start: u64| VersionRow {
        id: id.into(),
        data: json!({"id": id, "v": v}),
        start_height: start,
        end_height: None,
    };
    vec![
        vec![StoreOp::InsertVersions {
            entity: "Account".into(),
            rows: vec![row("a", 1, 1), row("b", 7, 1), row("c", 3, 2)],
        }],
        vec![
            StoreOp::CloseVersions {
                entity: "Account".into(),
                closes: vec![("a".into(), 5), ("c".into(), 4)],
            },
            StoreOp::InsertVersions {
                entity: "Account".into(),
                rows: vec![row("a", 2, 5)],
            },
            StoreOp::IncrementMetadata {
                key: keys::PROCESSED_BLOCK_COUNT.into(),
                amount: 5,
            },
            StoreOp::AppendMetadata {
                key: keys::DYNAMIC_DATASOURCES.into(),
                values: vec![json!({"template": "pool"})],
            },
        ],
    ]
}

async fn check_history(store: &dyn DurableStore) {
    for batch in history_ops() {
        store.apply(batch).await.unwrap();
    }
    assert_eq!(
        store.find_entity("Account", "a").await.unwrap(),
        Some(json!({"id": "a", "v": 2}))
    );
    assert_eq!(
        store.find_entity_at("Account", "a", 3).await.unwrap(),
        Some(json!({"id": "a", "v": 1}))
    );
    assert_eq!(store.find_entity("Account", "c").await.unwrap(), None);
    assert_eq!(
        store.find_entity_at("Account", "c", 3).await.unwrap(),
        Some(json!({"id": "c", "v": 3}))
    );

    let q = FieldQuery::new().order_by("v", OrderDirection::Desc);
    let exclude: BTreeSet<String> = ["b".to_string()].into();
    let rows = store.query_entities("Account", &q, &exclude).await.unwrap();
    assert_eq!(rows, vec![("a".to_string(), json!({"id": "a", "v": 2}))]);

    assert_eq!(
        store.get_metadata(keys::PROCESSED_BLOCK_COUNT).await.unwrap(),
        Some(json!(5))
    );
    assert_eq!(
        store.get_metadata(keys::DYNAMIC_DATASOURCES).await.unwrap(),
        Some(json!([{"template": "pool"}]))
    );
}

#[tokio::test]
async fn redb_and_memory_agree_on_history() {
    let dir = tempfile::tempdir().unwrap();
    let redb = RedbStore::open(dir.path().join("store.redb")).unwrap();
    check_history(&redb).await;
    check_history(&MemoryStore::new()).await;
}

#[tokio::test]
async fn failed_batch_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(dir.path().join("store.redb")).unwrap();
    let err = store
        .apply(vec![
            StoreOp::SetMetadata {
                key: keys::LAST_PROCESSED_HEIGHT.into(),
                value: json!(9),
            },
            StoreOp::SetMetadata {
                key: "label".into(),
                value: json!("x"),
            },
            StoreOp::IncrementMetadata {
                key: "label".into(),
                amount: 1,
            },
        ])
        .await;
    assert!(err.is_err());
    assert_eq!(
        store.get_metadata(keys::LAST_PROCESSED_HEIGHT).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn poi_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.redb");
    {
        let store = RedbStore::open(&path).unwrap();
        let mut synced = ProofOfIndex::created(3, vec![3], Hash32([3; 32]));
        synced.parent_hash = Some(Hash32::default());
        synced.hash = Some(Hash32([9; 32]));
        store
            .apply(vec![StoreOp::UpsertPoi(vec![
                ProofOfIndex::created(1, vec![1], Hash32([1; 32])),
                synced,
                ProofOfIndex::created(5, vec![5], Hash32([5; 32])),
            ])])
            .await
            .unwrap();
    }
    let store = RedbStore::open(&path).unwrap();
    assert_eq!(store.get_poi(3).await.unwrap().and_then(|p| p.hash), Some(Hash32([9; 32])));
    assert_eq!(store.latest_poi(PoiFilter::Any).await.unwrap().map(|p| p.id), Some(5));
    assert_eq!(store.latest_poi(PoiFilter::Synced).await.unwrap().map(|p| p.id), Some(3));
    assert_eq!(store.first_poi(PoiFilter::Unsynced).await.unwrap().map(|p| p.id), Some(1));
    let ids: Vec<_> = store
        .poi_range(2, 10, 1)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![3]);
}

#[tokio::test]
async fn mmr_table_round_trips_nodes_and_length() {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(dir.path().join("store.redb")).unwrap();
    let db = store.mmr_db();
    assert_eq!(db.get_leaf_length().await.unwrap(), 0);
    let nodes: BTreeMap<u64, Hash32> = (0..3u64).map(|p| (p, Hash32([p as u8; 32]))).collect();
    db.bulk_set(&nodes).await.unwrap();
    db.set(Hash32([7; 32]), 3).await.unwrap();
    assert_eq!(db.set_leaf_length(3).await.unwrap(), 3);
    assert_eq!(db.get(3).await.unwrap(), Some(Hash32([7; 32])));
    assert_eq!(db.get(4).await.unwrap(), None);
    assert_eq!(db.get_nodes().await.unwrap().len(), 4);
    assert_eq!(db.get_leaf_length().await.unwrap(), 3);
}
