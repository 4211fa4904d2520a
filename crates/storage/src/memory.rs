// Path: crates/storage/src/memory.rs

//! An in-memory [`DurableStore`] with the same semantics as [`crate::RedbStore`].

use crate::apply::{apply_op, open_row, row_at, OpTarget, StoredRow};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_api::query::FieldQuery;
use strata_api::storage::{DurableStore, PoiFilter, StorageError, StoreOp, VersionRow};
use strata_types::{Height, ProofOfIndex};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    // entity -> (id, start) -> row
    entities: BTreeMap<String, BTreeMap<(String, Height), StoredRow>>,
    metadata: BTreeMap<String, Value>,
    poi: BTreeMap<Height, ProofOfIndex>,
}

impl MemoryState {
    fn rows_of(&self, entity: &str, id: &str) -> Vec<(Height, StoredRow)> {
        self.entities
            .get(entity)
            .map(|rows| {
                rows.range((id.to_string(), 0)..=(id.to_string(), Height::MAX))
                    .map(|((_, start), row)| (*start, row.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl OpTarget for MemoryState {
    fn rows(&mut self, entity: &str, id: &str) -> Result<Vec<(Height, StoredRow)>, StorageError> {
        Ok(self.rows_of(entity, id))
    }

    fn put_row(
        &mut self,
        entity: &str,
        id: &str,
        start: Height,
        row: &StoredRow,
    ) -> Result<(), StorageError> {
        self.entities
            .entry(entity.to_string())
            .or_default()
            .insert((id.to_string(), start), row.clone());
        Ok(())
    }

    fn delete_row(&mut self, entity: &str, id: &str, start: Height) -> Result<(), StorageError> {
        if let Some(rows) = self.entities.get_mut(entity) {
            rows.remove(&(id.to_string(), start));
        }
        Ok(())
    }

    fn get_meta(&mut self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.metadata.get(key).cloned())
    }

    fn put_meta(&mut self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.metadata.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete_meta(&mut self, key: &str) -> Result<(), StorageError> {
        self.metadata.remove(key);
        Ok(())
    }

    fn put_poi(&mut self, poi: &ProofOfIndex) -> Result<(), StorageError> {
        self.poi.insert(poi.id, poi.clone());
        Ok(())
    }

    fn pois_from(&mut self, from: Height) -> Result<Vec<ProofOfIndex>, StorageError> {
        Ok(self.poi.range(from..).map(|(_, p)| p.clone()).collect())
    }
}

/// A [`DurableStore`] kept entirely in memory.
///
/// A batch is applied to a copy of the state which replaces the original only
/// if every operation succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    apply_calls: AtomicUsize,
    fail_next: Mutex<Option<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `apply` calls received, failed ones included.
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Makes the next `apply` fail with a backend error and leave the state untouched.
    pub fn fail_next_apply(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(StorageError::Backend(reason));
        }
        let mut state = self.state.write();
        let mut next = state.clone();
        for op in ops {
            apply_op(&mut next, op)?;
        }
        *state = next;
        Ok(())
    }

    async fn find_entity(&self, entity: &str, id: &str) -> Result<Option<Value>, StorageError> {
        Ok(open_row(self.state.read().rows_of(entity, id)))
    }

    async fn find_entity_at(
        &self,
        entity: &str,
        id: &str,
        height: Height,
    ) -> Result<Option<Value>, StorageError> {
        Ok(row_at(self.state.read().rows_of(entity, id), height))
    }

    async fn entity_versions(
        &self,
        entity: &str,
        id: &str,
    ) -> Result<Vec<VersionRow>, StorageError> {
        Ok(self
            .state
            .read()
            .rows_of(entity, id)
            .into_iter()
            .map(|(start, row)| row.into_version(id, start))
            .collect())
    }

    async fn query_entities(
        &self,
        entity: &str,
        query: &FieldQuery,
        exclude_ids: &BTreeSet<String>,
    ) -> Result<Vec<(String, Value)>, StorageError> {
        let state = self.state.read();
        let rows = state
            .entities
            .get(entity)
            .map(|rows| {
                rows.iter()
                    .filter(|((id, _), row)| row.end.is_none() && !exclude_ids.contains(id))
                    .map(|((id, _), row)| (id.clone(), row.data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(query.apply(rows))
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.state.read().metadata.get(key).cloned())
    }

    async fn get_poi(&self, id: Height) -> Result<Option<ProofOfIndex>, StorageError> {
        Ok(self.state.read().poi.get(&id).cloned())
    }

    async fn poi_range(
        &self,
        start: Height,
        end: Height,
        limit: usize,
    ) -> Result<Vec<ProofOfIndex>, StorageError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .state
            .read()
            .poi
            .range(start..=end)
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn poi_before(
        &self,
        height: Height,
        limit: usize,
    ) -> Result<Vec<ProofOfIndex>, StorageError> {
        Ok(self
            .state
            .read()
            .poi
            .range(..=height)
            .rev()
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn latest_poi(&self, filter: PoiFilter) -> Result<Option<ProofOfIndex>, StorageError> {
        Ok(self
            .state
            .read()
            .poi
            .values()
            .rev()
            .find(|p| filter.accepts(p))
            .cloned())
    }

    async fn first_poi(&self, filter: PoiFilter) -> Result<Option<ProofOfIndex>, StorageError> {
        Ok(self
            .state
            .read()
            .poi
            .values()
            .find(|p| filter.accepts(p))
            .cloned())
    }
}
