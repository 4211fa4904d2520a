// Path: crates/storage/src/redb_store.rs

//! The embedded transactional store.
//!
//! Layout:
//! - `ENTITIES`: `[entity][0x00][id][0x00][start_be(8)]` -> JSON `{data, end}`
//! - `METADATA`: key -> JSON value
//! - `POI`: height -> bincode `ProofOfIndex`
//! - `MMR_NODES` / `MMR_META`: see [`crate::mmr::RedbMmrDb`]

use crate::apply::{apply_op, open_row, row_at, OpTarget, StoredRow};
use crate::migrations;
use crate::mmr::RedbMmrDb;
use async_trait::async_trait;
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use strata_api::query::FieldQuery;
use strata_api::storage::{be64, DurableStore, PoiFilter, StorageError, StoreOp, VersionRow};
use strata_types::{Height, ProofOfIndex};

pub(crate) const ENTITIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ENTITIES");
pub(crate) const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("METADATA");
pub(crate) const POI: TableDefinition<u64, &[u8]> = TableDefinition::new("POI");
pub(crate) const MMR_NODES: TableDefinition<u64, &[u8; 32]> = TableDefinition::new("MMR_NODES");
pub(crate) const MMR_META: TableDefinition<&str, u64> = TableDefinition::new("MMR_META");

pub(crate) fn backend<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn k_prefix(entity: &str, id: Option<&str>) -> Vec<u8> {
    let mut k = Vec::with_capacity(entity.len() + id.map_or(0, str::len) + 2);
    k.extend_from_slice(entity.as_bytes());
    k.push(0);
    if let Some(id) = id {
        k.extend_from_slice(id.as_bytes());
        k.push(0);
    }
    k
}

fn k_entity(entity: &str, id: &str, start: Height) -> Vec<u8> {
    let mut k = k_prefix(entity, Some(id));
    k.extend_from_slice(&be64(start));
    k
}

/// The exclusive upper bound of every key starting with `prefix`.
/// Prefixes always end in `0x00`, so bumping the last byte is enough.
fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    if let Some(last) = end.last_mut() {
        *last = last.saturating_add(1);
    }
    end
}

/// Splits the `[id][0x00][start_be(8)]` tail of an entity key.
fn split_id_start(tail: &[u8]) -> Result<(String, Height), StorageError> {
    let cut = tail
        .len()
        .checked_sub(9)
        .ok_or_else(|| StorageError::Decode("entity key too short".into()))?;
    let id = tail
        .get(..cut)
        .ok_or_else(|| StorageError::Decode("entity key too short".into()))?;
    let start: [u8; 8] = tail
        .get(cut + 1..)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StorageError::Decode("entity key without height".into()))?;
    let id = String::from_utf8(id.to_vec()).map_err(|e| StorageError::Decode(e.to_string()))?;
    Ok((id, u64::from_be_bytes(start)))
}

/// Reads the start height following an `[entity][0x00][id][0x00]` prefix.
fn start_of(key: &[u8], prefix_len: usize) -> Result<Height, StorageError> {
    key.get(prefix_len..)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| StorageError::Decode("entity key without height".into()))
}

fn decode_row(bytes: &[u8]) -> Result<StoredRow, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))
}

fn encode_json<T: serde::Serialize>(v: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(v).map_err(|e| StorageError::Encode(e.to_string()))
}

pub(crate) fn decode_poi(bytes: &[u8]) -> Result<ProofOfIndex, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Decode(e.to_string()))
}

fn encode_poi(poi: &ProofOfIndex) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(poi).map_err(|e| StorageError::Encode(e.to_string()))
}

/// A [`DurableStore`] on top of a single redb database file.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Opens or creates the database, creates missing tables and runs pending
    /// schema migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(backend)?;

        // Ensure tables exist
        {
            let w = db.begin_write().map_err(backend)?;
            {
                w.open_table(ENTITIES).map_err(backend)?;
                w.open_table(METADATA).map_err(backend)?;
                w.open_table(POI).map_err(backend)?;
                w.open_table(MMR_NODES).map_err(backend)?;
                w.open_table(MMR_META).map_err(backend)?;
            }
            w.commit().map_err(backend)?;
        }

        let applied = migrations::run(&db)?;
        if applied > 0 {
            tracing::info!(target: "storage", applied, "schema migrations applied");
        }
        Ok(Self { db: Arc::new(db) })
    }

    /// A table-backed accumulator node store sharing this database.
    pub fn mmr_db(&self) -> RedbMmrDb {
        RedbMmrDb::new(self.db.clone())
    }

    fn read_txn(&self) -> Result<ReadTransaction<'_>, StorageError> {
        self.db.begin_read().map_err(backend)
    }

    fn write_txn(&self) -> Result<WriteTransaction<'_>, StorageError> {
        self.db.begin_write().map_err(backend)
    }

    fn read_rows(&self, entity: &str, id: &str) -> Result<Vec<(Height, StoredRow)>, StorageError> {
        let r = self.read_txn()?;
        let t = r.open_table(ENTITIES).map_err(backend)?;
        let lo = k_prefix(entity, Some(id));
        let hi = prefix_end(&lo);
        let mut out = Vec::new();
        for item in t.range::<&[u8]>(lo.as_slice()..hi.as_slice()).map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            out.push((start_of(k.value(), lo.len())?, decode_row(v.value())?));
        }
        Ok(out)
    }

    fn scan_pois<F>(&self, reverse: bool, mut accept: F) -> Result<Option<ProofOfIndex>, StorageError>
    where
        F: FnMut(&ProofOfIndex) -> bool,
    {
        let r = self.read_txn()?;
        let t = r.open_table(POI).map_err(backend)?;
        let mut iter = t.iter().map_err(backend)?;
        loop {
            let next = if reverse { iter.next_back() } else { iter.next() };
            let Some(item) = next else { break };
            let (_, v) = item.map_err(backend)?;
            let poi = decode_poi(v.value())?;
            if accept(&poi) {
                return Ok(Some(poi));
            }
        }
        Ok(None)
    }
}

pub(crate) struct RedbWriter<'a, 'db> {
    pub(crate) tx: &'a WriteTransaction<'db>,
}

impl OpTarget for RedbWriter<'_, '_> {
    fn rows(&mut self, entity: &str, id: &str) -> Result<Vec<(Height, StoredRow)>, StorageError> {
        let t = self.tx.open_table(ENTITIES).map_err(backend)?;
        let lo = k_prefix(entity, Some(id));
        let hi = prefix_end(&lo);
        let mut out = Vec::new();
        for item in t.range::<&[u8]>(lo.as_slice()..hi.as_slice()).map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            out.push((start_of(k.value(), lo.len())?, decode_row(v.value())?));
        }
        Ok(out)
    }

    fn put_row(
        &mut self,
        entity: &str,
        id: &str,
        start: Height,
        row: &StoredRow,
    ) -> Result<(), StorageError> {
        let mut t = self.tx.open_table(ENTITIES).map_err(backend)?;
        let k = k_entity(entity, id, start);
        let v = encode_json(row)?;
        t.insert(k.as_slice(), v.as_slice()).map_err(backend)?;
        Ok(())
    }

    fn delete_row(&mut self, entity: &str, id: &str, start: Height) -> Result<(), StorageError> {
        let mut t = self.tx.open_table(ENTITIES).map_err(backend)?;
        let k = k_entity(entity, id, start);
        t.remove(k.as_slice()).map_err(backend)?;
        Ok(())
    }

    fn get_meta(&mut self, key: &str) -> Result<Option<Value>, StorageError> {
        let t = self.tx.open_table(METADATA).map_err(backend)?;
        let v = t.get(key).map_err(backend)?;
        v.map(|v| serde_json::from_slice(v.value()).map_err(|e| StorageError::Decode(e.to_string())))
            .transpose()
    }

    fn put_meta(&mut self, key: &str, value: &Value) -> Result<(), StorageError> {
        let mut t = self.tx.open_table(METADATA).map_err(backend)?;
        let v = encode_json(value)?;
        t.insert(key, v.as_slice()).map_err(backend)?;
        Ok(())
    }

    fn delete_meta(&mut self, key: &str) -> Result<(), StorageError> {
        let mut t = self.tx.open_table(METADATA).map_err(backend)?;
        t.remove(key).map_err(backend)?;
        Ok(())
    }

    fn put_poi(&mut self, poi: &ProofOfIndex) -> Result<(), StorageError> {
        let mut t = self.tx.open_table(POI).map_err(backend)?;
        let v = encode_poi(poi)?;
        t.insert(poi.id, v.as_slice()).map_err(backend)?;
        Ok(())
    }

    fn pois_from(&mut self, from: Height) -> Result<Vec<ProofOfIndex>, StorageError> {
        let t = self.tx.open_table(POI).map_err(backend)?;
        let mut out = Vec::new();
        for item in t.range(from..).map_err(backend)? {
            let (_, v) = item.map_err(backend)?;
            out.push(decode_poi(v.value())?);
        }
        Ok(out)
    }
}

#[async_trait]
impl DurableStore for RedbStore {
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        let count = ops.len();
        let w = self.write_txn()?;
        {
            let mut writer = RedbWriter { tx: &w };
            for op in ops {
                // Dropping `w` without commit rolls everything back.
                apply_op(&mut writer, op)?;
            }
        }
        w.commit().map_err(backend)?;
        tracing::debug!(target: "storage", ops = count, "batch committed");
        Ok(())
    }

    async fn find_entity(&self, entity: &str, id: &str) -> Result<Option<Value>, StorageError> {
        Ok(open_row(self.read_rows(entity, id)?))
    }

    async fn find_entity_at(
        &self,
        entity: &str,
        id: &str,
        height: Height,
    ) -> Result<Option<Value>, StorageError> {
        Ok(row_at(self.read_rows(entity, id)?, height))
    }

    async fn entity_versions(
        &self,
        entity: &str,
        id: &str,
    ) -> Result<Vec<VersionRow>, StorageError> {
        Ok(self
            .read_rows(entity, id)?
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
        let r = self.read_txn()?;
        let t = r.open_table(ENTITIES).map_err(backend)?;
        let lo = k_prefix(entity, None);
        let hi = prefix_end(&lo);
        let mut rows = Vec::new();
        for item in t.range::<&[u8]>(lo.as_slice()..hi.as_slice()).map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            let (id, _) = split_id_start(k.value().get(lo.len()..).unwrap_or_default())?;
            if exclude_ids.contains(&id) {
                continue;
            }
            let row = decode_row(v.value())?;
            if row.end.is_none() {
                rows.push((id, row.data));
            }
        }
        Ok(query.apply(rows))
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let r = self.read_txn()?;
        let t = r.open_table(METADATA).map_err(backend)?;
        let v = t.get(key).map_err(backend)?;
        v.map(|v| serde_json::from_slice(v.value()).map_err(|e| StorageError::Decode(e.to_string())))
            .transpose()
    }

    async fn get_poi(&self, id: Height) -> Result<Option<ProofOfIndex>, StorageError> {
        let r = self.read_txn()?;
        let t = r.open_table(POI).map_err(backend)?;
        let v = t.get(id).map_err(backend)?;
        v.map(|v| decode_poi(v.value())).transpose()
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
        let r = self.read_txn()?;
        let t = r.open_table(POI).map_err(backend)?;
        let mut out = Vec::new();
        for item in t.range(start..=end).map_err(backend)?.take(limit) {
            let (_, v) = item.map_err(backend)?;
            out.push(decode_poi(v.value())?);
        }
        Ok(out)
    }

    async fn poi_before(
        &self,
        height: Height,
        limit: usize,
    ) -> Result<Vec<ProofOfIndex>, StorageError> {
        let r = self.read_txn()?;
        let t = r.open_table(POI).map_err(backend)?;
        let mut out = Vec::new();
        for item in t.range(..=height).map_err(backend)?.rev().take(limit) {
            let (_, v) = item.map_err(backend)?;
            out.push(decode_poi(v.value())?);
        }
        Ok(out)
    }

    async fn latest_poi(&self, filter: PoiFilter) -> Result<Option<ProofOfIndex>, StorageError> {
        self.scan_pois(true, |p| filter.accepts(p))
    }

    async fn first_poi(&self, filter: PoiFilter) -> Result<Option<ProofOfIndex>, StorageError> {
        self.scan_pois(false, |p| filter.accepts(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_keys_split_back_into_id_and_height() {
        let k = k_entity("Transfer", "0xab-1", 42);
        let tail = &k[k_prefix("Transfer", None).len()..];
        assert_eq!(split_id_start(tail).unwrap(), ("0xab-1".to_string(), 42));
    }

    #[test]
    fn id_prefixes_do_not_collide() {
        let a = k_prefix("T", Some("e1"));
        let b = k_entity("T", "e10", 1);
        assert!(!(b.as_slice() >= a.as_slice() && b.as_slice() < prefix_end(&a).as_slice()));
    }
}
