// Path: crates/storage/src/mmr.rs

//! Table-backed accumulator node store.

use crate::redb_store::{backend, MMR_META, MMR_NODES};
use async_trait::async_trait;
use redb::{Database, ReadableTable};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_api::mmr::MmrDb;
use strata_api::storage::StorageError;
use strata_types::Hash32;

const LEAF_LENGTH: &str = "leafLength";

/// An [`MmrDb`] storing nodes in the `MMR_NODES` table of a [`crate::RedbStore`].
#[derive(Clone)]
pub struct RedbMmrDb {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbMmrDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbMmrDb").finish_non_exhaustive()
    }
}

impl RedbMmrDb {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MmrDb for RedbMmrDb {
    async fn get(&self, pos: u64) -> Result<Option<Hash32>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let t = r.open_table(MMR_NODES).map_err(backend)?;
        let v = t.get(pos).map_err(backend)?;
        Ok(v.map(|v| Hash32(*v.value())))
    }

    async fn set(&self, value: Hash32, pos: u64) -> Result<(), StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut t = w.open_table(MMR_NODES).map_err(backend)?;
            t.insert(pos, value.as_bytes()).map_err(backend)?;
        }
        w.commit().map_err(backend)
    }

    async fn bulk_set(&self, nodes: &BTreeMap<u64, Hash32>) -> Result<(), StorageError> {
        if nodes.is_empty() {
            return Ok(());
        }
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut t = w.open_table(MMR_NODES).map_err(backend)?;
            for (pos, value) in nodes {
                t.insert(*pos, value.as_bytes()).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }

    async fn get_leaf_length(&self) -> Result<u64, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let t = r.open_table(MMR_META).map_err(backend)?;
        let v = t.get(LEAF_LENGTH).map_err(backend)?;
        Ok(v.map(|v| v.value()).unwrap_or(0))
    }

    async fn set_leaf_length(&self, length: u64) -> Result<u64, StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut t = w.open_table(MMR_META).map_err(backend)?;
            t.insert(LEAF_LENGTH, length).map_err(backend)?;
        }
        w.commit().map_err(backend)?;
        Ok(length)
    }

    async fn get_nodes(&self) -> Result<BTreeMap<u64, Hash32>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let t = r.open_table(MMR_NODES).map_err(backend)?;
        let mut out = BTreeMap::new();
        for item in t.iter().map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            out.insert(k.value(), Hash32(*v.value()));
        }
        Ok(out)
    }
}
