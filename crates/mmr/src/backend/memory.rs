// Path: crates/mmr/src/backend/memory.rs

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use strata_api::mmr::MmrDb;
use strata_api::storage::StorageError;
use strata_types::Hash32;

#[derive(Debug, Default)]
struct Nodes {
    nodes: BTreeMap<u64, Hash32>,
    leaf_length: u64,
}

/// A volatile [`MmrDb`] for tests and throwaway accumulators.
#[derive(Debug, Default)]
pub struct MemoryMmrDb {
    inner: Mutex<Nodes>,
}

impl MemoryMmrDb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MmrDb for MemoryMmrDb {
    async fn get(&self, pos: u64) -> Result<Option<Hash32>, StorageError> {
        Ok(self.inner.lock().nodes.get(&pos).copied())
    }

    async fn set(&self, value: Hash32, pos: u64) -> Result<(), StorageError> {
        self.inner.lock().nodes.insert(pos, value);
        Ok(())
    }

    async fn bulk_set(&self, nodes: &BTreeMap<u64, Hash32>) -> Result<(), StorageError> {
        self.inner.lock().nodes.extend(nodes.iter().map(|(k, v)| (*k, *v)));
        Ok(())
    }

    async fn get_leaf_length(&self) -> Result<u64, StorageError> {
        Ok(self.inner.lock().leaf_length)
    }

    async fn set_leaf_length(&self, length: u64) -> Result<u64, StorageError> {
        self.inner.lock().leaf_length = length;
        Ok(length)
    }

    async fn get_nodes(&self) -> Result<BTreeMap<u64, Hash32>, StorageError> {
        Ok(self.inner.lock().nodes.clone())
    }
}
