// Path: crates/api/src/mmr/mod.rs

//! Storage contract for Merkle Mountain Range nodes.

use crate::storage::StorageError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use strata_types::Hash32;

/// A position-addressed node store with a persisted leaf count.
///
/// Positions are zero-based in post-order, so node `p` is written only after
/// both of its children.
#[async_trait]
pub trait MmrDb: Send + Sync {
    /// Reads the node at `pos`.
    async fn get(&self, pos: u64) -> Result<Option<Hash32>, StorageError>;

    /// Writes the node at `pos`.
    async fn set(&self, value: Hash32, pos: u64) -> Result<(), StorageError>;

    /// Writes many nodes at once.
    async fn bulk_set(&self, nodes: &BTreeMap<u64, Hash32>) -> Result<(), StorageError>;

    /// The number of leaves appended so far.
    async fn get_leaf_length(&self) -> Result<u64, StorageError>;

    /// Overwrites the leaf count and returns it. Shrinking it truncates the
    /// accumulator; nodes past the new end are left in place and overwritten
    /// by later appends.
    async fn set_leaf_length(&self, length: u64) -> Result<u64, StorageError>;

    /// Every stored node, keyed by position.
    async fn get_nodes(&self) -> Result<BTreeMap<u64, Hash32>, StorageError>;
}
