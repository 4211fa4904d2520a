// Path: crates/types/src/poi.rs

//! Proof-of-Index rows.

use crate::hash::Hash32;
use crate::Height;
use serde::{Deserialize, Serialize};

/// One block's entry in the Proof-of-Index hash chain.
///
/// A row without `parent_hash` has been created by the indexing pipeline but not
/// yet chained ("unsynced"). Once `parent_hash` is attached, `hash` is computed
/// and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfIndex {
    /// The block height.
    pub id: Height,
    /// The chain's own hash of the block, in canonical raw bytes.
    pub chain_block_hash: Option<Vec<u8>>,
    /// Root hash over every store operation performed while indexing the block.
    pub operation_hash_root: Option<Hash32>,
    /// The chained hash of this row.
    pub hash: Option<Hash32>,
    /// The previous row's `hash`.
    pub parent_hash: Option<Hash32>,
    /// The accumulator root after this row's hash was appended as a leaf.
    pub mmr_root: Option<Hash32>,
}

impl ProofOfIndex {
    /// A row as handed over by the indexing pipeline, before chaining.
    pub fn created(id: Height, chain_block_hash: Vec<u8>, operation_hash_root: Hash32) -> Self {
        Self {
            id,
            chain_block_hash: Some(chain_block_hash),
            operation_hash_root: Some(operation_hash_root),
            hash: None,
            parent_hash: None,
            mmr_root: None,
        }
    }

    /// Returns true once the row has been linked to its predecessor.
    pub fn is_synced(&self) -> bool {
        self.parent_hash.is_some() && self.hash.is_some()
    }

    /// Returns true for gap-filling rows that carry neither input hash.
    pub fn is_default(&self) -> bool {
        self.chain_block_hash.is_none() && self.operation_hash_root.is_none()
    }

    /// Both input hashes must be present together or absent together.
    pub fn has_consistent_inputs(&self) -> bool {
        self.chain_block_hash.is_some() == self.operation_hash_root.is_some()
    }
}
