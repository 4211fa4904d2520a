// Path: crates/poi/src/record.rs
//! Hash-chain construction for a single block.

use crate::error::PoiError;
use strata_types::{keccak256, ChainBlockHash, Hash32, Height, ProofOfIndex, ZERO_HASH};

/// The validated hash inputs of one block.
///
/// `hash = keccak256(be64(id) ‖ chain_block_hash ‖ operation_hash_root ‖ project_id ‖ parent_hash)`,
/// with [`ZERO_HASH`] standing in for absent input hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoiRecord<'a> {
    id: Height,
    chain_block_hash: Option<Vec<u8>>,
    operation_hash_root: Option<Hash32>,
    project_id: &'a str,
}

impl<'a> PoiRecord<'a> {
    /// Validates the inputs of block `id`. The block hash is decoded with the
    /// encoding the caller names.
    pub fn new(
        id: Height,
        chain_block_hash: Option<&ChainBlockHash>,
        operation_hash_root: Option<Hash32>,
        project_id: &'a str,
    ) -> Result<Self, PoiError> {
        let chain_block_hash = chain_block_hash
            .map(|h| h.to_bytes())
            .transpose()
            .map_err(|e| PoiError::InvalidBlockHash {
                id,
                reason: e.to_string(),
            })?;
        Self::from_parts(id, chain_block_hash, operation_hash_root, project_id)
    }

    /// The inputs of a stored row.
    pub fn from_poi(poi: &ProofOfIndex, project_id: &'a str) -> Result<Self, PoiError> {
        Self::from_parts(
            poi.id,
            poi.chain_block_hash.clone(),
            poi.operation_hash_root,
            project_id,
        )
    }

    /// A gap-filling block that carries neither input hash.
    pub fn default_record(id: Height, project_id: &'a str) -> Result<Self, PoiError> {
        Self::from_parts(id, None, None, project_id)
    }

    fn from_parts(
        id: Height,
        chain_block_hash: Option<Vec<u8>>,
        operation_hash_root: Option<Hash32>,
        project_id: &'a str,
    ) -> Result<Self, PoiError> {
        if id == 0 {
            return Err(PoiError::InvalidId(id));
        }
        if project_id.is_empty() {
            return Err(PoiError::InvalidProjectId);
        }
        if chain_block_hash.is_some() != operation_hash_root.is_some() {
            return Err(PoiError::InconsistentInputs { id });
        }
        Ok(Self {
            id,
            chain_block_hash,
            operation_hash_root,
            project_id,
        })
    }

    /// The block height.
    pub fn id(&self) -> Height {
        self.id
    }

    /// The chained hash given the predecessor's hash.
    pub fn hash(&self, parent_hash: &Hash32) -> Hash32 {
        let id = self.id.to_be_bytes();
        let zero = ZERO_HASH;
        let chain_block_hash: &[u8] = match &self.chain_block_hash {
            Some(bytes) => bytes,
            None => &zero.0[..],
        };
        let operation_hash_root = self.operation_hash_root.unwrap_or(ZERO_HASH);
        keccak256([
            &id[..],
            chain_block_hash,
            &operation_hash_root.0[..],
            self.project_id.as_bytes(),
            &parent_hash.0[..],
        ])
    }

    /// The row before chaining.
    pub fn unsynced(self) -> ProofOfIndex {
        ProofOfIndex {
            id: self.id,
            chain_block_hash: self.chain_block_hash,
            operation_hash_root: self.operation_hash_root,
            hash: None,
            parent_hash: None,
            mmr_root: None,
        }
    }

    /// The row chained to `parent_hash`.
    pub fn link(self, parent_hash: Hash32) -> ProofOfIndex {
        let hash = self.hash(&parent_hash);
        ProofOfIndex {
            hash: Some(hash),
            parent_hash: Some(parent_hash),
            ..self.unsynced()
        }
    }
}
