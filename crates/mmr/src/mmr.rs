// Path: crates/mmr/src/mmr.rs
//! The accumulator itself.

use crate::error::MmrError;
use crate::position::{leaf_pos, peaks, subtree_size, Peak};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_api::mmr::MmrDb;
use strata_telemetry::mmr_metrics;
use strata_types::{keccak256, Hash32, Height};
use tokio::sync::Mutex as AsyncMutex;

fn hash_leaf(leaf: &Hash32) -> Hash32 {
    keccak256([leaf.0])
}

fn merge(left: &Hash32, right: &Hash32) -> Hash32 {
    keccak256([left.0, right.0])
}

/// Bags peaks right to left: `H(p0 ‖ H(p1 ‖ ... ‖ pn))`.
fn bag(peaks: &[Hash32]) -> Option<Hash32> {
    peaks.iter().rev().fold(None, |acc, peak| {
        Some(match acc {
            None => *peak,
            Some(right) => merge(peak, &right),
        })
    })
}

fn peak_of(leaf_index: u64, leaf_count: u64) -> Option<(usize, Peak)> {
    peaks(leaf_count)
        .into_iter()
        .enumerate()
        .find(|(_, p)| p.contains(leaf_index))
}

/// An inclusion proof of one leaf against the root of `leaf_count` leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmrProof {
    /// Index of the proven leaf.
    pub leaf_index: u64,
    /// Leaf count of the root the proof is against.
    pub leaf_count: u64,
    /// Sibling hashes from the leaf up to its peak.
    pub siblings: Vec<Hash32>,
    /// Every peak of the range, left to right.
    pub peaks: Vec<Hash32>,
}

/// Checks that `leaf` is included under `root` according to `proof`.
pub fn verify_proof(root: &Hash32, leaf: &[u8], proof: &MmrProof) -> bool {
    let Ok(leaf) = Hash32::from_slice(leaf) else {
        return false;
    };
    let Some((peak_index, peak)) = peak_of(proof.leaf_index, proof.leaf_count) else {
        return false;
    };
    if proof.siblings.len() != peak.height as usize
        || proof.peaks.len() != peaks(proof.leaf_count).len()
    {
        return false;
    }
    let local = proof.leaf_index - peak.first_leaf;
    let mut node = hash_leaf(&leaf);
    for (level, sibling) in proof.siblings.iter().enumerate() {
        node = if local & (1u64 << level) == 0 {
            merge(&node, sibling)
        } else {
            merge(sibling, &node)
        };
    }
    if proof.peaks.get(peak_index) != Some(&node) {
        return false;
    }
    bag(&proof.peaks).as_ref() == Some(root)
}

/// An append-only Merkle Mountain Range over a [`MmrDb`] backend.
///
/// Leaves are 32-byte hashes; each is hashed once more before it is stored.
/// Appends are serialized; reads go straight to the backend.
pub struct MerkleMountainRange {
    db: Arc<dyn MmrDb>,
    write: AsyncMutex<()>,
}

impl MerkleMountainRange {
    /// Creates an accumulator over `db`.
    pub fn new(db: Arc<dyn MmrDb>) -> Self {
        Self {
            db,
            write: AsyncMutex::new(()),
        }
    }

    /// The backend.
    pub fn db(&self) -> &Arc<dyn MmrDb> {
        &self.db
    }

    /// Number of leaves.
    pub async fn leaf_length(&self) -> Result<u64, MmrError> {
        Ok(self.db.get_leaf_length().await?)
    }

    async fn node(&self, pos: u64) -> Result<Hash32, MmrError> {
        self.db.get(pos).await?.ok_or(MmrError::MissingNode(pos))
    }

    /// Appends `leaf` and returns its index.
    ///
    /// With `leaf_index`, the leaf is written at that index; every leaf from
    /// there on is discarded first. The index may not exceed the leaf length.
    pub async fn append(&self, leaf: &[u8], leaf_index: Option<u64>) -> Result<u64, MmrError> {
        let leaf = Hash32::from_slice(leaf).map_err(|_| MmrError::InvalidLeafLength(leaf.len()))?;
        let _write = self.write.lock().await;
        let length = self.db.get_leaf_length().await?;
        let index = leaf_index.unwrap_or(length);
        if index > length {
            return Err(MmrError::LeafIndexAhead { index, length });
        }

        let mut nodes = BTreeMap::new();
        let mut pos = leaf_pos(index);
        let mut node = hash_leaf(&leaf);
        nodes.insert(pos, node);
        // Every trailing one bit of the index completes a subtree.
        let mut height = 0u32;
        let mut rest = index;
        while rest & 1 == 1 {
            let sibling = self.node(pos - subtree_size(height)).await?;
            node = merge(&sibling, &node);
            pos += 1;
            nodes.insert(pos, node);
            height += 1;
            rest >>= 1;
        }
        self.db.bulk_set(&nodes).await?;
        let length = self.db.set_leaf_length(index + 1).await?;

        let metrics = mmr_metrics();
        metrics.inc_leaves_appended(1);
        metrics.set_leaf_length(length);
        tracing::trace!(target: "mmr", leaf_index = index, "appended leaf");
        Ok(index)
    }

    /// The root over leaves `0..=leaf_index`.
    ///
    /// Nodes of a prefix never change once written, so the result does not
    /// depend on how many leaves were appended after `leaf_index`.
    pub async fn get_root(&self, leaf_index: u64) -> Result<Hash32, MmrError> {
        let length = self.db.get_leaf_length().await?;
        if leaf_index >= length {
            return Err(MmrError::LeafOutOfRange {
                index: leaf_index,
                length,
            });
        }
        let mut hashes = Vec::new();
        for peak in peaks(leaf_index + 1) {
            hashes.push(self.node(peak.pos).await?);
        }
        bag(&hashes).ok_or(MmrError::LeafOutOfRange {
            index: leaf_index,
            length,
        })
    }

    /// Builds an inclusion proof of `leaf_index` against the current root.
    pub async fn get_proof(&self, leaf_index: u64) -> Result<MmrProof, MmrError> {
        let length = self.db.get_leaf_length().await?;
        let Some((_, peak)) = peak_of(leaf_index, length) else {
            return Err(MmrError::LeafOutOfRange {
                index: leaf_index,
                length,
            });
        };
        let local = leaf_index - peak.first_leaf;
        let mut pos = leaf_pos(leaf_index);
        let mut siblings = Vec::with_capacity(peak.height as usize);
        for level in 0..peak.height {
            let span = subtree_size(level);
            if local & (1u64 << level) == 0 {
                siblings.push(self.node(pos + span).await?);
                pos += span + 1;
            } else {
                siblings.push(self.node(pos - span).await?);
                pos += 1;
            }
        }
        let mut peak_hashes = Vec::new();
        for p in peaks(length) {
            peak_hashes.push(self.node(p.pos).await?);
        }
        Ok(MmrProof {
            leaf_index,
            leaf_count: length,
            siblings,
            peaks: peak_hashes,
        })
    }

    /// Rolls the accumulator back to `leaf_length` leaves.
    ///
    /// Higher nodes stay in the backend until the next append overwrites them.
    pub async fn truncate(&self, leaf_length: u64) -> Result<(), MmrError> {
        let _write = self.write.lock().await;
        let length = self.db.get_leaf_length().await?;
        if leaf_length > length {
            return Err(MmrError::LeafIndexAhead {
                index: leaf_length,
                length,
            });
        }
        self.db.set_leaf_length(leaf_length).await?;
        mmr_metrics().set_leaf_length(leaf_length);
        Ok(())
    }

    /// Drops the leaves of every block from `height` on, where leaf `i` holds
    /// block `block_offset + i + 1`.
    pub async fn delete_mmr_node(&self, height: Height, block_offset: Height) -> Result<(), MmrError> {
        let keep = height.saturating_sub(block_offset).saturating_sub(1);
        let length = self.leaf_length().await?;
        if keep >= length {
            return Ok(());
        }
        tracing::info!(target: "mmr", height, block_offset, leaves = keep, "truncating accumulator");
        self.truncate(keep).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryMmrDb;
    use proptest::prelude::*;

    fn leaf(i: u64) -> [u8; 32] {
        keccak256([i.to_be_bytes()]).0
    }

    async fn filled(n: u64) -> MerkleMountainRange {
        let mmr = MerkleMountainRange::new(Arc::new(MemoryMmrDb::new()));
        for i in 0..n {
            mmr.append(&leaf(i), None).await.unwrap();
        }
        mmr
    }

    #[tokio::test]
    async fn rejects_leaves_of_the_wrong_size() {
        let mmr = filled(0).await;
        assert_eq!(
            mmr.append(&[1u8; 31], None).await,
            Err(MmrError::InvalidLeafLength(31))
        );
        assert_eq!(
            mmr.append(&leaf(0), Some(3)).await,
            Err(MmrError::LeafIndexAhead { index: 3, length: 0 })
        );
    }

    #[tokio::test]
    async fn root_of_two_leaves_is_their_merge() {
        let mmr = filled(2).await;
        let a = hash_leaf(&Hash32(leaf(0)));
        let b = hash_leaf(&Hash32(leaf(1)));
        assert_eq!(mmr.get_root(0).await.unwrap(), a);
        assert_eq!(mmr.get_root(1).await.unwrap(), merge(&a, &b));
        assert!(matches!(
            mmr.get_root(2).await,
            Err(MmrError::LeafOutOfRange { index: 2, length: 2 })
        ));
    }

    #[tokio::test]
    async fn prefix_roots_survive_later_appends() {
        let mmr = filled(5).await;
        let before = mmr.get_root(4).await.unwrap();
        for i in 5..13 {
            mmr.append(&leaf(i), None).await.unwrap();
        }
        assert_eq!(mmr.get_root(4).await.unwrap(), before);
    }

    #[tokio::test]
    async fn proofs_verify_for_every_leaf() {
        for n in [1u64, 2, 3, 7, 8, 11] {
            let mmr = filled(n).await;
            let root = mmr.get_root(n - 1).await.unwrap();
            for i in 0..n {
                let proof = mmr.get_proof(i).await.unwrap();
                assert!(verify_proof(&root, &leaf(i), &proof), "n={n} i={i}");
                assert!(!verify_proof(&root, &leaf(i + 100), &proof));
            }
        }
    }

    #[tokio::test]
    async fn tampered_proofs_fail() {
        let mmr = filled(6).await;
        let root = mmr.get_root(5).await.unwrap();
        let mut proof = mmr.get_proof(2).await.unwrap();
        proof.siblings[0] = Hash32([0xff; 32]);
        assert!(!verify_proof(&root, &leaf(2), &proof));
        let mut proof = mmr.get_proof(2).await.unwrap();
        proof.siblings.pop();
        assert!(!verify_proof(&root, &leaf(2), &proof));
    }

    #[tokio::test]
    async fn overwriting_at_an_index_discards_the_tail() {
        let mmr = filled(4).await;
        let root_at_1 = mmr.get_root(1).await.unwrap();
        mmr.append(&leaf(42), Some(2)).await.unwrap();
        assert_eq!(mmr.leaf_length().await.unwrap(), 3);
        assert_eq!(mmr.get_root(1).await.unwrap(), root_at_1);
    }

    proptest! {
        #[test]
        fn same_leaves_same_roots(seeds in proptest::collection::vec(any::<u64>(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (a, b) = rt.block_on(async {
                let a = MerkleMountainRange::new(Arc::new(MemoryMmrDb::new()));
                let b = MerkleMountainRange::new(Arc::new(MemoryMmrDb::new()));
                let mut roots = (Vec::new(), Vec::new());
                for seed in &seeds {
                    let i = a.append(&leaf(*seed), None).await.unwrap();
                    b.append(&leaf(*seed), None).await.unwrap();
                    roots.0.push(a.get_root(i).await.unwrap());
                }
                for i in 0..seeds.len() as u64 {
                    roots.1.push(b.get_root(i).await.unwrap());
                }
                roots
            });
            prop_assert_eq!(a, b);
        }
    }
}
