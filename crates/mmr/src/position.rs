// Path: crates/mmr/src/position.rs
//! Node positions of a Merkle Mountain Range.
//!
//! Nodes are numbered in post-order: every subtree occupies a contiguous run
//! of positions and its root comes last.

/// One perfect subtree of the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    /// Position of the subtree's root.
    pub pos: u64,
    /// Height of the subtree; it spans `2^height` leaves.
    pub height: u32,
    /// Index of the subtree's leftmost leaf.
    pub first_leaf: u64,
}

impl Peak {
    /// Number of leaves under the peak.
    pub fn leaves(&self) -> u64 {
        1u64 << self.height
    }

    /// Returns true if `leaf_index` lies under the peak.
    pub fn contains(&self, leaf_index: u64) -> bool {
        leaf_index >= self.first_leaf && leaf_index - self.first_leaf < self.leaves()
    }
}

/// Position of leaf `index`.
pub fn leaf_pos(index: u64) -> u64 {
    2 * index - u64::from(index.count_ones())
}

/// Number of nodes in a perfect subtree of `height`.
pub fn subtree_size(height: u32) -> u64 {
    (1u64 << (height + 1)) - 1
}

/// The peaks of a range of `leaves` leaves, left to right.
pub fn peaks(leaves: u64) -> Vec<Peak> {
    let mut out = Vec::with_capacity(leaves.count_ones() as usize);
    let mut offset = 0u64;
    let mut first_leaf = 0u64;
    for height in (0..63u32).rev() {
        if leaves & (1u64 << height) == 0 {
            continue;
        }
        let size = subtree_size(height);
        out.push(Peak {
            pos: offset + size - 1,
            height,
            first_leaf,
        });
        offset += size;
        first_leaf += 1u64 << height;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_positions_skip_parents() {
        let got: Vec<u64> = (0..8).map(leaf_pos).collect();
        assert_eq!(got, vec![0, 1, 3, 4, 7, 8, 10, 11]);
    }

    #[test]
    fn peaks_mirror_the_binary_form_of_the_leaf_count() {
        let p = peaks(11);
        let positions: Vec<u64> = p.iter().map(|p| p.pos).collect();
        assert_eq!(positions, vec![14, 17, 18]);
        assert_eq!(p.iter().map(|p| p.first_leaf).collect::<Vec<_>>(), vec![0, 8, 10]);
        assert!(p[1].contains(9));
        assert!(!p[1].contains(10));
        assert!(peaks(0).is_empty());
    }
}
