// Path: crates/mmr/src/error.rs
//! Error type for the accumulator.

use strata_api::storage::StorageError;
use strata_types::error::ErrorCode;
use thiserror::Error;

/// Errors raised by [`crate::MerkleMountainRange`] and its backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MmrError {
    /// Leaves must be exactly 32 bytes.
    #[error("MMR leaf must be 32 bytes, got {0}")]
    InvalidLeafLength(usize),
    /// An append targeted an index past the end of the accumulator.
    #[error("cannot append leaf {index}: accumulator holds only {length} leaves")]
    LeafIndexAhead {
        /// The requested leaf index.
        index: u64,
        /// The current leaf length.
        length: u64,
    },
    /// A read targeted a leaf the accumulator does not hold.
    #[error("leaf {index} is out of range for an accumulator of {length} leaves")]
    LeafOutOfRange {
        /// The requested leaf index.
        index: u64,
        /// The current leaf length.
        length: u64,
    },
    /// A node below the leaf length was not found in the backend.
    #[error("MMR node at position {0} is missing from the backend")]
    MissingNode(u64),
    /// The backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ErrorCode for MmrError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidLeafLength(_) => "MMR_INVALID_LEAF_LENGTH",
            Self::LeafIndexAhead { .. } => "MMR_LEAF_INDEX_AHEAD",
            Self::LeafOutOfRange { .. } => "MMR_LEAF_OUT_OF_RANGE",
            Self::MissingNode(_) => "MMR_MISSING_NODE",
            Self::Storage(e) => e.code(),
        }
    }
}
