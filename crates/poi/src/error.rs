// Path: crates/poi/src/error.rs
//! Error type for the POI chain and its services.

use strata_api::storage::StorageError;
use strata_mmr::MmrError;
use strata_types::error::ErrorCode;
use strata_types::{Hash32, Height};
use thiserror::Error;

/// Errors raised while building, syncing or repairing the POI chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoiError {
    /// The project id is empty.
    #[error("POI project id must not be empty")]
    InvalidProjectId,
    /// Block heights start at 1.
    #[error("invalid POI id {0}")]
    InvalidId(Height),
    /// A row had exactly one of `chain_block_hash` / `operation_hash_root`.
    #[error("POI row {id} must have both chain_block_hash and operation_hash_root, or neither")]
    InconsistentInputs {
        /// The block height of the row.
        id: Height,
    },
    /// A chain block hash could not be decoded.
    #[error("POI row {id}: {reason}")]
    InvalidBlockHash {
        /// The block height of the row.
        id: Height,
        /// The decode failure.
        reason: String,
    },
    /// The sync stream went backwards.
    #[error("POI row {id} is not above the latest synced height {latest}")]
    NonMonotonic {
        /// The rejected row.
        id: Height,
        /// The latest synced height.
        latest: Height,
    },
    /// A recomputed accumulator root disagrees with the one stored on a row.
    #[error("accumulator root mismatch at POI {id}: stored {stored}, computed {computed}")]
    MmrMismatch {
        /// The block height of the row.
        id: Height,
        /// The root stored on the row.
        stored: Hash32,
        /// The root the accumulator yields now.
        computed: Hash32,
    },
    /// Safe regeneration would have to fabricate accumulator leaves.
    #[error(
        "accumulator ends at height {accumulator_height} but POI rows are linked up to \
         {poi_mmr_height}; regenerate in unsafe mode to copy the missing leaves from the POI table"
    )]
    AccumulatorBehind {
        /// The last height the accumulator holds a leaf for.
        accumulator_height: Height,
        /// The last height whose row carries an accumulator root.
        poi_mmr_height: Height,
    },
    /// A regeneration target beyond what has been indexed.
    #[error("target height {target} is above the latest POI height {latest}; retry with --targetHeight={latest} or lower")]
    TargetAboveLatest {
        /// The requested height.
        target: Height,
        /// The latest indexed height.
        latest: Height,
    },
    /// Regeneration needs the accumulator loop to be stopped.
    #[error("the accumulator service is still running")]
    ServiceRunning,
    /// The accumulator failed.
    #[error(transparent)]
    Mmr(#[from] MmrError),
    /// The durable store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PoiError {
    /// Whether the error stops a background loop for good.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Storage(StorageError::Backend(_))
                | Self::Mmr(MmrError::Storage(StorageError::Backend(_)))
        )
    }
}

impl ErrorCode for PoiError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidProjectId => "POI_INVALID_PROJECT_ID",
            Self::InvalidId(_) => "POI_INVALID_ID",
            Self::InconsistentInputs { .. } => "POI_INCONSISTENT_INPUTS",
            Self::InvalidBlockHash { .. } => "POI_INVALID_BLOCK_HASH",
            Self::NonMonotonic { .. } => "POI_NON_MONOTONIC",
            Self::MmrMismatch { .. } => "POI_MMR_MISMATCH",
            Self::AccumulatorBehind { .. } => "POI_ACCUMULATOR_BEHIND",
            Self::TargetAboveLatest { .. } => "POI_TARGET_ABOVE_LATEST",
            Self::ServiceRunning => "POI_SERVICE_RUNNING",
            Self::Mmr(e) => e.code(),
            Self::Storage(e) => e.code(),
        }
    }
}
