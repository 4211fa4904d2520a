// Path: crates/cache/src/error.rs
//! Error type for the cache layer.

use strata_api::storage::StorageError;
use strata_types::error::ErrorCode;
use strata_types::Height;
use thiserror::Error;

/// Errors raised by the write-back caches and the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A write arrived for a height below one already recorded for the same id.
    /// The pipeline fed heights non-monotonically; this is never recovered.
    #[error("out-of-order write to {entity} '{id}': height {attempted} is below recorded height {current}")]
    OutOfOrder {
        /// The entity type.
        entity: String,
        /// The entity id.
        id: String,
        /// The height already recorded.
        current: Height,
        /// The rejected height.
        attempted: Height,
    },
    /// A POI row had exactly one of `chain_block_hash` / `operation_hash_root`.
    #[error("POI row {id} must have both chain_block_hash and operation_hash_root, or neither")]
    InconsistentPoi {
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
    /// No cache is registered under the entity name.
    #[error("no cache registered for entity '{0}'")]
    UnknownEntity(String),
    /// A cache is registered under the entity name with a different payload type.
    #[error("entity '{0}' is registered with a different payload type")]
    TypeMismatch(String),
    /// The durable store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ErrorCode for CacheError {
    fn code(&self) -> &'static str {
        match self {
            Self::OutOfOrder { .. } => "CACHE_OUT_OF_ORDER",
            Self::InconsistentPoi { .. } => "CACHE_INCONSISTENT_POI",
            Self::InvalidBlockHash { .. } => "CACHE_INVALID_BLOCK_HASH",
            Self::UnknownEntity(_) => "CACHE_UNKNOWN_ENTITY",
            Self::TypeMismatch(_) => "CACHE_TYPE_MISMATCH",
            Self::Storage(e) => e.code(),
        }
    }
}
