// Path: crates/node/src/error.rs
//! Error type for node lifecycle operations.

use strata_api::storage::StorageError;
use strata_cache::CacheError;
use strata_poi::PoiError;
use strata_types::error::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// `start` was called twice.
    #[error("node services are already running")]
    AlreadyStarted,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Poi(#[from] PoiError),
}

impl ErrorCode for NodeError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyStarted => "NODE_ALREADY_STARTED",
            Self::Storage(e) => e.code(),
            Self::Cache(e) => e.code(),
            Self::Poi(e) => e.code(),
        }
    }
}
