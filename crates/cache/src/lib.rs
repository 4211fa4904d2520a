// Path: crates/cache/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # Strata Cache
//!
//! Write-back caches sitting in front of a [`strata_api::storage::DurableStore`].
//!
//! The block-processing pipeline writes entities, metadata and POI rows into
//! the caches once per block and then signals a height boundary. The
//! [`CacheOrchestrator`] flushes every cache into one durable transaction per
//! boundary; each cache prunes what was persisted only from that
//! transaction's after-commit hook.

pub mod chain;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod poi;
mod read_cache;
pub mod sequence;
pub mod versioned;

pub use chain::VersionChain;
pub use error::CacheError;
pub use metadata::MetadataCache;
pub use orchestrator::CacheOrchestrator;
pub use poi::PoiCache;
pub use sequence::OperationIndex;
pub use versioned::VersionedCache;
