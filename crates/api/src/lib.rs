// Path: crates/api/src/lib.rs

//! # Strata API Crate Lints
//!
//! This crate enforces a strict set of lints to ensure high-quality,
//! panic-free, and well-documented code. Panics are disallowed in non-test
//! code to promote robust error handling.
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
#![deny(missing_docs)]
//! # Strata API
//!
//! Core traits and interfaces for the strata indexer store. This crate defines
//! the stable contract between the caches, the durable store backends and the
//! accumulator backends.

/// The flush contract implemented by every write-back cache.
pub mod cache;
/// The key-value contract of accumulator backends.
pub mod mmr;
/// Field filters, ordering and paging over JSON entity payloads.
pub mod query;
/// The durable store contract: operations, transactions and typed repositories.
pub mod storage;

/// A curated set of the most commonly used traits and types.
pub mod prelude {
    pub use crate::cache::Cacheable;
    pub use crate::mmr::MmrDb;
    pub use crate::query::{FieldQuery, FilterOp, OrderDirection};
    pub use crate::storage::{
        DurableStore, Entity, PoiFilter, Repository, StorageError, StoreOp, StoreRepository,
        Transaction, VersionRow,
    };
}
