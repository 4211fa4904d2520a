// Path: crates/storage/src/lib.rs
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

//! Durable store backends for the strata indexer store.
//!
//! [`RedbStore`] is the embedded transactional store used in production and
//! [`MemoryStore`] is a faithful in-memory fake for tests. Both apply batches
//! of [`strata_api::storage::StoreOp`] with identical semantics.

mod apply;
pub mod memory;
pub mod migrations;
pub mod mmr;
pub mod redb_store;

pub use memory::MemoryStore;
pub use mmr::RedbMmrDb;
pub use redb_store::RedbStore;
