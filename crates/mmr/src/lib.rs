// Path: crates/mmr/src/lib.rs
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

//! # Strata MMR
//!
//! An append-only Merkle Mountain Range over 32-byte Proof-of-Index leaf
//! hashes. Nodes live behind the [`strata_api::mmr::MmrDb`] trait so the
//! accumulator can be persisted in a flat file ([`FileMmrDb`]), in a table of
//! the embedded store, or in memory, optionally behind the [`CachedMmrDb`]
//! write-back layer.

pub mod backend;
pub mod error;
pub mod mmr;
pub mod position;

pub use backend::{CachedMmrDb, FileMmrDb, MemoryMmrDb};
pub use error::MmrError;
pub use mmr::{verify_proof, MerkleMountainRange, MmrProof};
