// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]
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

//! # Strata Types
//!
//! The foundational library for the strata indexer store, containing the core
//! data structures, error types, and configuration objects.
//!
//! ## Architectural Role
//!
//! As the base crate, `strata-types` has minimal dependencies and is itself a
//! dependency for every other crate in the workspace. It provides the canonical
//! definitions of versioned entity values, Proof-of-Index rows, 32-byte hashes
//! and the persisted metadata keys.

/// A block height as reported by the indexed chain.
pub type Height = u64;

/// Shared configuration structures (`IndexerConfig`, `CacheConfig`, ...).
pub mod config;
/// A unified set of error types and the `ErrorCode` trait.
pub mod error;
/// 32-byte hashes, the keccak-256 primitive and chain block hash decoding.
pub mod hash;
/// Well-known keys of the persisted metadata store.
pub mod keys;
/// Proof-of-Index rows.
pub mod poi;
/// Block-height-versioned entity values and tombstones.
pub mod version;

pub use hash::{keccak256, ChainBlockHash, Hash32, ZERO_HASH};
pub use poi::ProofOfIndex;
pub use version::{HistoricalValue, Tombstone};
