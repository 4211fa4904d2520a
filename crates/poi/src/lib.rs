// Path: crates/poi/src/lib.rs
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

//! # Strata POI
//!
//! The Proof-of-Index hash chain and everything that maintains it.
//!
//! - [`PoiRecord`] computes the chained hash of one block.
//! - [`PoiSyncService`] turns rows created by the indexing pipeline into a
//!   gap-free linked chain.
//! - [`MmrService`] appends synced hashes to the accumulator and records the
//!   resulting root on each row.
//! - [`IntegrityRegenerator`] rewinds or replays the accumulator when it has
//!   diverged from the chain.

pub mod error;
pub mod mmr_service;
pub mod record;
pub mod regenerator;
pub mod sync;
mod worker;

pub use error::PoiError;
pub use mmr_service::MmrService;
pub use record::PoiRecord;
pub use regenerator::{IntegrityRegenerator, RegenMode, RegenerateReport};
pub use sync::PoiSyncService;
