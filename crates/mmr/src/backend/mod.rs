// Path: crates/mmr/src/backend/mod.rs
//! [`strata_api::mmr::MmrDb`] implementations owned by this crate.
//!
//! The table-backed store lives with the embedded store in `strata-storage`.

mod cached;
mod file;
mod memory;

pub use cached::CachedMmrDb;
pub use file::FileMmrDb;
pub use memory::MemoryMmrDb;
