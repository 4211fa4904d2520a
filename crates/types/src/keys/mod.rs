// Path: crates/types/src/keys/mod.rs
//! Defines constants for well-known metadata keys.
//!
//! These constants provide a single source of truth for the keys used to store
//! indexer progress in the metadata table. Values are JSON-encoded.

/// The last block height whose writes were handed to the cache.
pub const LAST_PROCESSED_HEIGHT: &str = "lastProcessedHeight";

/// The height preceding the first indexed block; converts heights to MMR leaf indices.
pub const BLOCK_OFFSET: &str = "blockOffset";

/// The highest POI height that has been hash-chained.
pub const LATEST_SYNCED_POI_HEIGHT: &str = "latestSyncedPoiHeight";

/// `{ "id": <height>, "mmrRoot": "<hex>" }` of the highest POI linked into the accumulator.
pub const LATEST_POI_WITH_MMR: &str = "latestPoiWithMmr";

/// Append-only list of dynamically created datasources.
pub const DYNAMIC_DATASOURCES: &str = "dynamicDatasources";

/// Increment-only count of processed blocks.
pub const PROCESSED_BLOCK_COUNT: &str = "processedBlockCount";

/// Increment-only count of applied schema migrations.
pub const SCHEMA_MIGRATION_COUNT: &str = "schemaMigrationCount";

/// Keys that may only be updated with atomic increments.
pub const INCREMENT_KEYS: &[&str] = &[PROCESSED_BLOCK_COUNT, SCHEMA_MIGRATION_COUNT];

/// Keys that may receive atomic list appends.
pub const APPEND_KEYS: &[&str] = &[DYNAMIC_DATASOURCES];

/// Returns true if `key` is an increment-only counter.
pub fn is_increment_key(key: &str) -> bool {
    INCREMENT_KEYS.contains(&key)
}

/// Returns true if `key` is an append-only list.
pub fn is_append_key(key: &str) -> bool {
    APPEND_KEYS.contains(&key)
}
