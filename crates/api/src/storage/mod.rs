// Path: crates/api/src/storage/mod.rs

//! API for the durable, transactional store sitting behind the caches.

use crate::query::FieldQuery;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use strata_types::error::ErrorCode;
use strata_types::{Hash32, Height, ProofOfIndex};
use thiserror::Error;

mod repository;
mod transaction;

pub use repository::{Entity, Repository, StoreRepository};
pub use transaction::{CommitHook, Transaction};

/// Encodes a u64 into a big-endian byte array, suitable for ordered key scans.
#[inline]
pub fn be64(x: u64) -> [u8; 8] {
    x.to_be_bytes()
}

/// Represents errors that can occur within the durable storage layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A generic error originating from the underlying store backend (e.g., redb).
    #[error("backend error: {0}")]
    Backend(String),
    /// An error occurred while serializing data for storage.
    #[error("encode error: {0}")]
    Encode(String),
    /// An error occurred while deserializing data from storage.
    #[error("decode error: {0}")]
    Decode(String),
    /// The requested key or item was not found in the store.
    #[error("not found")]
    NotFound,
    /// A metadata value had the wrong shape for an atomic increment or append.
    #[error("metadata key '{key}' cannot be updated atomically: {reason}")]
    InvalidMetadata {
        /// The offending key.
        key: String,
        /// Why the update was rejected.
        reason: String,
    },
    /// A schema migration failed; nothing from the migration was committed.
    #[error("schema migration {version} failed: {reason}")]
    Migration {
        /// The migration's version number.
        version: u32,
        /// The underlying failure.
        reason: String,
    },
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Encode(_) => "STORAGE_ENCODE_ERROR",
            Self::Decode(_) => "STORAGE_DECODE_ERROR",
            Self::NotFound => "STORAGE_NOT_FOUND",
            Self::InvalidMetadata { .. } => "STORAGE_INVALID_METADATA",
            Self::Migration { .. } => "STORAGE_MIGRATION_FAILED",
        }
    }
}

/// One stored interval of an entity's history.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRow {
    /// The entity id.
    pub id: String,
    /// The JSON payload.
    pub data: Value,
    /// First height at which the row is valid. Zero for non-historical entities.
    pub start_height: Height,
    /// First height at which the row is no longer valid; `None` while open.
    pub end_height: Option<Height>,
}

impl VersionRow {
    /// Returns true if `height` lies in `[start_height, end_height)`.
    pub fn covers(&self, height: Height) -> bool {
        self.start_height <= height && self.end_height.map_or(true, |end| height < end)
    }
}

/// A single write against the durable store. A batch of these is applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Closes the open interval of each id at the paired height.
    /// Rows starting at or after that height are left untouched.
    CloseVersions {
        /// The entity type.
        entity: String,
        /// `(id, end_height)` pairs.
        closes: Vec<(String, Height)>,
    },
    /// Inserts intervals, replacing any row with the same `(id, start_height)`.
    InsertVersions {
        /// The entity type.
        entity: String,
        /// The rows to insert.
        rows: Vec<VersionRow>,
    },
    /// Replaces every row of a non-historical entity with one open row.
    Upsert {
        /// The entity type.
        entity: String,
        /// The entity id.
        id: String,
        /// The JSON payload.
        data: Value,
    },
    /// Deletes every row of an entity id.
    Delete {
        /// The entity type.
        entity: String,
        /// The entity id.
        id: String,
    },
    /// Overwrites a metadata value.
    SetMetadata {
        /// The metadata key.
        key: String,
        /// The JSON value.
        value: Value,
    },
    /// Adds to a numeric metadata value, creating it from zero if missing.
    IncrementMetadata {
        /// The metadata key.
        key: String,
        /// The amount to add.
        amount: i64,
    },
    /// Appends to a JSON array metadata value, creating it if missing.
    AppendMetadata {
        /// The metadata key.
        key: String,
        /// The values to append, in order.
        values: Vec<Value>,
    },
    /// Removes a metadata key.
    DeleteMetadata {
        /// The metadata key.
        key: String,
    },
    /// Inserts or replaces POI rows by id.
    UpsertPoi(Vec<ProofOfIndex>),
    /// Sets `mmr_root` to `None` on every POI row with `id >= from`.
    ClearPoiMmrRoots {
        /// The first height to clear.
        from: Height,
    },
}

/// Selects which POI rows a latest/first lookup considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoiFilter {
    /// Every row.
    Any,
    /// Rows that have been hash-chained.
    Synced,
    /// Rows created by the pipeline but not yet chained.
    Unsynced,
    /// Rows that carry an accumulator root.
    WithMmr,
}

impl PoiFilter {
    /// Returns true if `poi` passes the filter.
    pub fn accepts(&self, poi: &ProofOfIndex) -> bool {
        match self {
            PoiFilter::Any => true,
            PoiFilter::Synced => poi.is_synced(),
            PoiFilter::Unsynced => !poi.is_synced(),
            PoiFilter::WithMmr => poi.mmr_root.is_some(),
        }
    }
}

/// The primary trait defining the API for the durable store.
///
/// Writes are only ever applied through [`DurableStore::apply`], which must be
/// all-or-nothing. Reads observe committed state only.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Atomically applies a batch of operations in order.
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StorageError>;

    /// Returns the open row's payload for an entity id.
    async fn find_entity(&self, entity: &str, id: &str) -> Result<Option<Value>, StorageError>;

    /// Returns the payload valid at `height` for an entity id.
    async fn find_entity_at(
        &self,
        entity: &str,
        id: &str,
        height: Height,
    ) -> Result<Option<Value>, StorageError>;

    /// Returns every stored interval of an entity id, ordered by start height.
    async fn entity_versions(&self, entity: &str, id: &str)
        -> Result<Vec<VersionRow>, StorageError>;

    /// Runs a field query over open rows, skipping `exclude_ids`.
    /// Offset, limit and ordering of `query` are applied.
    async fn query_entities(
        &self,
        entity: &str,
        query: &FieldQuery,
        exclude_ids: &BTreeSet<String>,
    ) -> Result<Vec<(String, Value)>, StorageError>;

    /// Reads a metadata value.
    async fn get_metadata(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Reads one POI row.
    async fn get_poi(&self, id: Height) -> Result<Option<ProofOfIndex>, StorageError>;

    /// POI rows with `start <= id <= end`, ascending, at most `limit`.
    async fn poi_range(
        &self,
        start: Height,
        end: Height,
        limit: usize,
    ) -> Result<Vec<ProofOfIndex>, StorageError>;

    /// POI rows with `id <= height`, descending, at most `limit`.
    async fn poi_before(&self, height: Height, limit: usize)
        -> Result<Vec<ProofOfIndex>, StorageError>;

    /// The highest POI row passing `filter`.
    async fn latest_poi(&self, filter: PoiFilter) -> Result<Option<ProofOfIndex>, StorageError>;

    /// The lowest POI row passing `filter`.
    async fn first_poi(&self, filter: PoiFilter) -> Result<Option<ProofOfIndex>, StorageError>;
}

/// Encodes the `latestPoiWithMmr` metadata value.
pub fn latest_mmr_value(id: Height, mmr_root: &Hash32) -> Value {
    serde_json::json!({ "id": id, "mmrRoot": mmr_root.to_hex() })
}

/// Decodes the `latestPoiWithMmr` metadata value.
pub fn parse_latest_mmr_value(value: &Value) -> Result<(Height, Hash32), StorageError> {
    let id = value
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| StorageError::Decode(format!("latestPoiWithMmr without id: {}", value)))?;
    let root = value
        .get("mmrRoot")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            StorageError::Decode(format!("latestPoiWithMmr without mmrRoot: {}", value))
        })?;
    let root = Hash32::from_hex(root).map_err(|e| StorageError::Decode(e.to_string()))?;
    Ok((id, root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_mmr_value_round_trips() {
        let root = Hash32([3u8; 32]);
        let v = latest_mmr_value(42, &root);
        assert_eq!(parse_latest_mmr_value(&v).unwrap(), (42, root));
        assert!(parse_latest_mmr_value(&serde_json::json!({ "id": 1 })).is_err());
    }

    #[test]
    fn poi_filter_selects_by_sync_state() {
        let mut poi = ProofOfIndex::created(5, vec![1], Hash32([1u8; 32]));
        assert!(PoiFilter::Unsynced.accepts(&poi));
        assert!(!PoiFilter::Synced.accepts(&poi));
        poi.parent_hash = Some(Hash32::default());
        poi.hash = Some(Hash32([2u8; 32]));
        assert!(PoiFilter::Synced.accepts(&poi));
        assert!(!PoiFilter::WithMmr.accepts(&poi));
    }
}
