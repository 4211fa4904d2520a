// Path: crates/types/src/config/mod.rs

//! Shared configuration structures for the indexer store components.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration, usually loaded from a TOML file.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IndexerConfig {
    /// Identifier mixed into every POI hash.
    pub project_id: String,
    /// Directory holding the embedded store and the accumulator file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Store cache tuning.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Proof-of-Index sync tuning.
    #[serde(default)]
    pub poi: PoiConfig,
    /// Accumulator backend selection and tuning.
    #[serde(default)]
    pub mmr: MmrConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./.data")
}

impl IndexerConfig {
    /// Creates a config with defaults for everything but the project id.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            data_dir: default_data_dir(),
            cache: CacheConfig::default(),
            poi: PoiConfig::default(),
            mmr: MmrConfig::default(),
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    /// Rejects combinations that would make the cache or sync loops misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Invalid("project_id must not be empty".into()));
        }
        if self.cache.store_cache_threshold > self.cache.store_cache_upper_limit {
            return Err(ConfigError::Invalid(format!(
                "store_cache_threshold ({}) exceeds store_cache_upper_limit ({})",
                self.cache.store_cache_threshold, self.cache.store_cache_upper_limit
            )));
        }
        if self.poi.sync_batch_size == 0 || self.poi.queue_flush_size == 0 {
            return Err(ConfigError::Invalid(
                "poi batch and queue sizes must be non-zero".into(),
            ));
        }
        if self.cache.read_cache_size == 0 || self.mmr.read_cache_size == 0 {
            return Err(ConfigError::Invalid("read cache sizes must be non-zero".into()));
        }
        Ok(())
    }

    /// The embedded store's database file.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.redb")
    }

    /// The accumulator file, used when `mmr.store` is `File`.
    pub fn mmr_file_path(&self) -> PathBuf {
        self.mmr
            .file_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("mmr.dat"))
    }
}

/// Configuration for the write-back store cache.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Flushable record count that triggers a non-blocking flush.
    #[serde(default = "default_store_cache_threshold")]
    pub store_cache_threshold: usize,
    /// Flushable record count above which ingestion waits for the flush.
    #[serde(default = "default_store_cache_upper_limit")]
    pub store_cache_upper_limit: usize,
    /// When false, every flush request blocks the caller.
    #[serde(default = "default_true")]
    pub store_cache_async: bool,
    /// Period of the background flush loop.
    #[serde(default = "default_store_flush_interval_secs")]
    pub store_flush_interval_secs: u64,
    /// Replay writes one at a time in operation order instead of batching per entity.
    /// Required when entities reference each other through foreign keys.
    #[serde(default)]
    pub ordered_flush: bool,
    /// Capacity of each entity's read-through cache.
    #[serde(default = "default_read_cache_size")]
    pub read_cache_size: usize,
    /// Time-to-live of read-through cache entries.
    #[serde(default = "default_read_cache_ttl_secs")]
    pub read_cache_ttl_secs: u64,
}

fn default_store_cache_threshold() -> usize {
    1000
}
fn default_store_cache_upper_limit() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_store_flush_interval_secs() -> u64 {
    5
}
fn default_read_cache_size() -> usize {
    500
}
fn default_read_cache_ttl_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_cache_threshold: default_store_cache_threshold(),
            store_cache_upper_limit: default_store_cache_upper_limit(),
            store_cache_async: default_true(),
            store_flush_interval_secs: default_store_flush_interval_secs(),
            ordered_flush: false,
            read_cache_size: default_read_cache_size(),
            read_cache_ttl_secs: default_read_cache_ttl_secs(),
        }
    }
}

/// Configuration for the Proof-of-Index sync loop.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoiConfig {
    /// Whether POI rows are chained and linked into the accumulator at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum created rows fetched per iteration.
    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,
    /// Queue length that forces a transactional write of synced rows.
    #[serde(default = "default_queue_flush_size")]
    pub queue_flush_size: usize,
    /// Age of the oldest queued row that forces a write.
    #[serde(default = "default_queue_flush_interval_ms")]
    pub queue_flush_interval_ms: u64,
    /// Sleep between iterations that found nothing to do.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_sync_batch_size() -> usize {
    50
}
fn default_queue_flush_size() -> usize {
    100
}
fn default_queue_flush_interval_ms() -> u64 {
    1000
}
fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for PoiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_batch_size: default_sync_batch_size(),
            queue_flush_size: default_queue_flush_size(),
            queue_flush_interval_ms: default_queue_flush_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Selects where accumulator nodes are persisted.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum MmrStoreType {
    /// A flat file of 32-byte words.
    File,
    /// A table in the embedded store.
    #[default]
    Table,
}

/// Configuration for the MMR accumulator.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MmrConfig {
    /// Backend selection.
    #[serde(default)]
    pub store: MmrStoreType,
    /// Overrides the accumulator file location.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Period of the write-back layer's background flush.
    #[serde(default = "default_mmr_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Capacity of the node read cache.
    #[serde(default = "default_mmr_read_cache_size")]
    pub read_cache_size: usize,
}

fn default_mmr_flush_interval_ms() -> u64 {
    1000
}
fn default_mmr_read_cache_size() -> usize {
    1000
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            store: MmrStoreType::default(),
            file_path: None,
            flush_interval_ms: default_mmr_flush_interval_ms(),
            read_cache_size: default_mmr_read_cache_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_gets_defaults() {
        let cfg = IndexerConfig::from_toml_str(r#"project_id = "demo""#).unwrap();
        assert_eq!(cfg.project_id, "demo");
        assert_eq!(cfg.cache.store_cache_threshold, 1000);
        assert_eq!(cfg.cache.store_cache_upper_limit, 10_000);
        assert!(cfg.cache.store_cache_async);
        assert!(!cfg.cache.ordered_flush);
        assert_eq!(cfg.mmr.store, MmrStoreType::Table);
        assert_eq!(cfg.mmr_file_path(), PathBuf::from("./.data/mmr.dat"));
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = IndexerConfig::from_toml_str(
            r#"
            project_id = "demo"
            data_dir = "/var/lib/strata"

            [cache]
            store_cache_threshold = 5
            store_cache_upper_limit = 10
            ordered_flush = true

            [mmr]
            store = "File"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cache.store_cache_threshold, 5);
        assert!(cfg.cache.ordered_flush);
        assert_eq!(cfg.mmr.store, MmrStoreType::File);
        assert_eq!(cfg.store_path(), PathBuf::from("/var/lib/strata/store.redb"));
    }

    #[test]
    fn threshold_above_upper_limit_is_rejected() {
        let err = IndexerConfig::from_toml_str(
            r#"
            project_id = "demo"
            [cache]
            store_cache_threshold = 50
            store_cache_upper_limit = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_project_id_is_rejected() {
        assert!(IndexerConfig::from_toml_str(r#"project_id = " ""#).is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer.toml");
        std::fs::write(&path, "project_id = \"disk\"\n").unwrap();
        assert_eq!(IndexerConfig::load(&path).unwrap().project_id, "disk");
        assert!(matches!(
            IndexerConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
