// Path: crates/node/src/lib.rs
#![forbid(unsafe_code)]
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

//! # Strata Node
//!
//! Builds every service of an indexer node from an [`IndexerConfig`] by
//! explicit constructor injection and owns their background loops.

pub mod error;

pub use error::NodeError;

use anyhow::Context;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_api::mmr::MmrDb;
use strata_api::storage::DurableStore;
use strata_cache::CacheOrchestrator;
use strata_mmr::{CachedMmrDb, FileMmrDb, MerkleMountainRange};
use strata_poi::{IntegrityRegenerator, MmrService, PoiSyncService, RegenMode, RegenerateReport};
use strata_storage::RedbStore;
use strata_types::config::{IndexerConfig, MmrStoreType};
use strata_types::error::ErrorCode;
use tokio::task::JoinHandle;

/// A fully wired indexer node.
pub struct IndexerNode {
    config: IndexerConfig,
    store: Arc<dyn DurableStore>,
    orchestrator: Arc<CacheOrchestrator>,
    mmr_db: Arc<CachedMmrDb>,
    mmr: Arc<MerkleMountainRange>,
    poi_sync: Arc<PoiSyncService>,
    mmr_service: Arc<MmrService>,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for IndexerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerNode")
            .field("project_id", &self.config.project_id)
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

impl IndexerNode {
    /// Validates `config`, opens the store and the accumulator backend and
    /// constructs every service. Nothing runs until [`IndexerNode::start`].
    pub fn open(config: IndexerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data dir {}", config.data_dir.display())
        })?;

        let store_path = config.store_path();
        let redb = RedbStore::open(&store_path)
            .with_context(|| format!("failed to open store {}", store_path.display()))?;

        let backend: Arc<dyn MmrDb> = match config.mmr.store {
            MmrStoreType::Table => Arc::new(redb.mmr_db()),
            MmrStoreType::File => {
                let path = config.mmr_file_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                Arc::new(
                    FileMmrDb::open(&path)
                        .with_context(|| format!("failed to open accumulator file {}", path.display()))?,
                )
            }
        };
        let mmr_db = Arc::new(CachedMmrDb::new(backend, config.mmr.read_cache_size));
        let mmr = Arc::new(MerkleMountainRange::new(mmr_db.clone()));

        let store: Arc<dyn DurableStore> = Arc::new(redb);
        let orchestrator = CacheOrchestrator::new(store.clone(), config.cache.clone());
        let poi_sync = Arc::new(PoiSyncService::new(
            store.clone(),
            config.project_id.clone(),
            config.poi.clone(),
        ));
        let mmr_service = Arc::new(MmrService::new(store.clone(), mmr.clone(), &config.poi));

        tracing::info!(
            target: "node",
            project_id = %config.project_id,
            data_dir = %config.data_dir.display(),
            mmr_store = ?config.mmr.store,
            "indexer node opened"
        );
        Ok(Self {
            config,
            store,
            orchestrator,
            mmr_db,
            mmr,
            poi_sync,
            mmr_service,
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// The cache layer the block-processing pipeline writes through.
    pub fn orchestrator(&self) -> &Arc<CacheOrchestrator> {
        &self.orchestrator
    }

    pub fn mmr(&self) -> &Arc<MerkleMountainRange> {
        &self.mmr
    }

    pub fn mmr_db(&self) -> &Arc<CachedMmrDb> {
        &self.mmr_db
    }

    pub fn poi_sync(&self) -> &Arc<PoiSyncService> {
        &self.poi_sync
    }

    pub fn mmr_service(&self) -> &Arc<MmrService> {
        &self.mmr_service
    }

    /// Starts the periodic cache flush, the accumulator write-back flush and,
    /// when enabled, the POI sync and accumulator link loops.
    pub fn start(&self) -> Result<(), NodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }
        let mut handles = self.handles.lock();
        handles.push(self.orchestrator.spawn_interval_flush());
        handles.push(
            self.mmr_db
                .spawn_periodic_flush(Duration::from_millis(self.config.mmr.flush_interval_ms)),
        );
        if self.config.poi.enabled {
            handles.push(self.poi_sync.spawn());
            handles.push(self.mmr_service.spawn());
        }
        tracing::info!(target: "node", services = handles.len(), "node services started");
        Ok(())
    }

    /// Stops every loop after its current unit of work, then flushes the
    /// caches, the POI queue and the accumulator write-back buffer.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        tracing::info!(target: "node", event = "shutdown", "stopping node services");
        self.poi_sync.stop().await?;
        self.mmr_service.stop().await;
        self.orchestrator.stop_interval_flush().await;
        self.orchestrator.flush_cache(true).await?;
        self.mmr_db.stop().await?;

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(target: "node", error = %e, "service task ended abnormally");
            }
        }
        for fatal in [self.poi_sync.fatal_error(), self.mmr_service.fatal_error()]
            .into_iter()
            .flatten()
        {
            tracing::error!(target: "node", error = %fatal, code = fatal.code(), "service stopped on a fatal error");
        }
        self.started.store(false, Ordering::SeqCst);
        tracing::info!(target: "node", event = "shutdown", reason = "complete");
        Ok(())
    }

    /// Repairs divergence between the POI chain and the accumulator.
    ///
    /// The link loop is paused for the run and resumed afterwards if it was
    /// running.
    pub async fn regenerate(
        &self,
        mode: RegenMode,
        target: Option<u64>,
    ) -> Result<RegenerateReport, NodeError> {
        let resume = self.mmr_service.is_running();
        if resume {
            self.mmr_service.stop().await;
        }
        let result = IntegrityRegenerator::new(self.store.clone(), self.mmr_service.clone())
            .regenerate(mode, target)
            .await;
        self.mmr_db.flush().await?;
        if resume {
            self.handles.lock().push(self.mmr_service.spawn());
        }
        Ok(result?)
    }
}
