// Path: crates/cache/src/orchestrator.rs
//! Coordinates flushes of every cache into one durable transaction.

use crate::error::CacheError;
use crate::metadata::MetadataCache;
use crate::poi::PoiCache;
use crate::sequence::OperationIndex;
use crate::versioned::VersionedCache;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_api::cache::Cacheable;
use strata_api::storage::{DurableStore, Entity, StoreRepository, Transaction};
use strata_telemetry::time::FlushTimer;
use strata_telemetry::{cache_metrics, error_metrics};
use strata_types::config::CacheConfig;
use strata_types::error::ErrorCode;
use strata_types::Height;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

type FlushFuture = Shared<BoxFuture<'static, Result<(), CacheError>>>;

struct QueuedFlush {
    future: FlushFuture,
    force: bool,
}

/// Owns every cache of one store and flushes them together.
///
/// Concurrent flush requests share one queued future. Inside it, a pending
/// mutex keeps a new physical flush from starting before the previous one's
/// commit hooks have pruned the caches, so at most one flush transaction is in
/// flight at a time.
pub struct CacheOrchestrator {
    store: Arc<dyn DurableStore>,
    config: CacheConfig,
    sequence: OperationIndex,
    metadata: Arc<MetadataCache>,
    poi: Arc<PoiCache>,
    entities: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    caches: Mutex<Vec<Arc<dyn Cacheable>>>,
    flush_height: AtomicU64,
    pending_flush: AsyncMutex<()>,
    queued_flush: Mutex<Option<QueuedFlush>>,
    last_error: Mutex<Option<CacheError>>,
    shutdown: AtomicBool,
    interval_running: AtomicBool,
    wake: Notify,
}

impl CacheOrchestrator {
    /// Creates the orchestrator with its metadata and POI caches.
    pub fn new(store: Arc<dyn DurableStore>, config: CacheConfig) -> Arc<Self> {
        let metadata = Arc::new(MetadataCache::new(store.clone()));
        let poi = Arc::new(PoiCache::new(store.clone()));
        let caches: Vec<Arc<dyn Cacheable>> = vec![metadata.clone(), poi.clone()];
        Arc::new(Self {
            store,
            config,
            sequence: OperationIndex::new(),
            metadata,
            poi,
            entities: Mutex::new(HashMap::new()),
            caches: Mutex::new(caches),
            flush_height: AtomicU64::new(Height::MAX),
            pending_flush: AsyncMutex::new(()),
            queued_flush: Mutex::new(None),
            last_error: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            interval_running: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    /// The durable store behind every cache.
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// The metadata cache.
    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// The POI cache.
    pub fn poi(&self) -> &Arc<PoiCache> {
        &self.poi
    }

    /// The write sequence shared by every cache.
    pub fn sequence(&self) -> &OperationIndex {
        &self.sequence
    }

    /// Registers the cache of an entity type, or returns the existing one.
    pub fn register_entity<T: Entity>(
        &self,
        name: &str,
        historical: bool,
    ) -> Result<VersionedCache<T>, CacheError> {
        let mut entities = self.entities.lock();
        if let Some(existing) = entities.get(name) {
            return existing
                .downcast_ref::<VersionedCache<T>>()
                .cloned()
                .ok_or_else(|| CacheError::TypeMismatch(name.to_string()));
        }
        let repo = StoreRepository::<T>::new(self.store.clone(), name, historical);
        let cache = VersionedCache::new(
            Arc::new(repo),
            self.sequence.clone(),
            self.config.read_cache_size,
            Duration::from_secs(self.config.read_cache_ttl_secs),
        );
        entities.insert(name.to_string(), Arc::new(cache.clone()));
        self.caches.lock().push(Arc::new(cache.clone()));
        tracing::debug!(target: "cache", entity = name, historical, "registered entity cache");
        Ok(cache)
    }

    /// The cache of a registered entity type.
    pub fn entity<T: Entity>(&self, name: &str) -> Result<VersionedCache<T>, CacheError> {
        let entities = self.entities.lock();
        let existing = entities
            .get(name)
            .ok_or_else(|| CacheError::UnknownEntity(name.to_string()))?;
        existing
            .downcast_ref::<VersionedCache<T>>()
            .cloned()
            .ok_or_else(|| CacheError::TypeMismatch(name.to_string()))
    }

    /// Records waiting to be flushed, across all caches.
    pub fn flushable_record_count(&self) -> usize {
        self.caches
            .lock()
            .iter()
            .map(|c| c.flushable_record_count())
            .sum()
    }

    /// Records the height of the last fully processed block. Flushes persist
    /// writes up to it.
    pub fn set_flush_boundary(&self, height: Height) {
        self.flush_height.store(height, Ordering::SeqCst);
    }

    /// The height flushes persist up to.
    pub fn flush_boundary(&self) -> Height {
        self.flush_height.load(Ordering::SeqCst)
    }

    fn is_flushable(&self) -> bool {
        let total = self.flushable_record_count();
        total > 0 && total >= self.config.store_cache_threshold
    }

    /// Flushes every cache, joining a flush that is already queued.
    ///
    /// Without `force`, nothing is written unless the flushable total reached
    /// the threshold.
    pub async fn flush_cache(self: &Arc<Self>, force: bool) -> Result<(), CacheError> {
        loop {
            let (future, queued_force) = {
                let mut slot = self.queued_flush.lock();
                match slot.as_ref() {
                    Some(queued) => (queued.future.clone(), queued.force),
                    None => {
                        let future = self.clone().run_queued(force).boxed().shared();
                        *slot = Some(QueuedFlush {
                            future: future.clone(),
                            force,
                        });
                        (future, force)
                    }
                }
            };
            let result = future.await;
            if force && !queued_force {
                // The joined flush may have skipped below the threshold.
                continue;
            }
            return result;
        }
    }

    async fn run_queued(self: Arc<Self>, force: bool) -> Result<(), CacheError> {
        let result = {
            let _pending = self.pending_flush.lock().await;
            if self.is_flushable() || force {
                self.flush_physical().await
            } else {
                Ok(())
            }
        };
        self.queued_flush.lock().take();
        if let Err(e) = &result {
            tracing::error!(target: "cache", error = %e, code = e.code(), "store cache flush failed");
            error_metrics().inc_error("cache", e.code());
        }
        result
    }

    async fn flush_physical(&self) -> Result<(), CacheError> {
        let height = self.flush_boundary();
        let ordered = self.config.ordered_flush;
        let caches: Vec<Arc<dyn Cacheable>> = self.caches.lock().clone();
        let before: usize = caches.iter().map(|c| c.flushable_record_count()).sum();
        let metrics = cache_metrics();
        let _timer = FlushTimer::new(metrics);

        let tx = Transaction::new();
        let staged = join_all(caches.iter().map(|c| c.flush(&tx, height, ordered))).await;
        for result in staged {
            result?;
        }
        // Dropping `tx` on failure releases every cache's flush lock untouched.
        tx.commit(self.store.as_ref()).await?;

        let after = self.flushable_record_count();
        let flushed = before.saturating_sub(after);
        metrics.inc_flushes();
        metrics.inc_records_flushed(flushed as u64);
        metrics.set_flushable_records(after as u64);
        tracing::info!(target: "cache", height, records = flushed, remaining = after, "flushed store cache");
        Ok(())
    }

    /// Applies backpressure on the ingestion path.
    ///
    /// Below the threshold this returns immediately. Between the threshold and
    /// the upper limit a flush is started in the background. At or above the
    /// upper limit, or when async flushing is disabled, the caller waits for
    /// the flush. A failed background flush is returned by the next call.
    pub async fn flush_and_wait_for_capacity(self: &Arc<Self>) -> Result<(), CacheError> {
        if let Some(e) = self.last_error.lock().take() {
            return Err(e);
        }
        let total = self.flushable_record_count();
        cache_metrics().set_flushable_records(total as u64);
        if !self.is_flushable() {
            return Ok(());
        }
        if total >= self.config.store_cache_upper_limit || !self.config.store_cache_async {
            cache_metrics().inc_backpressure_waits();
            return self.flush_cache(false).await;
        }
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.flush_cache(false).await {
                *this.last_error.lock() = Some(e);
            }
        });
        Ok(())
    }

    /// Drops every uncommitted write, waiting for an in-flight flush first.
    pub async fn reset_cache(&self) {
        let _pending = self.pending_flush.lock().await;
        for cache in self.caches.lock().iter() {
            cache.clear(None);
        }
        self.last_error.lock().take();
        tracing::info!(target: "cache", "store cache reset");
    }

    /// Drops uncommitted writes above `height` from every cache.
    pub async fn rewind(&self, height: Height) {
        let _pending = self.pending_flush.lock().await;
        let caches: Vec<Arc<dyn Cacheable>> = self.caches.lock().clone();
        for cache in caches {
            cache.rewind(height).await;
        }
        if self.flush_boundary() > height {
            self.set_flush_boundary(height);
        }
        tracing::info!(target: "cache", height, "store cache rewound");
    }

    /// Starts the periodic flush loop.
    pub fn spawn_interval_flush(self: &Arc<Self>) -> JoinHandle<()> {
        self.shutdown.store(false, Ordering::SeqCst);
        self.interval_running.store(true, Ordering::SeqCst);
        let this = self.clone();
        let period = Duration::from_secs(self.config.store_flush_interval_secs.max(1));
        tokio::spawn(async move {
            while !this.shutdown.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = this.wake.notified() => {}
                }
                if this.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if this.flushable_record_count() == 0 {
                    continue;
                }
                if let Err(e) = this.flush_cache(true).await {
                    *this.last_error.lock() = Some(e);
                }
            }
            this.interval_running.store(false, Ordering::SeqCst);
            tracing::debug!(target: "cache", "interval flush stopped");
        })
    }

    /// Whether the periodic flush loop is still running.
    pub fn is_interval_flush_running(&self) -> bool {
        self.interval_running.load(Ordering::SeqCst)
    }

    /// Signals the periodic flush loop to stop and waits until it has.
    pub async fn stop_interval_flush(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        while self.is_interval_flush_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use strata_storage::MemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pool {
        id: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Token {
        id: String,
        symbol: String,
    }

    fn orchestrator(config: CacheConfig) -> (Arc<MemoryStore>, Arc<CacheOrchestrator>) {
        let store = Arc::new(MemoryStore::new());
        let orch = CacheOrchestrator::new(store.clone(), config);
        (store, orch)
    }

    #[test]
    fn registry_checks_payload_types() {
        let (_, orch) = orchestrator(CacheConfig::default());
        orch.register_entity::<Pool>("Pool", true).unwrap();
        assert!(orch.entity::<Pool>("Pool").is_ok());
        assert_eq!(
            orch.entity::<Token>("Pool").err(),
            Some(CacheError::TypeMismatch("Pool".into()))
        );
        assert_eq!(
            orch.entity::<Pool>("Swap").err(),
            Some(CacheError::UnknownEntity("Swap".into()))
        );
        assert!(orch.register_entity::<Token>("Pool", true).is_err());
    }

    #[tokio::test]
    async fn below_threshold_nothing_is_written() {
        let config = CacheConfig {
            store_cache_threshold: 3,
            ..CacheConfig::default()
        };
        let (store, orch) = orchestrator(config);
        let pools = orch.register_entity::<Pool>("Pool", false).unwrap();
        pools.set("p1", Pool { id: "p1".into() }, 1).await.unwrap();

        orch.flush_and_wait_for_capacity().await.unwrap();
        orch.flush_cache(false).await.unwrap();
        assert_eq!(store.apply_calls(), 0);
        assert_eq!(orch.flushable_record_count(), 1);

        orch.flush_cache(true).await.unwrap();
        assert_eq!(store.apply_calls(), 1);
        assert_eq!(orch.flushable_record_count(), 0);
    }

    #[tokio::test]
    async fn upper_limit_blocks_until_flushed() {
        let config = CacheConfig {
            store_cache_threshold: 1,
            store_cache_upper_limit: 2,
            ..CacheConfig::default()
        };
        let (store, orch) = orchestrator(config);
        let tokens = orch.register_entity::<Token>("Token", false).unwrap();
        for i in 0..2 {
            let id = format!("t{i}");
            let symbol = format!("T{i}");
            tokens.set(&id, Token { id: id.clone(), symbol }, 1).await.unwrap();
        }
        orch.flush_and_wait_for_capacity().await.unwrap();
        assert_eq!(orch.flushable_record_count(), 0);
        assert_eq!(store.apply_calls(), 1);
    }

    #[tokio::test]
    async fn background_flush_failure_surfaces_on_next_call() {
        let config = CacheConfig {
            store_cache_threshold: 1,
            store_cache_upper_limit: 100,
            ..CacheConfig::default()
        };
        let (store, orch) = orchestrator(config);
        let pools = orch.register_entity::<Pool>("Pool", false).unwrap();
        pools.set("p1", Pool { id: "p1".into() }, 1).await.unwrap();
        store.fail_next_apply("disk full");

        orch.flush_and_wait_for_capacity().await.unwrap();
        let mut surfaced = None;
        for _ in 0..100 {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if let Err(e) = orch.flush_and_wait_for_capacity().await {
                surfaced = Some(e);
                break;
            }
        }
        assert!(matches!(surfaced, Some(CacheError::Storage(_))));
        assert_eq!(pools.get("p1").await.unwrap(), Some(Pool { id: "p1".into() }));
    }

    #[tokio::test]
    async fn rewind_drops_writes_above_the_cut() {
        let (store, orch) = orchestrator(CacheConfig::default());
        let pools = orch.register_entity::<Pool>("Pool", true).unwrap();
        pools.set("p1", Pool { id: "p1".into() }, 3).await.unwrap();
        pools.set("p2", Pool { id: "p2".into() }, 8).await.unwrap();
        orch.set_flush_boundary(8);

        orch.rewind(5).await;
        assert_eq!(orch.flush_boundary(), 5);
        assert_eq!(pools.get("p2").await.unwrap(), None);
        orch.flush_cache(true).await.unwrap();
        assert!(store.find_entity("Pool", "p1").await.unwrap().is_some());
        assert!(store.find_entity("Pool", "p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interval_flush_stops_on_request() {
        let config = CacheConfig {
            store_flush_interval_secs: 1,
            ..CacheConfig::default()
        };
        let (_, orch) = orchestrator(config);
        let handle = orch.spawn_interval_flush();
        assert!(orch.is_interval_flush_running());
        orch.stop_interval_flush().await;
        assert!(!orch.is_interval_flush_running());
        handle.await.unwrap();
    }
}
