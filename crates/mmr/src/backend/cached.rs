// Path: crates/mmr/src/backend/cached.rs
//! Write-back layer in front of any [`MmrDb`].

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_api::mmr::MmrDb;
use strata_api::storage::StorageError;
use strata_types::error::ErrorCode;
use strata_types::Hash32;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

struct State {
    read: LruCache<u64, Hash32>,
    pending: BTreeMap<u64, Hash32>,
    leaf_length: Option<u64>,
}

/// Buffers node writes and the leaf length in memory until [`CachedMmrDb::flush`].
///
/// Reads check pending writes, then an LRU cache, then the backend. Every
/// read and write waits for a running flush, so nothing observes a half
/// written batch.
pub struct CachedMmrDb {
    inner: Arc<dyn MmrDb>,
    state: Mutex<State>,
    flush_lock: AsyncMutex<()>,
    shutdown: AtomicBool,
    running: AtomicBool,
    wake: Notify,
}

impl CachedMmrDb {
    /// Wraps `inner` with a read cache of `read_cache_size` nodes.
    pub fn new(inner: Arc<dyn MmrDb>, read_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(read_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            state: Mutex::new(State {
                read: LruCache::new(capacity),
                pending: BTreeMap::new(),
                leaf_length: None,
            }),
            flush_lock: AsyncMutex::new(()),
            shutdown: AtomicBool::new(false),
            running: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Number of buffered node writes.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Writes every buffered node and the buffered leaf length to the backend.
    ///
    /// On failure the buffer is kept, so the flush can be retried.
    pub async fn flush(&self) -> Result<usize, StorageError> {
        let _guard = self.flush_lock.lock().await;
        let (pending, leaf_length) = {
            let state = self.state.lock();
            (state.pending.clone(), state.leaf_length)
        };
        if pending.is_empty() && leaf_length.is_none() {
            return Ok(0);
        }
        self.inner.bulk_set(&pending).await?;
        if let Some(length) = leaf_length {
            self.inner.set_leaf_length(length).await?;
        }
        let mut state = self.state.lock();
        for (pos, value) in std::mem::take(&mut state.pending) {
            state.read.put(pos, value);
        }
        state.leaf_length = None;
        tracing::debug!(target: "mmr", nodes = pending.len(), ?leaf_length, "flushed accumulator cache");
        Ok(pending.len())
    }

    /// Starts a loop flushing every `interval` until [`CachedMmrDb::stop`].
    pub fn spawn_periodic_flush(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        self.shutdown.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        tokio::spawn(async move {
            while !this.shutdown.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = this.wake.notified() => {}
                }
                if let Err(e) = this.flush().await {
                    tracing::error!(target: "mmr", error = %e, code = e.code(), "accumulator flush failed");
                    strata_telemetry::error_metrics().inc_error("mmr", e.code());
                }
            }
            this.running.store(false, Ordering::SeqCst);
        })
    }

    /// Whether the periodic flush loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the periodic flush loop, waits for it to finish its current
    /// iteration and flushes whatever is left.
    pub async fn stop(&self) -> Result<(), StorageError> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        while self.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.flush().await.map(|_| ())
    }
}

#[async_trait]
impl MmrDb for CachedMmrDb {
    async fn get(&self, pos: u64) -> Result<Option<Hash32>, StorageError> {
        drop(self.flush_lock.lock().await);
        {
            let mut state = self.state.lock();
            if let Some(v) = state.pending.get(&pos) {
                return Ok(Some(*v));
            }
            if let Some(v) = state.read.get(&pos) {
                return Ok(Some(*v));
            }
        }
        let found = self.inner.get(pos).await?;
        if let Some(v) = found {
            self.state.lock().read.put(pos, v);
        }
        Ok(found)
    }

    async fn set(&self, value: Hash32, pos: u64) -> Result<(), StorageError> {
        let _guard = self.flush_lock.lock().await;
        self.state.lock().pending.insert(pos, value);
        Ok(())
    }

    async fn bulk_set(&self, nodes: &BTreeMap<u64, Hash32>) -> Result<(), StorageError> {
        let _guard = self.flush_lock.lock().await;
        self.state
            .lock()
            .pending
            .extend(nodes.iter().map(|(k, v)| (*k, *v)));
        Ok(())
    }

    async fn get_leaf_length(&self) -> Result<u64, StorageError> {
        drop(self.flush_lock.lock().await);
        let buffered = self.state.lock().leaf_length;
        if let Some(length) = buffered {
            return Ok(length);
        }
        self.inner.get_leaf_length().await
    }

    async fn set_leaf_length(&self, length: u64) -> Result<u64, StorageError> {
        let _guard = self.flush_lock.lock().await;
        self.state.lock().leaf_length = Some(length);
        Ok(length)
    }

    async fn get_nodes(&self) -> Result<BTreeMap<u64, Hash32>, StorageError> {
        drop(self.flush_lock.lock().await);
        let mut nodes = self.inner.get_nodes().await?;
        nodes.extend(self.state.lock().pending.iter().map(|(k, v)| (*k, *v)));
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryMmrDb;

    #[tokio::test]
    async fn writes_stay_buffered_until_flush() {
        let inner = Arc::new(MemoryMmrDb::new());
        let cached = CachedMmrDb::new(inner.clone(), 4);
        cached.set(Hash32([1; 32]), 0).await.unwrap();
        cached.set_leaf_length(1).await.unwrap();

        assert_eq!(cached.get(0).await.unwrap(), Some(Hash32([1; 32])));
        assert_eq!(cached.get_leaf_length().await.unwrap(), 1);
        assert_eq!(inner.get(0).await.unwrap(), None);
        assert_eq!(inner.get_leaf_length().await.unwrap(), 0);

        assert_eq!(cached.flush().await.unwrap(), 1);
        assert_eq!(cached.pending_count(), 0);
        assert_eq!(inner.get(0).await.unwrap(), Some(Hash32([1; 32])));
        assert_eq!(inner.get_leaf_length().await.unwrap(), 1);
        assert_eq!(cached.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn periodic_flush_drains_on_stop() {
        let inner = Arc::new(MemoryMmrDb::new());
        let cached = Arc::new(CachedMmrDb::new(inner.clone(), 4));
        let handle = cached.spawn_periodic_flush(Duration::from_secs(60));
        cached.set(Hash32([2; 32]), 5).await.unwrap();
        cached.stop().await.unwrap();
        handle.await.unwrap();
        assert!(!cached.is_running());
        assert_eq!(inner.get(5).await.unwrap(), Some(Hash32([2; 32])));
    }
}
