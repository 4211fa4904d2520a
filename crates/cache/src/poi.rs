// Path: crates/cache/src/poi.rs
//! Write-back cache for Proof-of-Index rows.

use crate::error::CacheError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_api::cache::Cacheable;
use strata_api::storage::{DurableStore, PoiFilter, StorageError, StoreOp, Transaction};
use strata_types::{ChainBlockHash, Hash32, Height, ProofOfIndex};
use tokio::sync::Mutex as AsyncMutex;

/// Pending POI rows keyed by height, read before the store.
pub struct PoiCache {
    store: Arc<dyn DurableStore>,
    pending: Arc<Mutex<BTreeMap<Height, ProofOfIndex>>>,
    flush_lock: Arc<AsyncMutex<()>>,
}

impl PoiCache {
    /// Creates an empty cache over `store`.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(BTreeMap::new())),
            flush_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Caches rows, replacing pending rows of the same height.
    ///
    /// Every row must carry both input hashes or neither.
    pub async fn bulk_upsert(&self, rows: Vec<ProofOfIndex>) -> Result<(), CacheError> {
        if let Some(bad) = rows.iter().find(|p| !p.has_consistent_inputs()) {
            return Err(CacheError::InconsistentPoi { id: bad.id });
        }
        let _guard = self.flush_lock.lock().await;
        let mut pending = self.pending.lock();
        for row in rows {
            pending.insert(row.id, row);
        }
        Ok(())
    }

    /// Caches the row the indexing pipeline produces for one block, decoding
    /// the chain's block hash into raw bytes.
    pub async fn upsert_created(
        &self,
        id: Height,
        chain_block_hash: &ChainBlockHash,
        operation_hash_root: Hash32,
    ) -> Result<(), CacheError> {
        let bytes = chain_block_hash
            .to_bytes()
            .map_err(|e| CacheError::InvalidBlockHash {
                id,
                reason: e.to_string(),
            })?;
        self.bulk_upsert(vec![ProofOfIndex::created(id, bytes, operation_hash_root)])
            .await
    }

    /// Reads one row.
    pub async fn get_poi(&self, id: Height) -> Result<Option<ProofOfIndex>, CacheError> {
        drop(self.flush_lock.lock().await);
        if let Some(row) = self.pending.lock().get(&id) {
            return Ok(Some(row.clone()));
        }
        Ok(self.store.get_poi(id).await?)
    }

    /// Rows with `start <= id <= end`, ascending, at most `limit`.
    pub async fn blocks_by_range(
        &self,
        start: Height,
        end: Height,
        limit: usize,
    ) -> Result<Vec<ProofOfIndex>, CacheError> {
        if start > end || limit == 0 {
            return Ok(Vec::new());
        }
        drop(self.flush_lock.lock().await);
        let cached: Vec<ProofOfIndex> = self
            .pending
            .lock()
            .range(start..=end)
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect();
        let stored = self.store.poi_range(start, end, limit).await?;
        Ok(merge(cached, stored, limit, false))
    }

    /// Rows with `id <= height`, descending, at most `limit`.
    pub async fn blocks_before(
        &self,
        height: Height,
        limit: usize,
    ) -> Result<Vec<ProofOfIndex>, CacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        drop(self.flush_lock.lock().await);
        let cached: Vec<ProofOfIndex> = self
            .pending
            .lock()
            .range(..=height)
            .rev()
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect();
        let stored = self.store.poi_before(height, limit).await?;
        Ok(merge(cached, stored, limit, true))
    }

    async fn extreme(&self, filter: PoiFilter, latest: bool) -> Result<Option<ProofOfIndex>, CacheError> {
        drop(self.flush_lock.lock().await);
        let cached = {
            let pending = self.pending.lock();
            let found = if latest {
                pending.values().rev().find(|p| filter.accepts(p))
            } else {
                pending.values().find(|p| filter.accepts(p))
            };
            found.cloned()
        };
        let stored = if latest {
            self.store.latest_poi(filter).await?
        } else {
            self.store.first_poi(filter).await?
        };
        Ok(match (cached, stored) {
            (Some(c), Some(s)) => {
                let pick_cached = if latest { c.id >= s.id } else { c.id <= s.id };
                Some(if pick_cached { c } else { s })
            }
            (c, s) => c.or(s),
        })
    }

    /// The highest row.
    pub async fn get_latest_poi(&self) -> Result<Option<ProofOfIndex>, CacheError> {
        self.extreme(PoiFilter::Any, true).await
    }

    /// The highest row linked into the accumulator.
    pub async fn get_latest_poi_with_mmr(&self) -> Result<Option<ProofOfIndex>, CacheError> {
        self.extreme(PoiFilter::WithMmr, true).await
    }

    /// The lowest row.
    pub async fn get_first_poi(&self) -> Result<Option<ProofOfIndex>, CacheError> {
        self.extreme(PoiFilter::Any, false).await
    }
}

/// Merges cached and stored rows, cached rows winning on equal ids.
fn merge(
    cached: Vec<ProofOfIndex>,
    stored: Vec<ProofOfIndex>,
    limit: usize,
    descending: bool,
) -> Vec<ProofOfIndex> {
    let mut by_id: BTreeMap<Height, ProofOfIndex> = stored.into_iter().map(|p| (p.id, p)).collect();
    by_id.extend(cached.into_iter().map(|p| (p.id, p)));
    if descending {
        by_id.into_values().rev().take(limit).collect()
    } else {
        by_id.into_values().take(limit).collect()
    }
}

#[async_trait]
impl Cacheable for PoiCache {
    fn name(&self) -> &str {
        "poi"
    }

    fn flushable_record_count(&self) -> usize {
        self.pending.lock().len()
    }

    async fn flush(&self, tx: &Transaction, height: Height, _ordered: bool) -> Result<(), StorageError> {
        let guard = self.flush_lock.clone().lock_owned().await;
        let rows: Vec<ProofOfIndex> = self
            .pending
            .lock()
            .range(..=height)
            .map(|(_, p)| p.clone())
            .collect();
        if rows.is_empty() {
            return Ok(());
        }
        tracing::debug!(target: "cache", height, records = rows.len(), "poi cache flush staged");
        tx.push(StoreOp::UpsertPoi(rows));
        let pending = self.pending.clone();
        tx.after_commit(move || {
            let mut pending = pending.lock();
            *pending = pending.split_off(&height.saturating_add(1));
            drop(guard);
        });
        Ok(())
    }

    fn clear(&self, height: Option<Height>) {
        let mut pending = self.pending.lock();
        match height {
            Some(h) => *pending = pending.split_off(&h.saturating_add(1)),
            None => pending.clear(),
        }
    }

    async fn rewind(&self, height: Height) {
        let _guard = self.flush_lock.lock().await;
        self.pending.lock().split_off(&height.saturating_add(1));
    }
}
