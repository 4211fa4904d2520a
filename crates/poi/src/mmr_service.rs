// Path: crates/poi/src/mmr_service.rs
//! Links synced POI rows into the Merkle Mountain Range accumulator.

use crate::error::PoiError;
use crate::worker::LoopControl;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strata_api::storage::{latest_mmr_value, parse_latest_mmr_value, DurableStore, PoiFilter, StoreOp};
use strata_mmr::MerkleMountainRange;
use strata_telemetry::error_metrics;
use strata_types::error::ErrorCode;
use strata_types::{config::PoiConfig, keys, Hash32, Height, ProofOfIndex};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Appends the hash of every synced POI row to the accumulator and stores
/// the resulting root on the row.
///
/// Leaf `i` holds block `block_offset + i + 1`. Rows that already carry a
/// root are re-appended and checked against it; a mismatch is fatal.
pub struct MmrService {
    store: Arc<dyn DurableStore>,
    mmr: Arc<MerkleMountainRange>,
    batch_size: usize,
    poll_interval: Duration,
    sync_lock: AsyncMutex<()>,
    control: LoopControl,
}

impl MmrService {
    pub fn new(store: Arc<dyn DurableStore>, mmr: Arc<MerkleMountainRange>, config: &PoiConfig) -> Self {
        Self {
            store,
            mmr,
            batch_size: config.sync_batch_size.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            sync_lock: AsyncMutex::new(()),
            control: LoopControl::default(),
        }
    }

    pub fn mmr(&self) -> &Arc<MerkleMountainRange> {
        &self.mmr
    }

    /// The height preceding the first indexed block.
    ///
    /// Read from metadata; when absent it is derived from the lowest POI row
    /// and persisted. `None` until anything has been indexed.
    pub async fn block_offset(&self) -> Result<Option<Height>, PoiError> {
        if let Some(offset) = self
            .store
            .get_metadata(keys::BLOCK_OFFSET)
            .await?
            .and_then(|v| v.as_u64())
        {
            return Ok(Some(offset));
        }
        let Some(first) = self.store.first_poi(PoiFilter::Any).await? else {
            return Ok(None);
        };
        let offset = first.id.saturating_sub(1);
        self.store
            .apply(vec![StoreOp::SetMetadata {
                key: keys::BLOCK_OFFSET.to_string(),
                value: json!(offset),
            }])
            .await?;
        tracing::info!(target: "mmr", block_offset = offset, "recorded block offset");
        Ok(Some(offset))
    }

    /// Height and root of the last row linked into the accumulator.
    pub async fn latest_poi_with_mmr(&self) -> Result<Option<(Height, Hash32)>, PoiError> {
        match self.store.get_metadata(keys::LATEST_POI_WITH_MMR).await? {
            Some(value) => Ok(Some(parse_latest_mmr_value(&value)?)),
            None => Ok(None),
        }
    }

    fn leaf_index(poi: &ProofOfIndex, block_offset: Height) -> Result<u64, PoiError> {
        poi.id
            .checked_sub(block_offset)
            .and_then(|n| n.checked_sub(1))
            .ok_or(PoiError::InvalidId(poi.id))
    }

    /// Recomputes the root at `poi`'s leaf and compares it with the stored one.
    pub async fn validate_poi_mmr(&self, poi: &ProofOfIndex, block_offset: Height) -> Result<(), PoiError> {
        let Some(stored) = poi.mmr_root else {
            return Ok(());
        };
        let computed = self.mmr.get_root(Self::leaf_index(poi, block_offset)?).await?;
        if computed != stored {
            return Err(PoiError::MmrMismatch {
                id: poi.id,
                stored,
                computed,
            });
        }
        Ok(())
    }

    /// Links the next batch of synced rows. Returns the number linked.
    pub async fn sync_once(&self) -> Result<usize, PoiError> {
        let _sync = self.sync_lock.lock().await;
        let Some(offset) = self.block_offset().await? else {
            return Ok(0);
        };
        let next = match self.latest_poi_with_mmr().await? {
            Some((id, _)) => id + 1,
            None => offset + 1,
        };
        let rows = self.store.poi_range(next, Height::MAX, self.batch_size).await?;

        let mut updated = Vec::new();
        let mut latest = None;
        let mut expected = next;
        for mut poi in rows {
            let Some(hash) = poi.hash.filter(|_| poi.is_synced() && poi.id == expected) else {
                break;
            };
            let leaf_index = Self::leaf_index(&poi, offset)?;
            self.mmr.append(hash.as_bytes(), Some(leaf_index)).await?;
            let root = self.mmr.get_root(leaf_index).await?;
            if poi.mmr_root.is_some() {
                self.validate_poi_mmr(&poi, offset).await?;
            } else {
                poi.mmr_root = Some(root);
                updated.push(poi.clone());
            }
            latest = Some((poi.id, root));
            expected += 1;
        }
        let Some((id, root)) = latest else {
            return Ok(0);
        };
        let linked = (id - next + 1) as usize;
        self.store
            .apply(vec![
                StoreOp::UpsertPoi(updated),
                StoreOp::SetMetadata {
                    key: keys::LATEST_POI_WITH_MMR.to_string(),
                    value: latest_mmr_value(id, &root),
                },
            ])
            .await?;
        tracing::debug!(target: "mmr", height = id, records = linked, root = %root, "linked POI rows");
        Ok(linked)
    }

    /// Runs [`MmrService::sync_once`] until nothing is left to link.
    pub async fn sync_until_caught_up(&self) -> Result<usize, PoiError> {
        let mut total = 0;
        loop {
            let linked = self.sync_once().await?;
            if linked == 0 {
                return Ok(total);
            }
            total += linked;
        }
    }

    /// Appends stored POI hashes from the end of the accumulator up to
    /// `target` without going through the regular link loop.
    ///
    /// Rows whose stored root disagrees with the replayed one are rewritten.
    /// Returns the last height the accumulator now holds, or `None` if
    /// nothing has been indexed.
    pub async fn copy_poi_to_mmr(&self, target: Height) -> Result<Option<Height>, PoiError> {
        let _sync = self.sync_lock.lock().await;
        let Some(offset) = self.block_offset().await? else {
            return Ok(None);
        };
        let mut next = offset + self.mmr.leaf_length().await? + 1;
        let mut rewritten = Vec::new();
        'copy: while next <= target {
            let rows = self.store.poi_range(next, target, self.batch_size).await?;
            if rows.is_empty() {
                break;
            }
            for mut poi in rows {
                let Some(hash) = poi.hash.filter(|_| poi.id == next) else {
                    tracing::warn!(target: "mmr", height = next, "POI chain not synced this far, stopping copy");
                    break 'copy;
                };
                let leaf_index = Self::leaf_index(&poi, offset)?;
                self.mmr.append(hash.as_bytes(), Some(leaf_index)).await?;
                let root = self.mmr.get_root(leaf_index).await?;
                if poi.mmr_root.is_some_and(|stored| stored != root) {
                    tracing::warn!(target: "mmr", height = poi.id, root = %root, "rewriting POI accumulator root");
                    poi.mmr_root = Some(root);
                    rewritten.push(poi);
                }
                next += 1;
            }
        }
        if !rewritten.is_empty() {
            self.store.apply(vec![StoreOp::UpsertPoi(rewritten)]).await?;
        }
        let reached = next - 1;
        tracing::info!(target: "mmr", height = reached, "copied POI hashes into the accumulator");
        Ok(Some(reached))
    }

    /// Starts the link loop. It runs until [`MmrService::stop`] or a fatal
    /// error, which is kept for [`MmrService::fatal_error`].
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.control.begin();
        let this = self.clone();
        tokio::spawn(async move {
            while !this.control.should_stop() {
                match this.sync_once().await {
                    Ok(n) if n >= this.batch_size => {}
                    Ok(_) => this.control.idle(this.poll_interval).await,
                    Err(e) if e.is_fatal() => {
                        tracing::error!(target: "mmr", error = %e, code = e.code(), "accumulator sync stopped");
                        error_metrics().inc_error("mmr", e.code());
                        this.control.record_fatal(e);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(target: "mmr", error = %e, "accumulator sync failed, retrying");
                        this.control.idle(this.poll_interval).await;
                    }
                }
            }
            this.control.finish();
        })
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// The error that stopped the loop, if any.
    pub fn fatal_error(&self) -> Option<PoiError> {
        self.control.fatal()
    }

    /// Stops the loop after its current iteration.
    pub async fn stop(&self) {
        self.control.request_stop().await;
    }
}
