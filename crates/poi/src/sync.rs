// Path: crates/poi/src/sync.rs
//! The loop that links created POI rows into the hash chain.

use crate::error::PoiError;
use crate::record::PoiRecord;
use crate::worker::LoopControl;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strata_api::storage::{DurableStore, PoiFilter, StoreOp};
use strata_telemetry::{error_metrics, poi_metrics};
use strata_types::error::ErrorCode;
use strata_types::{config::PoiConfig, keys, Hash32, Height, ProofOfIndex, ZERO_HASH};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Parent hash of the first row of every chain.
pub const GENESIS_PARENT_HASH: Hash32 = ZERO_HASH;

#[derive(Default)]
struct SyncState {
    /// Id and hash of the last chained row, queued or persisted.
    latest: Option<(Height, Hash32)>,
    queue: Vec<ProofOfIndex>,
    queued_since: Option<Instant>,
}

/// Chains POI rows created by the indexing pipeline.
///
/// Rows are read from the durable store in ascending height. Heights the
/// pipeline skipped are filled with default rows so the chain has no gaps.
/// Chained rows are queued and written in one transaction together with the
/// `latestSyncedPoiHeight` metadata key.
pub struct PoiSyncService {
    store: Arc<dyn DurableStore>,
    project_id: String,
    config: PoiConfig,
    state: AsyncMutex<SyncState>,
    control: LoopControl,
}

impl PoiSyncService {
    pub fn new(store: Arc<dyn DurableStore>, project_id: impl Into<String>, config: PoiConfig) -> Self {
        Self {
            store,
            project_id: project_id.into(),
            config,
            state: AsyncMutex::new(SyncState::default()),
            control: LoopControl::default(),
        }
    }

    /// The last chained height, queued rows included.
    pub async fn latest_synced(&self) -> Option<Height> {
        self.state.lock().await.latest.map(|(id, _)| id)
    }

    /// Number of chained rows waiting to be written.
    pub async fn queued_count(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Loads the last chained row: from metadata, else the highest synced
    /// row, else chains the first created row onto the genesis parent.
    pub async fn bootstrap(&self) -> Result<Option<Height>, PoiError> {
        let mut state = self.state.lock().await;
        self.bootstrap_locked(&mut state).await?;
        Ok(state.latest.map(|(id, _)| id))
    }

    async fn bootstrap_locked(&self, state: &mut SyncState) -> Result<(), PoiError> {
        if state.latest.is_some() {
            return Ok(());
        }
        let recorded = self
            .store
            .get_metadata(keys::LATEST_SYNCED_POI_HEIGHT)
            .await?
            .and_then(|v| v.as_u64());
        let mut latest = match recorded {
            Some(height) => self.store.get_poi(height).await?.filter(|p| p.is_synced()),
            None => None,
        };
        if latest.is_none() {
            if let Some(height) = recorded {
                tracing::warn!(target: "poi", height, "recorded latest synced POI is missing, scanning");
            }
            latest = self.store.latest_poi(PoiFilter::Synced).await?;
        }
        if let Some((id, hash)) = latest.and_then(|p| p.hash.map(|h| (p.id, h))) {
            tracing::info!(target: "poi", height = id, "resuming POI sync");
            state.latest = Some((id, hash));
            return Ok(());
        }
        if let Some(first) = self.store.first_poi(PoiFilter::Unsynced).await? {
            tracing::info!(target: "poi", height = first.id, "creating genesis POI");
            self.chain_rows(state, vec![first])?;
        }
        Ok(())
    }

    fn chain_rows(&self, state: &mut SyncState, rows: Vec<ProofOfIndex>) -> Result<usize, PoiError> {
        let mut chained = 0;
        for row in rows {
            let record = PoiRecord::from_poi(&row, &self.project_id)?;
            let parent = match state.latest {
                None => GENESIS_PARENT_HASH,
                Some((latest, _)) if row.id <= latest => {
                    return Err(PoiError::NonMonotonic { id: row.id, latest });
                }
                Some((latest, hash)) => {
                    let mut parent = hash;
                    let gap = row.id - latest - 1;
                    for id in latest + 1..row.id {
                        let filler = PoiRecord::default_record(id, &self.project_id)?;
                        let hash = filler.hash(&parent);
                        state.queue.push(filler.link(parent));
                        parent = hash;
                    }
                    if gap > 0 {
                        tracing::debug!(target: "poi", from = latest + 1, to = row.id - 1, "filled POI gap");
                        poi_metrics().inc_default_records(gap);
                    }
                    parent
                }
            };
            let hash = record.hash(&parent);
            let mut linked = record.link(parent);
            linked.mmr_root = row.mmr_root;
            state.queue.push(linked);
            state.latest = Some((row.id, hash));
            chained += 1;
        }
        if chained > 0 && state.queued_since.is_none() {
            state.queued_since = Some(Instant::now());
        }
        Ok(chained)
    }

    /// Chains `rows`, which must be in strictly ascending height above the
    /// last chained row. Nothing is written until the queue is flushed.
    pub async fn sync_rows(&self, rows: Vec<ProofOfIndex>) -> Result<usize, PoiError> {
        let mut state = self.state.lock().await;
        self.bootstrap_locked(&mut state).await?;
        self.chain_rows(&mut state, rows)
    }

    /// Chains the next batch of created rows and flushes the queue when it
    /// is large or old enough. Returns the number of rows chained.
    pub async fn sync_once(&self) -> Result<usize, PoiError> {
        let mut state = self.state.lock().await;
        self.bootstrap_locked(&mut state).await?;
        let head = state.latest;
        let chained = match head {
            Some((latest, _)) => {
                let rows = self
                    .store
                    .poi_range(latest + 1, Height::MAX, self.config.sync_batch_size)
                    .await?;
                self.chain_rows(&mut state, rows)?
            }
            None => 0,
        };
        if self.queue_due(&state) {
            self.flush_locked(&mut state).await?;
        }
        Ok(chained)
    }

    fn queue_due(&self, state: &SyncState) -> bool {
        let interval = Duration::from_millis(self.config.queue_flush_interval_ms);
        state.queue.len() >= self.config.queue_flush_size
            || state
                .queued_since
                .is_some_and(|since| since.elapsed() >= interval)
    }

    /// Writes every queued row. On failure the queue is kept for a retry.
    pub async fn flush_queue(&self) -> Result<usize, PoiError> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut SyncState) -> Result<usize, PoiError> {
        let Some(last) = state.queue.last().map(|p| p.id) else {
            state.queued_since = None;
            return Ok(0);
        };
        let rows = std::mem::take(&mut state.queue);
        let count = rows.len();
        let ops = vec![
            StoreOp::UpsertPoi(rows.clone()),
            StoreOp::SetMetadata {
                key: keys::LATEST_SYNCED_POI_HEIGHT.to_string(),
                value: json!(last),
            },
        ];
        if let Err(e) = self.store.apply(ops).await {
            state.queue = rows;
            return Err(e.into());
        }
        state.queued_since = None;
        poi_metrics().set_latest_synced_height(last);
        tracing::info!(target: "poi", height = last, records = count, "synced POI rows");
        Ok(count)
    }

    /// Starts the sync loop. It runs until [`PoiSyncService::stop`] or a
    /// fatal error, which is kept for [`PoiSyncService::fatal_error`].
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.control.begin();
        let this = self.clone();
        tokio::spawn(async move {
            let poll = Duration::from_millis(this.config.poll_interval_ms);
            while !this.control.should_stop() {
                match this.sync_once().await {
                    Ok(n) if n >= this.config.sync_batch_size => {}
                    Ok(_) => this.control.idle(poll).await,
                    Err(e) if e.is_fatal() => {
                        tracing::error!(target: "poi", error = %e, code = e.code(), "POI sync stopped");
                        error_metrics().inc_error("poi", e.code());
                        this.control.record_fatal(e);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(target: "poi", error = %e, "POI sync failed, retrying");
                        this.control.idle(poll).await;
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

    /// Stops the loop after its current iteration and writes what is queued.
    pub async fn stop(&self) -> Result<(), PoiError> {
        self.control.request_stop().await;
        self.flush_queue().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::MemoryStore;

    fn created(id: Height) -> ProofOfIndex {
        ProofOfIndex::created(id, vec![id as u8; 4], Hash32([id as u8; 32]))
    }

    fn service(store: Arc<MemoryStore>, queue_flush_size: usize) -> PoiSyncService {
        let config = PoiConfig {
            queue_flush_size,
            ..PoiConfig::default()
        };
        PoiSyncService::new(store, "test-project", config)
    }

    async fn seed(store: &MemoryStore, rows: Vec<ProofOfIndex>) {
        store.apply(vec![StoreOp::UpsertPoi(rows)]).await.unwrap();
    }

    #[tokio::test]
    async fn gaps_are_filled_with_linked_default_rows() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, vec![created(101), created(105)]).await;
        let sync = service(store.clone(), 100);

        assert_eq!(sync.sync_once().await.unwrap(), 1);
        assert_eq!(sync.flush_queue().await.unwrap(), 5);

        let rows = store.poi_range(101, 105, 10).await.unwrap();
        assert_eq!(rows.iter().map(|p| p.id).collect::<Vec<_>>(), vec![101, 102, 103, 104, 105]);
        assert_eq!(rows[0].parent_hash, Some(GENESIS_PARENT_HASH));
        for pair in rows.windows(2) {
            assert_eq!(pair[1].parent_hash, pair[0].hash);
        }
        assert!(rows[1..4].iter().all(|p| p.is_default() && p.is_synced()));
        assert!(!rows[4].is_default());
        assert_eq!(
            store.get_metadata(keys::LATEST_SYNCED_POI_HEIGHT).await.unwrap(),
            Some(json!(105))
        );
    }

    #[tokio::test]
    async fn heights_at_or_below_the_chain_head_are_fatal() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, vec![created(3)]).await;
        let sync = service(store, 100);
        sync.sync_rows(vec![created(4)]).await.unwrap();
        let err = sync.sync_rows(vec![created(4)]).await.unwrap_err();
        assert_eq!(err, PoiError::NonMonotonic { id: 4, latest: 4 });
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn resumes_from_the_recorded_height() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, vec![created(1), created(2)]).await;
        let first = service(store.clone(), 1);
        first.sync_once().await.unwrap();
        let head = store.get_poi(2).await.unwrap().unwrap();

        seed(&store, vec![created(3)]).await;
        let second = service(store.clone(), 1);
        assert_eq!(second.bootstrap().await.unwrap(), Some(2));
        second.sync_once().await.unwrap();
        assert_eq!(store.get_poi(3).await.unwrap().unwrap().parent_hash, head.hash);
    }

    #[tokio::test]
    async fn failed_flush_keeps_the_queue() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, vec![created(1), created(2)]).await;
        let sync = service(store.clone(), 100);
        sync.sync_once().await.unwrap();
        store.fail_next_apply("disk full");
        assert!(sync.flush_queue().await.is_err());
        assert_eq!(sync.queued_count().await, 2);
        assert_eq!(sync.flush_queue().await.unwrap(), 2);
        assert!(store.get_poi(2).await.unwrap().unwrap().is_synced());
    }

    #[tokio::test]
    async fn background_loop_syncs_until_stopped() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, vec![created(1)]).await;
        let config = PoiConfig {
            poll_interval_ms: 5,
            queue_flush_interval_ms: 0,
            ..PoiConfig::default()
        };
        let sync = Arc::new(PoiSyncService::new(store.clone(), "p", config));
        let handle = sync.spawn();
        seed(&store, vec![created(2), created(3)]).await;

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.get_poi(3).await.unwrap().map_or(true, |p| !p.is_synced()) {
            assert!(Instant::now() < deadline, "sync loop made no progress");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sync.stop().await.unwrap();
        handle.await.unwrap();
        assert!(!sync.is_running());
        assert_eq!(sync.fatal_error(), None);
    }
}
