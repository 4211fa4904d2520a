// Path: crates/poi/src/regenerator.rs
//! Repairs divergence between the POI chain and the accumulator.

use crate::error::PoiError;
use crate::mmr_service::MmrService;
use std::sync::Arc;
use strata_api::storage::{latest_mmr_value, DurableStore, PoiFilter, StoreOp};
use strata_types::{keys, Height};

/// How the regenerator treats an accumulator that is behind the POI table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegenMode {
    /// Refuse when the accumulator lags; otherwise rewind both sides and
    /// relink.
    #[default]
    Safe,
    /// Copy the missing leaves from stored POI hashes, then relink.
    Unsafe,
}

/// What a regeneration run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerateReport {
    pub mode: RegenMode,
    /// First height whose accumulator root was rebuilt.
    pub regen_start: Height,
    pub leaves_before: u64,
    pub leaves_after: u64,
    /// The last linked height once the run finished.
    pub latest_poi_with_mmr: Option<Height>,
}

/// The heights a regeneration plan is computed from.
struct Heights {
    offset: Height,
    latest_poi: Height,
    poi_mmr: Height,
    accumulator: Height,
    leaves: u64,
}

/// Rewinds or replays the accumulator so it agrees with the POI chain.
///
/// The [`MmrService`] loop must be stopped while a run is in progress.
pub struct IntegrityRegenerator {
    store: Arc<dyn DurableStore>,
    mmr_service: Arc<MmrService>,
}

impl IntegrityRegenerator {
    pub fn new(store: Arc<dyn DurableStore>, mmr_service: Arc<MmrService>) -> Self {
        Self { store, mmr_service }
    }

    async fn heights(&self) -> Result<Option<Heights>, PoiError> {
        let Some(offset) = self.mmr_service.block_offset().await? else {
            return Ok(None);
        };
        let latest_poi = self
            .store
            .latest_poi(PoiFilter::Any)
            .await?
            .map_or(offset, |p| p.id);
        let poi_mmr = self
            .mmr_service
            .latest_poi_with_mmr()
            .await?
            .map_or(offset, |(id, _)| id);
        let leaves = self.mmr_service.mmr().leaf_length().await?;
        Ok(Some(Heights {
            offset,
            latest_poi,
            poi_mmr,
            accumulator: offset + leaves,
            leaves,
        }))
    }

    /// Brings the accumulator and the rows' `mmr_root`s back in agreement,
    /// rebuilding from `target` (or the last linked height) onward.
    pub async fn regenerate(
        &self,
        mode: RegenMode,
        target: Option<Height>,
    ) -> Result<RegenerateReport, PoiError> {
        if self.mmr_service.is_running() {
            return Err(PoiError::ServiceRunning);
        }
        let Some(h) = self.heights().await? else {
            tracing::info!(target: "poi", "nothing indexed, skipping regeneration");
            return Ok(RegenerateReport {
                mode,
                regen_start: 0,
                leaves_before: 0,
                leaves_after: 0,
                latest_poi_with_mmr: None,
            });
        };
        if let Some(target) = target {
            if target > h.latest_poi {
                return Err(PoiError::TargetAboveLatest {
                    target,
                    latest: h.latest_poi,
                });
            }
        }
        tracing::info!(
            target: "poi",
            ?mode,
            ?target,
            block_offset = h.offset,
            latest_poi = h.latest_poi,
            poi_mmr_height = h.poi_mmr,
            accumulator_height = h.accumulator,
            "regenerating accumulator"
        );

        let regen_start = match mode {
            RegenMode::Safe => self.rewind_safe(&h, target).await?,
            RegenMode::Unsafe => self.rewind_unsafe(&h, target).await?,
        };
        self.mmr_service.sync_until_caught_up().await?;

        let report = RegenerateReport {
            mode,
            regen_start,
            leaves_before: h.leaves,
            leaves_after: self.mmr_service.mmr().leaf_length().await?,
            latest_poi_with_mmr: self.mmr_service.latest_poi_with_mmr().await?.map(|(id, _)| id),
        };
        tracing::info!(target: "poi", ?report, "regeneration finished");
        Ok(report)
    }

    async fn rewind_safe(&self, h: &Heights, target: Option<Height>) -> Result<Height, PoiError> {
        if h.accumulator < h.poi_mmr {
            return Err(PoiError::AccumulatorBehind {
                accumulator_height: h.accumulator,
                poi_mmr_height: h.poi_mmr,
            });
        }
        let regen_start = target.unwrap_or(h.poi_mmr).max(h.offset + 1);
        self.rewind_to(h, regen_start).await?;
        Ok(regen_start)
    }

    async fn rewind_unsafe(&self, h: &Heights, target: Option<Height>) -> Result<Height, PoiError> {
        let stop = target.map_or(h.poi_mmr, |t| t.min(h.poi_mmr));
        let reached = if h.accumulator < stop {
            self.mmr_service.copy_poi_to_mmr(stop).await?.unwrap_or(h.offset)
        } else {
            stop
        };
        let regen_start = reached.max(h.offset) + 1;
        self.rewind_to(h, regen_start).await?;
        Ok(regen_start)
    }

    /// Drops accumulator leaves and row roots from `regen_start` on and points
    /// `latestPoiWithMmr` at the row before it.
    async fn rewind_to(&self, h: &Heights, regen_start: Height) -> Result<(), PoiError> {
        self.mmr_service
            .mmr()
            .delete_mmr_node(regen_start, h.offset)
            .await?;

        let keep = (regen_start - 1).min(h.poi_mmr);
        let linked = if keep > h.offset {
            self.store
                .get_poi(keep)
                .await?
                .and_then(|p| p.mmr_root.map(|root| (p.id, root)))
        } else {
            None
        };
        let marker = match linked {
            Some((id, root)) => StoreOp::SetMetadata {
                key: keys::LATEST_POI_WITH_MMR.to_string(),
                value: latest_mmr_value(id, &root),
            },
            None => StoreOp::DeleteMetadata {
                key: keys::LATEST_POI_WITH_MMR.to_string(),
            },
        };
        self.store
            .apply(vec![StoreOp::ClearPoiMmrRoots { from: regen_start }, marker])
            .await?;
        tracing::info!(target: "poi", height = regen_start, "cleared accumulator state");
        Ok(())
    }
}
