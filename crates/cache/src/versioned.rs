// Path: crates/cache/src/versioned.rs
//! The per-entity-type write-back cache.

use crate::chain::VersionChain;
use crate::error::CacheError;
use crate::read_cache::ReadCache;
use crate::sequence::OperationIndex;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use strata_api::cache::Cacheable;
use strata_api::query::FieldQuery;
use strata_api::storage::{Entity, Repository, StorageError, StoreOp, Transaction, VersionRow};
use strata_types::{Height, HistoricalValue, Tombstone};
use tokio::sync::Mutex as AsyncMutex;

struct State<T> {
    chains: BTreeMap<String, VersionChain<T>>,
    tombstones: BTreeMap<String, Tombstone>,
    read_cache: ReadCache<String, T>,
    flushable: usize,
}

impl<T: Clone> State<T> {
    fn recount(&mut self) {
        self.flushable =
            self.chains.values().map(VersionChain::len).sum::<usize>() + self.tombstones.len();
    }

    /// The cached view of an id: `Some(None)` if it is known to be removed,
    /// `None` if the cache has no opinion.
    fn current(&self, id: &str) -> Option<Option<T>> {
        let latest = self.chains.get(id).and_then(|c| c.latest());
        match (self.tombstones.get(id), latest) {
            (Some(t), Some(v)) if t.operation_index > v.operation_index => Some(None),
            (Some(_), None) => Some(None),
            (_, Some(v)) if v.is_open() => Some(Some(v.data.clone())),
            (_, Some(_)) => Some(None),
            (None, None) => None,
        }
    }

    /// Keeps what a flush at `height` did not persist and warms the read cache
    /// with the last persisted value of every id that is now fully flushed.
    fn prune_committed(&mut self, height: Height) {
        let mut warm = Vec::new();
        self.chains.retain(|id, chain| {
            let rest = chain.from_above_height(height);
            if rest.is_empty() {
                if let Some(v) = chain.open_value() {
                    warm.push((id.clone(), v.data.clone()));
                }
            }
            *chain = rest;
            !chain.is_empty()
        });
        self.tombstones.retain(|_, t| t.removed_at_block > height);
        for (id, data) in warm {
            if !self.tombstones.contains_key(&id) {
                self.read_cache.put(id, data);
            }
        }
        self.recount();
    }
}

struct Inner<T> {
    repo: Arc<dyn Repository<T>>,
    sequence: OperationIndex,
    state: Mutex<State<T>>,
    flush_lock: Arc<AsyncMutex<()>>,
}

/// A write-back cache for one entity type.
///
/// Writes are kept as per-id [`VersionChain`]s plus removal tombstones until a
/// flush persists them. Reads and writes wait for an in-flight flush of this
/// cache to commit, so they only ever observe pre- or post-flush state.
pub struct VersionedCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for VersionedCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn encode<T: Entity>(value: &T) -> Result<Value, StorageError> {
    serde_json::to_value(value).map_err(|e| StorageError::Encode(e.to_string()))
}

fn decode<T: Entity>(value: Value) -> Result<T, StorageError> {
    serde_json::from_value(value).map_err(|e| StorageError::Decode(e.to_string()))
}

impl<T: Entity> VersionedCache<T> {
    /// Creates a cache over `repo`, drawing operation indices from `sequence`.
    pub fn new(
        repo: Arc<dyn Repository<T>>,
        sequence: OperationIndex,
        read_cache_size: usize,
        read_cache_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                sequence,
                state: Mutex::new(State {
                    chains: BTreeMap::new(),
                    tombstones: BTreeMap::new(),
                    read_cache: ReadCache::new(read_cache_size, read_cache_ttl),
                    flushable: 0,
                }),
                flush_lock: Arc::new(AsyncMutex::new(())),
            }),
        }
    }

    /// The entity type name.
    pub fn entity(&self) -> &str {
        self.inner.repo.name()
    }

    /// Whether past values are persisted as height ranges.
    pub fn is_historical(&self) -> bool {
        self.inner.repo.is_historical()
    }

    fn out_of_order(&self, id: &str, e: crate::chain::OutOfOrder) -> CacheError {
        CacheError::OutOfOrder {
            entity: self.entity().to_string(),
            id: id.to_string(),
            current: e.current,
            attempted: e.attempted,
        }
    }

    /// Reads the current value of `id`.
    pub async fn get(&self, id: &str) -> Result<Option<T>, CacheError> {
        drop(self.inner.flush_lock.lock().await);
        {
            let mut state = self.inner.state.lock();
            if let Some(t) = state.tombstones.get(id) {
                let newer_write = state
                    .chains
                    .get(id)
                    .and_then(|c| c.latest())
                    .map_or(false, |v| v.operation_index > t.operation_index);
                if !newer_write {
                    return Ok(None);
                }
            }
            if let Some(hit) = state.read_cache.get(&id.to_string()) {
                return Ok(Some(hit));
            }
            if let Some(current) = state.current(id) {
                return Ok(current);
            }
        }
        let found = self.inner.repo.find(id).await?;
        if let Some(value) = &found {
            let mut state = self.inner.state.lock();
            // A write may have landed while the store was read.
            if state.current(id).is_none() {
                state.read_cache.put(id.to_string(), value.clone());
            }
        }
        Ok(found)
    }

    /// Reads the value of `id` valid at `height`.
    pub async fn get_at(&self, id: &str, height: Height) -> Result<Option<T>, CacheError> {
        if !self.is_historical() {
            return self.get(id).await;
        }
        drop(self.inner.flush_lock.lock().await);
        {
            let state = self.inner.state.lock();
            if let Some(chain) = state.chains.get(id) {
                if let Some(v) = chain.value_at(height) {
                    return Ok(Some(v.data.clone()));
                }
                if chain.first_start().map_or(false, |s| s <= height) {
                    return Ok(None);
                }
            }
            if state
                .tombstones
                .get(id)
                .map_or(false, |t| t.removed_at_block <= height)
            {
                return Ok(None);
            }
        }
        Ok(self.inner.repo.find_at(id, height).await?)
    }

    /// Runs a field query over current values.
    ///
    /// Uncommitted writes are filtered in memory and merged with a store query
    /// that excludes every id known to the cache; the union is ordered and
    /// paged. The read-through cache is not consulted.
    pub async fn get_by_fields(&self, query: &FieldQuery) -> Result<Vec<T>, CacheError> {
        drop(self.inner.flush_lock.lock().await);
        let (cached, known_ids) = {
            let state = self.inner.state.lock();
            let mut known: BTreeSet<String> = state.chains.keys().cloned().collect();
            known.extend(state.tombstones.keys().cloned());
            let mut rows = Vec::new();
            for id in state.chains.keys() {
                if let Some(Some(data)) = state.current(id) {
                    let json = encode(&data)?;
                    if query.matches(&json) {
                        rows.push((id.clone(), json));
                    }
                }
            }
            (rows, known)
        };
        // Any stored row that can make the page ranks within the store's own
        // first `offset + limit` rows once pending ids are excluded.
        let db_query = FieldQuery {
            offset: 0,
            limit: query.limit.map(|l| l.saturating_add(query.offset)),
            ..query.clone()
        };
        let from_store = self
            .inner
            .repo
            .find_by_fields(&db_query, &known_ids)
            .await?;
        let mut merged = cached;
        for value in from_store {
            let json = encode(&value)?;
            let id = json
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_default();
            merged.push((id, json));
        }
        query.sort(&mut merged);
        let page = merged
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX));
        let values: Result<Vec<T>, StorageError> = page.map(|(_, v)| decode(v)).collect();
        Ok(values?)
    }

    /// Records `data` for `id` from `height` on.
    pub async fn set(&self, id: &str, data: T, height: Height) -> Result<(), CacheError> {
        let _guard = self.inner.flush_lock.lock().await;
        self.set_locked(id, data, height)
    }

    /// A pending removal above `height` makes any write at `height` out of order.
    fn check_tombstone(&self, state: &State<T>, id: &str, height: Height) -> Result<(), CacheError> {
        match state.tombstones.get(id) {
            Some(t) if t.removed_at_block > height => Err(self.out_of_order(
                id,
                crate::chain::OutOfOrder {
                    current: t.removed_at_block,
                    attempted: height,
                },
            )),
            _ => Ok(()),
        }
    }

    fn set_locked(&self, id: &str, data: T, height: Height) -> Result<(), CacheError> {
        let op = self.inner.sequence.next();
        let mut state = self.inner.state.lock();
        self.check_tombstone(&state, id, height)?;
        let chain = state.chains.entry(id.to_string()).or_default();
        if let Err(e) = chain.set(data, height, op) {
            if chain.is_empty() {
                state.chains.remove(id);
            }
            return Err(self.out_of_order(id, e));
        }
        if state
            .tombstones
            .get(id)
            .map_or(false, |t| t.removed_at_block == height)
        {
            state.tombstones.remove(id);
        }
        state.read_cache.evict(&id.to_string());
        state.flushable += 1;
        Ok(())
    }

    /// Removes `id` at `height`.
    pub async fn remove(&self, id: &str, height: Height) -> Result<(), CacheError> {
        let _guard = self.inner.flush_lock.lock().await;
        self.remove_locked(id, height)
    }

    fn remove_locked(&self, id: &str, height: Height) -> Result<(), CacheError> {
        let op = self.inner.sequence.next();
        let mut state = self.inner.state.lock();
        self.check_tombstone(&state, id, height)?;
        if let Some(chain) = state.chains.get_mut(id) {
            chain.remove(height, op).map_err(|e| self.out_of_order(id, e))?;
            if chain.is_empty() {
                state.chains.remove(id);
            }
        }
        state.tombstones.insert(
            id.to_string(),
            Tombstone {
                removed_at_block: height,
                operation_index: op,
            },
        );
        state.read_cache.evict(&id.to_string());
        state.flushable += 1;
        Ok(())
    }

    /// Records several new entities at `height`.
    pub async fn bulk_create(&self, rows: Vec<(String, T)>, height: Height) -> Result<(), CacheError> {
        let _guard = self.inner.flush_lock.lock().await;
        for (id, data) in rows {
            self.set_locked(&id, data, height)?;
        }
        Ok(())
    }

    /// Records new values for several entities at `height`.
    pub async fn bulk_update(&self, rows: Vec<(String, T)>, height: Height) -> Result<(), CacheError> {
        self.bulk_create(rows, height).await
    }

    /// Removes several entities at `height`.
    pub async fn bulk_remove(&self, ids: &[String], height: Height) -> Result<(), CacheError> {
        let _guard = self.inner.flush_lock.lock().await;
        for id in ids {
            self.remove_locked(id, height)?;
        }
        Ok(())
    }

    /// Every stored interval of `id`, for inspection.
    pub async fn persisted_versions(&self, id: &str) -> Result<Vec<VersionRow>, CacheError> {
        Ok(self.inner.repo.versions(id).await?)
    }

    fn historical_ops(
        &self,
        state: &State<T>,
        height: Height,
        ordered: bool,
        tx: &Transaction,
    ) -> Result<usize, StorageError> {
        let entity = self.entity().to_string();
        let ids: BTreeSet<&String> = state.chains.keys().chain(state.tombstones.keys()).collect();
        let mut closes = Vec::new();
        let mut rows = Vec::new();
        let mut sequenced = 0;
        for id in ids {
            let flushed = state
                .chains
                .get(id)
                .map(|c| c.from_below_height(height))
                .unwrap_or_default();
            let tombstone = state
                .tombstones
                .get(id)
                .filter(|t| t.removed_at_block <= height);
            if ordered {
                for v in flushed.values() {
                    tx.push_sequenced(
                        v.operation_index,
                        StoreOp::CloseVersions {
                            entity: entity.clone(),
                            closes: vec![(id.clone(), v.start_height)],
                        },
                    );
                    tx.push_sequenced(
                        v.operation_index,
                        StoreOp::InsertVersions {
                            entity: entity.clone(),
                            rows: vec![row(id, v)?],
                        },
                    );
                    sequenced += 1;
                }
                if let Some(t) = tombstone {
                    sequenced += 1;
                    tx.push_sequenced(
                        t.operation_index,
                        StoreOp::CloseVersions {
                            entity: entity.clone(),
                            closes: vec![(id.clone(), t.removed_at_block)],
                        },
                    );
                }
            } else {
                let close_at = [
                    flushed.first_start(),
                    tombstone.map(|t| t.removed_at_block),
                ]
                .into_iter()
                .flatten()
                .min();
                if let Some(close_at) = close_at {
                    closes.push((id.clone(), close_at));
                }
                for v in flushed.values() {
                    rows.push(row(id, v)?);
                }
            }
        }
        let count = if ordered {
            sequenced
        } else {
            let count = closes.len() + rows.len();
            if !closes.is_empty() {
                tx.push(StoreOp::CloseVersions {
                    entity: entity.clone(),
                    closes,
                });
            }
            if !rows.is_empty() {
                tx.push(StoreOp::InsertVersions { entity, rows });
            }
            count
        };
        Ok(count)
    }

    fn plain_ops(
        &self,
        state: &State<T>,
        height: Height,
        ordered: bool,
        tx: &Transaction,
    ) -> Result<usize, StorageError> {
        let entity = self.entity();
        let ids: BTreeSet<&String> = state.chains.keys().chain(state.tombstones.keys()).collect();
        let mut count = 0;
        for id in ids {
            let latest = state
                .chains
                .get(id)
                .and_then(|c| c.values().iter().rev().find(|v| v.start_height <= height));
            let tombstone = state
                .tombstones
                .get(id)
                .filter(|t| t.removed_at_block <= height);
            // Latest operation wins.
            let (index, op) = match (latest, tombstone) {
                (Some(v), t) if t.map_or(true, |t| v.operation_index > t.operation_index) => {
                    let op = if v.end_height.map_or(false, |end| end <= height) {
                        StoreOp::Delete {
                            entity: entity.to_string(),
                            id: id.clone(),
                        }
                    } else {
                        StoreOp::Upsert {
                            entity: entity.to_string(),
                            id: id.clone(),
                            data: encode(&v.data)?,
                        }
                    };
                    (v.operation_index, op)
                }
                (_, Some(t)) => (
                    t.operation_index,
                    StoreOp::Delete {
                        entity: entity.to_string(),
                        id: id.clone(),
                    },
                ),
                _ => continue,
            };
            if ordered {
                tx.push_sequenced(index, op);
            } else {
                tx.push(op);
            }
            count += 1;
        }
        Ok(count)
    }
}

fn row<T: Entity>(id: &str, v: &HistoricalValue<T>) -> Result<VersionRow, StorageError> {
    Ok(VersionRow {
        id: id.to_string(),
        data: encode(&v.data)?,
        start_height: v.start_height,
        end_height: v.end_height,
    })
}

#[async_trait]
impl<T: Entity> Cacheable for VersionedCache<T> {
    fn name(&self) -> &str {
        self.entity()
    }

    fn flushable_record_count(&self) -> usize {
        self.inner.state.lock().flushable
    }

    async fn flush(&self, tx: &Transaction, height: Height, ordered: bool) -> Result<(), StorageError> {
        let guard = self.inner.flush_lock.clone().lock_owned().await;
        let emitted = {
            let state = self.inner.state.lock();
            if self.is_historical() {
                self.historical_ops(&state, height, ordered, tx)?
            } else {
                self.plain_ops(&state, height, ordered, tx)?
            }
        };
        if emitted == 0 {
            return Ok(());
        }
        tracing::debug!(target: "cache", entity = self.entity(), height, records = emitted, "entity cache flush staged");
        let inner = self.inner.clone();
        tx.after_commit(move || {
            inner.state.lock().prune_committed(height);
            drop(guard);
        });
        Ok(())
    }

    fn clear(&self, height: Option<Height>) {
        let mut state = self.inner.state.lock();
        match height {
            Some(height) => state.prune_committed(height),
            None => {
                state.chains.clear();
                state.tombstones.clear();
                state.read_cache.clear();
                state.flushable = 0;
            }
        }
    }

    async fn rewind(&self, height: Height) {
        let _guard = self.inner.flush_lock.lock().await;
        let mut state = self.inner.state.lock();
        state.chains.retain(|_, chain| {
            *chain = chain.from_below_height(height);
            !chain.is_empty()
        });
        state.tombstones.retain(|_, t| t.removed_at_block <= height);
        state.read_cache.clear();
        state.recount();
    }
}
