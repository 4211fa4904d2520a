// Path: crates/cache/src/metadata.rs
//! Write-back cache for the key-value metadata store.

use crate::error::CacheError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use strata_api::cache::Cacheable;
use strata_api::storage::{DurableStore, StorageError, StoreOp, Transaction};
use strata_types::Height;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
struct State {
    /// Best known value of every key read or written so far.
    values: HashMap<String, Value>,
    /// Keys overwritten since the last flush.
    dirty: BTreeSet<String>,
    increments: BTreeMap<String, i64>,
    appends: BTreeMap<String, Vec<Value>>,
}

impl State {
    fn pending(&self) -> usize {
        self.dirty.len() + self.increments.len() + self.appends.len()
    }
}

/// Metadata cache with plain, increment-only and append-only keys.
///
/// Increments and appends are flushed as atomic store operations instead of a
/// rewrite of the whole value. A plain [`MetadataCache::set`] of a key discards
/// any pending increment or append of it.
pub struct MetadataCache {
    store: Arc<dyn DurableStore>,
    state: Arc<Mutex<State>>,
    flush_lock: Arc<AsyncMutex<()>>,
}

fn add(value: &Value, amount: i64) -> Value {
    Value::from(value.as_i64().unwrap_or(0).saturating_add(amount))
}

fn extend(value: &Value, values: &[Value]) -> Value {
    let mut list = value.as_array().cloned().unwrap_or_default();
    list.extend_from_slice(values);
    Value::Array(list)
}

impl MetadataCache {
    /// Creates an empty cache over `store`.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(State::default())),
            flush_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Overwrites `key`.
    pub async fn set(&self, key: &str, value: Value) {
        let _guard = self.flush_lock.lock().await;
        let mut state = self.state.lock();
        state.increments.remove(key);
        state.appends.remove(key);
        state.values.insert(key.to_string(), value);
        state.dirty.insert(key.to_string());
    }

    /// Overwrites several keys.
    pub async fn set_bulk(&self, entries: Vec<(String, Value)>) {
        for (key, value) in entries {
            self.set(&key, value).await;
        }
    }

    /// Adds `amount` to a numeric key.
    pub async fn increment(&self, key: &str, amount: i64) {
        let _guard = self.flush_lock.lock().await;
        let mut state = self.state.lock();
        let state = &mut *state;
        if let Some(current) = state.values.get_mut(key) {
            *current = add(current, amount);
        }
        if state.dirty.contains(key) {
            // Folded into the pending overwrite.
            return;
        }
        *state.increments.entry(key.to_string()).or_insert(0) += amount;
    }

    /// Appends to a list key.
    pub async fn append(&self, key: &str, values: Vec<Value>) {
        let _guard = self.flush_lock.lock().await;
        let mut state = self.state.lock();
        let state = &mut *state;
        if let Some(current) = state.values.get_mut(key) {
            *current = extend(current, &values);
        }
        if state.dirty.contains(key) {
            return;
        }
        state
            .appends
            .entry(key.to_string())
            .or_default()
            .extend(values);
    }

    /// Reads `key`, pending increments and appends included.
    pub async fn find(&self, key: &str) -> Result<Option<Value>, CacheError> {
        drop(self.flush_lock.lock().await);
        if let Some(v) = self.state.lock().values.get(key) {
            return Ok(Some(v.clone()));
        }
        let stored = self.store.get_metadata(key).await?;
        let mut state = self.state.lock();
        if let Some(v) = state.values.get(key) {
            return Ok(Some(v.clone()));
        }
        let increment = state.increments.get(key).copied();
        let appended = state.appends.get(key).cloned();
        let merged = match (stored, increment, appended) {
            (None, None, None) => return Ok(None),
            (base, Some(amount), _) => add(&base.unwrap_or(Value::Null), amount),
            (base, None, Some(values)) => extend(&base.unwrap_or(Value::Null), &values),
            (Some(base), None, None) => base,
        };
        state.values.insert(key.to_string(), merged.clone());
        Ok(Some(merged))
    }

    /// Reads several keys; missing keys are omitted.
    pub async fn find_many(&self, keys: &[&str]) -> Result<BTreeMap<String, Value>, CacheError> {
        let mut out = BTreeMap::new();
        for key in keys {
            if let Some(v) = self.find(key).await? {
                out.insert(key.to_string(), v);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Cacheable for MetadataCache {
    fn name(&self) -> &str {
        "metadata"
    }

    fn flushable_record_count(&self) -> usize {
        self.state.lock().pending()
    }

    async fn flush(&self, tx: &Transaction, _height: Height, _ordered: bool) -> Result<(), StorageError> {
        let guard = self.flush_lock.clone().lock_owned().await;
        {
            let state = self.state.lock();
            if state.pending() == 0 {
                return Ok(());
            }
            for key in &state.dirty {
                let value = state.values.get(key).cloned().unwrap_or(Value::Null);
                tx.push(StoreOp::SetMetadata {
                    key: key.clone(),
                    value,
                });
            }
            for (key, amount) in &state.increments {
                tx.push(StoreOp::IncrementMetadata {
                    key: key.clone(),
                    amount: *amount,
                });
            }
            for (key, values) in &state.appends {
                tx.push(StoreOp::AppendMetadata {
                    key: key.clone(),
                    values: values.clone(),
                });
            }
        }
        let state = self.state.clone();
        tx.after_commit(move || {
            let mut state = state.lock();
            state.dirty.clear();
            state.increments.clear();
            state.appends.clear();
            drop(guard);
        });
        Ok(())
    }

    fn clear(&self, height: Option<Height>) {
        let mut state = self.state.lock();
        state.dirty.clear();
        state.increments.clear();
        state.appends.clear();
        if height.is_none() {
            state.values.clear();
        }
    }

    async fn rewind(&self, _height: Height) {
        // Metadata is not height-versioned; callers overwrite progress keys.
        let _guard = self.flush_lock.lock().await;
        self.state.lock().values.clear();
    }
}
