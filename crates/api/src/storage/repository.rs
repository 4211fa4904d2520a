// Path: crates/api/src/storage/repository.rs

//! Typed access to one entity type in a [`DurableStore`].

use super::{DurableStore, StorageError, StoreOp, Transaction, VersionRow};
use crate::query::FieldQuery;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use strata_types::Height;

/// Bounds every cached entity payload must satisfy.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Entity for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Typed find/upsert/destroy for one entity type.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// The entity type name used as the storage namespace.
    fn name(&self) -> &str;

    /// Whether past values are kept as height-ranged rows.
    fn is_historical(&self) -> bool;

    /// Reads the current value.
    async fn find(&self, id: &str) -> Result<Option<T>, StorageError>;

    /// Reads the value valid at `height`.
    async fn find_at(&self, id: &str, height: Height) -> Result<Option<T>, StorageError>;

    /// Runs a field query over current values, skipping `exclude_ids`.
    async fn find_by_fields(
        &self,
        query: &FieldQuery,
        exclude_ids: &BTreeSet<String>,
    ) -> Result<Vec<T>, StorageError>;

    /// Reads every stored interval of an id.
    async fn versions(&self, id: &str) -> Result<Vec<VersionRow>, StorageError>;

    /// Serializes a payload into its stored form.
    fn encode(&self, value: &T) -> Result<Value, StorageError> {
        serde_json::to_value(value).map_err(|e| StorageError::Encode(e.to_string()))
    }

    /// Queues a plain upsert of the current value.
    fn upsert(&self, tx: &Transaction, id: &str, value: &T) -> Result<(), StorageError> {
        tx.push(StoreOp::Upsert {
            entity: self.name().to_string(),
            id: id.to_string(),
            data: self.encode(value)?,
        });
        Ok(())
    }

    /// Queues a deletion of every row of an id.
    fn destroy(&self, tx: &Transaction, id: &str) {
        tx.push(StoreOp::Delete {
            entity: self.name().to_string(),
            id: id.to_string(),
        });
    }
}

/// The [`Repository`] implementation over any [`DurableStore`].
pub struct StoreRepository<T> {
    name: String,
    historical: bool,
    store: Arc<dyn DurableStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StoreRepository<T> {
    /// Creates a repository for the entity type `name`.
    pub fn new(store: Arc<dyn DurableStore>, name: impl Into<String>, historical: bool) -> Self {
        Self {
            name: name.into(),
            historical,
            store,
            _marker: PhantomData,
        }
    }
}

fn decode<T: Entity>(value: Value) -> Result<T, StorageError> {
    serde_json::from_value(value).map_err(|e| StorageError::Decode(e.to_string()))
}

#[async_trait]
impl<T: Entity> Repository<T> for StoreRepository<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_historical(&self) -> bool {
        self.historical
    }

    async fn find(&self, id: &str) -> Result<Option<T>, StorageError> {
        self.store
            .find_entity(&self.name, id)
            .await?
            .map(decode)
            .transpose()
    }

    async fn find_at(&self, id: &str, height: Height) -> Result<Option<T>, StorageError> {
        if !self.historical {
            return self.find(id).await;
        }
        self.store
            .find_entity_at(&self.name, id, height)
            .await?
            .map(decode)
            .transpose()
    }

    async fn find_by_fields(
        &self,
        query: &FieldQuery,
        exclude_ids: &BTreeSet<String>,
    ) -> Result<Vec<T>, StorageError> {
        self.store
            .query_entities(&self.name, query, exclude_ids)
            .await?
            .into_iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    async fn versions(&self, id: &str) -> Result<Vec<VersionRow>, StorageError> {
        self.store.entity_versions(&self.name, id).await
    }
}
