use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Result, Revision, SaveOptions, StoredRecord};

/// Core trait for local store implementations.
///
/// Records are JSON documents addressed by `(namespace, key)`. Every write
/// bumps the record's revision; callers that read-modify-write pass the
/// revision they read to detect lost updates.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Inserts or replaces a record.
    ///
    /// Fails with `RevisionConflict` if `options.expected_revision` is set
    /// and does not match. Returns the record's new revision.
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        owner: Option<&str>,
        payload: serde_json::Value,
        options: SaveOptions,
    ) -> Result<Revision>;

    /// Retrieves a record. Returns None if it does not exist.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>>;

    /// Retrieves every record in `namespace` that belongs to `owner`.
    ///
    /// Records are returned oldest write first.
    async fn list_by_owner(&self, namespace: &str, owner: &str) -> Result<Vec<StoredRecord>>;

    /// Deletes a record. Returns false if it did not exist.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Deletes every record in `namespace` that belongs to `owner`.
    ///
    /// Returns the number of records removed.
    async fn delete_by_owner(&self, namespace: &str, owner: &str) -> Result<u64>;
}

/// Typed convenience methods over any local store.
#[async_trait]
pub trait LocalStoreExt: LocalStore {
    /// Serializes `value` and writes it.
    async fn save_state<T>(
        &self,
        namespace: &str,
        key: &str,
        owner: Option<&str>,
        value: &T,
        options: SaveOptions,
    ) -> Result<Revision>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_value(value)?;
        self.put(namespace, key, owner, payload, options).await
    }

    /// Loads and deserializes a record along with its revision.
    async fn load_state<T>(&self, namespace: &str, key: &str) -> Result<Option<(T, Revision)>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(namespace, key).await? {
            Some(record) => Ok(Some((record.decode()?, record.revision))),
            None => Ok(None),
        }
    }

    /// Loads and deserializes every record an owner has in a namespace.
    async fn list_states<T>(&self, namespace: &str, owner: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.list_by_owner(namespace, owner)
            .await?
            .iter()
            .map(StoredRecord::decode)
            .collect()
    }

    /// Checks if a record exists.
    async fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }
}

// Blanket implementation for all LocalStore implementations
impl<T: LocalStore + ?Sized> LocalStoreExt for T {}
