use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{LocalStore, Result, Revision, SaveOptions, StoreError, StoredRecord};

type RecordKey = (String, String);

/// In-memory local store.
///
/// Used by the default server wiring and by tests; behaves like the
/// PostgreSQL implementation, including revision checks.
#[derive(Clone, Default)]
pub struct InMemoryLocalStore {
    records: Arc<RwLock<HashMap<RecordKey, StoredRecord>>>,
    unavailable: Arc<AtomicBool>,
    write_budget: Arc<Mutex<Option<(String, usize)>>>,
}

impl InMemoryLocalStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Lets `writes` more puts into `namespace` succeed, then fails the rest
    /// with `StoreError::Unavailable` until `clear_write_budget` is called.
    pub fn fail_writes_after(&self, namespace: &str, writes: usize) {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = Some((namespace.to_string(), writes));
        }
    }

    pub fn clear_write_budget(&self) {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = None;
        }
    }

    /// Returns the total number of records stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns the number of records stored in a namespace.
    pub async fn namespace_count(&self, namespace: &str) -> usize {
        self.records
            .read()
            .await
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .count()
    }

    /// Clears all records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn spend_write(&self, namespace: &str) -> Result<()> {
        let Ok(mut budget) = self.write_budget.lock() else {
            return Ok(());
        };
        match budget.as_mut() {
            Some((limited, 0)) if limited == namespace => Err(StoreError::Unavailable(format!(
                "in-memory store refused write to {namespace}"
            ))),
            Some((limited, remaining)) if limited == namespace => {
                *remaining -= 1;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        owner: Option<&str>,
        payload: serde_json::Value,
        options: SaveOptions,
    ) -> Result<Revision> {
        self.check_available()?;
        self.spend_write(namespace)?;

        let mut records = self.records.write().await;
        let record_key = (namespace.to_string(), key.to_string());
        let current = records
            .get(&record_key)
            .map(|r| r.revision)
            .unwrap_or(Revision::initial());

        if let Some(expected) = options.expected_revision
            && current != expected
        {
            return Err(StoreError::conflict(
                "memory", namespace, key, expected, current,
            ));
        }

        let revision = current.next();
        records.insert(
            record_key,
            StoredRecord {
                namespace: namespace.to_string(),
                key: key.to_string(),
                owner: owner.map(str::to_string),
                revision,
                updated_at: Utc::now(),
                payload,
            },
        );

        Ok(revision)
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn list_by_owner(&self, namespace: &str, owner: &str) -> Result<Vec<StoredRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.namespace == namespace && r.owner.as_deref() == Some(owner))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.key.cmp(&b.key)));
        Ok(matching)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut records = self.records.write().await;
        Ok(records
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    async fn delete_by_owner(&self, namespace: &str, owner: &str) -> Result<u64> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !(r.namespace == namespace && r.owner.as_deref() == Some(owner)));
        Ok((before - records.len()) as u64)
    }
}
