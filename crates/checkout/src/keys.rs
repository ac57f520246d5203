//! Remembers which idempotency key an in-flight intent was issued with.
//!
//! A retry of the same logical operation must reuse its key, while a fresh
//! user action must get a new one. Intents are named by what they act on
//! (`checkout:<cart id>`, `cancel:<external booking id>`, ...) and forgotten
//! once they settle.

use chrono::{DateTime, Utc};
use common::{CartId, ClientId, IdempotencyKey};
use domain::ItemKind;
use local_store::{LocalStore, LocalStoreExt, SaveOptions, StoreError};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stores::INTENT_STORE;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredIntent {
    key: IdempotencyKey,
    created_at: DateTime<Utc>,
}

/// Intent name for checking out a cart.
pub fn checkout_intent(cart_id: CartId) -> String {
    format!("checkout:{cart_id}")
}

/// Intent name for adding a product to a client's cart.
///
/// Named by product rather than by line item, so a retry that builds a new
/// line item for the same product still reuses the key.
pub fn add_item_intent(client_id: &ClientId, kind: ItemKind, ref_id: &str) -> String {
    format!("cart-add:{client_id}:{kind}:{ref_id}")
}

/// Intent name for cancelling a booking at its provider.
pub fn cancel_intent(external_booking_id: &str) -> String {
    format!("cancel:{external_booking_id}")
}

/// Persistent ledger of idempotency keys per intent.
#[derive(Clone)]
pub struct IntentKeys<S> {
    store: S,
}

impl<S: LocalStore> IntentKeys<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the key already issued for `intent`, or issues a new one.
    pub async fn key_for(
        &self,
        owner: &ClientId,
        intent: &str,
        prefix: &str,
    ) -> Result<IdempotencyKey> {
        if let Some(key) = self.current(intent).await? {
            return Ok(key);
        }

        let fresh = StoredIntent {
            key: IdempotencyKey::generate(prefix),
            created_at: Utc::now(),
        };
        match self
            .store
            .save_state(
                INTENT_STORE,
                intent,
                Some(owner.as_str()),
                &fresh,
                SaveOptions::expect_new(),
            )
            .await
        {
            Ok(_) => Ok(fresh.key),
            // Someone issued a key for this intent between our read and write.
            Err(StoreError::RevisionConflict { .. }) => match self.current(intent).await? {
                Some(key) => Ok(key),
                None => Ok(fresh.key),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the key issued for `intent`, if it has not settled.
    pub async fn current(&self, intent: &str) -> Result<Option<IdempotencyKey>> {
        let stored: Option<(StoredIntent, _)> = self.store.load_state(INTENT_STORE, intent).await?;
        Ok(stored.map(|(s, _)| s.key))
    }

    /// Forgets the key for `intent`; the next call issues a new one.
    pub async fn settle(&self, intent: &str) -> Result<()> {
        self.store.delete(INTENT_STORE, intent).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use local_store::InMemoryLocalStore;

    use super::*;

    #[tokio::test]
    async fn test_retry_reuses_key() {
        let keys = IntentKeys::new(InMemoryLocalStore::new());
        let owner = ClientId::new("client-1");
        let intent = checkout_intent(CartId::new());

        let first = keys.key_for(&owner, &intent, "checkout").await.unwrap();
        let retry = keys.key_for(&owner, &intent, "checkout").await.unwrap();

        assert_eq!(first, retry);
        assert!(first.has_prefix("checkout"));
    }

    #[tokio::test]
    async fn test_settled_intent_gets_fresh_key() {
        let keys = IntentKeys::new(InMemoryLocalStore::new());
        let owner = ClientId::new("client-1");
        let intent = cancel_intent("AV-0001");

        let first = keys.key_for(&owner, &intent, "booking-cancel").await.unwrap();
        keys.settle(&intent).await.unwrap();
        let second = keys.key_for(&owner, &intent, "booking-cancel").await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_distinct_intents_get_distinct_keys() {
        let keys = IntentKeys::new(InMemoryLocalStore::new());
        let owner = ClientId::new("client-1");

        let a = keys
            .key_for(&owner, &checkout_intent(CartId::new()), "checkout")
            .await
            .unwrap();
        let b = keys
            .key_for(&owner, &checkout_intent(CartId::new()), "checkout")
            .await
            .unwrap();

        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_settle_unknown_intent_is_ok() {
        let keys = IntentKeys::new(InMemoryLocalStore::new());
        keys.settle("checkout:nothing").await.unwrap();
        assert!(keys.current("checkout:nothing").await.unwrap().is_none());
    }
}
