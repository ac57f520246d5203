//! Remote cart backend trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::{CartId, CartItemId, ClientId, IdempotencyKey};
use domain::CartItem;
use tokio::sync::RwLock;

use crate::error::RemoteError;

/// Trait for the storefront's cart backend.
#[async_trait]
pub trait CartService: Send + Sync {
    /// Adds an item to the client's server-side cart.
    async fn add_item(
        &self,
        client_id: &ClientId,
        cart_id: CartId,
        item: &CartItem,
        key: &IdempotencyKey,
    ) -> Result<(), RemoteError>;

    /// Removes an item. Removing an absent item succeeds.
    async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<(), RemoteError>;

    /// Empties the client's cart.
    async fn clear(&self, client_id: &ClientId) -> Result<(), RemoteError>;
}

#[derive(Debug, Default)]
struct InMemoryCartState {
    items: HashMap<CartId, Vec<CartItemId>>,
    owners: HashMap<CartId, ClientId>,
    seen_keys: HashSet<IdempotencyKey>,
    add_calls: usize,
    reject_adds: Option<String>,
    fail_adds: bool,
    fail_clears: bool,
}

/// In-memory cart backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartService {
    state: Arc<RwLock<InMemoryCartState>>,
}

impl InMemoryCartService {
    /// Creates a new in-memory cart backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `add_item` fail with a 422 carrying `message`.
    pub async fn set_reject_adds(&self, message: Option<&str>) {
        self.state.write().await.reject_adds = message.map(str::to_string);
    }

    /// Makes `add_item` fail with a transient 503.
    pub async fn set_fail_adds(&self, fail: bool) {
        self.state.write().await.fail_adds = fail;
    }

    /// Makes `clear` fail with a transient 503.
    pub async fn set_fail_clears(&self, fail: bool) {
        self.state.write().await.fail_clears = fail;
    }

    /// Returns the number of items the backend holds for a cart.
    pub async fn item_count(&self, cart_id: CartId) -> usize {
        self.state
            .read()
            .await
            .items
            .get(&cart_id)
            .map_or(0, Vec::len)
    }

    /// Returns how many add calls reached the backend, including failed ones.
    pub async fn add_calls(&self) -> usize {
        self.state.read().await.add_calls
    }
}

#[async_trait]
impl CartService for InMemoryCartService {
    async fn add_item(
        &self,
        client_id: &ClientId,
        cart_id: CartId,
        item: &CartItem,
        key: &IdempotencyKey,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.write().await;
        state.add_calls += 1;

        if let Some(ref message) = state.reject_adds {
            return Err(RemoteError::Client {
                status: 422,
                message: message.clone(),
                data: None,
            });
        }
        if state.fail_adds {
            return Err(RemoteError::Server {
                status: 503,
                message: "cart backend unavailable".to_string(),
            });
        }
        if !state.seen_keys.insert(key.clone()) {
            return Ok(());
        }

        state.owners.insert(cart_id, client_id.clone());
        state.items.entry(cart_id).or_default().push(item.id);
        Ok(())
    }

    async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<(), RemoteError> {
        let mut state = self.state.write().await;
        if let Some(items) = state.items.get_mut(&cart_id) {
            items.retain(|id| *id != item_id);
        }
        Ok(())
    }

    async fn clear(&self, client_id: &ClientId) -> Result<(), RemoteError> {
        let mut state = self.state.write().await;
        if state.fail_clears {
            return Err(RemoteError::Server {
                status: 503,
                message: "cart backend unavailable".to_string(),
            });
        }

        let carts: Vec<CartId> = state
            .owners
            .iter()
            .filter(|(_, owner)| *owner == client_id)
            .map(|(id, _)| *id)
            .collect();
        for cart_id in carts {
            state.items.remove(&cart_id);
        }
        Ok(())
    }
}
