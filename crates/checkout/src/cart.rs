//! Cart aggregation with optimistic local updates.

use common::{CartId, CartItemId, ClientId, prefixes};
use domain::{Cart, CartItem};
use local_store::{LocalStore, LocalStoreExt, Revision, SaveOptions};

use crate::error::{CheckoutError, Result};
use crate::keys::{IntentKeys, add_item_intent};
use crate::services::CartService;
use crate::stores::CART_STORE;

/// Keeps the client's cart in the local store and mirrors changes to the
/// remote cart backend.
///
/// Adds are applied locally first so the cart survives a reload, then sent
/// to the backend; a backend failure rolls the local append back.
pub struct CartAggregator<C, S>
where
    C: CartService,
    S: LocalStore,
{
    remote: C,
    store: S,
    keys: IntentKeys<S>,
}

impl<C, S> CartAggregator<C, S>
where
    C: CartService,
    S: LocalStore + Clone,
{
    /// Creates a new cart aggregator.
    pub fn new(remote: C, store: S) -> Self {
        let keys = IntentKeys::new(store.clone());
        Self {
            remote,
            store,
            keys,
        }
    }

    /// Returns the client's active cart, if one was created.
    pub async fn find_cart(&self, client_id: &ClientId) -> Result<Option<(Cart, Revision)>> {
        let records = self
            .store
            .list_by_owner(CART_STORE, client_id.as_str())
            .await?;
        // One active cart per client by convention; the newest wins.
        match records.last() {
            Some(record) => Ok(Some((record.decode()?, record.revision))),
            None => Ok(None),
        }
    }

    /// Returns the client's cart, or an empty unsaved one.
    pub async fn get_cart(&self, client_id: &ClientId) -> Result<Cart> {
        Ok(self
            .find_cart(client_id)
            .await?
            .map(|(cart, _)| cart)
            .unwrap_or_else(|| Cart::new(client_id.clone())))
    }

    /// Loads a cart by id.
    pub async fn load_cart(&self, cart_id: CartId) -> Result<Option<Cart>> {
        let loaded: Option<(Cart, _)> = self
            .store
            .load_state(CART_STORE, &cart_id.to_string())
            .await?;
        Ok(loaded.map(|(cart, _)| cart))
    }

    /// Appends an item to the client's cart, creating the cart on first use.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.id, kind = %item.kind))]
    pub async fn add_item(&self, client_id: &ClientId, item: CartItem) -> Result<Cart> {
        let (mut cart, revision) = self
            .find_cart(client_id)
            .await?
            .unwrap_or_else(|| (Cart::new(client_id.clone()), Revision::initial()));

        cart.add_item(item.clone())?;
        self.save(&cart, revision).await?;

        let intent = add_item_intent(client_id, item.kind, &item.ref_id);
        let key = self
            .keys
            .key_for(client_id, &intent, prefixes::CART_ITEM)
            .await?;

        match self.remote.add_item(client_id, cart.id, &item, &key).await {
            Ok(()) => {
                self.keys.settle(&intent).await?;
                tracing::info!(cart_id = %cart.id, total = %cart.total(), "item added to cart");
                Ok(cart)
            }
            Err(e) => {
                tracing::warn!(error = %e, cart_id = %cart.id, "cart backend rejected item, rolling back");
                self.rollback_add(cart.id, item.id).await?;
                if !e.is_transient() {
                    self.keys.settle(&intent).await?;
                }
                Err(e.into())
            }
        }
    }

    /// Removes an item from a cart. Removing an absent item is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<Option<Cart>> {
        let loaded: Option<(Cart, Revision)> = self
            .store
            .load_state(CART_STORE, &cart_id.to_string())
            .await?;
        let Some((mut cart, revision)) = loaded else {
            return Ok(None);
        };

        let removed = cart.remove_item(&item_id);
        if removed.is_none() {
            return Ok(Some(cart));
        }
        let revision = self.save(&cart, revision).await?;

        if let Err(e) = self.remote.remove_item(cart_id, item_id).await {
            tracing::warn!(error = %e, %cart_id, "cart backend failed to remove item, restoring");
            if let Some(item) = removed {
                cart.add_item(item)?;
                self.save(&cart, revision).await?;
            }
            return Err(e.into());
        }

        Ok(Some(cart))
    }

    /// Removes the items of a checked-out cart snapshot, keeping anything
    /// added to the cart since. The cart record goes away once empty.
    #[tracing::instrument(skip(self, snapshot), fields(cart_id = %snapshot.id))]
    pub async fn remove_checked_out(&self, snapshot: &Cart) -> Result<()> {
        let loaded: Option<(Cart, Revision)> = self
            .store
            .load_state(CART_STORE, &snapshot.id.to_string())
            .await?;
        let Some((mut cart, revision)) = loaded else {
            return Ok(());
        };

        for item in &snapshot.items {
            self.remote.remove_item(cart.id, item.id).await?;
            cart.remove_item(&item.id);
        }
        if cart.is_empty() {
            self.store.delete(CART_STORE, &cart.id.to_string()).await?;
        } else {
            self.save(&cart, revision).await?;
        }
        tracing::info!(
            removed = snapshot.items.len(),
            remaining = cart.items.len(),
            "checked-out items removed from cart"
        );
        Ok(())
    }

    /// Empties the client's cart locally and remotely.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, client_id: &ClientId) -> Result<()> {
        self.remote.clear(client_id).await?;
        let removed = self
            .store
            .delete_by_owner(CART_STORE, client_id.as_str())
            .await?;
        tracing::info!(removed, "cart cleared");
        Ok(())
    }

    async fn save(&self, cart: &Cart, revision: Revision) -> Result<Revision> {
        Ok(self
            .store
            .save_state(
                CART_STORE,
                &cart.id.to_string(),
                Some(cart.client_id.as_str()),
                cart,
                SaveOptions::expect_revision(revision),
            )
            .await?)
    }

    async fn rollback_add(&self, cart_id: CartId, item_id: CartItemId) -> Result<()> {
        let loaded: Option<(Cart, Revision)> = self
            .store
            .load_state(CART_STORE, &cart_id.to_string())
            .await?;
        let Some((mut cart, revision)) = loaded else {
            return Err(CheckoutError::not_found("cart", cart_id));
        };

        cart.remove_item(&item_id);
        if cart.is_empty() {
            self.store.delete(CART_STORE, &cart_id.to_string()).await?;
        } else {
            self.save(&cart, revision).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{CartError, Currency, ItemKind, Money};
    use local_store::InMemoryLocalStore;

    use super::*;
    use crate::error::RemoteError;
    use crate::services::InMemoryCartService;

    fn setup() -> (
        CartAggregator<InMemoryCartService, InMemoryLocalStore>,
        InMemoryCartService,
        InMemoryLocalStore,
    ) {
        let remote = InMemoryCartService::new();
        let store = InMemoryLocalStore::new();
        (
            CartAggregator::new(remote.clone(), store.clone()),
            remote,
            store,
        )
    }

    fn air(price: i64) -> CartItem {
        CartItem::new(ItemKind::Air, "FL-BOG-CTG", 1, Money::new(price), Currency::cop())
    }

    fn hotel(price: i64, qty: u32) -> CartItem {
        CartItem::new(ItemKind::Hotel, "HT-CTG-01", qty, Money::new(price), Currency::cop())
    }

    #[tokio::test]
    async fn test_add_creates_cart_lazily() {
        let (carts, remote, _) = setup();
        let client = ClientId::new("client-1");

        assert!(carts.find_cart(&client).await.unwrap().is_none());

        let cart = carts.add_item(&client, air(450_000)).await.unwrap();
        carts.add_item(&client, hotel(320_000, 2)).await.unwrap();

        let stored = carts.get_cart(&client).await.unwrap();
        assert_eq!(stored.id, cart.id);
        assert_eq!(stored.total(), Money::new(1_090_000));
        assert_eq!(remote.item_count(cart.id).await, 2);
    }

    #[tokio::test]
    async fn test_remote_rejection_rolls_back_append() {
        let (carts, remote, _) = setup();
        let client = ClientId::new("client-1");
        carts.add_item(&client, air(450_000)).await.unwrap();

        remote.set_reject_adds(Some("room no longer available")).await;
        let result = carts.add_item(&client, hotel(320_000, 2)).await;

        assert!(matches!(
            result,
            Err(CheckoutError::Remote(RemoteError::Client { .. }))
        ));
        let cart = carts.get_cart(&client).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.total(), Money::new(450_000));
    }

    #[tokio::test]
    async fn test_rollback_of_first_item_removes_cart() {
        let (carts, remote, store) = setup();
        let client = ClientId::new("client-1");
        remote.set_fail_adds(true).await;

        assert!(carts.add_item(&client, air(450_000)).await.is_err());
        assert!(carts.find_cart(&client).await.unwrap().is_none());
        assert_eq!(store.namespace_count(CART_STORE).await, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_intent_key_for_retry() {
        let (carts, remote, store) = setup();
        let client = ClientId::new("client-1");
        let keys = IntentKeys::new(store.clone());
        let intent = add_item_intent(&client, ItemKind::Air, "FL-BOG-CTG");

        remote.set_fail_adds(true).await;
        assert!(carts.add_item(&client, air(450_000)).await.is_err());
        assert!(keys.current(&intent).await.unwrap().is_some());

        // The retry builds a new line item for the same product.
        remote.set_fail_adds(false).await;
        let cart = carts.add_item(&client, air(450_000)).await.unwrap();

        assert!(keys.current(&intent).await.unwrap().is_none());
        assert_eq!(store.namespace_count(crate::stores::INTENT_STORE).await, 0);
        assert_eq!(remote.item_count(cart.id).await, 1);
    }

    #[tokio::test]
    async fn test_invariant_violation_is_not_sent_remotely() {
        let (carts, remote, _) = setup();
        let client = ClientId::new("client-1");
        carts.add_item(&client, air(450_000)).await.unwrap();

        let usd = CartItem::new(
            ItemKind::Hotel,
            "HT-MIA",
            1,
            Money::new(100),
            Currency::new("USD").unwrap(),
        );
        let result = carts.add_item(&client, usd).await;

        assert!(matches!(
            result,
            Err(CheckoutError::Cart(CartError::CurrencyMismatch { .. }))
        ));
        assert_eq!(remote.add_calls().await, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (carts, _, _) = setup();
        let client = ClientId::new("client-1");
        let item = air(450_000);
        let item_id = item.id;
        let cart = carts.add_item(&client, item).await.unwrap();

        let after = carts.remove_item(cart.id, item_id).await.unwrap().unwrap();
        assert!(after.is_empty());
        let again = carts.remove_item(cart.id, item_id).await.unwrap().unwrap();
        assert!(again.is_empty());

        assert!(
            carts
                .remove_item(CartId::new(), item_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_remove_checked_out_keeps_later_items() {
        let (carts, remote, _) = setup();
        let client = ClientId::new("client-1");
        carts.add_item(&client, air(450_000)).await.unwrap();
        let snapshot = carts.add_item(&client, hotel(320_000, 2)).await.unwrap();
        let later = hotel(280_000, 1);
        let later_id = later.id;
        carts.add_item(&client, later).await.unwrap();

        carts.remove_checked_out(&snapshot).await.unwrap();

        let cart = carts.get_cart(&client).await.unwrap();
        assert_eq!(cart.id, snapshot.id);
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].id, later_id);
        assert_eq!(remote.item_count(cart.id).await, 1);

        carts.remove_checked_out(&cart).await.unwrap();
        assert!(carts.find_cart(&client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (carts, remote, _) = setup();
        let client = ClientId::new("client-1");
        let cart = carts.add_item(&client, air(450_000)).await.unwrap();

        carts.clear(&client).await.unwrap();
        carts.clear(&client).await.unwrap();

        assert!(carts.find_cart(&client).await.unwrap().is_none());
        assert_eq!(remote.item_count(cart.id).await, 0);
    }
}
