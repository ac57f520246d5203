//! Cart and cart line items.

use std::collections::HashMap;

use chrono::NaiveDate;
use common::{CartId, CartItemId, ClientId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Currency, Money};

/// What a cart line books.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemKind {
    /// A flight leg.
    Air,
    /// A hotel room.
    Hotel,
}

impl ItemKind {
    /// Returns the kind name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Air => "AIR",
            ItemKind::Hotel => "HOTEL",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A traveller on a flight booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passenger {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// Provider-specific parameters needed later to confirm a booking.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BookingMetadata {
    /// Reservation id the provider assigned when the item was held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_reservation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passengers: Vec<Passenger>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,

    /// Anything else the provider handed us, kept verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A priced line item in a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub kind: ItemKind,
    /// Catalog identifier of the flight or hotel product.
    pub ref_id: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub currency: Currency,
    #[serde(default)]
    pub metadata: BookingMetadata,
}

impl CartItem {
    /// Creates a new line item with a fresh id and empty metadata.
    pub fn new(
        kind: ItemKind,
        ref_id: impl Into<String>,
        quantity: u32,
        unit_price: Money,
        currency: Currency,
    ) -> Self {
        Self {
            id: CartItemId::new(),
            kind,
            ref_id: ref_id.into(),
            quantity,
            unit_price,
            currency,
            metadata: BookingMetadata::default(),
        }
    }

    /// Attaches provider booking parameters.
    pub fn with_metadata(mut self, metadata: BookingMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns `unit_price * quantity`.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Errors raised by cart invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Invalid quantity for item {item_id}: quantity must be positive")]
    InvalidQuantity { item_id: CartItemId },

    #[error("Invalid price for item {item_id}: price must be positive")]
    InvalidPrice { item_id: CartItemId },

    #[error("Currency mismatch: cart is in {expected}, item is in {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    #[error("Item {0} is already in the cart")]
    DuplicateItem(CartItemId),

    #[error("Cart has no items")]
    Empty,
}

/// Totals for display, grouped by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartTotals {
    pub currency: Option<Currency>,
    pub flights: Money,
    pub hotels: Money,
    pub total: Money,
}

/// A client's cart.
///
/// All items share one currency; the currency is fixed by the first item
/// and released again once the cart is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub client_id: ClientId,
    pub items: Vec<CartItem>,
    pub currency: Option<Currency>,
}

impl Cart {
    /// Creates an empty cart for a client.
    pub fn new(client_id: ClientId) -> Self {
        Self {
            id: CartId::new(),
            client_id,
            items: Vec::new(),
            currency: None,
        }
    }

    /// Appends an item after checking the cart invariants.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 {
            return Err(CartError::InvalidQuantity { item_id: item.id });
        }
        if !item.unit_price.is_positive() {
            return Err(CartError::InvalidPrice { item_id: item.id });
        }
        if let Some(ref currency) = self.currency
            && *currency != item.currency
        {
            return Err(CartError::CurrencyMismatch {
                expected: currency.clone(),
                found: item.currency.clone(),
            });
        }
        if self.contains(&item.id) {
            return Err(CartError::DuplicateItem(item.id));
        }

        self.currency = Some(item.currency.clone());
        self.items.push(item);
        Ok(())
    }

    /// Removes an item. Removing an absent item is not an error.
    pub fn remove_item(&mut self, item_id: &CartItemId) -> Option<CartItem> {
        let position = self.items.iter().position(|i| &i.id == item_id)?;
        let removed = self.items.remove(position);
        if self.items.is_empty() {
            self.currency = None;
        }
        Some(removed)
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        self.items.clear();
        self.currency = None;
    }

    /// Returns true if the cart holds the item.
    pub fn contains(&self, item_id: &CartItemId) -> bool {
        self.items.iter().any(|i| &i.id == item_id)
    }

    /// Returns true if the cart has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates the items of one kind, in insertion order.
    pub fn items_of_kind(&self, kind: ItemKind) -> impl Iterator<Item = &CartItem> {
        self.items.iter().filter(move |i| i.kind == kind)
    }

    /// Sum of `unit_price * quantity` over all items.
    pub fn total(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Totals grouped by kind.
    pub fn totals(&self) -> CartTotals {
        let flights = self.items_of_kind(ItemKind::Air).map(CartItem::line_total).sum();
        let hotels = self
            .items_of_kind(ItemKind::Hotel)
            .map(CartItem::line_total)
            .sum();
        CartTotals {
            currency: self.currency.clone(),
            flights,
            hotels,
            total: self.total(),
        }
    }
}
