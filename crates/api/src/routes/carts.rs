//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{CartId, CartItemId, ClientId};
use domain::{BookingMetadata, Cart, CartItem, CartTotals, Currency, ItemKind, Money};
use local_store::LocalStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub kind: ItemKind,
    pub ref_id: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: Option<BookingMetadata>,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub cart: Cart,
    pub totals: CartTotals,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        let totals = cart.totals();
        Self { cart, totals }
    }
}

// -- Handlers --

/// GET /clients/{client_id}/cart: the client's cart with totals.
#[tracing::instrument(skip(state))]
pub async fn get<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(client_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state
        .coordinator
        .carts()
        .get_cart(&ClientId::new(client_id))
        .await?;
    Ok(Json(cart.into()))
}

/// POST /clients/{client_id}/cart/items: append an item.
#[tracing::instrument(skip(state, req), fields(kind = %req.kind, ref_id = %req.ref_id))]
pub async fn add_item<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(client_id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CartResponse>), ApiError> {
    let currency = Currency::new(&req.currency)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let mut item = CartItem::new(
        req.kind,
        req.ref_id,
        req.quantity,
        Money::new(req.unit_price),
        currency,
    );
    if let Some(metadata) = req.metadata {
        item = item.with_metadata(metadata);
    }

    let cart = state
        .coordinator
        .carts()
        .add_item(&ClientId::new(client_id), item)
        .await?;
    Ok((StatusCode::CREATED, Json(cart.into())))
}

/// DELETE /carts/{cart_id}/items/{item_id}: remove an item.
///
/// Responds 204 when the cart does not exist.
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((cart_id, item_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let cart_id = CartId::parse(&cart_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid cart_id: {e}")))?;
    let item_id = CartItemId::parse(&item_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid item_id: {e}")))?;

    match state
        .coordinator
        .carts()
        .remove_item(cart_id, item_id)
        .await?
    {
        Some(cart) => Ok(Json(CartResponse::from(cart)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// DELETE /clients/{client_id}/cart: empty the cart.
#[tracing::instrument(skip(state))]
pub async fn clear<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(client_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .carts()
        .clear(&ClientId::new(client_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
