//! Checkout endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use checkout::{CheckoutReceipt, CheckoutRequest, CheckoutSession};
use common::{CartId, ClientId, IdempotencyKey};
use domain::Currency;
use local_store::LocalStore;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Header a caller may use to supply its own idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Deserialize)]
pub struct InitiateCheckoutRequest {
    pub client_id: String,
    pub cart_id: String,
    pub currency: String,
    pub description: String,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

/// POST /checkout: create the payment attempt for a cart.
///
/// Without an `Idempotency-Key` header the key is derived from the client
/// and cart, so a resubmitted form replays the same attempt.
#[tracing::instrument(skip(state, headers, req), fields(client_id = %req.client_id, cart_id = %req.cart_id))]
pub async fn initiate<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<InitiateCheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let cart_id = CartId::parse(&req.cart_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid cart_id: {e}")))?;
    let currency = Currency::new(&req.currency).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let client_id = ClientId::new(req.client_id);

    let initiator = state.coordinator.initiator();
    let key = match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| ApiError::BadRequest("Idempotency-Key must be ASCII".to_string()))?;
            IdempotencyKey::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))?
        }
        None => initiator.checkout_key(&client_id, cart_id).await?,
    };

    let request = CheckoutRequest {
        client_id,
        currency,
        cart_id,
        description: req.description,
        return_url: req
            .return_url
            .unwrap_or_else(|| state.config.return_url()),
        callback_url: req
            .callback_url
            .unwrap_or_else(|| state.config.notification_url()),
        customer_name: req.customer_name,
    };

    let receipt = initiator.initiate(request, key).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /checkout/{idempotency_key}: the session stored under a key,
/// finished first if it was interrupted.
#[tracing::instrument(skip(state))]
pub async fn resume<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(idempotency_key): Path<String>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let key =
        IdempotencyKey::parse(&idempotency_key).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let session = state.coordinator.initiator().resume(&key).await?;
    Ok(Json(session))
}
