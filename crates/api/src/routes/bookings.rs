//! Booking list and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use checkout::{CancellationReceipt, ReconciledBookings};
use common::ClientId;
use local_store::LocalStore;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CancelBookingRequest {
    #[serde(default)]
    pub reason: String,
}

/// GET /clients/{client_id}/bookings: reconciled booking list.
#[tracing::instrument(skip(state))]
pub async fn list<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(client_id): Path<String>,
) -> Result<Json<ReconciledBookings>, ApiError> {
    let bookings = state
        .coordinator
        .reconciler()
        .reconcile(&ClientId::new(client_id))
        .await?;
    Ok(Json(bookings))
}

/// POST /clients/{client_id}/bookings/{booking_id}/cancel
///
/// The body is optional; without a reason a default one is sent.
#[tracing::instrument(skip(state, body))]
pub async fn cancel<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((client_id, booking_id)): Path<(String, String)>,
    body: Option<Json<CancelBookingRequest>>,
) -> Result<Json<CancellationReceipt>, ApiError> {
    let reason = body.map(|Json(req)| req.reason).unwrap_or_default();
    let receipt = state
        .coordinator
        .reconciler()
        .cancel_booking(&ClientId::new(client_id), &booking_id, &reason)
        .await?;
    Ok(Json(receipt))
}
