//! Bank response endpoints and payment status.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use checkout::{NotificationPayload, OutcomeReport, PaymentStatusView, RedirectParams};
use local_store::LocalStore;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /payments/return: the customer's browser coming back from the bank.
#[tracing::instrument(skip(state, params))]
pub async fn redirect<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<RedirectParams>,
) -> Result<Json<OutcomeReport>, ApiError> {
    let report = state.coordinator.handle_redirect(&params).await?;
    Ok(Json(report))
}

/// POST /payments/notifications: the bank's server-to-server result.
#[tracing::instrument(skip(state, payload))]
pub async fn notification<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(payload): Json<NotificationPayload>,
) -> Result<Json<OutcomeReport>, ApiError> {
    let report = state.coordinator.handle_notification(&payload).await?;
    Ok(Json(report))
}

/// GET /payments/{payment_attempt_id}
#[tracing::instrument(skip(state))]
pub async fn status<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(payment_attempt_id): Path<String>,
) -> Result<Json<PaymentStatusView>, ApiError> {
    let view = state.coordinator.payment_status(&payment_attempt_id).await?;
    Ok(Json(view))
}
