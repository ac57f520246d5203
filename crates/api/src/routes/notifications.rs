//! Customer notification feed.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use checkout::Notification;
use common::ClientId;
use local_store::LocalStore;

use crate::state::AppState;

/// GET /clients/{client_id}/notifications: oldest first.
pub async fn list<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(client_id): Path<String>,
) -> Json<Vec<Notification>> {
    Json(state.notifier.for_client(&ClientId::new(client_id)).await)
}
