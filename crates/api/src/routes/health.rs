//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use local_store::LocalStore;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// `postgres` or `memory`.
    pub store: &'static str,
}

/// GET /health: returns service health and the local store in use.
pub async fn check<S: LocalStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let store = if state.config.database_url.is_some() {
        "postgres"
    } else {
        "memory"
    };
    Json(HealthResponse {
        status: "ok",
        store,
    })
}
