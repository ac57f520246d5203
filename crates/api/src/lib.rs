//! HTTP API server with observability for the travel checkout.
//!
//! Provides REST endpoints for carts, checkout, bank responses and
//! bookings, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use local_store::LocalStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LocalStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/clients/{client_id}/cart",
            get(routes::carts::get::<S>).delete(routes::carts::clear::<S>),
        )
        .route(
            "/clients/{client_id}/cart/items",
            post(routes::carts::add_item::<S>),
        )
        .route(
            "/carts/{cart_id}/items/{item_id}",
            delete(routes::carts::remove_item::<S>),
        )
        .route("/checkout", post(routes::checkout::initiate::<S>))
        .route(
            "/checkout/{idempotency_key}",
            get(routes::checkout::resume::<S>),
        )
        .route("/payments/return", get(routes::payments::redirect::<S>))
        .route(
            "/payments/notifications",
            post(routes::payments::notification::<S>),
        )
        .route(
            "/payments/{payment_attempt_id}",
            get(routes::payments::status::<S>),
        )
        .route(
            "/clients/{client_id}/bookings",
            get(routes::bookings::list::<S>),
        )
        .route(
            "/clients/{client_id}/bookings/{booking_id}/cancel",
            post(routes::bookings::cancel::<S>),
        )
        .route(
            "/clients/{client_id}/notifications",
            get(routes::notifications::list::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state with in-memory external services.
pub fn create_default_state<S: LocalStore + Clone + 'static>(
    store: S,
    config: Config,
) -> Arc<AppState<S>> {
    Arc::new(AppState::new(store, config))
}
