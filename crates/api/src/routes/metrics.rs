//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Registers descriptions for the checkout metrics.
pub fn describe() {
    metrics::describe_counter!("checkout_initiated_total", "Payment attempts created");
    metrics::describe_counter!(
        "checkout_failed_total",
        "Checkouts the payment gateway refused"
    );
    metrics::describe_counter!(
        "payment_outcomes_total",
        "Bank outcomes interpreted, by status and source"
    );
    metrics::describe_counter!(
        "booking_confirmations_total",
        "Provider confirmation calls, by kind and result"
    );
    metrics::describe_histogram!(
        "booking_confirmation_duration_seconds",
        metrics::Unit::Seconds,
        "Latency of provider confirmation calls"
    );
    metrics::describe_counter!(
        "reservations_reconciled_total",
        "Reconciliations that replaced local bookings"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        handle.render(),
    )
}
