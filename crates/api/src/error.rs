//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::{CheckoutError, RemoteError};
use local_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout operation error; carries not-found and internal failures.
    Checkout(CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    let status = match &err {
        CheckoutError::Validation(_) | CheckoutError::InvalidKey(_) | CheckoutError::Cart(_) => {
            StatusCode::BAD_REQUEST
        }
        CheckoutError::NotFound { .. } => StatusCode::NOT_FOUND,
        CheckoutError::PaymentTransition(_)
        | CheckoutError::BookingTransition(_)
        | CheckoutError::KeyReuse { .. }
        | CheckoutError::NoExternalBookingId(_)
        | CheckoutError::Store(StoreError::RevisionConflict { .. }) => StatusCode::CONFLICT,
        CheckoutError::Remote(RemoteError::Client { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::Remote(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}
