//! Checkout error types.

use common::IdempotencyKeyError;
use domain::{BookingTransitionError, CartError, PaymentTransitionError};
use local_store::StoreError;
use thiserror::Error;

/// Error returned by an external service call.
///
/// Client errors mean the request itself is wrong and must not be retried
/// as-is. Server and network errors are transient: the same request may be
/// retried with the same idempotency key.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The service rejected the request (4xx).
    #[error("Request rejected with status {status}: {message}")]
    Client {
        status: u16,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The service failed while handling the request (5xx).
    #[error("Service failed with status {status}: {message}")]
    Server { status: u16, message: String },

    /// The service could not be reached.
    #[error("Network error: {0}")]
    Network(String),
}

impl RemoteError {
    /// Classifies an HTTP status into a client or server error.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        if (400..500).contains(&status) {
            RemoteError::Client {
                status,
                message: message.into(),
                data,
            }
        } else {
            RemoteError::Server {
                status,
                message: message.into(),
            }
        }
    }

    /// Returns true if retrying with the same idempotency key is safe and useful.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RemoteError::Client { .. })
    }
}

/// Errors that can occur during checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request is malformed; retrying it unchanged will not help.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An external service call failed.
    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// A cart invariant was violated.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// A payment attempt rejected a transition.
    #[error("{0}")]
    PaymentTransition(#[from] PaymentTransitionError),

    /// A booking rejected a transition.
    #[error("{0}")]
    BookingTransition(#[from] BookingTransitionError),

    /// The same idempotency key was presented for a different request.
    #[error("Idempotency key {key} was already used for a different request")]
    KeyReuse { key: String },

    /// A caller-supplied idempotency key is malformed.
    #[error("Invalid idempotency key: {0}")]
    InvalidKey(#[from] IdempotencyKeyError),

    /// The booking has no provider-side id, so the provider cannot cancel it.
    #[error("Booking {0} has no external booking id yet")]
    NoExternalBookingId(String),

    /// Local store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CheckoutError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CheckoutError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
