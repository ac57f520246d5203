//! Shared types for the travel checkout service.

pub mod idempotency;
pub mod types;

pub use idempotency::{IdempotencyKey, IdempotencyKeyError, prefixes};
pub use types::{BookingId, CartId, CartItemId, ClientId, PaymentAttemptId, ReservationId};
