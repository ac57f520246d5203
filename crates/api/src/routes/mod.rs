//! HTTP route handlers.

pub mod bookings;
pub mod carts;
pub mod checkout;
pub mod health;
pub mod metrics;
pub mod notifications;
pub mod payments;
