//! Fixed store names used in the local store.

/// Carts, keyed by cart id, owned by the client.
pub const CART_STORE: &str = "travel-cart";

/// Pending bookings, keyed by booking id, owned by the client.
pub const BOOKING_STORE: &str = "travel-bookings";

/// Checkout sessions, keyed by the checkout idempotency key.
pub const SESSION_STORE: &str = "checkout-sessions";

/// Payment attempt id to checkout session key.
pub const ATTEMPT_INDEX: &str = "payment-attempts";

/// Idempotency keys of intents that have not settled yet.
pub const INTENT_STORE: &str = "idempotency-intents";
