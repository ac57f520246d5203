//! Domain model for the travel checkout.
//!
//! This crate holds the pure parts of checkout-to-confirmation:
//! - Money and currency value objects
//! - Cart with its single-currency and positive-price invariants
//! - Payment attempt and booking confirmation state machines
//! - The canonical bank outcome and the authoritative reservation shape
//!
//! Nothing here performs I/O.

pub mod booking;
pub mod cart;
pub mod money;
pub mod outcome;
pub mod payment;
pub mod reservation;

pub use booking::{
    BookingEvent, BookingTransitionError, ConfirmationState, ConfirmationStatus, PartitionStatus,
    PendingBooking,
};
pub use cart::{BookingMetadata, Cart, CartError, CartItem, CartTotals, ItemKind, Passenger};
pub use money::{Currency, CurrencyError, Money};
pub use outcome::{BankStatus, InterpretedOutcome, OutcomeSource, PaymentOutcome};
pub use payment::{PaymentAttempt, PaymentAttemptState, PaymentEvent, PaymentTransitionError};
pub use reservation::{Reservation, ReservationBooking, ReservationBookingState};
