//! Checkout-to-confirmation orchestration for the travel storefront.
//!
//! The flow runs through these components:
//! 1. `CartAggregator` keeps the client's cart
//! 2. `CheckoutInitiator` turns it into one payment attempt per idempotency key
//! 3. `PaymentResponseInterpreter` normalizes the bank redirect or notification
//! 4. `BookingConfirmationOrchestrator` confirms flights and hotels after approval
//! 5. `ReservationReconciler` swaps local bookings for authoritative reservations
//!
//! `CheckoutCoordinator` wires them together. External systems sit behind
//! the traits in [`services`].

pub mod cart;
pub mod coordinator;
pub mod error;
pub mod initiator;
pub mod interpreter;
pub mod keys;
pub mod orchestrator;
pub mod reconciler;
pub mod services;
pub mod session;
pub mod stores;

pub use cart::CartAggregator;
pub use coordinator::{CheckoutCoordinator, OutcomeReport, PaymentStatusView};
pub use error::{CheckoutError, RemoteError, Result};
pub use initiator::{CheckoutInitiator, CheckoutReceipt, CheckoutRequest};
pub use interpreter::{NotificationPayload, PaymentResponseInterpreter, RedirectParams};
pub use keys::IntentKeys;
pub use orchestrator::{BookingConfirmationOrchestrator, ConfirmationReport};
pub use reconciler::{
    BookingSource, BookingView, CancellationReceipt, ReconciledBookings, ReservationReconciler,
};
pub use services::{
    BookingProvider, CancelRequest, CartService, ConfirmReceipt, ConfirmRequest,
    InMemoryBookingProvider, InMemoryCartService, InMemoryNotifier, InMemoryPaymentGateway,
    InMemoryReservationService, Notification, NotificationLevel, Notifier, PaymentGateway,
    PaymentInitiation, PaymentRequest, ReservationService,
};
pub use session::{CheckoutSession, SessionRepository, SessionStatus};
