//! External service traits and in-memory implementations.

pub mod cart;
pub mod gateway;
pub mod notifier;
pub mod provider;
pub mod reservations;

pub use cart::{CartService, InMemoryCartService};
pub use gateway::{InMemoryPaymentGateway, PaymentGateway, PaymentInitiation, PaymentRequest};
pub use notifier::{InMemoryNotifier, Notification, NotificationLevel, Notifier};
pub use provider::{
    BookingProvider, CancelRequest, ConfirmReceipt, ConfirmRequest, InMemoryBookingProvider,
};
pub use reservations::{InMemoryReservationService, ReservationService};
