//! Pending bookings awaiting provider confirmation.

use chrono::{DateTime, Utc};
use common::{BookingId, CartItemId, ClientId, IdempotencyKey, PaymentAttemptId, ReservationId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CartItem, ItemKind, Money};

/// Confirmation state of a single booking.
///
/// State transitions:
/// ```text
/// Pending ──► Confirming ──┬──► Confirmed
///                          └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationState {
    /// Waiting for an approved payment.
    #[default]
    Pending,

    /// Provider call issued, no answer recorded yet.
    Confirming,

    /// Provider confirmed the booking (terminal).
    Confirmed,

    /// Provider refused or could not be reached (terminal).
    Failed,
}

impl ConfirmationState {
    /// Returns true if a confirmation call may be issued from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, ConfirmationState::Pending)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConfirmationState::Confirmed | ConfirmationState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationState::Pending => "PENDING",
            ConfirmationState::Confirming => "CONFIRMING",
            ConfirmationState::Confirmed => "CONFIRMED",
            ConfirmationState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ConfirmationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Something that happened to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingEvent {
    ConfirmationStarted,
    ProviderConfirmed,
    ProviderFailed,
}

/// Error returned for a transition the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid booking transition: cannot apply {event:?} in state {from}")]
pub struct BookingTransitionError {
    pub from: ConfirmationState,
    pub event: BookingEvent,
}

/// Pure transition function for booking confirmation.
pub fn transition(
    state: ConfirmationState,
    event: BookingEvent,
) -> Result<ConfirmationState, BookingTransitionError> {
    match (state, event) {
        (ConfirmationState::Pending, BookingEvent::ConfirmationStarted) => {
            Ok(ConfirmationState::Confirming)
        }
        (ConfirmationState::Confirming, BookingEvent::ProviderConfirmed) => {
            Ok(ConfirmationState::Confirmed)
        }
        (ConfirmationState::Confirming, BookingEvent::ProviderFailed) => {
            Ok(ConfirmationState::Failed)
        }
        (from, event) => Err(BookingTransitionError { from, event }),
    }
}

/// A flight or hotel line item awaiting confirmation with its provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBooking {
    pub id: BookingId,
    pub kind: ItemKind,
    pub client_id: ClientId,
    pub cart_item_id: CartItemId,
    pub payment_attempt_id: PaymentAttemptId,
    pub reservation_id: Option<ReservationId>,

    /// Catalog product id, used when the provider assigned no reservation id.
    pub product_ref_id: String,
    pub provider_reservation_id: Option<String>,
    pub amount: Money,

    pub confirmation_state: ConfirmationState,
    /// Key the confirm call was first issued with; reused on retry.
    pub confirmation_key: Option<IdempotencyKey>,
    /// Booking id the provider returned on confirmation.
    pub confirmed_id: Option<String>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingBooking {
    /// Creates the pending booking for one cart item of a checkout.
    pub fn from_cart_item(
        item: &CartItem,
        client_id: ClientId,
        payment_attempt_id: PaymentAttemptId,
        reservation_id: Option<ReservationId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BookingId::new(),
            kind: item.kind,
            client_id,
            cart_item_id: item.id,
            payment_attempt_id,
            reservation_id,
            product_ref_id: item.ref_id.clone(),
            provider_reservation_id: item.metadata.provider_reservation_id.clone(),
            amount: item.line_total(),
            confirmation_state: ConfirmationState::Pending,
            confirmation_key: None,
            confirmed_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identifier the provider knows this booking by.
    ///
    /// Prefers the provider reservation id, falls back to the product id.
    pub fn external_ref_id(&self) -> &str {
        self.provider_reservation_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.product_ref_id)
    }

    /// Applies an event, moving the booking to its next state.
    pub fn apply(&mut self, event: BookingEvent) -> Result<ConfirmationState, BookingTransitionError> {
        let next = transition(self.confirmation_state, event)?;
        self.confirmation_state = next;
        self.updated_at = Utc::now();
        Ok(next)
    }

    /// Records a successful provider confirmation.
    pub fn mark_confirmed(
        &mut self,
        confirmed_id: Option<String>,
    ) -> Result<(), BookingTransitionError> {
        self.apply(BookingEvent::ProviderConfirmed)?;
        self.confirmed_id = confirmed_id;
        self.last_error = None;
        Ok(())
    }

    /// Records a failed provider confirmation.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), BookingTransitionError> {
        self.apply(BookingEvent::ProviderFailed)?;
        self.last_error = Some(reason.into());
        Ok(())
    }
}

/// Aggregate status of one partition (all flights, or all hotels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStatus {
    #[default]
    Pending,
    Success,
    Error,
}

impl PartitionStatus {
    /// Folds booking states into a partition status.
    ///
    /// Any failure makes the partition an error; otherwise any booking not yet
    /// confirmed keeps it pending. An empty partition is a success.
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = ConfirmationState>,
    {
        let mut status = PartitionStatus::Success;
        for state in states {
            match state {
                ConfirmationState::Failed => return PartitionStatus::Error,
                ConfirmationState::Pending | ConfirmationState::Confirming => {
                    status = PartitionStatus::Pending
                }
                ConfirmationState::Confirmed => {}
            }
        }
        status
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStatus::Pending => "pending",
            PartitionStatus::Success => "success",
            PartitionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confirmation summary shown to the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfirmationStatus {
    pub flights: PartitionStatus,
    pub hotels: PartitionStatus,
}

impl ConfirmationStatus {
    /// Summarizes a set of bookings of both kinds.
    pub fn from_bookings(bookings: &[PendingBooking]) -> Self {
        let states_of = |kind: ItemKind| {
            bookings
                .iter()
                .filter(move |b| b.kind == kind)
                .map(|b| b.confirmation_state)
        };
        Self {
            flights: PartitionStatus::from_states(states_of(ItemKind::Air)),
            hotels: PartitionStatus::from_states(states_of(ItemKind::Hotel)),
        }
    }

    /// Returns the status of one partition.
    pub fn for_kind(&self, kind: ItemKind) -> PartitionStatus {
        match kind {
            ItemKind::Air => self.flights,
            ItemKind::Hotel => self.hotels,
        }
    }

    /// Returns true if both partitions succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.flights == PartitionStatus::Success && self.hotels == PartitionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BookingMetadata, Currency};

    fn booking(kind: ItemKind) -> PendingBooking {
        let item = CartItem::new(kind, "PROD-1", 2, Money::new(320_000), Currency::cop());
        PendingBooking::from_cart_item(
            &item,
            ClientId::new("client-1"),
            PaymentAttemptId::new("REF1"),
            None,
        )
    }

    #[test]
    fn test_default_state_is_pending() {
        assert_eq!(ConfirmationState::default(), ConfirmationState::Pending);
    }

    #[test]
    fn test_transitions() {
        use super::BookingEvent::*;
        use super::ConfirmationState::*;

        assert_eq!(transition(Pending, ConfirmationStarted), Ok(Confirming));
        assert_eq!(transition(Confirming, ProviderConfirmed), Ok(Confirmed));
        assert_eq!(transition(Confirming, ProviderFailed), Ok(Failed));

        assert!(transition(Pending, ProviderConfirmed).is_err());
        assert!(transition(Confirming, ConfirmationStarted).is_err());
        for terminal in [Confirmed, Failed] {
            for event in [ConfirmationStarted, ProviderConfirmed, ProviderFailed] {
                assert!(transition(terminal, event).is_err());
            }
        }
    }

    #[test]
    fn test_from_cart_item_copies_line_details() {
        let booking = booking(ItemKind::Hotel);
        assert_eq!(booking.kind, ItemKind::Hotel);
        assert_eq!(booking.amount, Money::new(640_000));
        assert_eq!(booking.confirmation_state, ConfirmationState::Pending);
        assert!(booking.confirmation_key.is_none());
    }

    #[test]
    fn test_external_ref_prefers_provider_reservation() {
        let mut booking = booking(ItemKind::Air);
        assert_eq!(booking.external_ref_id(), "PROD-1");

        booking.provider_reservation_id = Some(String::new());
        assert_eq!(booking.external_ref_id(), "PROD-1");

        booking.provider_reservation_id = Some("PNR-9".to_string());
        assert_eq!(booking.external_ref_id(), "PNR-9");
    }

    #[test]
    fn test_external_ref_from_metadata() {
        let item = CartItem::new(ItemKind::Air, "FL-1", 1, Money::new(1), Currency::cop())
            .with_metadata(BookingMetadata {
                provider_reservation_id: Some("PNR-1".to_string()),
                ..Default::default()
            });
        let booking = PendingBooking::from_cart_item(
            &item,
            ClientId::new("c"),
            PaymentAttemptId::new("REF1"),
            None,
        );
        assert_eq!(booking.external_ref_id(), "PNR-1");
    }

    #[test]
    fn test_mark_confirmed_and_failed() {
        let mut ok = booking(ItemKind::Air);
        ok.apply(BookingEvent::ConfirmationStarted).unwrap();
        ok.mark_confirmed(Some("EXT-1".to_string())).unwrap();
        assert_eq!(ok.confirmation_state, ConfirmationState::Confirmed);
        assert_eq!(ok.confirmed_id.as_deref(), Some("EXT-1"));

        let mut failed = booking(ItemKind::Air);
        assert!(failed.mark_failed("not started").is_err());
        failed.apply(BookingEvent::ConfirmationStarted).unwrap();
        failed.mark_failed("seat no longer available").unwrap();
        assert_eq!(failed.confirmation_state, ConfirmationState::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("seat no longer available"));
    }

    #[test]
    fn test_partition_status() {
        use super::ConfirmationState::*;

        assert_eq!(
            PartitionStatus::from_states(std::iter::empty()),
            PartitionStatus::Success
        );
        assert_eq!(
            PartitionStatus::from_states([Confirmed, Confirmed]),
            PartitionStatus::Success
        );
        assert_eq!(
            PartitionStatus::from_states([Confirmed, Pending]),
            PartitionStatus::Pending
        );
        assert_eq!(
            PartitionStatus::from_states([Pending, Failed, Confirmed]),
            PartitionStatus::Error
        );
    }

    #[test]
    fn test_confirmation_status_from_bookings() {
        let mut flight_ok = booking(ItemKind::Air);
        flight_ok.apply(BookingEvent::ConfirmationStarted).unwrap();
        flight_ok.mark_confirmed(None).unwrap();

        let mut flight_bad = booking(ItemKind::Air);
        flight_bad.apply(BookingEvent::ConfirmationStarted).unwrap();
        flight_bad.mark_failed("boom").unwrap();

        let status = ConfirmationStatus::from_bookings(&[flight_ok, flight_bad]);
        assert_eq!(status.flights, PartitionStatus::Error);
        assert_eq!(status.hotels, PartitionStatus::Success);
        assert!(!status.all_succeeded());

        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json, serde_json::json!({ "flights": "error", "hotels": "success" }));
    }
}
