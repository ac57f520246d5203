//! Merges local optimistic bookings with authoritative reservations.

use std::collections::HashMap;

use common::{BookingId, ClientId, IdempotencyKey, PaymentAttemptId, ReservationId, prefixes};
use domain::{
    ConfirmationState, ItemKind, Money, PaymentAttemptState, PendingBooking,
    ReservationBookingState,
};
use local_store::LocalStore;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::keys::{IntentKeys, cancel_intent};
use crate::services::{
    BookingProvider, CancelRequest, Notification, NotificationLevel, Notifier, ReservationService,
};
use crate::session::{CheckoutSession, SessionRepository};
use crate::stores::BOOKING_STORE;

const CANCEL_ORIGIN: &str = "customer";
const DEFAULT_CANCEL_REASON: &str = "requested by customer";

/// Where a booking view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingSource {
    /// The reservation backend.
    Authoritative,
    /// This service's optimistic copy, kept until the backend catches up.
    Local,
}

/// One booking as shown to the customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingView {
    pub booking_id: String,
    pub kind: ItemKind,
    pub source: BookingSource,
    pub reservation_id: Option<ReservationId>,
    /// Id the provider knows the booking by, once confirmed.
    pub external_booking_id: Option<String>,
    pub product_ref_id: Option<String>,
    /// Set for authoritative bookings.
    pub reservation_state: Option<ReservationBookingState>,
    /// Set for local bookings.
    pub confirmation_state: Option<ConfirmationState>,
    pub amount: Option<Money>,
}

impl BookingView {
    fn local(booking: &PendingBooking) -> Self {
        Self {
            booking_id: booking.id.to_string(),
            kind: booking.kind,
            source: BookingSource::Local,
            reservation_id: booking.reservation_id.clone(),
            external_booking_id: booking.confirmed_id.clone(),
            product_ref_id: Some(booking.product_ref_id.clone()),
            reservation_state: None,
            confirmation_state: Some(booking.confirmation_state),
            amount: Some(booking.amount),
        }
    }
}

/// A client's merged booking list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledBookings {
    pub client_id: ClientId,
    /// True when the list comes from the reservation backend.
    pub authoritative: bool,
    /// True when the backend could not be reached and local copies are shown.
    pub stale: bool,
    pub bookings: Vec<BookingView>,
}

/// What a successful cancellation targeted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationReceipt {
    pub booking_id: String,
    pub kind: ItemKind,
    pub external_booking_id: String,
    pub reservation_id: Option<ReservationId>,
    pub idempotency_key: IdempotencyKey,
}

/// Reconciles bookings and issues explicit cancellations.
///
/// Once the backend returns any reservation for a client only authoritative
/// bookings are shown. Local records of checkouts that are still open stay
/// stored until their confirmation finishes.
pub struct ReservationReconciler<R, F, H, S, N>
where
    R: ReservationService,
    F: BookingProvider,
    H: BookingProvider,
    S: LocalStore,
    N: Notifier,
{
    reservations: R,
    flights: F,
    hotels: H,
    store: S,
    sessions: SessionRepository<S>,
    keys: IntentKeys<S>,
    notifier: N,
}

impl<R, F, H, S, N> ReservationReconciler<R, F, H, S, N>
where
    R: ReservationService,
    F: BookingProvider,
    H: BookingProvider,
    S: LocalStore + Clone,
    N: Notifier,
{
    /// Creates a new reconciler.
    pub fn new(reservations: R, flights: F, hotels: H, store: S, notifier: N) -> Self {
        Self {
            reservations,
            flights,
            hotels,
            sessions: SessionRepository::new(store.clone()),
            keys: IntentKeys::new(store.clone()),
            store,
            notifier,
        }
    }

    /// Returns the client's bookings, authoritative when available.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, client_id: &ClientId) -> Result<ReconciledBookings> {
        let (reservations, stale) = match self.reservations.reservations_for_client(client_id).await {
            Ok(reservations) => (reservations, false),
            Err(e) => {
                tracing::warn!(error = %e, "reservation backend unavailable, showing local bookings");
                (Vec::new(), true)
            }
        };

        let covered = !reservations.is_empty();
        let local = self.sessions.bookings_for_client(client_id).await?;
        let local = self.retire_superseded(local, covered).await?;

        if !covered {
            return Ok(ReconciledBookings {
                client_id: client_id.clone(),
                authoritative: false,
                stale,
                bookings: local.iter().map(BookingView::local).collect(),
            });
        }

        if !local.is_empty() {
            tracing::debug!(in_flight = local.len(), "keeping local bookings of open checkouts");
        }
        metrics::counter!("reservations_reconciled_total").increment(1);

        let bookings = reservations
            .iter()
            .flat_map(|reservation| {
                reservation.bookings().map(move |(kind, booking)| BookingView {
                    booking_id: booking.id.clone(),
                    kind,
                    source: BookingSource::Authoritative,
                    reservation_id: Some(reservation.id.clone()),
                    external_booking_id: booking.ext_booking_id.clone(),
                    product_ref_id: booking.ref_id.clone(),
                    reservation_state: Some(booking.state),
                    confirmation_state: None,
                    amount: booking.amount,
                })
            })
            .collect();

        Ok(ReconciledBookings {
            client_id: client_id.clone(),
            authoritative: true,
            stale: false,
            bookings,
        })
    }

    /// Cancels a booking at its provider.
    ///
    /// `booking_id` may be an authoritative booking id, a provider booking
    /// id, or a local booking id. The provider is always called with the
    /// provider booking id. A transport failure keeps the idempotency key so
    /// a retry reuses it.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_booking(
        &self,
        client_id: &ClientId,
        booking_id: &str,
        reason: &str,
    ) -> Result<CancellationReceipt> {
        let (kind, external_booking_id, reservation_id) =
            match self.find_authoritative(client_id, booking_id).await? {
                Some(target) => target,
                None => self.find_local(client_id, booking_id).await?,
            };

        let intent = cancel_intent(&external_booking_id);
        let key = self
            .keys
            .key_for(client_id, &intent, prefixes::BOOKING_CANCEL)
            .await?;
        let reason = match reason.trim() {
            "" => DEFAULT_CANCEL_REASON,
            reason => reason,
        };
        let request = CancelRequest {
            external_ref_id: external_booking_id.clone(),
            reservation_id: reservation_id.clone(),
            origin: CANCEL_ORIGIN.to_string(),
            reason: reason.to_string(),
        };

        let result = match kind {
            ItemKind::Air => self.flights.cancel(&request, &key).await,
            ItemKind::Hotel => self.hotels.cancel(&request, &key).await,
        };

        match result {
            Ok(()) => {
                self.keys.settle(&intent).await?;
                tracing::info!(%external_booking_id, %kind, "booking cancelled");
                self.notifier
                    .notify(Notification::new(
                        client_id.clone(),
                        NotificationLevel::Success,
                        "Booking cancelled",
                        format!("Booking {external_booking_id} was cancelled."),
                    ))
                    .await;
                Ok(CancellationReceipt {
                    booking_id: booking_id.to_string(),
                    kind,
                    external_booking_id,
                    reservation_id,
                    idempotency_key: key,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, %external_booking_id, "cancellation failed");
                if !e.is_transient() {
                    self.keys.settle(&intent).await?;
                }
                self.notifier
                    .notify(Notification::new(
                        client_id.clone(),
                        NotificationLevel::Error,
                        "Cancellation failed",
                        format!("Booking {external_booking_id} could not be cancelled: {e}"),
                    ))
                    .await;
                Err(e.into())
            }
        }
    }

    /// Deletes the local bookings nothing will act on again and returns
    /// the rest in their original order.
    ///
    /// Bookings of a rejected attempt are always retired. Once a reservation
    /// covers the client, confirmed or failed bookings of a finished checkout
    /// and bookings of an unknown attempt are retired too. Bookings of a
    /// checkout still waiting on the bank or on its providers are kept.
    async fn retire_superseded(
        &self,
        local: Vec<PendingBooking>,
        covered: bool,
    ) -> Result<Vec<PendingBooking>> {
        let mut sessions: HashMap<PaymentAttemptId, Option<CheckoutSession>> = HashMap::new();
        let mut retiring: HashMap<PaymentAttemptId, Vec<BookingId>> = HashMap::new();
        let mut kept = Vec::with_capacity(local.len());

        for booking in local {
            let attempt_id = booking.payment_attempt_id.clone();
            if !sessions.contains_key(&attempt_id) {
                let session = self
                    .sessions
                    .find_by_attempt(attempt_id.as_str())
                    .await?
                    .map(|(session, _)| session);
                sessions.insert(attempt_id.clone(), session);
            }

            let retire = match sessions.get(&attempt_id).and_then(Option::as_ref) {
                None => covered,
                Some(session) => {
                    let rejected = session
                        .attempt
                        .as_ref()
                        .is_some_and(|a| a.state == PaymentAttemptState::Rejected);
                    let finished = session.confirmation.is_some()
                        && booking.confirmation_state.is_terminal();
                    rejected || (covered && finished)
                }
            };
            if retire {
                retiring.entry(attempt_id).or_default().push(booking.id);
            } else {
                kept.push(booking);
            }
        }

        let mut retired = 0;
        for (attempt_id, ids) in retiring {
            match sessions.remove(&attempt_id).flatten() {
                Some(mut session) => {
                    retired += self.sessions.retire_bookings(&mut session, &ids).await?;
                }
                None => {
                    for id in &ids {
                        if self.store.delete(BOOKING_STORE, &id.to_string()).await? {
                            retired += 1;
                        }
                    }
                }
            }
        }
        if retired > 0 {
            tracing::info!(retired, "local bookings retired");
        }
        Ok(kept)
    }

    async fn find_authoritative(
        &self,
        client_id: &ClientId,
        booking_id: &str,
    ) -> Result<Option<(ItemKind, String, Option<ReservationId>)>> {
        let reservations = match self.reservations.reservations_for_client(client_id).await {
            Ok(reservations) => reservations,
            Err(e) => {
                tracing::warn!(error = %e, "reservation backend unavailable, using local booking");
                return Ok(None);
            }
        };

        let Some((reservation, kind, booking)) = reservations.iter().find_map(|reservation| {
            reservation
                .find_booking(booking_id)
                .map(|(kind, booking)| (reservation, kind, booking))
        }) else {
            return Ok(None);
        };

        if !booking.state.can_cancel() {
            return Err(CheckoutError::Validation(format!(
                "booking {booking_id} is {} and cannot be cancelled",
                booking.state.as_str()
            )));
        }
        let external = booking
            .ext_booking_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CheckoutError::NoExternalBookingId(booking_id.to_string()))?;

        Ok(Some((kind, external.to_string(), Some(reservation.id.clone()))))
    }

    async fn find_local(
        &self,
        client_id: &ClientId,
        booking_id: &str,
    ) -> Result<(ItemKind, String, Option<ReservationId>)> {
        let local = self.sessions.bookings_for_client(client_id).await?;
        let booking = local
            .iter()
            .find(|b| {
                b.id.to_string() == booking_id || b.confirmed_id.as_deref() == Some(booking_id)
            })
            .ok_or_else(|| CheckoutError::not_found("booking", booking_id))?;

        let external = booking
            .confirmed_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CheckoutError::NoExternalBookingId(booking_id.to_string()))?;

        Ok((booking.kind, external.to_string(), booking.reservation_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use domain::{BookingEvent, CartItem, Currency, Reservation, ReservationBooking};
    use local_store::InMemoryLocalStore;

    use super::*;
    use crate::error::RemoteError;
    use crate::services::{InMemoryBookingProvider, InMemoryNotifier, InMemoryReservationService};

    type Reconciler = ReservationReconciler<
        InMemoryReservationService,
        InMemoryBookingProvider,
        InMemoryBookingProvider,
        InMemoryLocalStore,
        InMemoryNotifier,
    >;

    struct Harness {
        reconciler: Reconciler,
        reservations: InMemoryReservationService,
        flights: InMemoryBookingProvider,
        hotels: InMemoryBookingProvider,
        store: InMemoryLocalStore,
        client: ClientId,
    }

    fn harness() -> Harness {
        let reservations = InMemoryReservationService::new();
        let flights = InMemoryBookingProvider::flights();
        let hotels = InMemoryBookingProvider::hotels();
        let store = InMemoryLocalStore::new();
        Harness {
            reconciler: ReservationReconciler::new(
                reservations.clone(),
                flights.clone(),
                hotels.clone(),
                store.clone(),
                InMemoryNotifier::new(),
            ),
            reservations,
            flights,
            hotels,
            store,
            client: ClientId::new("client-1"),
        }
    }

    async fn local_booking(h: &Harness, kind: ItemKind, confirmed_id: Option<&str>) -> PendingBooking {
        let item = CartItem::new(kind, "PROD-1", 1, Money::new(100_000), Currency::cop());
        let mut booking = PendingBooking::from_cart_item(
            &item,
            h.client.clone(),
            PaymentAttemptId::new("REF1"),
            None,
        );
        if let Some(id) = confirmed_id {
            booking.apply(BookingEvent::ConfirmationStarted).unwrap();
            booking.mark_confirmed(Some(id.to_string())).unwrap();
        }
        SessionRepository::new(h.store.clone())
            .save_booking(&booking)
            .await
            .unwrap();
        booking
    }

    fn reservation(h: &Harness) -> Reservation {
        Reservation {
            id: ReservationId::new("RES-0001"),
            client_id: h.client.clone(),
            hotel_bookings: vec![ReservationBooking {
                id: "HB-17".to_string(),
                ext_booking_id: Some("HT-0001".to_string()),
                ref_id: Some("HT-CTG-01".to_string()),
                state: ReservationBookingState::Approved,
                amount: Some(Money::new(640_000)),
            }],
            flight_bookings: vec![ReservationBooking {
                id: "FB-3".to_string(),
                ext_booking_id: None,
                ref_id: Some("FL-BOG-CTG".to_string()),
                state: ReservationBookingState::Pending,
                amount: Some(Money::new(450_000)),
            }],
            total_amount: Some(Money::new(1_090_000)),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_local_bookings_shown_until_backend_catches_up() {
        let h = harness();
        local_booking(&h, ItemKind::Air, None).await;

        let view = h.reconciler.reconcile(&h.client).await.unwrap();

        assert!(!view.authoritative);
        assert!(!view.stale);
        assert_eq!(view.bookings.len(), 1);
        assert_eq!(view.bookings[0].source, BookingSource::Local);
    }

    #[tokio::test]
    async fn test_authoritative_reservation_replaces_local() {
        let h = harness();
        local_booking(&h, ItemKind::Air, Some("AV-0001")).await;
        local_booking(&h, ItemKind::Hotel, Some("HT-0001")).await;
        h.reservations.insert(reservation(&h)).await;

        let view = h.reconciler.reconcile(&h.client).await.unwrap();

        assert!(view.authoritative);
        assert_eq!(view.bookings.len(), 2);
        assert!(
            view.bookings
                .iter()
                .all(|b| b.source == BookingSource::Authoritative)
        );
        // Flights are listed first.
        assert_eq!(view.bookings[0].booking_id, "FB-3");
        assert_eq!(h.store.namespace_count(BOOKING_STORE).await, 0);
    }

    #[tokio::test]
    async fn test_backend_failure_marks_local_view_stale() {
        let h = harness();
        local_booking(&h, ItemKind::Hotel, None).await;
        h.reservations.set_fail_on_fetch(true).await;

        let view = h.reconciler.reconcile(&h.client).await.unwrap();

        assert!(view.stale);
        assert_eq!(view.bookings.len(), 1);
        assert_eq!(h.store.namespace_count(BOOKING_STORE).await, 1);
    }

    #[tokio::test]
    async fn test_cancel_targets_external_id() {
        let h = harness();
        h.reservations.insert(reservation(&h)).await;

        let receipt = h
            .reconciler
            .cancel_booking(&h.client, "HB-17", "change of plans")
            .await
            .unwrap();

        assert_eq!(receipt.external_booking_id, "HT-0001");
        let calls = h.hotels.cancel_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].external_ref_id, "HT-0001");
        assert_eq!(calls[0].origin, "customer");
        assert_eq!(calls[0].reservation_id, Some(ReservationId::new("RES-0001")));
        assert!(h.flights.cancel_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_without_external_id_is_refused() {
        let h = harness();
        h.reservations.insert(reservation(&h)).await;

        let result = h.reconciler.cancel_booking(&h.client, "FB-3", "").await;

        assert!(matches!(result, Err(CheckoutError::NoExternalBookingId(_))));
        assert!(h.flights.cancel_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_cancelled_booking_is_refused() {
        let h = harness();
        h.reservations.insert(reservation(&h)).await;
        h.reservations
            .set_booking_state("HB-17", ReservationBookingState::Cancelled)
            .await;

        let result = h.reconciler.cancel_booking(&h.client, "HB-17", "").await;
        assert!(matches!(result, Err(CheckoutError::Validation(_))));
    }

    #[tokio::test]
    async fn test_cancel_local_booking_uses_confirmed_id() {
        let h = harness();
        let booking = local_booking(&h, ItemKind::Air, Some("AV-0007")).await;

        h.reconciler
            .cancel_booking(&h.client, &booking.id.to_string(), "")
            .await
            .unwrap();

        let calls = h.flights.cancel_calls().await;
        assert_eq!(calls[0].external_ref_id, "AV-0007");
        assert_eq!(calls[0].reason, DEFAULT_CANCEL_REASON);
    }

    #[tokio::test]
    async fn test_cancel_unknown_booking() {
        let h = harness();
        let result = h.reconciler.cancel_booking(&h.client, "nope", "").await;
        assert!(matches!(result, Err(CheckoutError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_transient_cancel_failure_reuses_key_on_retry() {
        let h = harness();
        h.reservations.insert(reservation(&h)).await;
        h.hotels
            .set_fail_all(Some(RemoteError::Network("timeout".to_string())))
            .await;

        assert!(
            h.reconciler
                .cancel_booking(&h.client, "HT-0001", "")
                .await
                .is_err()
        );
        assert_eq!(h.store.namespace_count(crate::stores::INTENT_STORE).await, 1);

        h.hotels.set_fail_all(None).await;
        let receipt = h
            .reconciler
            .cancel_booking(&h.client, "HT-0001", "")
            .await
            .unwrap();

        let calls = h.hotels.cancel_calls().await;
        assert_eq!(calls.len(), 2);
        assert!(receipt.idempotency_key.has_prefix("booking-cancel"));
        assert_eq!(h.store.namespace_count(crate::stores::INTENT_STORE).await, 0);
    }
}
