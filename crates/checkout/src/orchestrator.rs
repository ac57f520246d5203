//! Fans an approved payment out to the flight and hotel providers.

use std::time::Instant;

use common::{ClientId, IdempotencyKey, prefixes};
use domain::{BookingEvent, ConfirmationStatus, ItemKind, PartitionStatus, PendingBooking};
use local_store::LocalStore;
use serde::{Deserialize, Serialize};

use crate::services::{BookingProvider, ConfirmRequest, Notification, NotificationLevel, Notifier};
use crate::session::SessionRepository;

/// Result of one confirmation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationReport {
    pub status: ConfirmationStatus,
    /// Every booking handed in, in its final state; flights first.
    pub bookings: Vec<PendingBooking>,
}

/// Confirms pending bookings with their providers after payment approval.
///
/// Flights and hotels are two independent partitions driven concurrently;
/// inside a partition bookings are confirmed one at a time. A failed booking
/// is marked `Failed` and the partition moves on. Nothing is retried.
pub struct BookingConfirmationOrchestrator<F, H, S, N>
where
    F: BookingProvider,
    H: BookingProvider,
    S: LocalStore,
    N: Notifier,
{
    flights: F,
    hotels: H,
    sessions: SessionRepository<S>,
    notifier: N,
}

impl<F, H, S, N> BookingConfirmationOrchestrator<F, H, S, N>
where
    F: BookingProvider,
    H: BookingProvider,
    S: LocalStore,
    N: Notifier,
{
    /// Creates a new orchestrator.
    pub fn new(flights: F, hotels: H, store: S, notifier: N) -> Self {
        Self {
            flights,
            hotels,
            sessions: SessionRepository::new(store),
            notifier,
        }
    }

    /// Confirms every `Pending` booking against `transaction_id`.
    ///
    /// Never fails: provider errors end up on the booking and store errors
    /// are logged. Bookings not in `Pending` are passed through untouched.
    #[tracing::instrument(skip(self, bookings), fields(bookings = bookings.len()))]
    pub async fn confirm_bookings(
        &self,
        client_id: &ClientId,
        transaction_id: &str,
        bookings: Vec<PendingBooking>,
    ) -> ConfirmationReport {
        let (flights, hotels): (Vec<_>, Vec<_>) = bookings
            .into_iter()
            .partition(|b| b.kind == ItemKind::Air);

        let (flights, hotels) = tokio::join!(
            self.confirm_partition(&self.flights, ItemKind::Air, flights, transaction_id),
            self.confirm_partition(&self.hotels, ItemKind::Hotel, hotels, transaction_id),
        );

        let mut bookings = flights;
        bookings.extend(hotels);
        let status = ConfirmationStatus::from_bookings(&bookings);

        for kind in [ItemKind::Air, ItemKind::Hotel] {
            let count = bookings.iter().filter(|b| b.kind == kind).count();
            if count > 0 {
                self.notifier
                    .notify(partition_notification(
                        client_id,
                        kind,
                        status.for_kind(kind),
                        count,
                    ))
                    .await;
            }
        }

        tracing::info!(
            flights = %status.flights,
            hotels = %status.hotels,
            "booking confirmation finished"
        );
        ConfirmationReport { status, bookings }
    }

    async fn confirm_partition<P: BookingProvider>(
        &self,
        provider: &P,
        kind: ItemKind,
        bookings: Vec<PendingBooking>,
        transaction_id: &str,
    ) -> Vec<PendingBooking> {
        let mut done = Vec::with_capacity(bookings.len());
        for booking in bookings {
            done.push(self.confirm_one(provider, kind, booking, transaction_id).await);
        }
        done
    }

    async fn confirm_one<P: BookingProvider>(
        &self,
        provider: &P,
        kind: ItemKind,
        mut booking: PendingBooking,
        transaction_id: &str,
    ) -> PendingBooking {
        if !booking.confirmation_state.can_start() {
            tracing::debug!(
                booking_id = %booking.id,
                state = %booking.confirmation_state,
                "skipping booking that is not pending"
            );
            return booking;
        }

        let key = booking
            .confirmation_key
            .get_or_insert_with(|| IdempotencyKey::generate(prefixes::BOOKING_CONFIRM))
            .clone();
        if let Err(e) = booking.apply(BookingEvent::ConfirmationStarted) {
            tracing::warn!(booking_id = %booking.id, error = %e, "cannot start confirmation");
            return booking;
        }
        self.persist(&booking).await;

        let request = ConfirmRequest {
            external_ref_id: booking.external_ref_id().to_string(),
            transaction_id: transaction_id.to_string(),
        };
        let started = Instant::now();
        let result = provider.confirm(&request, &key).await;
        metrics::histogram!("booking_confirmation_duration_seconds", "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let (outcome, label) = match result {
            Ok(receipt) => {
                tracing::info!(
                    booking_id = %booking.id,
                    external_ref_id = %request.external_ref_id,
                    confirmed_id = ?receipt.confirmed_id,
                    "booking confirmed"
                );
                (booking.mark_confirmed(receipt.confirmed_id), "confirmed")
            }
            Err(e) => {
                tracing::warn!(
                    booking_id = %booking.id,
                    external_ref_id = %request.external_ref_id,
                    error = %e,
                    "booking confirmation failed"
                );
                (booking.mark_failed(e.to_string()), "failed")
            }
        };
        if let Err(e) = outcome {
            tracing::error!(booking_id = %booking.id, error = %e, "could not record confirmation result");
        }
        metrics::counter!(
            "booking_confirmations_total",
            "kind" => kind.as_str(),
            "result" => label
        )
        .increment(1);

        self.persist(&booking).await;
        booking
    }

    async fn persist(&self, booking: &PendingBooking) {
        if let Err(e) = self.sessions.save_booking(booking).await {
            tracing::warn!(booking_id = %booking.id, error = %e, "failed to persist booking");
        }
    }
}

fn partition_notification(
    client_id: &ClientId,
    kind: ItemKind,
    status: PartitionStatus,
    count: usize,
) -> Notification {
    let noun = match kind {
        ItemKind::Air => "flight",
        ItemKind::Hotel => "hotel",
    };
    let (plural, verb) = if count == 1 { ("", "is") } else { ("s", "are") };
    let (level, title, message) = match status {
        PartitionStatus::Success => (
            NotificationLevel::Success,
            format!("{noun}{plural} confirmed"),
            format!("Your {count} {noun} booking{plural} {verb} confirmed."),
        ),
        PartitionStatus::Error => (
            NotificationLevel::Error,
            format!("{noun} confirmation failed"),
            format!(
                "Some {noun} bookings could not be confirmed. Your payment was received; \
                 contact support or cancel the affected booking."
            ),
        ),
        PartitionStatus::Pending => (
            NotificationLevel::Info,
            format!("{noun} confirmation in progress"),
            format!("Your {noun} booking{plural} {verb} still being confirmed."),
        ),
    };
    Notification::new(client_id.clone(), level, title, message)
}

#[cfg(test)]
mod tests {
    use common::{PaymentAttemptId, ReservationId};
    use domain::{BookingMetadata, CartItem, ConfirmationState, Currency, Money};
    use local_store::{InMemoryLocalStore, LocalStoreExt};

    use super::*;
    use crate::error::RemoteError;
    use crate::services::{InMemoryBookingProvider, InMemoryNotifier};
    use crate::stores::BOOKING_STORE;

    type Orchestrator = BookingConfirmationOrchestrator<
        InMemoryBookingProvider,
        InMemoryBookingProvider,
        InMemoryLocalStore,
        InMemoryNotifier,
    >;

    struct Harness {
        orchestrator: Orchestrator,
        flights: InMemoryBookingProvider,
        hotels: InMemoryBookingProvider,
        store: InMemoryLocalStore,
        notifier: InMemoryNotifier,
        client: ClientId,
    }

    fn harness() -> Harness {
        let flights = InMemoryBookingProvider::flights();
        let hotels = InMemoryBookingProvider::hotels();
        let store = InMemoryLocalStore::new();
        let notifier = InMemoryNotifier::new();
        Harness {
            orchestrator: BookingConfirmationOrchestrator::new(
                flights.clone(),
                hotels.clone(),
                store.clone(),
                notifier.clone(),
            ),
            flights,
            hotels,
            store,
            notifier,
            client: ClientId::new("client-1"),
        }
    }

    fn booking(h: &Harness, kind: ItemKind, ref_id: &str, provider_id: Option<&str>) -> PendingBooking {
        let item = CartItem::new(kind, ref_id, 1, Money::new(100_000), Currency::cop()).with_metadata(
            BookingMetadata {
                provider_reservation_id: provider_id.map(str::to_string),
                ..Default::default()
            },
        );
        PendingBooking::from_cart_item(
            &item,
            h.client.clone(),
            PaymentAttemptId::new("REF1"),
            Some(ReservationId::new("RES-0001")),
        )
    }

    #[tokio::test]
    async fn test_all_confirmed() {
        let h = harness();
        let bookings = vec![
            booking(&h, ItemKind::Air, "FL-1", Some("PNR-1")),
            booking(&h, ItemKind::Hotel, "HT-1", None),
        ];

        let report = h.orchestrator.confirm_bookings(&h.client, "REF1", bookings).await;

        assert!(report.status.all_succeeded());
        assert!(
            report
                .bookings
                .iter()
                .all(|b| b.confirmation_state == ConfirmationState::Confirmed)
        );
        let flight_calls = h.flights.confirm_calls().await;
        assert_eq!(flight_calls[0].external_ref_id, "PNR-1");
        assert_eq!(flight_calls[0].transaction_id, "REF1");
        assert_eq!(h.hotels.confirm_calls().await[0].external_ref_id, "HT-1");
        assert_eq!(h.notifier.count().await, 2);
        assert_eq!(h.store.namespace_count(BOOKING_STORE).await, 2);
    }

    #[tokio::test]
    async fn test_one_flight_failure_does_not_block_others() {
        let h = harness();
        h.flights.fail_confirmations_for("FL-2").await;
        let bookings = vec![
            booking(&h, ItemKind::Air, "FL-1", None),
            booking(&h, ItemKind::Air, "FL-2", None),
            booking(&h, ItemKind::Hotel, "HT-1", None),
        ];

        let report = h.orchestrator.confirm_bookings(&h.client, "REF1", bookings).await;

        assert_eq!(report.status.flights, PartitionStatus::Error);
        assert_eq!(report.status.hotels, PartitionStatus::Success);
        let states: Vec<_> = report
            .bookings
            .iter()
            .map(|b| (b.product_ref_id.as_str(), b.confirmation_state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("FL-1", ConfirmationState::Confirmed),
                ("FL-2", ConfirmationState::Failed),
                ("HT-1", ConfirmationState::Confirmed),
            ]
        );
        assert!(report.bookings[1].last_error.is_some());

        let notifications = h.notifier.for_client(&h.client).await;
        assert_eq!(notifications.len(), 2);
        assert!(
            notifications
                .iter()
                .any(|n| n.level == NotificationLevel::Error)
        );
    }

    #[tokio::test]
    async fn test_flights_confirmed_in_order() {
        let h = harness();
        h.flights.fail_confirmations_for("FL-1").await;
        let bookings = vec![
            booking(&h, ItemKind::Air, "FL-1", None),
            booking(&h, ItemKind::Air, "FL-2", None),
            booking(&h, ItemKind::Air, "FL-3", None),
        ];

        h.orchestrator.confirm_bookings(&h.client, "REF1", bookings).await;

        let order: Vec<_> = h
            .flights
            .confirm_calls()
            .await
            .into_iter()
            .map(|c| c.external_ref_id)
            .collect();
        assert_eq!(order, vec!["FL-1", "FL-2", "FL-3"]);
    }

    #[tokio::test]
    async fn test_empty_partition_is_success_without_notification() {
        let h = harness();
        let bookings = vec![booking(&h, ItemKind::Hotel, "HT-1", None)];

        let report = h.orchestrator.confirm_bookings(&h.client, "REF1", bookings).await;

        assert_eq!(report.status.flights, PartitionStatus::Success);
        assert!(h.flights.confirm_calls().await.is_empty());
        assert_eq!(h.notifier.count().await, 1);
    }

    #[tokio::test]
    async fn test_non_pending_bookings_are_not_reissued() {
        let h = harness();
        let mut confirmed = booking(&h, ItemKind::Air, "FL-1", None);
        confirmed.apply(BookingEvent::ConfirmationStarted).unwrap();
        confirmed.mark_confirmed(Some("AV-9".to_string())).unwrap();
        let mut in_flight = booking(&h, ItemKind::Hotel, "HT-1", None);
        in_flight.apply(BookingEvent::ConfirmationStarted).unwrap();

        let report = h
            .orchestrator
            .confirm_bookings(&h.client, "REF1", vec![confirmed, in_flight])
            .await;

        assert!(h.flights.confirm_calls().await.is_empty());
        assert!(h.hotels.confirm_calls().await.is_empty());
        assert_eq!(report.status.flights, PartitionStatus::Success);
        assert_eq!(report.status.hotels, PartitionStatus::Pending);
    }

    #[tokio::test]
    async fn test_transient_failure_is_recorded_not_retried() {
        let h = harness();
        h.hotels
            .set_fail_all(Some(RemoteError::Network("connection reset".to_string())))
            .await;
        let hotel = booking(&h, ItemKind::Hotel, "HT-1", None);
        let id = hotel.id;

        let report = h.orchestrator.confirm_bookings(&h.client, "REF1", vec![hotel]).await;

        assert_eq!(report.status.hotels, PartitionStatus::Error);
        assert_eq!(h.hotels.confirm_calls().await.len(), 1);

        let stored: Option<(PendingBooking, _)> = h
            .store
            .load_state(BOOKING_STORE, &id.to_string())
            .await
            .unwrap();
        let (stored, _) = stored.unwrap();
        assert_eq!(stored.confirmation_state, ConfirmationState::Failed);
        assert!(stored.confirmation_key.is_some());
    }
}
