//! Reservation backend trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ClientId;
use domain::{Reservation, ReservationBookingState};
use tokio::sync::RwLock;

use crate::error::RemoteError;

/// Trait for the backend that owns authoritative reservations.
#[async_trait]
pub trait ReservationService: Send + Sync {
    /// Lists the client's reservations. An empty list is a valid answer.
    async fn reservations_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<Reservation>, RemoteError>;
}

#[derive(Debug, Default)]
struct InMemoryReservationState {
    reservations: HashMap<ClientId, Vec<Reservation>>,
    fail_on_fetch: bool,
}

/// In-memory reservation backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationService {
    state: Arc<RwLock<InMemoryReservationState>>,
}

impl InMemoryReservationService {
    /// Creates a new empty reservation backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a reservation, as the backend would once it catches up.
    pub async fn insert(&self, reservation: Reservation) {
        self.state
            .write()
            .await
            .reservations
            .entry(reservation.client_id.clone())
            .or_default()
            .push(reservation);
    }

    /// Sets the state of a booking, looked up by either of its ids.
    ///
    /// Returns false if no booking matched.
    pub async fn set_booking_state(&self, booking_id: &str, new_state: ReservationBookingState) -> bool {
        let mut state = self.state.write().await;
        for reservation in state.reservations.values_mut().flatten() {
            for booking in reservation
                .flight_bookings
                .iter_mut()
                .chain(reservation.hotel_bookings.iter_mut())
            {
                if booking.id == booking_id || booking.ext_booking_id.as_deref() == Some(booking_id)
                {
                    booking.state = new_state;
                    return true;
                }
            }
        }
        false
    }

    /// Makes fetches fail with a transient 503.
    pub async fn set_fail_on_fetch(&self, fail: bool) {
        self.state.write().await.fail_on_fetch = fail;
    }
}

#[async_trait]
impl ReservationService for InMemoryReservationService {
    async fn reservations_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<Reservation>, RemoteError> {
        let state = self.state.read().await;
        if state.fail_on_fetch {
            return Err(RemoteError::Server {
                status: 503,
                message: "reservation backend unavailable".to_string(),
            });
        }
        Ok(state
            .reservations
            .get(client_id)
            .cloned()
            .unwrap_or_default())
    }
}
