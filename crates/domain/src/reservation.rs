//! Authoritative reservations owned by the backend.

use chrono::{DateTime, Utc};
use common::{ClientId, ReservationId};
use serde::{Deserialize, Serialize};

use crate::{ItemKind, Money};

/// State of a booking inside an authoritative reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationBookingState {
    #[serde(rename = "PENDIENTE")]
    Pending,
    #[serde(rename = "APROBADA")]
    Approved,
    #[serde(rename = "DENEGADA")]
    Denied,
    #[serde(rename = "CANCELADA")]
    Cancelled,
}

impl ReservationBookingState {
    /// Returns true if the booking can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            ReservationBookingState::Pending | ReservationBookingState::Approved
        )
    }

    /// Returns the wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationBookingState::Pending => "PENDIENTE",
            ReservationBookingState::Approved => "APROBADA",
            ReservationBookingState::Denied => "DENEGADA",
            ReservationBookingState::Cancelled => "CANCELADA",
        }
    }
}

impl std::fmt::Display for ReservationBookingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A flight or hotel booking as the backend records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationBooking {
    pub id: String,

    /// Provider-side booking id; the only id a cancellation may target.
    #[serde(default, alias = "confirmedId")]
    pub ext_booking_id: Option<String>,

    #[serde(default)]
    pub ref_id: Option<String>,

    pub state: ReservationBookingState,

    #[serde(default)]
    pub amount: Option<Money>,
}

/// The backend's durable record of a reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub client_id: ClientId,
    #[serde(default)]
    pub hotel_bookings: Vec<ReservationBooking>,
    #[serde(default)]
    pub flight_bookings: Vec<ReservationBooking>,
    #[serde(default)]
    pub total_amount: Option<Money>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Iterates every booking with its kind, flights first.
    pub fn bookings(&self) -> impl Iterator<Item = (ItemKind, &ReservationBooking)> {
        self.flight_bookings
            .iter()
            .map(|b| (ItemKind::Air, b))
            .chain(self.hotel_bookings.iter().map(|b| (ItemKind::Hotel, b)))
    }

    /// Finds a booking by its backend id or its provider-side id.
    pub fn find_booking(&self, id: &str) -> Option<(ItemKind, &ReservationBooking)> {
        self.bookings()
            .find(|(_, b)| b.id == id || b.ext_booking_id.as_deref() == Some(id))
    }

    /// Returns the number of bookings.
    pub fn booking_count(&self) -> usize {
        self.flight_bookings.len() + self.hotel_bookings.len()
    }
}
