//! Checkout session persisted across the bank redirect.

use chrono::{DateTime, Utc};
use common::{BookingId, ClientId, IdempotencyKey, PaymentAttemptId};
use domain::{Cart, ConfirmationStatus, InterpretedOutcome, PaymentAttempt, PendingBooking};
use local_store::{LocalStore, LocalStoreExt, Revision, SaveOptions};
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::stores::{ATTEMPT_INDEX, BOOKING_STORE, SESSION_STORE};

/// Where a checkout session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Persisted, gateway call not answered yet.
    #[default]
    Initiating,
    /// Attempt created, customer handed to the bank.
    AwaitingPayment,
    /// A final bank result was applied.
    Settled,
}

/// Everything needed to resume a checkout after the customer returns from
/// the bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub key: IdempotencyKey,
    pub client_id: ClientId,
    pub cart: Cart,
    pub description: String,
    pub return_url: String,
    pub callback_url: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub status: SessionStatus,
    pub attempt: Option<PaymentAttempt>,
    #[serde(default)]
    pub booking_ids: Vec<BookingId>,
    pub outcome: Option<InterpretedOutcome>,
    pub confirmation: Option<ConfirmationStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttemptIndexEntry {
    session_key: IdempotencyKey,
}

/// Typed access to sessions, the attempt index and pending bookings.
#[derive(Clone)]
pub struct SessionRepository<S> {
    store: S,
}

impl<S: LocalStore> SessionRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn load(&self, key: &IdempotencyKey) -> Result<Option<(CheckoutSession, Revision)>> {
        Ok(self.store.load_state(SESSION_STORE, key.as_str()).await?)
    }

    pub async fn save(&self, session: &CheckoutSession, options: SaveOptions) -> Result<Revision> {
        Ok(self
            .store
            .save_state(
                SESSION_STORE,
                session.key.as_str(),
                Some(session.client_id.as_str()),
                session,
                options,
            )
            .await?)
    }

    pub async fn delete(&self, key: &IdempotencyKey) -> Result<()> {
        self.store.delete(SESSION_STORE, key.as_str()).await?;
        Ok(())
    }

    /// Records which session an attempt belongs to.
    pub async fn index_attempt(
        &self,
        attempt_id: &PaymentAttemptId,
        session: &CheckoutSession,
    ) -> Result<()> {
        let entry = AttemptIndexEntry {
            session_key: session.key.clone(),
        };
        self.store
            .save_state(
                ATTEMPT_INDEX,
                attempt_id.as_str(),
                Some(session.client_id.as_str()),
                &entry,
                SaveOptions::any(),
            )
            .await?;
        Ok(())
    }

    /// Finds the session an attempt belongs to.
    pub async fn find_by_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<(CheckoutSession, Revision)>> {
        let entry: Option<(AttemptIndexEntry, _)> =
            self.store.load_state(ATTEMPT_INDEX, attempt_id).await?;
        match entry {
            Some((entry, _)) => self.load(&entry.session_key).await,
            None => Ok(None),
        }
    }

    /// Like `find_by_attempt`, failing with `NotFound` when absent.
    pub async fn require_by_attempt(&self, attempt_id: &str) -> Result<(CheckoutSession, Revision)> {
        self.find_by_attempt(attempt_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("payment attempt", attempt_id))
    }

    pub async fn save_booking(&self, booking: &PendingBooking) -> Result<()> {
        self.store
            .save_state(
                BOOKING_STORE,
                &booking.id.to_string(),
                Some(booking.client_id.as_str()),
                booking,
                SaveOptions::any(),
            )
            .await?;
        Ok(())
    }

    pub async fn booking_exists(&self, id: &BookingId) -> Result<bool> {
        Ok(self.store.exists(BOOKING_STORE, &id.to_string()).await?)
    }

    /// Loads bookings by id. A missing booking is `NotFound`.
    pub async fn load_bookings(&self, ids: &[BookingId]) -> Result<Vec<PendingBooking>> {
        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            let loaded: Option<(PendingBooking, _)> =
                self.store.load_state(BOOKING_STORE, &id.to_string()).await?;
            let (booking, _) = loaded.ok_or_else(|| CheckoutError::not_found("booking", id))?;
            bookings.push(booking);
        }
        Ok(bookings)
    }

    /// Deletes bookings of a session and drops their ids from it.
    pub async fn retire_bookings(
        &self,
        session: &mut CheckoutSession,
        ids: &[BookingId],
    ) -> Result<usize> {
        let mut retired = 0;
        for id in ids {
            if self.store.delete(BOOKING_STORE, &id.to_string()).await? {
                retired += 1;
            }
        }
        session.booking_ids.retain(|id| !ids.contains(id));
        session.updated_at = Utc::now();
        self.save(session, SaveOptions::any()).await?;
        Ok(retired)
    }

    /// Every locally held booking of a client.
    pub async fn bookings_for_client(&self, client_id: &ClientId) -> Result<Vec<PendingBooking>> {
        Ok(self
            .store
            .list_states(BOOKING_STORE, client_id.as_str())
            .await?)
    }
}
