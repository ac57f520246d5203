//! Turns a cart into a single idempotent payment attempt.

use chrono::{DateTime, Utc};
use common::{BookingId, CartId, ClientId, IdempotencyKey, PaymentAttemptId, ReservationId, prefixes};
use domain::{
    Cart, Currency, Money, PaymentAttempt, PaymentAttemptState, PaymentEvent, PendingBooking,
};
use local_store::{LocalStore, LocalStoreExt, SaveOptions, StoreError};
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::keys::{IntentKeys, checkout_intent};
use crate::services::{PaymentGateway, PaymentRequest};
use crate::session::{CheckoutSession, SessionRepository, SessionStatus};
use crate::stores::CART_STORE;

/// Input for starting a checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub client_id: ClientId,
    pub currency: Currency,
    pub cart_id: CartId,
    pub description: String,
    pub return_url: String,
    pub callback_url: String,
    #[serde(default)]
    pub customer_name: Option<String>,
}

/// What the caller needs to hand the customer over to the bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub idempotency_key: IdempotencyKey,
    pub reservation_id: Option<ReservationId>,
    pub payment_attempt_id: PaymentAttemptId,
    pub total_amount: Money,
    pub currency: Currency,
    pub bank_payment_url: String,
    pub expires_at: DateTime<Utc>,
    /// State of the attempt as of this receipt.
    pub initial_state: PaymentAttemptState,
}

impl CheckoutReceipt {
    fn new(key: &IdempotencyKey, attempt: &PaymentAttempt) -> Self {
        Self {
            idempotency_key: key.clone(),
            reservation_id: attempt.reservation_id.clone(),
            payment_attempt_id: attempt.id.clone(),
            total_amount: attempt.total_amount,
            currency: attempt.currency.clone(),
            bank_payment_url: attempt.bank_payment_url.clone(),
            expires_at: attempt.expires_at,
            initial_state: attempt.state,
        }
    }
}

/// Creates payment attempts for carts.
///
/// The session (client, cart snapshot, description, URLs) is persisted
/// under the idempotency key before the gateway is called, so a process
/// that dies mid-call can finish the checkout with [`resume`]. A gateway
/// failure deletes the session again.
///
/// [`resume`]: CheckoutInitiator::resume
pub struct CheckoutInitiator<G, S>
where
    G: PaymentGateway,
    S: LocalStore,
{
    gateway: G,
    store: S,
    sessions: SessionRepository<S>,
    keys: IntentKeys<S>,
}

impl<G, S> CheckoutInitiator<G, S>
where
    G: PaymentGateway,
    S: LocalStore + Clone,
{
    /// Creates a new checkout initiator.
    pub fn new(gateway: G, store: S) -> Self {
        Self {
            gateway,
            sessions: SessionRepository::new(store.clone()),
            keys: IntentKeys::new(store.clone()),
            store,
        }
    }

    /// Key to use for checking out `cart_id` when the caller brought none.
    ///
    /// Repeated calls return the same key until the checkout settles.
    pub async fn checkout_key(&self, client_id: &ClientId, cart_id: CartId) -> Result<IdempotencyKey> {
        self.keys
            .key_for(client_id, &checkout_intent(cart_id), prefixes::CHECKOUT)
            .await
    }

    /// Starts a checkout, or replays the one already started with `key`.
    #[tracing::instrument(
        skip(self, request),
        fields(key = %key, client_id = %request.client_id, cart_id = %request.cart_id)
    )]
    pub async fn initiate(
        &self,
        request: CheckoutRequest,
        key: IdempotencyKey,
    ) -> Result<CheckoutReceipt> {
        validate_request(&request)?;

        if let Some((session, _)) = self.sessions.load(&key).await? {
            if session.client_id != request.client_id || session.cart.id != request.cart_id {
                return Err(CheckoutError::KeyReuse {
                    key: key.to_string(),
                });
            }
            if let Some(ref attempt) = session.attempt {
                tracing::info!(payment_attempt_id = %attempt.id, "replaying checkout");
                return Ok(CheckoutReceipt::new(&key, attempt));
            }
            tracing::info!("checkout was interrupted before the gateway answered, resuming");
            let session = self.complete(session).await?;
            return receipt_of(&session);
        }

        let cart = self.checkout_cart(&request).await?;
        let now = Utc::now();
        let session = CheckoutSession {
            key: key.clone(),
            client_id: request.client_id,
            cart,
            description: request.description.trim().to_string(),
            return_url: request.return_url,
            callback_url: request.callback_url,
            customer_name: request.customer_name,
            status: SessionStatus::Initiating,
            attempt: None,
            booking_ids: Vec::new(),
            outcome: None,
            confirmation: None,
            created_at: now,
            updated_at: now,
        };

        match self.sessions.save(&session, SaveOptions::expect_new()).await {
            Ok(_) => {}
            Err(CheckoutError::Store(StoreError::RevisionConflict { .. })) => {
                // A concurrent call with the same key got there first.
                return match self.sessions.load(&key).await? {
                    Some((existing, _)) if existing.attempt.is_some() => receipt_of(&existing),
                    _ => Err(CheckoutError::KeyReuse {
                        key: key.to_string(),
                    }),
                };
            }
            Err(e) => return Err(e),
        }

        let session = self.complete(session).await?;
        receipt_of(&session)
    }

    /// Returns a stored session, finishing it first if it was interrupted
    /// before the gateway answered.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, key: &IdempotencyKey) -> Result<CheckoutSession> {
        let (session, _) = self
            .sessions
            .load(key)
            .await?
            .ok_or_else(|| CheckoutError::not_found("checkout session", key))?;

        if session.status == SessionStatus::Initiating {
            return self.complete(session).await;
        }
        Ok(session)
    }

    /// Returns a stored session without touching it.
    pub async fn session(&self, key: &IdempotencyKey) -> Result<Option<CheckoutSession>> {
        Ok(self.sessions.load(key).await?.map(|(s, _)| s))
    }

    /// Returns the session a payment attempt belongs to.
    pub async fn session_for_attempt(&self, attempt_id: &str) -> Result<Option<CheckoutSession>> {
        Ok(self
            .sessions
            .find_by_attempt(attempt_id)
            .await?
            .map(|(s, _)| s))
    }

    async fn checkout_cart(&self, request: &CheckoutRequest) -> Result<Cart> {
        let loaded: Option<(Cart, _)> = self
            .store
            .load_state(CART_STORE, &request.cart_id.to_string())
            .await?;
        let (cart, _) = loaded.ok_or_else(|| CheckoutError::not_found("cart", request.cart_id))?;

        if cart.client_id != request.client_id {
            return Err(CheckoutError::not_found("cart", request.cart_id));
        }
        if cart.is_empty() {
            return Err(CheckoutError::Validation("cart is empty".to_string()));
        }
        if cart.currency.as_ref() != Some(&request.currency) {
            return Err(CheckoutError::Validation(format!(
                "checkout currency {} does not match cart currency",
                request.currency
            )));
        }
        Ok(cart)
    }

    /// Calls the gateway for a persisted session and records the attempt.
    async fn complete(&self, mut session: CheckoutSession) -> Result<CheckoutSession> {
        let request = PaymentRequest {
            customer_id: session.client_id.clone(),
            customer_name: session.customer_name.clone(),
            total_amount: session.cart.total(),
            currency: session.cart.currency.clone().unwrap_or_else(Currency::cop),
            description: session.description.clone(),
            return_url: session.return_url.clone(),
            notification_url: session.callback_url.clone(),
        };

        let initiation = match self.gateway.initiate(&request, &session.key).await {
            Ok(initiation) => initiation,
            Err(e) => {
                tracing::warn!(error = %e, "payment gateway refused checkout, discarding session");
                metrics::counter!("checkout_failed_total").increment(1);
                self.sessions.delete(&session.key).await?;
                if !e.is_transient() {
                    self.keys
                        .settle(&checkout_intent(session.cart.id))
                        .await?;
                }
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let mut attempt = PaymentAttempt {
            id: initiation.payment_attempt_id,
            client_id: session.client_id.clone(),
            reservation_id: initiation.reservation_id,
            order_id: initiation.order_id,
            total_amount: initiation.total_amount,
            currency: request.currency,
            bank_payment_url: initiation.bank_payment_url,
            expires_at: initiation.expires_at,
            state: initiation.initial_state,
            created_at: now,
            updated_at: now,
        };
        if attempt.state == PaymentAttemptState::Initiated {
            attempt.apply(PaymentEvent::RedirectIssued, now)?;
        }

        // Booking ids are persisted with the session before any booking is
        // written, so a resumed checkout recreates only the missing ones.
        if session.booking_ids.len() != session.cart.items.len() {
            session.booking_ids = session.cart.items.iter().map(|_| BookingId::new()).collect();
            session.updated_at = now;
            self.sessions.save(&session, SaveOptions::any()).await?;
        }
        for (item, id) in session.cart.items.iter().zip(&session.booking_ids) {
            if self.sessions.booking_exists(id).await? {
                continue;
            }
            let mut booking = PendingBooking::from_cart_item(
                item,
                session.client_id.clone(),
                attempt.id.clone(),
                attempt.reservation_id.clone(),
            );
            booking.id = *id;
            self.sessions.save_booking(&booking).await?;
        }

        self.sessions.index_attempt(&attempt.id, &session).await?;

        tracing::info!(
            payment_attempt_id = %attempt.id,
            total = %attempt.total_amount,
            bookings = session.booking_ids.len(),
            "payment attempt created"
        );
        session.attempt = Some(attempt);
        session.status = SessionStatus::AwaitingPayment;
        session.updated_at = now;
        self.sessions.save(&session, SaveOptions::any()).await?;

        metrics::counter!("checkout_initiated_total").increment(1);
        Ok(session)
    }
}

fn receipt_of(session: &CheckoutSession) -> Result<CheckoutReceipt> {
    session
        .attempt
        .as_ref()
        .map(|attempt| CheckoutReceipt::new(&session.key, attempt))
        .ok_or_else(|| CheckoutError::not_found("payment attempt", &session.key))
}

fn validate_request(request: &CheckoutRequest) -> Result<()> {
    if request.description.trim().is_empty() {
        return Err(CheckoutError::Validation(
            "description is required".to_string(),
        ));
    }
    for (name, url) in [
        ("return_url", &request.return_url),
        ("callback_url", &request.callback_url),
    ] {
        if !is_http_url(url) {
            return Err(CheckoutError::Validation(format!(
                "{name} must be an absolute http(s) URL"
            )));
        }
    }
    Ok(())
}

fn is_http_url(url: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| url.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()))
}
