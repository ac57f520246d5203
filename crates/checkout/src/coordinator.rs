//! Applies bank outcomes to checkout sessions.

use chrono::{DateTime, Utc};
use common::{ClientId, IdempotencyKey, PaymentAttemptId};
use domain::{
    BankStatus, ConfirmationStatus, Currency, InterpretedOutcome, Money, PaymentAttemptState,
    PendingBooking,
};
use local_store::{LocalStore, SaveOptions, StoreError};
use serde::{Deserialize, Serialize};

use crate::cart::CartAggregator;
use crate::error::{CheckoutError, Result};
use crate::initiator::CheckoutInitiator;
use crate::interpreter::{NotificationPayload, PaymentResponseInterpreter, RedirectParams};
use crate::keys::{IntentKeys, checkout_intent};
use crate::orchestrator::BookingConfirmationOrchestrator;
use crate::reconciler::ReservationReconciler;
use crate::services::{
    BookingProvider, CartService, Notification, NotificationLevel, Notifier, PaymentGateway,
    ReservationService,
};
use crate::session::{CheckoutSession, SessionRepository, SessionStatus};

/// What happened when an outcome was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub payment_attempt_id: PaymentAttemptId,
    pub outcome: InterpretedOutcome,
    pub attempt_state: PaymentAttemptState,
    pub confirmation: Option<ConfirmationStatus>,
    pub bookings: Vec<PendingBooking>,
    /// True when the attempt was already in the reported state.
    pub duplicate: bool,
}

/// A payment attempt as shown to the customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub payment_attempt_id: PaymentAttemptId,
    pub idempotency_key: IdempotencyKey,
    pub client_id: ClientId,
    pub state: PaymentAttemptState,
    /// `EXPIRED` once the advisory deadline passed without a result.
    pub display_state: PaymentAttemptState,
    pub total_amount: Money,
    pub currency: Currency,
    pub bank_payment_url: String,
    pub expires_at: DateTime<Utc>,
    pub outcome: Option<InterpretedOutcome>,
    pub confirmation: Option<ConfirmationStatus>,
    pub bookings: Vec<PendingBooking>,
}

/// Drives a checkout from cart to confirmed bookings.
///
/// Owns one of each component and routes bank outcomes through them:
/// only a verified approval reaches the booking orchestrator, and a
/// repeated delivery of the same result does nothing.
pub struct CheckoutCoordinator<C, G, F, H, R, S, N>
where
    C: CartService,
    G: PaymentGateway,
    F: BookingProvider,
    H: BookingProvider,
    R: ReservationService,
    S: LocalStore,
    N: Notifier,
{
    carts: CartAggregator<C, S>,
    initiator: CheckoutInitiator<G, S>,
    interpreter: PaymentResponseInterpreter<G>,
    orchestrator: BookingConfirmationOrchestrator<F, H, S, N>,
    reconciler: ReservationReconciler<R, F, H, S, N>,
    sessions: SessionRepository<S>,
    keys: IntentKeys<S>,
    notifier: N,
}

impl<C, G, F, H, R, S, N> CheckoutCoordinator<C, G, F, H, R, S, N>
where
    C: CartService,
    G: PaymentGateway + Clone,
    F: BookingProvider + Clone,
    H: BookingProvider + Clone,
    R: ReservationService,
    S: LocalStore + Clone,
    N: Notifier + Clone,
{
    /// Creates a new coordinator.
    pub fn new(
        cart_service: C,
        gateway: G,
        flights: F,
        hotels: H,
        reservations: R,
        notifier: N,
        store: S,
    ) -> Self {
        Self {
            carts: CartAggregator::new(cart_service, store.clone()),
            initiator: CheckoutInitiator::new(gateway.clone(), store.clone()),
            interpreter: PaymentResponseInterpreter::new(gateway),
            orchestrator: BookingConfirmationOrchestrator::new(
                flights.clone(),
                hotels.clone(),
                store.clone(),
                notifier.clone(),
            ),
            reconciler: ReservationReconciler::new(
                reservations,
                flights,
                hotels,
                store.clone(),
                notifier.clone(),
            ),
            sessions: SessionRepository::new(store.clone()),
            keys: IntentKeys::new(store),
            notifier,
        }
    }

    pub fn carts(&self) -> &CartAggregator<C, S> {
        &self.carts
    }

    pub fn initiator(&self) -> &CheckoutInitiator<G, S> {
        &self.initiator
    }

    pub fn reconciler(&self) -> &ReservationReconciler<R, F, H, S, N> {
        &self.reconciler
    }

    /// Handles the customer coming back from the bank.
    pub async fn handle_redirect(&self, params: &RedirectParams) -> Result<OutcomeReport> {
        let interpreted = self.interpreter.from_redirect(params).await?;
        self.apply_outcome(interpreted).await
    }

    /// Handles the bank's server-to-server notification.
    pub async fn handle_notification(&self, payload: &NotificationPayload) -> Result<OutcomeReport> {
        let interpreted = self.interpreter.from_notification(payload)?;
        self.apply_outcome(interpreted).await
    }

    /// Applies an interpreted outcome to the attempt it references.
    #[tracing::instrument(
        skip(self, interpreted),
        fields(
            reference = %interpreted.outcome.reference,
            status = %interpreted.outcome.status,
            source = interpreted.source.as_str()
        )
    )]
    pub async fn apply_outcome(&self, interpreted: InterpretedOutcome) -> Result<OutcomeReport> {
        let reference = interpreted.outcome.reference.clone();
        let (mut session, revision) = self.sessions.require_by_attempt(&reference).await?;
        let mut attempt = session
            .attempt
            .clone()
            .ok_or_else(|| CheckoutError::not_found("payment attempt", &reference))?;
        let client_id = session.client_id.clone();

        let amount_mismatch = interpreted.outcome.status == BankStatus::Approved
            && interpreted.outcome.amount != attempt.total_amount;
        if !interpreted.is_verified() || amount_mismatch {
            if amount_mismatch {
                tracing::warn!(
                    reported = %interpreted.outcome.amount,
                    expected = %attempt.total_amount,
                    "approved amount differs from attempt total, leaving attempt untouched"
                );
            } else {
                tracing::warn!("payment outcome could not be verified, leaving attempt untouched");
            }
            self.notify(
                &client_id,
                NotificationLevel::Warning,
                "Payment not verified yet",
                format!(
                    "We could not verify payment {reference} with the bank. Check again shortly."
                ),
            )
            .await;
            return self.report(&session, interpreted, false).await;
        }

        let event = interpreted.outcome.status.payment_event();
        if attempt.already_reached(event) {
            tracing::info!(state = %attempt.state, "outcome already applied");
            if interpreted.outcome.status == BankStatus::Pending {
                self.notify_pending(&client_id, &reference).await;
            }
            return self.report(&session, interpreted, true).await;
        }

        let now = Utc::now();
        let state = attempt.apply(event, now)?;

        session.attempt = Some(attempt);
        session.outcome = Some(interpreted.clone());
        session.updated_at = now;
        if state.is_terminal() {
            session.status = SessionStatus::Settled;
        }

        match self
            .sessions
            .save(&session, SaveOptions::expect_revision(revision))
            .await
        {
            Ok(_) => {}
            Err(CheckoutError::Store(StoreError::RevisionConflict { .. })) => {
                // Another delivery of this outcome got there first.
                tracing::info!("concurrent outcome delivery, reporting stored result");
                let (stored, _) = self.sessions.require_by_attempt(&reference).await?;
                return self.report(&stored, interpreted, true).await;
            }
            Err(e) => return Err(e),
        }
        tracing::info!(%state, "payment attempt updated");

        match interpreted.outcome.status {
            BankStatus::Approved => self.on_approved(&mut session, &reference).await?,
            BankStatus::Rejected => {
                self.keys.settle(&checkout_intent(session.cart.id)).await?;
                self.notify(
                    &client_id,
                    NotificationLevel::Error,
                    "Payment rejected",
                    format!("The bank rejected payment {reference}. Your cart was kept."),
                )
                .await;
            }
            BankStatus::Pending => self.notify_pending(&client_id, &reference).await,
        }

        self.report(&session, interpreted, false).await
    }

    /// Returns an attempt with its advisory display state.
    pub async fn payment_status(&self, attempt_id: &str) -> Result<PaymentStatusView> {
        let (session, _) = self.sessions.require_by_attempt(attempt_id).await?;
        let attempt = session
            .attempt
            .as_ref()
            .ok_or_else(|| CheckoutError::not_found("payment attempt", attempt_id))?;
        let bookings = self.sessions.load_bookings(&session.booking_ids).await?;

        Ok(PaymentStatusView {
            payment_attempt_id: attempt.id.clone(),
            idempotency_key: session.key.clone(),
            client_id: session.client_id.clone(),
            state: attempt.state,
            display_state: attempt.display_state(Utc::now()),
            total_amount: attempt.total_amount,
            currency: attempt.currency.clone(),
            bank_payment_url: attempt.bank_payment_url.clone(),
            expires_at: attempt.expires_at,
            outcome: session.outcome.clone(),
            confirmation: session.confirmation,
            bookings,
        })
    }

    async fn on_approved(&self, session: &mut CheckoutSession, reference: &str) -> Result<()> {
        let client_id = session.client_id.clone();
        let bookings = self.sessions.load_bookings(&session.booking_ids).await?;
        let report = self
            .orchestrator
            .confirm_bookings(&client_id, reference, bookings)
            .await;

        if let Err(e) = self.carts.remove_checked_out(&session.cart).await {
            tracing::warn!(error = %e, "failed to remove checked-out items from cart");
        }
        self.keys.settle(&checkout_intent(session.cart.id)).await?;

        session.confirmation = Some(report.status);
        session.updated_at = Utc::now();
        self.sessions.save(session, SaveOptions::any()).await?;

        self.notify(
            &client_id,
            NotificationLevel::Success,
            "Payment approved",
            format!("Payment {reference} was approved."),
        )
        .await;
        Ok(())
    }

    async fn report(
        &self,
        session: &CheckoutSession,
        outcome: InterpretedOutcome,
        duplicate: bool,
    ) -> Result<OutcomeReport> {
        let bookings = self.sessions.load_bookings(&session.booking_ids).await?;
        let (payment_attempt_id, attempt_state) = match session.attempt {
            Some(ref attempt) => (attempt.id.clone(), attempt.state),
            None => (
                PaymentAttemptId::new(outcome.outcome.reference.clone()),
                PaymentAttemptState::default(),
            ),
        };
        Ok(OutcomeReport {
            payment_attempt_id,
            outcome,
            attempt_state,
            confirmation: session.confirmation,
            bookings,
            duplicate,
        })
    }

    async fn notify_pending(&self, client_id: &ClientId, reference: &str) {
        self.notify(
            client_id,
            NotificationLevel::Info,
            "Payment pending",
            format!("The bank is still processing payment {reference}."),
        )
        .await;
    }

    async fn notify(
        &self,
        client_id: &ClientId,
        level: NotificationLevel,
        title: &str,
        message: String,
    ) {
        self.notifier
            .notify(Notification::new(client_id.clone(), level, title, message))
            .await;
    }
}
