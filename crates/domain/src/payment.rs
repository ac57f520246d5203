//! Payment attempt state machine.

use chrono::{DateTime, Utc};
use common::{ClientId, PaymentAttemptId, ReservationId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Currency, Money};

/// The state of a payment attempt.
///
/// State transitions:
/// ```text
/// Initiated ──► Pending ──┬──► Approved
///     │            │      └──► Rejected
///     └────────────┴─────────► Expired (display only)
/// ```
///
/// `Initiated` may also jump straight to `Approved`/`Rejected` when the bank
/// answers before the redirect is recorded. No state is re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentAttemptState {
    /// Created by the gateway, customer not yet handed over.
    #[default]
    Initiated,

    /// Customer sent to the bank, awaiting a result.
    Pending,

    /// Bank approved the payment (terminal).
    Approved,

    /// Bank rejected the payment (terminal).
    Rejected,

    /// Deadline passed without a result (terminal).
    Expired,
}

impl PaymentAttemptState {
    /// Returns true if a bank result can still be applied.
    pub fn awaiting_result(&self) -> bool {
        matches!(
            self,
            PaymentAttemptState::Initiated | PaymentAttemptState::Pending
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !self.awaiting_result()
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentAttemptState::Initiated => "INITIATED",
            PaymentAttemptState::Pending => "PENDING",
            PaymentAttemptState::Approved => "APPROVED",
            PaymentAttemptState::Rejected => "REJECTED",
            PaymentAttemptState::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for PaymentAttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Something that happened to a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentEvent {
    /// The customer was handed the bank URL.
    RedirectIssued,
    /// The bank reported approval.
    BankApproved,
    /// The bank reported rejection.
    BankRejected,
    /// The bank reported the payment as still in progress.
    BankPending,
    /// `expires_at` passed with no result.
    DeadlinePassed,
}

impl PaymentEvent {
    /// The state this event leads to.
    pub fn target_state(&self) -> PaymentAttemptState {
        match self {
            PaymentEvent::RedirectIssued | PaymentEvent::BankPending => {
                PaymentAttemptState::Pending
            }
            PaymentEvent::BankApproved => PaymentAttemptState::Approved,
            PaymentEvent::BankRejected => PaymentAttemptState::Rejected,
            PaymentEvent::DeadlinePassed => PaymentAttemptState::Expired,
        }
    }
}

/// Error returned for a transition the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid payment transition: cannot apply {event:?} in state {from}")]
pub struct PaymentTransitionError {
    pub from: PaymentAttemptState,
    pub event: PaymentEvent,
}

/// Pure transition function for payment attempts.
pub fn transition(
    state: PaymentAttemptState,
    event: PaymentEvent,
) -> Result<PaymentAttemptState, PaymentTransitionError> {
    use PaymentAttemptState::*;
    use PaymentEvent::*;

    match (state, event) {
        (Initiated, RedirectIssued) => Ok(Pending),
        (Initiated, BankPending) => Ok(Pending),
        (Initiated | Pending, BankApproved) => Ok(Approved),
        (Initiated | Pending, BankRejected) => Ok(Rejected),
        (Initiated | Pending, DeadlinePassed) => Ok(Expired),
        (from, event) => Err(PaymentTransitionError { from, event }),
    }
}

/// A payment attempt created by the checkout initiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: PaymentAttemptId,
    pub client_id: ClientId,
    pub reservation_id: Option<ReservationId>,
    pub order_id: Option<String>,
    pub total_amount: Money,
    pub currency: Currency,
    pub bank_payment_url: String,
    /// Advisory deadline, only consulted for display.
    pub expires_at: DateTime<Utc>,
    pub state: PaymentAttemptState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    /// Applies an event, moving the attempt to its next state.
    pub fn apply(
        &mut self,
        event: PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<PaymentAttemptState, PaymentTransitionError> {
        let next = transition(self.state, event)?;
        self.state = next;
        self.updated_at = now;
        Ok(next)
    }

    /// Returns true if `event` would lead to the state the attempt is already in.
    pub fn already_reached(&self, event: PaymentEvent) -> bool {
        self.state == event.target_state()
    }

    /// Returns true if the advisory deadline has passed.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// State to show the customer.
    ///
    /// An attempt still waiting on the bank after its deadline is shown as
    /// `Expired`; the stored state is left alone.
    pub fn display_state(&self, now: DateTime<Utc>) -> PaymentAttemptState {
        if self.state.awaiting_result() && self.is_past_deadline(now) {
            PaymentAttemptState::Expired
        } else {
            self.state
        }
    }
}
