//! Bank payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{ClientId, IdempotencyKey, PaymentAttemptId, ReservationId};
use domain::{BankStatus, Currency, Money, PaymentAttemptState, PaymentOutcome};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::RemoteError;

/// What the gateway needs to start a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub customer_id: ClientId,
    pub customer_name: Option<String>,
    pub total_amount: Money,
    pub currency: Currency,
    pub description: String,
    pub return_url: String,
    pub notification_url: String,
}

/// The gateway's answer to a payment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInitiation {
    pub payment_attempt_id: PaymentAttemptId,
    pub reservation_id: Option<ReservationId>,
    pub order_id: Option<String>,
    pub total_amount: Money,
    pub bank_payment_url: String,
    pub expires_at: DateTime<Utc>,
    pub initial_state: PaymentAttemptState,
}

/// Trait for the bank payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment attempt.
    ///
    /// The gateway deduplicates by `key`: the same key always yields the
    /// same attempt.
    async fn initiate(
        &self,
        request: &PaymentRequest,
        key: &IdempotencyKey,
    ) -> Result<PaymentInitiation, RemoteError>;

    /// Authoritative status of a transaction, keyed by `referencia_transaccion`.
    async fn transaction_status(&self, reference: &str) -> Result<PaymentOutcome, RemoteError>;
}

#[derive(Debug)]
struct GatewayAttempt {
    request: PaymentRequest,
    settled: Option<(BankStatus, DateTime<Utc>)>,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    by_key: HashMap<IdempotencyKey, PaymentInitiation>,
    attempts: HashMap<String, GatewayAttempt>,
    next_id: u32,
    status_lookups: usize,
    fail_on_initiate: Option<RemoteError>,
    fail_on_status: bool,
}

/// In-memory bank gateway.
///
/// Attempt ids are `REF1`, `REF2`, ... and double as the transaction
/// reference the bank reports back.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    base_url: String,
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new("https://bank.example.test")
    }
}

impl InMemoryPaymentGateway {
    /// Creates a gateway whose payment URLs live under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Arc::default(),
        }
    }

    /// Makes `initiate` fail with the given error.
    pub async fn set_fail_on_initiate(&self, error: Option<RemoteError>) {
        self.state.write().await.fail_on_initiate = error;
    }

    /// Makes `transaction_status` fail with a transient 503.
    pub async fn set_fail_on_status(&self, fail: bool) {
        self.state.write().await.fail_on_status = fail;
    }

    /// Simulates the customer finishing at the bank.
    ///
    /// Returns false if the reference is unknown.
    pub async fn settle(&self, reference: &str, status: BankStatus) -> bool {
        let mut state = self.state.write().await;
        match state.attempts.get_mut(reference) {
            Some(attempt) => {
                attempt.settled = Some((status, Utc::now()));
                true
            }
            None => false,
        }
    }

    /// Returns the number of distinct attempts created.
    pub async fn attempt_count(&self) -> usize {
        self.state.read().await.attempts.len()
    }

    /// Returns how many status lookups were made.
    pub async fn status_lookups(&self) -> usize {
        self.state.read().await.status_lookups
    }

    /// Returns the request an attempt was created from.
    pub async fn request_for(&self, reference: &str) -> Option<PaymentRequest> {
        self.state
            .read()
            .await
            .attempts
            .get(reference)
            .map(|a| a.request.clone())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate(
        &self,
        request: &PaymentRequest,
        key: &IdempotencyKey,
    ) -> Result<PaymentInitiation, RemoteError> {
        let mut state = self.state.write().await;

        if let Some(ref error) = state.fail_on_initiate {
            return Err(error.clone());
        }
        if let Some(existing) = state.by_key.get(key) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let reference = format!("REF{}", state.next_id);
        let initiation = PaymentInitiation {
            payment_attempt_id: PaymentAttemptId::new(reference.clone()),
            reservation_id: Some(ReservationId::new(format!("RES-{:04}", state.next_id))),
            order_id: None,
            total_amount: request.total_amount,
            bank_payment_url: format!("{}/pay/{reference}", self.base_url),
            expires_at: Utc::now() + Duration::minutes(30),
            initial_state: PaymentAttemptState::Initiated,
        };

        state.by_key.insert(key.clone(), initiation.clone());
        state.attempts.insert(
            reference,
            GatewayAttempt {
                request: request.clone(),
                settled: None,
            },
        );

        Ok(initiation)
    }

    async fn transaction_status(&self, reference: &str) -> Result<PaymentOutcome, RemoteError> {
        let mut state = self.state.write().await;
        state.status_lookups += 1;

        if state.fail_on_status {
            return Err(RemoteError::Server {
                status: 503,
                message: "status service unavailable".to_string(),
            });
        }

        let attempt = state.attempts.get(reference).ok_or_else(|| RemoteError::Client {
            status: 404,
            message: format!("unknown transaction {reference}"),
            data: None,
        })?;

        let (status, paid_at) = attempt
            .settled
            .unwrap_or((BankStatus::Pending, Utc::now()));
        let response_code = match status {
            BankStatus::Approved => "00",
            BankStatus::Rejected => "51",
            BankStatus::Pending => "09",
        };

        Ok(PaymentOutcome {
            reference: reference.to_string(),
            status,
            amount: attempt.request.total_amount,
            paid_at,
            response_code: response_code.to_string(),
            payment_method: "PSE".to_string(),
            authorization_code: (status == BankStatus::Approved)
                .then(|| format!("AUT-{reference}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            customer_id: ClientId::new("client-1"),
            customer_name: Some("Ana Gómez".to_string()),
            total_amount: Money::new(1_090_000),
            currency: Currency::cop(),
            description: "Trip to Cartagena".to_string(),
            return_url: "https://shop.test/payments/return".to_string(),
            notification_url: "https://shop.test/payments/notifications".to_string(),
        }
    }

    #[tokio::test]
    async fn test_initiate_deduplicates_by_key() {
        let gateway = InMemoryPaymentGateway::default();
        let key = IdempotencyKey::generate("checkout");

        let first = gateway.initiate(&request(), &key).await.unwrap();
        let second = gateway.initiate(&request(), &key).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.payment_attempt_id.as_str(), "REF1");
        assert_eq!(gateway.attempt_count().await, 1);

        let other = gateway
            .initiate(&request(), &IdempotencyKey::generate("checkout"))
            .await
            .unwrap();
        assert_eq!(other.payment_attempt_id.as_str(), "REF2");
    }

    #[tokio::test]
    async fn test_status_reflects_settlement() {
        let gateway = InMemoryPaymentGateway::default();
        let attempt = gateway
            .initiate(&request(), &IdempotencyKey::generate("checkout"))
            .await
            .unwrap();
        let reference = attempt.payment_attempt_id.as_str();

        let pending = gateway.transaction_status(reference).await.unwrap();
        assert_eq!(pending.status, BankStatus::Pending);

        assert!(gateway.settle(reference, BankStatus::Approved).await);
        let approved = gateway.transaction_status(reference).await.unwrap();
        assert_eq!(approved.status, BankStatus::Approved);
        assert_eq!(approved.amount, Money::new(1_090_000));
        assert_eq!(approved.response_code, "00");
        assert_eq!(gateway.status_lookups().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_client_error() {
        let gateway = InMemoryPaymentGateway::default();
        let result = gateway.transaction_status("NOPE").await;
        assert!(matches!(result, Err(RemoteError::Client { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_failures() {
        let gateway = InMemoryPaymentGateway::default();
        gateway
            .set_fail_on_initiate(Some(RemoteError::Network("timeout".to_string())))
            .await;
        assert!(
            gateway
                .initiate(&request(), &IdempotencyKey::generate("checkout"))
                .await
                .is_err()
        );
        assert_eq!(gateway.attempt_count().await, 0);
    }
}
