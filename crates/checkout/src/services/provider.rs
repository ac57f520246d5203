//! Flight and hotel provider trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::{IdempotencyKey, ReservationId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::RemoteError;

/// Confirmation request sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub external_ref_id: String,
    /// Bank transaction reference of the approved payment.
    pub transaction_id: String,
}

/// What a provider returns for a confirmed booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReceipt {
    pub confirmed_id: Option<String>,
}

/// Cancellation request sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Provider-side booking id.
    pub external_ref_id: String,
    pub reservation_id: Option<ReservationId>,
    pub origin: String,
    pub reason: String,
}

/// Trait for an airline or hotel booking provider.
///
/// Both calls are idempotent for a repeated key.
#[async_trait]
pub trait BookingProvider: Send + Sync {
    /// Confirms a held booking against a paid transaction.
    async fn confirm(
        &self,
        request: &ConfirmRequest,
        key: &IdempotencyKey,
    ) -> Result<ConfirmReceipt, RemoteError>;

    /// Cancels a confirmed booking.
    async fn cancel(&self, request: &CancelRequest, key: &IdempotencyKey)
    -> Result<(), RemoteError>;
}

#[derive(Debug, Default)]
struct InMemoryProviderState {
    confirm_calls: Vec<ConfirmRequest>,
    cancel_calls: Vec<CancelRequest>,
    receipts: HashMap<IdempotencyKey, ConfirmReceipt>,
    cancelled_keys: HashSet<IdempotencyKey>,
    failing_refs: HashSet<String>,
    fail_all: Option<RemoteError>,
    next_id: u32,
}

/// In-memory booking provider.
#[derive(Debug, Clone)]
pub struct InMemoryBookingProvider {
    id_prefix: String,
    state: Arc<RwLock<InMemoryProviderState>>,
}

impl InMemoryBookingProvider {
    /// Creates a provider that hands out confirmation ids like `AV-0001`.
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            state: Arc::default(),
        }
    }

    /// Airline provider.
    pub fn flights() -> Self {
        Self::new("AV")
    }

    /// Hotel provider.
    pub fn hotels() -> Self {
        Self::new("HT")
    }

    /// Makes confirmations for `external_ref_id` fail with a 409.
    pub async fn fail_confirmations_for(&self, external_ref_id: &str) {
        self.state
            .write()
            .await
            .failing_refs
            .insert(external_ref_id.to_string());
    }

    /// Makes every call fail with the given error.
    pub async fn set_fail_all(&self, error: Option<RemoteError>) {
        self.state.write().await.fail_all = error;
    }

    /// Returns every confirm request received, in order.
    pub async fn confirm_calls(&self) -> Vec<ConfirmRequest> {
        self.state.read().await.confirm_calls.clone()
    }

    /// Returns every cancel request received, in order.
    pub async fn cancel_calls(&self) -> Vec<CancelRequest> {
        self.state.read().await.cancel_calls.clone()
    }
}

#[async_trait]
impl BookingProvider for InMemoryBookingProvider {
    async fn confirm(
        &self,
        request: &ConfirmRequest,
        key: &IdempotencyKey,
    ) -> Result<ConfirmReceipt, RemoteError> {
        let mut state = self.state.write().await;
        state.confirm_calls.push(request.clone());

        if let Some(ref error) = state.fail_all {
            return Err(error.clone());
        }
        if state.failing_refs.contains(&request.external_ref_id) {
            return Err(RemoteError::Client {
                status: 409,
                message: format!("{} can no longer be confirmed", request.external_ref_id),
                data: None,
            });
        }
        if let Some(receipt) = state.receipts.get(key) {
            return Ok(receipt.clone());
        }

        state.next_id += 1;
        let receipt = ConfirmReceipt {
            confirmed_id: Some(format!("{}-{:04}", self.id_prefix, state.next_id)),
        };
        state.receipts.insert(key.clone(), receipt.clone());
        Ok(receipt)
    }

    async fn cancel(
        &self,
        request: &CancelRequest,
        key: &IdempotencyKey,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.write().await;
        state.cancel_calls.push(request.clone());

        if let Some(ref error) = state.fail_all {
            return Err(error.clone());
        }
        state.cancelled_keys.insert(key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirm(reference: &str) -> ConfirmRequest {
        ConfirmRequest {
            external_ref_id: reference.to_string(),
            transaction_id: "REF1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent_per_key() {
        let provider = InMemoryBookingProvider::flights();
        let key = IdempotencyKey::generate("booking-confirm");

        let first = provider.confirm(&confirm("PNR-1"), &key).await.unwrap();
        let second = provider.confirm(&confirm("PNR-1"), &key).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.confirmed_id.as_deref(), Some("AV-0001"));
        assert_eq!(provider.confirm_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_reference() {
        let provider = InMemoryBookingProvider::hotels();
        provider.fail_confirmations_for("HT-BAD").await;

        let bad = provider
            .confirm(&confirm("HT-BAD"), &IdempotencyKey::generate("booking-confirm"))
            .await;
        assert!(matches!(bad, Err(RemoteError::Client { status: 409, .. })));

        let good = provider
            .confirm(&confirm("HT-OK"), &IdempotencyKey::generate("booking-confirm"))
            .await;
        assert!(good.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_records_request() {
        let provider = InMemoryBookingProvider::flights();
        let request = CancelRequest {
            external_ref_id: "AV-0001".to_string(),
            reservation_id: Some(ReservationId::new("RES-1")),
            origin: "customer".to_string(),
            reason: "change of plans".to_string(),
        };

        provider
            .cancel(&request, &IdempotencyKey::generate("booking-cancel"))
            .await
            .unwrap();
        assert_eq!(provider.cancel_calls().await, vec![request]);
    }
}
