//! Native refund request surface and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::{ProductId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// What the platform's refund sheet reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundSheetResponse {
    Success,
    UserCancelled,
    AlreadyInProgress,
    UnsupportedPlatformVersion,
}

/// Platform refund request surface.
#[async_trait]
pub trait RefundSheet: Send + Sync {
    /// Returns the platform's latest transaction for a product.
    async fn latest_transaction(&self, product_id: &ProductId) -> Option<TransactionId>;

    /// Presents the refund sheet for a transaction and waits for the user.
    async fn begin_refund_request(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<RefundSheetResponse, StoreError>;
}

#[derive(Debug, Default)]
struct InMemoryRefundState {
    latest: HashMap<ProductId, TransactionId>,
    requests: Vec<TransactionId>,
    response: Option<Result<RefundSheetResponse, StoreError>>,
}

/// In-memory refund sheet for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRefundSheet {
    state: Arc<RwLock<InMemoryRefundState>>,
}

impl InMemoryRefundSheet {
    /// Creates a sheet that answers `Success` by default.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryRefundState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryRefundState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `transaction_id` as the latest transaction for `product_id`.
    pub fn set_latest_transaction(
        &self,
        product_id: impl Into<ProductId>,
        transaction_id: impl Into<TransactionId>,
    ) {
        self.write()
            .latest
            .insert(product_id.into(), transaction_id.into());
    }

    /// Answers every refund request with `response`.
    pub fn stub_response(&self, response: Result<RefundSheetResponse, StoreError>) {
        self.write().response = Some(response);
    }

    /// Returns the number of refund sheets presented.
    pub fn request_count(&self) -> usize {
        self.read().requests.len()
    }

    /// Returns the most recent transaction a refund was requested for.
    pub fn last_request(&self) -> Option<TransactionId> {
        self.read().requests.last().cloned()
    }
}

#[async_trait]
impl RefundSheet for InMemoryRefundSheet {
    async fn latest_transaction(&self, product_id: &ProductId) -> Option<TransactionId> {
        self.read().latest.get(product_id).cloned()
    }

    async fn begin_refund_request(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<RefundSheetResponse, StoreError> {
        let mut state = self.write();
        state.requests.push(transaction_id.clone());
        state
            .response
            .clone()
            .unwrap_or(Ok(RefundSheetResponse::Success))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_transaction_lookup() {
        let sheet = InMemoryRefundSheet::new();
        sheet.set_latest_transaction("sub.monthly", "T1");

        assert_eq!(
            sheet.latest_transaction(&ProductId::new("sub.monthly")).await,
            Some(TransactionId::new("T1"))
        );
        assert!(
            sheet
                .latest_transaction(&ProductId::new("sub.yearly"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_default_and_stubbed_response() {
        let sheet = InMemoryRefundSheet::new();
        let tx = TransactionId::new("T1");

        assert_eq!(
            sheet.begin_refund_request(&tx).await,
            Ok(RefundSheetResponse::Success)
        );

        sheet.stub_response(Ok(RefundSheetResponse::AlreadyInProgress));
        assert_eq!(
            sheet.begin_refund_request(&tx).await,
            Ok(RefundSheetResponse::AlreadyInProgress)
        );
        assert_eq!(sheet.request_count(), 2);
        assert_eq!(sheet.last_request(), Some(tx));
    }
}
