//! Refund request routing.
//!
//! A refund targets one transaction. Callers name it indirectly, by product
//! or entitlement, and the coordinator resolves the transaction before
//! presenting the platform's refund sheet.

use common::{AppUserId, EntitlementId, ProductId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::error::{RefundError, StoreError};
use crate::services::cache::EntitlementCache;
use crate::services::refund_sheet::{RefundSheet, RefundSheetResponse};

/// What a refund request is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum RefundScope {
    /// The latest platform transaction for a product.
    Product(ProductId),
    /// The transaction backing an active entitlement in the cached snapshot.
    Entitlement(EntitlementId),
    /// The single active entitlement in the cached snapshot.
    ActiveEntitlement,
}

/// How the user left the refund sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum RefundStatus {
    Success,
    UserCancelled,
    /// The sheet was shown but the platform reported a failure.
    Error(String),
}

pub struct RefundCoordinator<C: EntitlementCache, R: RefundSheet> {
    cache: C,
    sheet: R,
}

impl<C: EntitlementCache, R: RefundSheet> RefundCoordinator<C, R> {
    pub fn new(cache: C, sheet: R) -> Self {
        Self { cache, sheet }
    }

    /// Resolves `scope` to a transaction and presents the refund sheet for it.
    #[tracing::instrument(skip(self))]
    pub async fn begin_refund_request(
        &self,
        scope: &RefundScope,
        app_user_id: &AppUserId,
    ) -> Result<RefundStatus, RefundError> {
        let transaction_id = match self.resolve(scope, app_user_id).await {
            Ok(transaction_id) => transaction_id,
            Err(err) => {
                tracing::warn!(error = %err, "refund target not found");
                metrics::counter!("refund_requests_total", "result" => "unresolved").increment(1);
                return Err(err);
            }
        };

        let result = match self.sheet.begin_refund_request(&transaction_id).await {
            Ok(RefundSheetResponse::Success) => Ok(RefundStatus::Success),
            Ok(RefundSheetResponse::UserCancelled) => Ok(RefundStatus::UserCancelled),
            Ok(RefundSheetResponse::AlreadyInProgress) | Err(StoreError::AlreadyInProgress) => {
                Err(RefundError::AlreadyInProgress)
            }
            Ok(RefundSheetResponse::UnsupportedPlatformVersion) | Err(StoreError::Unsupported) => {
                Err(RefundError::PlatformUnsupported)
            }
            Err(other) => Ok(RefundStatus::Error(other.to_string())),
        };

        let label = match &result {
            Ok(RefundStatus::Success) => "success",
            Ok(RefundStatus::UserCancelled) => "cancelled",
            Ok(RefundStatus::Error(_)) | Err(_) => "error",
        };
        metrics::counter!("refund_requests_total", "result" => label).increment(1);
        tracing::info!(%transaction_id, result = label, "refund request finished");

        result
    }

    async fn resolve(
        &self,
        scope: &RefundScope,
        app_user_id: &AppUserId,
    ) -> Result<TransactionId, RefundError> {
        match scope {
            RefundScope::Product(product_id) => self
                .sheet
                .latest_transaction(product_id)
                .await
                .ok_or_else(|| RefundError::NoTransactionForProduct(product_id.clone())),

            RefundScope::Entitlement(entitlement_id) => {
                let snapshot = self.cache.cached(app_user_id).await;
                snapshot
                    .as_ref()
                    .and_then(|snapshot| snapshot.entitlement(entitlement_id))
                    .filter(|info| info.is_active)
                    .and_then(|info| info.latest_transaction_id.clone())
                    .ok_or_else(|| RefundError::NoActiveTransaction(entitlement_id.clone()))
            }

            RefundScope::ActiveEntitlement => {
                let snapshot = self
                    .cache
                    .cached(app_user_id)
                    .await
                    .ok_or(RefundError::NoActiveEntitlement)?;
                let mut active = snapshot.active();
                let (entitlement_id, info) =
                    active.next().ok_or(RefundError::NoActiveEntitlement)?;
                if active.next().is_some() {
                    return Err(RefundError::MultipleActiveEntitlements);
                }
                info.latest_transaction_id
                    .clone()
                    .ok_or_else(|| RefundError::NoActiveTransaction(entitlement_id.clone()))
            }
        }
    }
}
