//! The backend's view of a subscriber's entitlements.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{AppUserId, EntitlementId, ProductId, TransactionId};
use serde::{Deserialize, Serialize};

/// A single entitlement as granted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementInfo {
    pub product_id: ProductId,
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Latest store transaction backing this entitlement.
    #[serde(default)]
    pub latest_transaction_id: Option<TransactionId>,
}

impl EntitlementInfo {
    /// Creates an active, non-expiring entitlement for a product.
    pub fn active(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            is_active: true,
            expires_at: None,
            latest_transaction_id: None,
        }
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<TransactionId>) -> Self {
        self.latest_transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Immutable snapshot of a subscriber's entitlements.
///
/// The orchestrator never edits a snapshot: it stores whatever the backend
/// returned and hands the same value to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    pub app_user_id: AppUserId,
    pub request_date: DateTime<Utc>,
    #[serde(default)]
    pub entitlements: BTreeMap<EntitlementId, EntitlementInfo>,
}

impl EntitlementSnapshot {
    /// Creates a snapshot with no entitlements.
    pub fn empty(app_user_id: impl Into<AppUserId>) -> Self {
        Self {
            app_user_id: app_user_id.into(),
            request_date: Utc::now(),
            entitlements: BTreeMap::new(),
        }
    }

    pub fn with_entitlement(
        mut self,
        entitlement_id: impl Into<EntitlementId>,
        info: EntitlementInfo,
    ) -> Self {
        self.entitlements.insert(entitlement_id.into(), info);
        self
    }

    pub fn entitlement(&self, entitlement_id: &EntitlementId) -> Option<&EntitlementInfo> {
        self.entitlements.get(entitlement_id)
    }

    /// Iterates over active entitlements in identifier order.
    pub fn active(&self) -> impl Iterator<Item = (&EntitlementId, &EntitlementInfo)> {
        self.entitlements.iter().filter(|(_, info)| info.is_active)
    }

    pub fn is_entitled_to(&self, entitlement_id: &EntitlementId) -> bool {
        self.entitlement(entitlement_id)
            .is_some_and(|info| info.is_active)
    }
}
