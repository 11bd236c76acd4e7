//! Transaction values exchanged with the native sources and with callers.

use chrono::{DateTime, Utc};
use common::{AppUserId, CallerId, OfferId, ProductId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::entitlements::EntitlementSnapshot;
use crate::error::StoreError;
use crate::offers::OfferAuthorization;
use crate::state::TransactionState;

/// Which native mechanism delivers a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    /// Callback-driven payment queue that needs explicit finishing.
    LegacyQueue,
    /// Async sequence of verified transactions.
    Stream,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::LegacyQueue => "legacy_queue",
            TransactionSource::Stream => "stream",
        }
    }
}

impl std::fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verification tag attached by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Verification {
    #[default]
    Verified,
    Unverified(String),
}

/// Localized price metadata forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Price in millionths of the currency unit.
    pub amount_micros: i64,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl Price {
    pub fn new(amount_micros: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_micros,
            currency: currency.into(),
        }
    }
}

/// A transaction as reported by either native source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTransaction {
    pub transaction_id: TransactionId,
    pub product_id: ProductId,
    pub purchase_date: DateTime<Utc>,
    pub state: TransactionState,
    #[serde(default)]
    pub verification: Verification,
    #[serde(default)]
    pub price: Option<Price>,
    /// Native error for `failed` transactions.
    #[serde(skip)]
    pub error: Option<StoreError>,
}

impl ObservedTransaction {
    /// Creates a verified transaction in the `purchased` state.
    pub fn purchased(
        transaction_id: impl Into<TransactionId>,
        product_id: impl Into<ProductId>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            product_id: product_id.into(),
            purchase_date: Utc::now(),
            state: TransactionState::Purchased,
            verification: Verification::Verified,
            price: None,
            error: None,
        }
    }

    /// Creates a transaction in the `failed` state carrying the native error.
    pub fn failed(
        transaction_id: impl Into<TransactionId>,
        product_id: impl Into<ProductId>,
        error: StoreError,
    ) -> Self {
        Self {
            state: TransactionState::Failed,
            error: Some(error),
            ..Self::purchased(transaction_id, product_id)
        }
    }

    pub fn with_state(mut self, state: TransactionState) -> Self {
        self.state = state;
        self
    }

    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_purchase_date(mut self, purchase_date: DateTime<Utc>) -> Self {
        self.purchase_date = purchase_date;
        self
    }

    pub fn unverified(mut self, reason: impl Into<String>) -> Self {
        self.verification = Verification::Unverified(reason.into());
        self
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.verification, Verification::Verified)
    }
}

/// Where a stream-delivered transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamOrigin {
    /// Returned directly by a purchase call.
    Purchase,
    /// Read from the transaction update sequence.
    Updates,
}

/// A successful transaction entering the shared submission path.
#[derive(Debug, Clone)]
pub(crate) enum Observation {
    Legacy(ObservedTransaction),
    Stream {
        transaction: ObservedTransaction,
        origin: StreamOrigin,
    },
}

impl Observation {
    pub(crate) fn source(&self) -> TransactionSource {
        match self {
            Observation::Legacy(_) => TransactionSource::LegacyQueue,
            Observation::Stream { .. } => TransactionSource::Stream,
        }
    }

    pub(crate) fn transaction(&self) -> &ObservedTransaction {
        match self {
            Observation::Legacy(transaction) | Observation::Stream { transaction, .. } => {
                transaction
            }
        }
    }

    /// Legacy deliveries answer the queued purchase for their product; on
    /// the stream only the purchase call's own result does.
    pub(crate) fn resolves_pending(&self) -> bool {
        !matches!(
            self,
            Observation::Stream {
                origin: StreamOrigin::Updates,
                ..
            }
        )
    }

    pub(crate) fn is_restore(&self, observer_mode: bool) -> bool {
        match self {
            Observation::Legacy(transaction) => transaction.state == TransactionState::Restored,
            Observation::Stream {
                origin: StreamOrigin::Purchase,
                ..
            } => false,
            Observation::Stream {
                origin: StreamOrigin::Updates,
                ..
            } => observer_mode,
        }
    }
}

/// Package and offering the product was presented under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageContext {
    pub package_id: String,
    pub offering_id: String,
}

/// A caller-initiated purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub product_id: ProductId,
    #[serde(default)]
    pub package: Option<PackageContext>,
    #[serde(default)]
    pub offer_id: Option<OfferId>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub caller: Option<CallerId>,
}

fn default_quantity() -> u32 {
    1
}

impl PurchaseRequest {
    pub fn new(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            package: None,
            offer_id: None,
            quantity: 1,
            caller: None,
        }
    }

    pub fn with_offer(mut self, offer_id: impl Into<OfferId>) -> Self {
        self.offer_id = Some(offer_id.into());
        self
    }

    pub fn with_package(
        mut self,
        package_id: impl Into<String>,
        offering_id: impl Into<String>,
    ) -> Self {
        self.package = Some(PackageContext {
            package_id: package_id.into(),
            offering_id: offering_id.into(),
        });
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn from_caller(mut self, caller: CallerId) -> Self {
        self.caller = Some(caller);
        self
    }
}

/// What a native purchase call is asked to buy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub product_id: ProductId,
    pub quantity: u32,
    pub app_user_id: AppUserId,
    pub discount: Option<OfferAuthorization>,
}

/// Result of the stream source's purchase call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPurchaseResult {
    Success(ObservedTransaction),
    UserCancelled,
    /// Awaiting external approval.
    Pending,
}

/// How a purchase resolved for the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// The transaction reached the backend.
    ///
    /// `entitlements` is `None` only when the transaction had already been
    /// submitted and nothing was cached yet.
    Completed {
        transaction_id: TransactionId,
        entitlements: Option<EntitlementSnapshot>,
    },
    /// The user backed out; not an error.
    Cancelled,
    /// Waiting for external approval; the transaction will be delivered
    /// again once it is approved.
    Deferred,
}

impl PurchaseOutcome {
    pub(crate) fn completed(
        transaction_id: TransactionId,
        entitlements: Option<EntitlementSnapshot>,
    ) -> Self {
        PurchaseOutcome::Completed {
            transaction_id,
            entitlements,
        }
    }

    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, PurchaseOutcome::Cancelled)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, PurchaseOutcome::Deferred)
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            PurchaseOutcome::Completed { transaction_id, .. } => Some(transaction_id),
            _ => None,
        }
    }

    pub fn entitlements(&self) -> Option<&EntitlementSnapshot> {
        match self {
            PurchaseOutcome::Completed { entitlements, .. } => entitlements.as_ref(),
            _ => None,
        }
    }
}
