//! Error types for purchase orchestration.
//!
//! Collaborator failures ([`BackendError`], [`StoreError`]) are mapped into
//! the caller-facing [`PurchaseError`] and [`RefundError`] before they leave
//! the crate. User cancellation and deferred approval are outcomes, not
//! errors, see [`PurchaseOutcome`].

use common::{EntitlementId, OfferId, ProductId};
use thiserror::Error;

use crate::transaction::PurchaseOutcome;

/// Failures reported by the entitlement backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not validate the submitted transaction.
    #[error("Receipt missing or invalid: {0}")]
    InvalidReceipt(String),

    /// The request never reached the backend or timed out.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a 5xx-class failure.
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// The backend is throttling this client.
    #[error("Rate limited by backend")]
    RateLimited,
}

impl BackendError {
    /// Returns true if a later retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, BackendError::InvalidReceipt(_))
    }
}

/// Errors raised by the platform's native store layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The user dismissed the purchase sheet.
    #[error("Purchase cancelled by the user")]
    UserCancelled,

    /// Purchases are disabled on this device.
    #[error("Payments are not allowed on this device")]
    PaymentNotAllowed,

    /// The store does not offer the product.
    #[error("Product not available for purchase: {0}")]
    ProductUnavailable(ProductId),

    /// The platform could not verify the transaction signature.
    #[error("Transaction failed verification: {0}")]
    Unverified(String),

    /// The platform only supports one such request at a time.
    #[error("Another request is already in progress")]
    AlreadyInProgress,

    /// The running OS version lacks the requested API.
    #[error("Not supported on this platform version")]
    Unsupported,

    /// Any other native failure.
    #[error("Store error: {0}")]
    Unknown(String),
}

/// Failures obtaining a signed promotional offer authorization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfferSignError {
    /// The subscriber is not eligible for the offer.
    #[error("Not eligible for offer {offer_id} on {product_id}: {reason}")]
    Ineligible {
        product_id: ProductId,
        offer_id: OfferId,
        reason: String,
    },

    /// The signing request failed in transit.
    #[error("Network error while signing offer: {0}")]
    Network(String),

    /// The backend answered with an unusable signature payload.
    #[error("Malformed offer signature response: {0}")]
    MalformedResponse(String),
}

/// Errors delivered to purchase callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurchaseError {
    /// The request was rejected before anything was attempted.
    #[error("Invalid purchase request: {0}")]
    InvalidRequest(String),

    /// Another purchase of the same product is in flight.
    #[error("A purchase of {0} is already in progress")]
    AlreadyInProgress(ProductId),

    /// The promotional offer could not be signed; no purchase was issued.
    #[error("Could not authorize discount: {0}")]
    DiscountAuthorization(OfferSignError),

    /// A transient failure talking to the backend.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected the transaction's receipt.
    #[error("Receipt missing or invalid: {0}")]
    InvalidReceipt(String),

    /// The platform returned a transaction that failed verification.
    #[error("Transaction failed verification: {0}")]
    VerificationFailed(String),

    /// The platform cannot perform the request on this OS version.
    #[error("Not supported on this platform: {0}")]
    PlatformUnsupported(String),

    /// An unclassified native store failure.
    #[error("Store error: {0}")]
    Native(String),

    /// The orchestrator lost track of a completion.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PurchaseError {
    /// Returns true if retrying the purchase later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PurchaseError::Network(_)
                | PurchaseError::DiscountAuthorization(OfferSignError::Network(_))
        )
    }

    /// Returns true if the failure came from an ineligible promotional offer.
    pub fn is_offer_ineligible(&self) -> bool {
        matches!(
            self,
            PurchaseError::DiscountAuthorization(OfferSignError::Ineligible { .. })
        )
    }
}

impl From<BackendError> for PurchaseError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidReceipt(message) => PurchaseError::InvalidReceipt(message),
            BackendError::Network(message) => PurchaseError::Network(message),
            other => PurchaseError::Network(other.to_string()),
        }
    }
}

/// Maps a native failure into the caller-facing outcome.
///
/// A user cancellation resolves successfully with
/// [`PurchaseOutcome::Cancelled`]; everything else becomes an error.
pub fn store_failure_outcome(err: StoreError) -> Result<PurchaseOutcome, PurchaseError> {
    match err {
        StoreError::UserCancelled => Ok(PurchaseOutcome::Cancelled),
        StoreError::Unverified(reason) => Err(PurchaseError::VerificationFailed(reason)),
        StoreError::Unsupported => Err(PurchaseError::PlatformUnsupported(err.to_string())),
        StoreError::PaymentNotAllowed
        | StoreError::ProductUnavailable(_)
        | StoreError::AlreadyInProgress
        | StoreError::Unknown(_) => Err(PurchaseError::Native(err.to_string())),
    }
}

/// Errors delivered to refund callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefundError {
    /// The platform has no transaction on record for the product.
    #[error("No transaction found for product {0}")]
    NoTransactionForProduct(ProductId),

    /// The cached snapshot has no active transaction backing the entitlement.
    #[error("No active transaction for entitlement {0}")]
    NoActiveTransaction(EntitlementId),

    /// The cached snapshot has no active entitlement.
    #[error("No active entitlement found")]
    NoActiveEntitlement,

    /// More than one entitlement is active, so "the" active one is ambiguous.
    #[error("Multiple active entitlements found; refund a specific entitlement instead")]
    MultipleActiveEntitlements,

    /// The platform is already showing a refund sheet.
    #[error("A refund request is already in progress")]
    AlreadyInProgress,

    /// Refund requests need a newer OS version.
    #[error("Refund requests are not supported on this platform version")]
    PlatformUnsupported,
}
