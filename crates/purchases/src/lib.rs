//! Purchase orchestration for in-app purchases.
//!
//! The [`PurchasesOrchestrator`] sits between two generations of native
//! transaction source and a remote entitlement backend:
//!
//! - the legacy payment queue, which reports transaction state through a
//!   delegate callback and redelivers anything left unfinished
//! - the stream source, whose purchase call returns a verified transaction
//!   and whose update sequence reports everything else
//!
//! Both feed a single submission path that posts each transaction to the
//! backend at most once per process, caches the returned entitlement
//! snapshot, acknowledges the transaction and completes the waiting caller.
//! Promotional offer signing ([`OfferSigner`]), refund requests
//! ([`RefundCoordinator`]) and offer code redemption
//! ([`CodeRedemptionRouter`]) sit alongside it.

pub mod code_redemption;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod ledger;
pub mod offers;
pub mod orchestrator;
pub mod refunds;
pub mod services;
pub mod state;
pub mod transaction;

pub use code_redemption::{
    CodeRedemptionRouter, MODERN_REDEMPTION_SHEET_MIN_OS, PlatformInfo, RedemptionSheet,
};
pub use config::{DuplicatePurchasePolicy, PurchasesConfig};
pub use entitlements::{EntitlementInfo, EntitlementSnapshot};
pub use error::{
    BackendError, OfferSignError, PurchaseError, RefundError, StoreError, store_failure_outcome,
};
pub use ledger::{Ledger, PurchaseResult};
pub use offers::{OfferAuthorization, OfferSigner};
pub use orchestrator::PurchasesOrchestrator;
pub use refunds::{RefundCoordinator, RefundScope, RefundStatus};
pub use services::{
    Backend, CodeRedemptionPresenter, EntitlementCache, InMemoryBackend,
    InMemoryCodeRedemptionPresenter, InMemoryEntitlementCache, InMemoryPaymentQueue,
    InMemoryRefundSheet, InMemoryTransactionStream, OfferSignatureRequest, OfferSignatureResponse,
    PaymentQueue, RefundSheet, RefundSheetResponse, SubmissionRequest, TransactionStream,
    TransactionUpdates,
};
pub use state::TransactionState;
pub use transaction::{
    ObservedTransaction, PackageContext, Payment, Price, PurchaseOutcome, PurchaseRequest,
    StreamPurchaseResult, TransactionSource, Verification,
};
