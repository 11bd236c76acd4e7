//! Collaborator traits and in-memory implementations.
//!
//! Each native or remote collaborator is injected into the orchestrator
//! through one of these traits; the `InMemory*` types back the tests and
//! the sandbox server.

pub mod backend;
pub mod cache;
pub mod code_presenter;
pub mod payment_queue;
pub mod refund_sheet;
pub mod transaction_stream;

pub use backend::{
    Backend, InMemoryBackend, OfferSignatureRequest, OfferSignatureResponse, SubmissionRequest,
};
pub use cache::{EntitlementCache, InMemoryEntitlementCache};
pub use code_presenter::{CodeRedemptionPresenter, InMemoryCodeRedemptionPresenter};
pub use payment_queue::{InMemoryPaymentQueue, PaymentQueue};
pub use refund_sheet::{InMemoryRefundSheet, RefundSheet, RefundSheetResponse};
pub use transaction_stream::{InMemoryTransactionStream, TransactionStream, TransactionUpdates};
