//! Identifier types shared by the purchase orchestration crates.

pub mod types;

pub use types::{AppUserId, CallerId, EntitlementId, OfferId, ProductId, TransactionId};
