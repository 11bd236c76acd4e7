pub mod entitlements;
pub mod health;
pub mod metrics;
pub mod purchases;
pub mod transactions;
