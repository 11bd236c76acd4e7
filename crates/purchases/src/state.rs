//! Native transaction states.

use serde::{Deserialize, Serialize};

/// The state a native source reports for a transaction.
///
/// ```text
/// Deferred ──► Purchased | Failed
/// Purchased, Restored, Failed, Cancelled   (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Payment went through.
    Purchased,

    /// Payment failed; the transaction carries the native error.
    Failed,

    /// A previous purchase was restored onto this device.
    Restored,

    /// Waiting for external approval (e.g. parental consent).
    Deferred,

    /// The user backed out of the purchase.
    Cancelled,
}

impl TransactionState {
    /// Returns true if no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Deferred)
    }

    /// Returns true if the transaction should be submitted to the backend.
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionState::Purchased | TransactionState::Restored)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Purchased => "purchased",
            TransactionState::Failed => "failed",
            TransactionState::Restored => "restored",
            TransactionState::Deferred => "deferred",
            TransactionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransactionState::Purchased.is_terminal());
        assert!(TransactionState::Failed.is_terminal());
        assert!(TransactionState::Restored.is_terminal());
        assert!(TransactionState::Cancelled.is_terminal());
        assert!(!TransactionState::Deferred.is_terminal());
    }

    #[test]
    fn test_success_states() {
        assert!(TransactionState::Purchased.is_success());
        assert!(TransactionState::Restored.is_success());
        assert!(!TransactionState::Failed.is_success());
        assert!(!TransactionState::Deferred.is_success());
        assert!(!TransactionState::Cancelled.is_success());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&TransactionState::Restored).unwrap();
        assert_eq!(json, "\"restored\"");
        let back: TransactionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TransactionState::Restored);
    }
}
