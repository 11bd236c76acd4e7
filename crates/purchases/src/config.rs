//! Orchestrator configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when a purchase is requested for a product that already has
/// one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePurchasePolicy {
    /// Fail fast with `AlreadyInProgress`.
    Reject,
    /// Attach every duplicate to the in-flight purchase.
    Coalesce,
    /// Attach duplicates from the same caller; reject other callers.
    #[default]
    CoalesceSameCaller,
}

impl DuplicatePurchasePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePurchasePolicy::Reject => "reject",
            DuplicatePurchasePolicy::Coalesce => "coalesce",
            DuplicatePurchasePolicy::CoalesceSameCaller => "coalesce-same-caller",
        }
    }
}

impl FromStr for DuplicatePurchasePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(DuplicatePurchasePolicy::Reject),
            "coalesce" => Ok(DuplicatePurchasePolicy::Coalesce),
            "coalesce-same-caller" => Ok(DuplicatePurchasePolicy::CoalesceSameCaller),
            other => Err(format!("unknown duplicate purchase policy: {other}")),
        }
    }
}

impl std::fmt::Display for DuplicatePurchasePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Orchestrator settings.
///
/// Reads from environment variables:
/// - `PURCHASES_OBSERVER_MODE` — `true` to leave finishing transactions to
///   another system (default: `false`)
/// - `PURCHASES_DUPLICATE_POLICY` — `reject`, `coalesce` or
///   `coalesce-same-caller` (default)
/// - `PURCHASES_BACKEND_TIMEOUT_MS` — deadline for backend calls (default: none)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PurchasesConfig {
    pub observer_mode: bool,
    pub duplicate_policy: DuplicatePurchasePolicy,
    pub backend_timeout: Option<Duration>,
}

impl PurchasesConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            observer_mode: std::env::var("PURCHASES_OBSERVER_MODE")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            duplicate_policy: std::env::var("PURCHASES_DUPLICATE_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            backend_timeout: std::env::var("PURCHASES_BACKEND_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis),
        }
    }

    pub fn with_observer_mode(mut self, observer_mode: bool) -> Self {
        self.observer_mode = observer_mode;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePurchasePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    /// Returns true if the orchestrator acknowledges transactions itself.
    pub fn finishes_transactions(&self) -> bool {
        !self.observer_mode
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
