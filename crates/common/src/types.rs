use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares an opaque string identifier.
///
/// Store identifiers (products, transactions, offers) are assigned by the
/// platform or the backend and are never parsed, only compared and echoed
/// back, so each one is a distinct newtype over `String`.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// The subscriber identity the backend keys entitlements by.
    AppUserId
}

string_id! {
    /// Store product identifier (e.g. `"sub.monthly"`).
    ProductId
}

string_id! {
    /// Platform transaction identifier, stable for the lifetime of the transaction.
    TransactionId
}

string_id! {
    /// Backend entitlement identifier (e.g. `"premium"`).
    EntitlementId
}

string_id! {
    /// Promotional offer identifier configured in the store.
    OfferId
}

/// Identifies the caller context that initiated a purchase.
///
/// Two purchase requests carrying the same caller ID are considered the
/// same logical request when deciding whether to coalesce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(Uuid);

impl CallerId {
    /// Creates a new random caller ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a caller ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CallerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CallerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_id_new_creates_unique_ids() {
        let id1 = CallerId::new();
        let id2 = CallerId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn caller_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = CallerId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn string_ids_compare_by_value() {
        assert_eq!(ProductId::new("sub.monthly"), ProductId::from("sub.monthly"));
        assert_ne!(ProductId::new("sub.monthly"), ProductId::new("sub.yearly"));
        assert!(TransactionId::new("").is_empty());
        assert_eq!(EntitlementId::new("premium").to_string(), "premium");
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let id = TransactionId::new("1000000123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1000000123\"");
        let back: TransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
