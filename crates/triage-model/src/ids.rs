//! Identifier newtypes
//!
//! Node, action and execution ids are ULIDs so they sort by creation time.
//! Correlation ids arrive from the caller as opaque strings; pattern ids are
//! derived from the error signature so that the same signature always maps
//! to the same stored record.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new id
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(
    /// Dependency graph node identifier
    NodeId
);

ulid_id!(
    /// Remediation action identifier
    ActionId
);

ulid_id!(
    /// Remediation execution identifier
    ExecutionId
);

/// Identifier tying together every artifact produced for one error occurrence
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap a caller-supplied correlation id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random correlation id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id carries no characters besides whitespace
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Stored error pattern identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    /// Wrap an explicit pattern id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a stable id from an error signature
    ///
    /// The same `(service, error_type, signature)` triple always yields the
    /// same id (first 16 hex chars of a Blake3 digest).
    #[must_use]
    pub fn derive(service_name: &str, error_type: &str, signature: &[String]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(service_name.as_bytes());
        hasher.update(&[0]);
        hasher.update(error_type.as_bytes());
        for token in signature {
            hasher.update(&[0]);
            hasher.update(token.as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..16].to_string())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatternId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn node_ids_are_unique() {
        assert_ne!(NodeId::new(), NodeId::new());
    }

    #[test]
    fn pattern_id_derivation_is_stable() {
        let sig = vec!["connection".to_string(), "refused".to_string()];
        let a = PatternId::derive("orders", "SocketException", &sig);
        let b = PatternId::derive("orders", "SocketException", &sig);
        let c = PatternId::derive("billing", "SocketException", &sig);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }

    proptest! {
        #[test]
        fn prop_derived_ids_depend_only_on_inputs(
            service in "[a-z]{1,12}",
            error_type in "[A-Za-z]{1,20}",
            signature in prop::collection::vec("[a-z]{1,8}", 0..6),
        ) {
            let a = PatternId::derive(&service, &error_type, &signature);
            let b = PatternId::derive(&service, &error_type, &signature.clone());
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.as_str().len(), 16);
            prop_assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));

            let moved = PatternId::derive(&format!("{service}-x"), &error_type, &signature);
            prop_assert_ne!(a, moved);
        }
    }

    #[test]
    fn blank_correlation_id() {
        assert!(CorrelationId::new("  ").is_blank());
        assert!(!CorrelationId::generate().is_blank());
    }
}
