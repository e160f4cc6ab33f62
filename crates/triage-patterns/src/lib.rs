//! # Triage Patterns
//!
//! Durable catalog of learned error patterns and classification against it.
//!
//! - [`PatternBackend`]: the external key/value contract (`patterns/{service}/{id}`)
//! - [`RemotePatternStore`]: connection state machine, bounded cache, retention
//! - [`PatternClassifier`]: similarity matching and per-node error probability
//! - [`PatternLearner`]: records occurrences and remediation outcomes

#![warn(unreachable_pub)]

pub mod backend;
pub mod cache;
pub mod classifier;
pub mod error;
pub mod learning;
pub mod store;

pub use backend::{id_from_key, pattern_key, service_prefix, InMemoryBackend, PatternBackend, KEY_PREFIX};
pub use cache::PatternCache;
pub use classifier::{
    categorize_error_type, error_probability, ClassifierConfig, ErrorClassifier, PatternClassifier, Similarity,
};
pub use error::{BackendError, ClassificationError, StoreError};
pub use learning::PatternLearner;
pub use store::{ConnectionState, PatternStore, RemotePatternStore, StoreConfig};
