//! Key/value backing store contract
//!
//! Pattern records are stored as JSON under `patterns/{service}/{id}`.

use crate::error::BackendError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use triage_model::PatternId;

/// Prefix shared by every pattern key
pub const KEY_PREFIX: &str = "patterns/";

/// Key for a pattern record
#[must_use]
pub fn pattern_key(service_name: &str, id: &PatternId) -> String {
    format!("{KEY_PREFIX}{service_name}/{id}")
}

/// Key prefix for every pattern of a service
#[must_use]
pub fn service_prefix(service_name: &str) -> String {
    format!("{KEY_PREFIX}{service_name}/")
}

/// Pattern id encoded in a key
#[must_use]
pub fn id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(KEY_PREFIX)?.rsplit_once('/').map(|(_, id)| id)
}

/// External key/value store
#[async_trait]
pub trait PatternBackend: Send + Sync {
    /// Value at a key
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Set a key, overwriting
    async fn set(&self, key: &str, value: String) -> Result<(), BackendError>;

    /// Delete a key; `true` if it existed
    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    /// Keys with a prefix, sorted
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BackendError>;

    /// Liveness probe
    async fn ping(&self) -> Result<(), BackendError>;
}

/// Process-local [`PatternBackend`]
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryBackend {
    /// Empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl PatternBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let id = PatternId::new("abc");
        let key = pattern_key("orders", &id);
        assert_eq!(key, "patterns/orders/abc");
        assert!(key.starts_with(&service_prefix("orders")));
        assert_eq!(id_from_key(&key), Some("abc"));
        assert_eq!(id_from_key("other/orders/abc"), None);
    }

    #[tokio::test]
    async fn prefix_listing() {
        let b = InMemoryBackend::new();
        b.set("patterns/a/1", "x".into()).await.unwrap();
        b.set("patterns/b/2", "y".into()).await.unwrap();
        b.set("zzz", "z".into()).await.unwrap();

        assert_eq!(b.list_keys("patterns/a/").await.unwrap(), vec!["patterns/a/1"]);
        assert_eq!(b.list_keys(KEY_PREFIX).await.unwrap().len(), 2);
        assert!(b.delete("zzz").await.unwrap());
        assert!(!b.delete("zzz").await.unwrap());
    }
}
