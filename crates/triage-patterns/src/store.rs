//! Pattern store
//!
//! [`RemotePatternStore`] fronts an external [`PatternBackend`] with a
//! connection state machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!                                  \--fail--> Disconnected
//! Connected --op failure--> Reconnecting --ping ok--> Connected
//!                                \--attempts exhausted--> Disconnected
//! ```
//!
//! The state lives in a single `watch` channel. Operations issued while
//! `Disconnected` fail fast; while `Connecting` or `Reconnecting` they wait
//! (bounded) for the state to settle. The cache is only consulted while
//! `Connected` and is cleared whenever the connection is lost.

use crate::backend::{id_from_key, pattern_key, service_prefix, PatternBackend, KEY_PREFIX};
use crate::cache::PatternCache;
use crate::error::{BackendError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use triage_model::{BackoffPolicy, ErrorPattern, PatternId};

/// Connection state of a remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected; operations fail fast
    Disconnected,
    /// Initial connection in progress
    Connecting,
    /// Ready
    Connected,
    /// Recovering from a failure
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Timeout for one backend call
    pub op_timeout_ms: u64,
    /// Timeout for the initial connection
    pub connect_timeout_ms: u64,
    /// How long an operation waits for a reconnection to settle
    pub reconnect_wait_ms: u64,
    /// Ping attempts before giving up and disconnecting
    pub max_reconnect_attempts: u32,
    /// Delay between reconnect attempts
    pub backoff: BackoffPolicy,
    /// Cached patterns
    pub cache_capacity: u64,
    /// Cache entry lifetime
    pub cache_ttl_secs: u64,
    /// Patterns unseen for longer than this are purged
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: 2_000,
            connect_timeout_ms: 5_000,
            reconnect_wait_ms: 5_000,
            max_reconnect_attempts: 5,
            backoff: BackoffPolicy::default(),
            cache_capacity: 10_000,
            cache_ttl_secs: 300,
            retention_days: 30,
        }
    }
}

impl StoreConfig {
    /// With retention period
    #[inline]
    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// With reconnect attempts
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Retention period
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Durable catalog of error patterns
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Pattern by id
    async fn get_pattern(&self, id: &PatternId) -> Result<Option<ErrorPattern>, StoreError>;

    /// Every pattern owned by a service
    async fn get_patterns_by_service(&self, service_name: &str) -> Result<Vec<ErrorPattern>, StoreError>;

    /// Every pattern carrying a tag
    async fn get_patterns_by_tag(&self, tag: &str) -> Result<Vec<ErrorPattern>, StoreError>;

    /// Every pattern in a category
    async fn get_patterns_by_category(&self, category: &str) -> Result<Vec<ErrorPattern>, StoreError>;

    /// Every pattern recorded for an error type, across services
    async fn get_patterns_by_error_type(&self, error_type: &str) -> Result<Vec<ErrorPattern>, StoreError>;

    /// Save, overwriting any record with the same id
    async fn save_pattern(&self, pattern: &ErrorPattern) -> Result<(), StoreError>;

    /// Overwrite an existing record
    async fn update_pattern(&self, pattern: &ErrorPattern) -> Result<(), StoreError>;

    /// Delete a pattern; `true` if it existed
    async fn delete_pattern(&self, id: &PatternId) -> Result<bool, StoreError>;

    /// Number of stored patterns
    async fn pattern_count(&self) -> Result<usize, StoreError>;

    /// Whether the store can currently serve requests
    async fn validate_connection(&self) -> bool;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Delete patterns past the retention period; returns how many
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

struct Inner {
    backend: Arc<dyn PatternBackend>,
    cache: PatternCache,
    state: watch::Sender<ConnectionState>,
    config: StoreConfig,
}

/// [`PatternStore`] over an external [`PatternBackend`]
#[derive(Clone)]
pub struct RemotePatternStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for RemotePatternStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotePatternStore")
            .field("state", &self.state())
            .field("cached", &self.inner.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl RemotePatternStore {
    /// Create a disconnected store; call [`RemotePatternStore::connect`] before use
    #[must_use]
    pub fn new(backend: Arc<dyn PatternBackend>, config: StoreConfig) -> Self {
        let cache = PatternCache::new(config.cache_capacity, Duration::from_secs(config.cache_ttl_secs));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                backend,
                cache,
                state,
                config,
            }),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Establish the connection
    ///
    /// # Errors
    /// [`StoreError::Connectivity`] if the backend does not answer a ping
    /// within the connect timeout.
    pub async fn connect(&self) -> Result<(), StoreError> {
        let started = self.inner.state.send_if_modified(|s| {
            if *s == ConnectionState::Disconnected {
                *s = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return self.ensure_ready("connect").await;
        }

        let timeout = Duration::from_millis(self.inner.config.connect_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.inner.backend.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(StoreError::Connectivity(err.to_string())),
            Err(_) => Err(StoreError::Connectivity(format!("connect timed out after {timeout:?}"))),
        };

        match &result {
            Ok(()) => {
                self.inner.state.send_replace(ConnectionState::Connected);
                info!("pattern store connected");
            }
            Err(err) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                warn!(error = %err, "pattern store connection failed");
            }
        }
        result
    }

    /// Drop the connection; subsequent operations fail fast
    pub fn disconnect(&self) {
        self.inner.state.send_replace(ConnectionState::Disconnected);
        self.inner.cache.invalidate_all();
    }

    async fn ensure_ready(&self, op: &'static str) -> Result<(), StoreError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(StoreError::Connectivity(format!(
                "pattern store is disconnected ({op})"
            ))),
            ConnectionState::Connecting | ConnectionState::Reconnecting => self.wait_until_settled(op).await,
        }
    }

    async fn wait_until_settled(&self, op: &'static str) -> Result<(), StoreError> {
        let mut rx = self.inner.state.subscribe();
        let wait = Duration::from_millis(self.inner.config.reconnect_wait_ms);
        let settled = tokio::time::timeout(
            wait,
            rx.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected)),
        )
        .await
        .map(|r| r.map(|s| *s));

        match settled {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(Ok(_)) => Err(StoreError::Connectivity(format!("pattern store reconnection failed ({op})"))),
            Ok(Err(_)) => Err(StoreError::Connectivity("pattern store state channel closed".to_string())),
            Err(_) => Err(StoreError::Connectivity(format!(
                "timed out after {wait:?} waiting for pattern store ({op})"
            ))),
        }
    }

    fn begin_reconnect(&self) {
        let started = self.inner.state.send_if_modified(|s| {
            if *s == ConnectionState::Connected {
                *s = ConnectionState::Reconnecting;
                true
            } else {
                false
            }
        });
        if started {
            self.inner.cache.invalidate_all();
            metrics::counter!("triage_store_reconnects_total").increment(1);
            tokio::spawn(reconnect(Arc::clone(&self.inner)));
        }
    }

    async fn attempt<T, F, Fut>(&self, f: &F) -> Result<T, BackendError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, BackendError>> + Send,
    {
        tokio::time::timeout(self.inner.config.op_timeout(), f())
            .await
            .unwrap_or(Err(BackendError::Timeout))
    }

    /// Run one backend call under the state machine
    ///
    /// A transport failure while connected triggers reconnection; the call
    /// is retried once if the store comes back within the wait bound.
    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, BackendError>> + Send,
    {
        self.ensure_ready(op).await?;
        match self.attempt(&f).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_transport() => {
                warn!(op, error = %err, "pattern store call failed; reconnecting");
                self.begin_reconnect();
                self.wait_until_settled(op).await?;
                self.attempt(&f).await.map_err(|err| {
                    if err.is_transport() {
                        self.begin_reconnect();
                    }
                    StoreError::from(err)
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn keys_for(&self, id: &PatternId) -> Result<Vec<String>, StoreError> {
        let backend = &*self.inner.backend;
        let keys = self.call("list_keys", move || backend.list_keys(KEY_PREFIX)).await?;
        Ok(keys
            .into_iter()
            .filter(|k| id_from_key(k) == Some(id.as_str()))
            .collect())
    }

    async fn read_key(&self, key: &str) -> Result<Option<ErrorPattern>, StoreError> {
        let backend = &*self.inner.backend;
        let Some(raw) = self.call("get", move || backend.get(key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<ErrorPattern>(&raw) {
            Ok(pattern) => Ok(Some(pattern)),
            Err(err) => Err(StoreError::Backend(BackendError::Corrupt {
                key: key.to_string(),
                reason: err.to_string(),
            })),
        }
    }

    async fn load_all(&self, prefix: &str) -> Result<Vec<ErrorPattern>, StoreError> {
        let backend = &*self.inner.backend;
        let keys = self.call("list_keys", move || backend.list_keys(prefix)).await?;

        let reads = keys.iter().map(|key| async move {
            match self.read_key(key).await {
                Err(StoreError::Backend(BackendError::Corrupt { key, reason })) => {
                    warn!(%key, %reason, "skipping unreadable pattern");
                    Ok(None)
                }
                other => other,
            }
        });
        let patterns: Vec<ErrorPattern> = try_join_all(reads).await?.into_iter().flatten().collect();

        if self.state() == ConnectionState::Connected {
            for pattern in &patterns {
                self.inner.cache.insert(pattern.clone()).await;
            }
        }
        Ok(patterns)
    }

    async fn write(&self, pattern: &ErrorPattern) -> Result<(), StoreError> {
        let key = pattern_key(&pattern.service_name, &pattern.id);
        let value = serde_json::to_string(pattern)?;
        let backend = &*self.inner.backend;

        // an id moving to another service leaves no record behind under the old one
        for stale in self.keys_for(&pattern.id).await?.into_iter().filter(|k| *k != key) {
            let stale = stale.as_str();
            self.call("delete", move || backend.delete(stale)).await?;
        }

        let key = key.as_str();
        let value = value.as_str();
        self.call("set", move || backend.set(key, value.to_string())).await?;
        self.inner.cache.insert(pattern.clone()).await;
        debug!(pattern_id = %pattern.id, service = %pattern.service_name, "pattern saved");
        Ok(())
    }
}

async fn reconnect(inner: Arc<Inner>) {
    let attempts = inner.config.max_reconnect_attempts.max(1);
    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(inner.config.backoff.delay(attempt - 1)).await;
        }
        match tokio::time::timeout(inner.config.op_timeout(), inner.backend.ping()).await {
            Ok(Ok(())) => {
                inner.state.send_replace(ConnectionState::Connected);
                info!(attempt, "pattern store reconnected");
                return;
            }
            Ok(Err(err)) => warn!(attempt, error = %err, "pattern store reconnect attempt failed"),
            Err(_) => warn!(attempt, "pattern store reconnect attempt timed out"),
        }
    }

    inner.state.send_replace(ConnectionState::Disconnected);
    inner.cache.invalidate_all();
    metrics::counter!("triage_store_reconnect_failures_total").increment(1);
    error!(attempts, "pattern store unreachable; giving up");
}

#[async_trait]
impl PatternStore for RemotePatternStore {
    async fn get_pattern(&self, id: &PatternId) -> Result<Option<ErrorPattern>, StoreError> {
        self.ensure_ready("get_pattern").await?;
        if self.state() == ConnectionState::Connected {
            if let Some(hit) = self.inner.cache.get(id).await {
                return Ok(Some(hit));
            }
        }

        let Some(key) = self.keys_for(id).await?.into_iter().next() else {
            return Ok(None);
        };
        let found = self.read_key(&key).await?;
        if let Some(pattern) = &found {
            self.inner.cache.insert(pattern.clone()).await;
        }
        Ok(found)
    }

    async fn get_patterns_by_service(&self, service_name: &str) -> Result<Vec<ErrorPattern>, StoreError> {
        self.load_all(&service_prefix(service_name)).await
    }

    async fn get_patterns_by_tag(&self, tag: &str) -> Result<Vec<ErrorPattern>, StoreError> {
        let all = self.load_all(KEY_PREFIX).await?;
        Ok(all.into_iter().filter(|p| p.tags.iter().any(|t| t == tag)).collect())
    }

    async fn get_patterns_by_category(&self, category: &str) -> Result<Vec<ErrorPattern>, StoreError> {
        let all = self.load_all(KEY_PREFIX).await?;
        Ok(all
            .into_iter()
            .filter(|p| p.category.eq_ignore_ascii_case(category))
            .collect())
    }

    async fn get_patterns_by_error_type(&self, error_type: &str) -> Result<Vec<ErrorPattern>, StoreError> {
        let all = self.load_all(KEY_PREFIX).await?;
        Ok(all
            .into_iter()
            .filter(|p| p.error_type.eq_ignore_ascii_case(error_type))
            .collect())
    }

    async fn save_pattern(&self, pattern: &ErrorPattern) -> Result<(), StoreError> {
        self.write(pattern).await
    }

    async fn update_pattern(&self, pattern: &ErrorPattern) -> Result<(), StoreError> {
        if self.keys_for(&pattern.id).await?.is_empty() {
            return Err(StoreError::NotFound(pattern.id.clone()));
        }
        self.write(pattern).await
    }

    async fn delete_pattern(&self, id: &PatternId) -> Result<bool, StoreError> {
        let backend = &*self.inner.backend;
        let mut deleted = false;
        for key in self.keys_for(id).await? {
            let key = key.as_str();
            deleted |= self.call("delete", move || backend.delete(key)).await?;
        }
        self.inner.cache.invalidate(id).await;
        Ok(deleted)
    }

    async fn pattern_count(&self) -> Result<usize, StoreError> {
        let backend = &*self.inner.backend;
        Ok(self.call("list_keys", move || backend.list_keys(KEY_PREFIX)).await?.len())
    }

    async fn validate_connection(&self) -> bool {
        let backend = &*self.inner.backend;
        self.call("ping", move || backend.ping()).await.is_ok()
    }

    fn connection_state(&self) -> ConnectionState {
        self.state()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let retention = self.inner.config.retention();
        let expired: Vec<PatternId> = self
            .load_all(KEY_PREFIX)
            .await?
            .into_iter()
            .filter(|p| p.is_expired(now, retention))
            .map(|p| p.id)
            .collect();

        let mut purged = 0;
        for id in &expired {
            if self.delete_pattern(id).await? {
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, retention_days = self.inner.config.retention_days, "expired patterns purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn pattern(id: &str, service: &str) -> ErrorPattern {
        ErrorPattern::new(PatternId::new(id), service, "TimeoutException", "Timeout", Utc::now())
            .with_tags(["sql"])
    }

    async fn connected() -> RemotePatternStore {
        let store = RemotePatternStore::new(Arc::new(InMemoryBackend::new()), StoreConfig::default());
        store.connect().await.unwrap();
        store
    }

    #[tokio::test]
    async fn disconnected_store_fails_fast() {
        let store = RemotePatternStore::new(Arc::new(InMemoryBackend::new()), StoreConfig::default());
        assert_eq!(store.connection_state(), ConnectionState::Disconnected);
        let err = store.get_pattern(&PatternId::new("x")).await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(!store.validate_connection().await);
    }

    #[tokio::test]
    async fn save_twice_keeps_one_record() {
        let store = connected().await;
        let mut p = pattern("p1", "orders");
        store.save_pattern(&p).await.unwrap();
        p.occurrence_count = 7;
        store.save_pattern(&p).await.unwrap();

        assert_eq!(store.pattern_count().await.unwrap(), 1);
        assert_eq!(store.get_pattern(&p.id).await.unwrap(), Some(p));
    }

    #[tokio::test]
    async fn moving_service_replaces_old_key() {
        let store = connected().await;
        let mut p = pattern("p1", "orders");
        store.save_pattern(&p).await.unwrap();
        p.service_name = "billing".into();
        store.save_pattern(&p).await.unwrap();

        assert_eq!(store.pattern_count().await.unwrap(), 1);
        assert!(store.get_patterns_by_service("orders").await.unwrap().is_empty());
        assert_eq!(store.get_patterns_by_service("billing").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_requires_existing() {
        let store = connected().await;
        let p = pattern("p1", "orders");
        assert_eq!(
            store.update_pattern(&p).await.unwrap_err(),
            StoreError::NotFound(p.id.clone())
        );
        store.save_pattern(&p).await.unwrap();
        store.update_pattern(&p).await.unwrap();
    }

    #[tokio::test]
    async fn queries_by_tag_and_category() {
        let store = connected().await;
        store.save_pattern(&pattern("p1", "orders")).await.unwrap();
        store
            .save_pattern(&ErrorPattern::new(PatternId::new("p2"), "billing", "E", "Resource", Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.get_patterns_by_tag("sql").await.unwrap().len(), 1);
        assert_eq!(store.get_patterns_by_category("resource").await.unwrap().len(), 1);
        assert!(store.delete_pattern(&PatternId::new("p2")).await.unwrap());
        assert!(!store.delete_pattern(&PatternId::new("p2")).await.unwrap());
    }

    #[tokio::test]
    async fn purge_respects_retention() {
        let store = connected().await;
        let mut old = pattern("old", "orders");
        old.last_seen = Utc::now() - chrono::Duration::days(45);
        store.save_pattern(&old).await.unwrap();
        store.save_pattern(&pattern("fresh", "orders")).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.pattern_count().await.unwrap(), 1);
        assert!(store.get_pattern(&PatternId::new("old")).await.unwrap().is_none());
    }
}
