//! Pattern cache
//!
//! Size- and age-bounded cache owned by a single store instance.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use triage_model::{ErrorPattern, PatternId};

/// Bounded cache of patterns by id
#[derive(Debug, Clone)]
pub struct PatternCache {
    inner: Cache<PatternId, Arc<ErrorPattern>>,
}

impl PatternCache {
    /// Cache bounded by entry count and time-to-live
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Insert or replace
    #[inline]
    pub async fn insert(&self, pattern: ErrorPattern) {
        self.inner.insert(pattern.id.clone(), Arc::new(pattern)).await;
    }

    /// Cached pattern
    #[inline]
    pub async fn get(&self, id: &PatternId) -> Option<ErrorPattern> {
        self.inner.get(id).await.map(|p| (*p).clone())
    }

    /// Drop one entry
    #[inline]
    pub async fn invalidate(&self, id: &PatternId) {
        self.inner.invalidate(id).await;
    }

    /// Drop every entry
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate entry count
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(300))
    }
}
