//! Per-component execution locks
//!
//! Plans touching a common component run one after another; plans on
//! disjoint components run concurrently. Locks are always taken in sorted
//! component order, so two plans can never wait on each other.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lock table keyed by component id
#[derive(Debug, Default)]
pub struct ComponentLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held locks; released on drop
#[derive(Debug)]
pub struct ComponentGuard {
    components: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ComponentGuard {
    /// Locked components, sorted
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl ComponentLocks {
    /// Create empty lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, component: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(component.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock every component in `components`
    ///
    /// Returns `None` if `cancel` fires first; locks already taken are released.
    pub async fn acquire<I, S>(&self, components: I, cancel: &CancellationToken) -> Option<ComponentGuard>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ordered: BTreeSet<String> = components.into_iter().map(Into::into).collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for component in &ordered {
            let lock = self.lock_for(component);
            let guard = tokio::select! {
                () = cancel.cancelled() => return None,
                guard = lock.lock_owned() => guard,
            };
            guards.push(guard);
        }
        debug!(components = ?ordered, "component locks acquired");
        Some(ComponentGuard {
            components: ordered.into_iter().collect(),
            _guards: guards,
        })
    }

    /// Whether some plan currently holds `component`
    #[must_use]
    pub fn is_locked(&self, component: &str) -> bool {
        self.locks.get(component).is_some_and(|lock| lock.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn disjoint_sets_do_not_block() {
        let locks = ComponentLocks::new();
        let cancel = CancellationToken::new();
        let a = locks.acquire(["redis", "orders-api"], &cancel).await.unwrap();
        let b = locks.acquire(["postgres"], &cancel).await.unwrap();
        assert_eq!(a.components(), ["orders-api", "redis"]);
        assert!(locks.is_locked("postgres"));
        drop(b);
        assert!(!locks.is_locked("postgres"));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_sets_wait_and_cancel() {
        let locks = Arc::new(ComponentLocks::new());
        let cancel = CancellationToken::new();
        let held = locks.acquire(["orders-api"], &cancel).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            let cancel = cancel.clone();
            tokio::spawn(async move { locks.acquire(["redis", "orders-api"], &cancel).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        cancel.cancel();
        assert!(!waiter.await.unwrap());
        // redis was released when the waiter gave up
        assert!(!locks.is_locked("redis"));
        drop(held);
    }
}
