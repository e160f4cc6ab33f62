//! Testing utilities for the triage workspace
//!
//! Shared fixtures and scriptable stand-ins for the external collaborators.

#![allow(missing_docs)]

pub mod fixtures;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use triage_graph::MetricsCollector;
use triage_model::{ObservedError, RemediationAction};
use triage_patterns::{BackendError, InMemoryBackend, PatternBackend};
use triage_remediation::{ActionError, ActionHandler};

/// Metrics with fixed, settable health per component; unknown components are healthy
#[derive(Debug, Default)]
pub struct StaticMetrics {
    health: RwLock<HashMap<String, f64>>,
    errors: RwLock<HashMap<String, Vec<ObservedError>>>,
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_health(self, component: &str, health: f64) -> Self {
        self.set_health(component, health);
        self
    }

    pub fn with_errors(self, component: &str, errors: Vec<ObservedError>) -> Self {
        self.errors.write().insert(component.to_string(), errors);
        self
    }

    pub fn set_health(&self, component: &str, health: f64) {
        self.health.write().insert(component.to_string(), health);
    }
}

impl MetricsCollector for StaticMetrics {
    fn health_score(&self, component_id: &str) -> f64 {
        self.health.read().get(component_id).copied().unwrap_or(1.0)
    }

    fn reliability(&self, component_id: &str) -> f64 {
        self.health_score(component_id)
    }

    fn recent_errors(&self, component_id: &str) -> Vec<ObservedError> {
        self.errors.read().get(component_id).cloned().unwrap_or_default()
    }

    fn record_error(&self, component_id: &str, error: ObservedError) {
        self.errors.write().entry(component_id.to_string()).or_default().push(error);
    }
}

/// In-memory backend that can be told to fail
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: InMemoryBackend,
    failures_left: AtomicUsize,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` calls (including pings) fail as unavailable
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every call fails until set back
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend down".into()));
        }
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            Err(BackendError::Unavailable("transient failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PatternBackend for FlakyBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.check()?;
        self.inner.list_keys(prefix).await
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.check()
    }
}

/// Action handler driven by per-action-name scripts; records every call
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    failing: HashSet<String>,
    failing_reverts: HashSet<String>,
    flaky: Mutex<HashMap<String, u32>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executing `name` always fails permanently
    pub fn fail_on(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Reverting `name` fails
    pub fn fail_revert_on(mut self, name: &str) -> Self {
        self.failing_reverts.insert(name.to_string());
        self
    }

    /// Executing `name` fails transiently `times` times, then succeeds
    pub fn flaky(self, name: &str, times: u32) -> Self {
        self.flaky.lock().insert(name.to_string(), times);
        self
    }

    /// Executing `name` takes `delay`
    pub fn slow(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    /// Calls as `execute:<name>` / `revert:<name>`, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn executions_of(&self, name: &str) -> usize {
        let needle = format!("execute:{name}");
        self.calls.lock().iter().filter(|c| **c == needle).count()
    }
}

#[async_trait]
impl ActionHandler for ScriptedHandler {
    async fn execute(&self, action: &RemediationAction) -> Result<(), ActionError> {
        self.calls.lock().push(format!("execute:{}", action.name));
        if let Some(delay) = self.delays.get(&action.name) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&action.name) {
            return Err(ActionError::Rejected(format!("{} scripted to fail", action.name)));
        }
        let mut flaky = self.flaky.lock();
        if let Some(left) = flaky.get_mut(&action.name) {
            if *left > 0 {
                *left -= 1;
                return Err(ActionError::Failed(format!("{} transient failure", action.name)));
            }
        }
        Ok(())
    }

    async fn revert(&self, action: &RemediationAction) -> Result<(), ActionError> {
        self.calls.lock().push(format!("revert:{}", action.name));
        if self.failing_reverts.contains(&action.name) {
            return Err(ActionError::Failed(format!("{} revert scripted to fail", action.name)));
        }
        Ok(())
    }
}
