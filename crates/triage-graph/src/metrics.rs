//! Component health signals
//!
//! [`MetricsCollector`] turns live request/error signals into per-component
//! health and reliability scores. The graph builder snapshots them into each
//! node so that analysis runs over a frozen view.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use triage_model::ObservedError;

/// Per-component health source
pub trait MetricsCollector: Send + Sync {
    /// Current health (0.0 failing - 1.0 healthy); 1.0 for unknown components
    fn health_score(&self, component_id: &str) -> f64;

    /// Long-run success ratio (0.0 - 1.0); 1.0 for unknown components
    fn reliability(&self, component_id: &str) -> f64;

    /// Recent error observations, newest last
    fn recent_errors(&self, component_id: &str) -> Vec<ObservedError>;

    /// Record an error observed on a component
    fn record_error(&self, component_id: &str, error: ObservedError);
}

/// Tuning for [`SignalMetricsCollector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Request samples kept for the health window
    pub window_size: usize,
    /// Latency above which a request counts against health
    pub latency_budget_ms: u64,
    /// Error observations kept per component
    pub max_recent_errors: usize,
    /// Share of health taken from success rate; the rest from latency
    pub success_weight: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            latency_budget_ms: 500,
            max_recent_errors: 50,
            success_weight: 0.7,
        }
    }
}

#[derive(Debug, Default)]
struct ComponentSignals {
    requests: u64,
    failures: u64,
    window: VecDeque<(bool, u64)>,
    recent_errors: VecDeque<ObservedError>,
}

/// In-memory [`MetricsCollector`] fed by request and error signals
#[derive(Debug, Default)]
pub struct SignalMetricsCollector {
    signals: DashMap<String, ComponentSignals>,
    config: MetricsConfig,
}

impl SignalMetricsCollector {
    /// Collector with default tuning
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector with explicit tuning
    #[must_use]
    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            signals: DashMap::new(),
            config,
        }
    }

    /// Record one request outcome
    pub fn record_request(&self, component_id: &str, success: bool, latency: Duration) {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let mut entry = self.signals.entry(component_id.to_string()).or_default();
        entry.requests += 1;
        if !success {
            entry.failures += 1;
        }
        entry.window.push_back((success, latency_ms));
        while entry.window.len() > self.config.window_size.max(1) {
            entry.window.pop_front();
        }
    }

    /// Components with any recorded signal
    #[must_use]
    pub fn components(&self) -> Vec<String> {
        self.signals.iter().map(|e| e.key().clone()).collect()
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}

impl MetricsCollector for SignalMetricsCollector {
    fn health_score(&self, component_id: &str) -> f64 {
        let Some(entry) = self.signals.get(component_id) else {
            return 1.0;
        };
        let samples = entry.window.len();
        if samples == 0 {
            return 1.0;
        }

        let ok = entry.window.iter().filter(|(success, _)| *success).count();
        let in_budget = entry
            .window
            .iter()
            .filter(|(_, latency)| *latency <= self.config.latency_budget_ms)
            .count();

        let weight = self.config.success_weight.clamp(0.0, 1.0);
        (weight * ratio(ok, samples) + (1.0 - weight) * ratio(in_budget, samples)).clamp(0.0, 1.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn reliability(&self, component_id: &str) -> f64 {
        self.signals
            .get(component_id)
            .filter(|e| e.requests > 0)
            .map_or(1.0, |e| (e.requests - e.failures) as f64 / e.requests as f64)
    }

    fn recent_errors(&self, component_id: &str) -> Vec<ObservedError> {
        self.signals
            .get(component_id)
            .map(|e| e.recent_errors.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record_error(&self, component_id: &str, error: ObservedError) {
        let mut entry = self.signals.entry(component_id.to_string()).or_default();
        entry.recent_errors.push_back(error);
        while entry.recent_errors.len() > self.config.max_recent_errors {
            entry.recent_errors.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn unknown_component_is_healthy() {
        let m = SignalMetricsCollector::new();
        assert_eq!(m.health_score("x"), 1.0);
        assert_eq!(m.reliability("x"), 1.0);
        assert!(m.recent_errors("x").is_empty());
    }

    #[test]
    fn failures_and_latency_lower_health() {
        let m = SignalMetricsCollector::new();
        for _ in 0..5 {
            m.record_request("db", true, Duration::from_millis(10));
        }
        let healthy = m.health_score("db");

        for _ in 0..5 {
            m.record_request("db", false, Duration::from_secs(2));
        }
        assert!(m.health_score("db") < healthy);
        assert_eq!(m.reliability("db"), 0.5);
    }

    #[test]
    fn recent_errors_are_bounded() {
        let m = SignalMetricsCollector::with_config(MetricsConfig {
            max_recent_errors: 2,
            ..MetricsConfig::default()
        });
        for i in 0..3 {
            m.record_error("db", ObservedError::new(format!("E{i}"), Utc::now()));
        }
        let errors = m.recent_errors("db");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].error_type, "E2");
    }
}
