//! Learned error patterns
//!
//! An [`ErrorPattern`] is the durable signature of a recurring error together
//! with the outcomes of remediations attempted against it. Records are owned
//! by a service; the natural key is `(service_name, id)`.

use crate::ids::PatternId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcomes kept per pattern; older ones are dropped first
pub const MAX_OUTCOMES: usize = 100;

/// Outcome of one remediation action run against a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    /// Action name (the action "type")
    pub action_name: String,
    /// Whether the action completed and verified
    pub success: bool,
    /// Wall time of the action
    pub duration_ms: u64,
    /// Target health after the action, when measured
    pub final_health: Option<f64>,
    /// When the outcome was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Stored signature of a recurring error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Pattern id
    pub id: PatternId,
    /// Owning service
    pub service_name: String,
    /// Component the error was seen on
    #[serde(default)]
    pub component_id: Option<String>,
    /// Error type name
    pub error_type: String,
    /// Category label
    pub category: String,
    /// Normalized message tokens
    #[serde(default)]
    pub message_signature: Vec<String>,
    /// Retrieval tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Numeric severity (1-5)
    pub severity: u8,
    /// Times observed
    pub occurrence_count: u64,
    /// First observation
    pub first_seen: DateTime<Utc>,
    /// Latest observation
    pub last_seen: DateTime<Utc>,
    /// Recent remediation outcomes, oldest first
    #[serde(default)]
    pub outcomes: Vec<RemediationOutcome>,
}

impl ErrorPattern {
    /// New pattern observed once at `seen_at`
    #[must_use]
    pub fn new(
        id: PatternId,
        service_name: impl Into<String>,
        error_type: impl Into<String>,
        category: impl Into<String>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            service_name: service_name.into(),
            component_id: None,
            error_type: error_type.into(),
            category: category.into(),
            message_signature: Vec::new(),
            tags: Vec::new(),
            severity: 3,
            occurrence_count: 1,
            first_seen: seen_at,
            last_seen: seen_at,
            outcomes: Vec::new(),
        }
    }

    /// With tags
    #[inline]
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// With message signature
    #[inline]
    #[must_use]
    pub fn with_signature(mut self, signature: Vec<String>) -> Self {
        self.message_signature = signature;
        self
    }

    /// With component
    #[inline]
    #[must_use]
    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    /// With severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: u8) -> Self {
        self.severity = severity;
        self
    }

    /// Count another occurrence
    pub fn record_occurrence(&mut self, seen_at: DateTime<Utc>) {
        self.occurrence_count = self.occurrence_count.saturating_add(1);
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
    }

    /// Append a remediation outcome, evicting the oldest past [`MAX_OUTCOMES`]
    pub fn record_outcome(&mut self, outcome: RemediationOutcome) {
        self.outcomes.push(outcome);
        if self.outcomes.len() > MAX_OUTCOMES {
            let excess = self.outcomes.len() - MAX_OUTCOMES;
            self.outcomes.drain(..excess);
        }
    }

    /// Success ratio over recorded outcomes, optionally for one action name
    ///
    /// `None` when there is no history to judge from.
    #[must_use]
    pub fn success_rate(&self, action_name: Option<&str>) -> Option<f64> {
        let (total, ok) = self
            .outcomes
            .iter()
            .filter(|o| action_name.map_or(true, |name| o.action_name == name))
            .fold((0u32, 0u32), |(t, s), o| (t + 1, s + u32::from(o.success)));

        (total > 0).then(|| f64::from(ok) / f64::from(total))
    }

    /// Action names whose success rate meets `min_rate`, best first
    #[must_use]
    pub fn successful_actions(&self, min_rate: f64) -> Vec<(String, f64)> {
        let mut names: Vec<&str> = self.outcomes.iter().map(|o| o.action_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();

        let mut ranked: Vec<(String, f64)> = names
            .into_iter()
            .filter_map(|name| {
                self.success_rate(Some(name))
                    .filter(|rate| *rate >= min_rate)
                    .map(|rate| (name.to_string(), rate))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Whether the pattern has aged past the retention period
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        now - self.last_seen > retention
    }
}

/// Per-action outcome tallies across a set of patterns
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionHistory {
    tallies: BTreeMap<String, (u32, u32)>,
}

impl ActionHistory {
    /// Empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tally every outcome recorded on the given patterns
    #[must_use]
    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a ErrorPattern>) -> Self {
        let mut history = Self::new();
        for outcome in patterns.into_iter().flat_map(|p| p.outcomes.iter()) {
            history.record(&outcome.action_name, outcome.success);
        }
        history
    }

    /// Count one outcome
    pub fn record(&mut self, action_name: &str, success: bool) {
        let entry = self.tallies.entry(action_name.to_string()).or_default();
        entry.0 += u32::from(success);
        entry.1 += 1;
    }

    /// Success ratio for an action name, `None` without history
    #[must_use]
    pub fn success_rate(&self, action_name: &str) -> Option<f64> {
        self.tallies
            .get(action_name)
            .filter(|(_, total)| *total > 0)
            .map(|(ok, total)| f64::from(*ok) / f64::from(*total))
    }

    /// Outcomes recorded for an action name
    #[must_use]
    pub fn attempts(&self, action_name: &str) -> u32 {
        self.tallies.get(action_name).map_or(0, |(_, total)| *total)
    }
}

/// Normalize a message into matchable tokens
///
/// Lowercases, splits on non-alphanumerics and drops tokens that are mostly
/// digits, hex-like ids or shorter than three characters, so that two
/// messages differing only in ids or counters share a signature.
#[must_use]
pub fn signature_tokens(message: &str) -> Vec<String> {
    let mut tokens: Vec<String> = message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !is_volatile(t))
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

fn is_volatile(token: &str) -> bool {
    let digits = token.chars().filter(char::is_ascii_digit).count();
    if digits * 2 >= token.len() {
        return true;
    }
    token.len() >= 8 && digits > 0 && token.chars().all(|c| c.is_ascii_hexdigit())
}
