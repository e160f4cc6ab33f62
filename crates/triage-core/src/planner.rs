//! Remediation planning
//!
//! A plan is assembled from two sources, in order:
//!
//! 1. actions the matched pattern has historically resolved the error with
//!    (success rate at or above `min_success_rate`),
//! 2. the playbook for the classification's category, falling back to the
//!    `Unknown` playbook.
//!
//! Duplicates (same action on the same component) are dropped and the plan is
//! capped at `max_actions`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use triage_model::{
    ErrorClassification, ErrorContext, ErrorPattern, ImpactAnalysisResult, RemediationAction, RemediationPlan,
    UNKNOWN_CATEGORY,
};

/// Which component a template acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    /// The component the error was raised in
    ErrorSource,
    /// Best root-cause candidate, or the error source without one
    RootCause,
    /// A fixed component
    Component(String),
}

/// Parameterized action in a playbook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTemplate {
    /// Action name passed to the handler
    pub name: String,
    /// Target selection
    pub target: TargetSelector,
    /// Inverse operation, if the action can be undone
    #[serde(default)]
    pub inverse: Option<String>,
    /// Handler parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Expected effect, for operators
    #[serde(default)]
    pub expected_effect: String,
}

impl ActionTemplate {
    /// New irreversible template
    #[must_use]
    pub fn new(name: impl Into<String>, target: TargetSelector) -> Self {
        Self {
            name: name.into(),
            target,
            inverse: None,
            parameters: BTreeMap::new(),
            expected_effect: String::new(),
        }
    }

    /// With inverse
    #[inline]
    #[must_use]
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// With handler parameter
    #[inline]
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// With expected effect
    #[inline]
    #[must_use]
    pub fn with_expected_effect(mut self, effect: impl Into<String>) -> Self {
        self.expected_effect = effect.into();
        self
    }

    fn instantiate(&self, target: &str) -> RemediationAction {
        let mut action = RemediationAction::new(&self.name, target).with_expected_effect(&self.expected_effect);
        if let Some(inverse) = &self.inverse {
            action = action.with_inverse(inverse);
        }
        for (key, value) in &self.parameters {
            action = action.with_parameter(key, value);
        }
        action
    }
}

/// Planner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Historical actions below this success rate are not reused
    pub min_success_rate: f64,
    /// Upper bound on plan length
    pub max_actions: usize,
    /// Playbooks by classification category
    pub playbooks: BTreeMap<String, Vec<ActionTemplate>>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_success_rate: 0.6,
            max_actions: 5,
            playbooks: default_playbooks(),
        }
    }
}

impl PlannerConfig {
    /// With max actions
    #[inline]
    #[must_use]
    pub fn with_max_actions(mut self, max: usize) -> Self {
        self.max_actions = max;
        self
    }

    /// With playbook for a category, replacing any existing one
    #[must_use]
    pub fn with_playbook(mut self, category: impl Into<String>, templates: Vec<ActionTemplate>) -> Self {
        self.playbooks.insert(category.into(), templates);
        self
    }

    fn template(&self, name: &str) -> Option<&ActionTemplate> {
        self.playbooks.values().flatten().find(|t| t.name == name)
    }
}

fn default_playbooks() -> BTreeMap<String, Vec<ActionTemplate>> {
    use TargetSelector::{ErrorSource, RootCause};

    let mut playbooks = BTreeMap::new();
    playbooks.insert(
        "Timeout".to_string(),
        vec![
            ActionTemplate::new("raise-timeout", ErrorSource)
                .with_inverse("restore-timeout")
                .with_parameter("factor", "2")
                .with_expected_effect("requests complete within the raised budget"),
            ActionTemplate::new("recycle-connections", RootCause)
                .with_inverse("restore-pool")
                .with_expected_effect("stale connections replaced"),
        ],
    );
    playbooks.insert(
        "Connectivity".to_string(),
        vec![
            ActionTemplate::new("reset-circuit-breaker", ErrorSource)
                .with_inverse("trip-circuit-breaker")
                .with_expected_effect("calls to the dependency resume"),
            ActionTemplate::new("restart", RootCause).with_expected_effect("dependency accepts connections"),
        ],
    );
    playbooks.insert(
        "Resource".to_string(),
        vec![
            ActionTemplate::new("scale-out", ErrorSource)
                .with_inverse("scale-in")
                .with_parameter("replicas", "+1")
                .with_expected_effect("load spread over more instances"),
            ActionTemplate::new("clear-cache", ErrorSource)
                .with_inverse("warm-cache")
                .with_expected_effect("memory pressure relieved"),
        ],
    );
    playbooks.insert(
        "NullReference".to_string(),
        vec![
            ActionTemplate::new("enable-fallback", ErrorSource)
                .with_inverse("disable-fallback")
                .with_expected_effect("failing code path bypassed"),
            ActionTemplate::new("rollback-deployment", ErrorSource)
                .with_inverse("roll-forward")
                .with_expected_effect("last known good build serving"),
        ],
    );
    playbooks.insert(
        UNKNOWN_CATEGORY.to_string(),
        vec![ActionTemplate::new("restart", ErrorSource).with_expected_effect("component back to a clean state")],
    );
    playbooks
}

/// Turns an analysis into a remediation plan
pub trait RemediationPlanner: Send + Sync {
    /// Plan remediation for an analyzed error
    fn plan(
        &self,
        context: &ErrorContext,
        impact: &ImpactAnalysisResult,
        classification: &ErrorClassification,
        pattern: Option<&ErrorPattern>,
    ) -> RemediationPlan;
}

/// [`RemediationPlanner`] combining pattern history with category playbooks
#[derive(Debug, Clone, Default)]
pub struct PlaybookPlanner {
    config: PlannerConfig,
}

impl PlaybookPlanner {
    /// Create planner
    #[must_use]
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    fn resolve<'a>(target: &'a TargetSelector, origin: &'a str, root_cause: &'a str) -> &'a str {
        match target {
            TargetSelector::ErrorSource => origin,
            TargetSelector::RootCause => root_cause,
            TargetSelector::Component(component) => component,
        }
    }
}

impl RemediationPlanner for PlaybookPlanner {
    fn plan(
        &self,
        context: &ErrorContext,
        impact: &ImpactAnalysisResult,
        classification: &ErrorClassification,
        pattern: Option<&ErrorPattern>,
    ) -> RemediationPlan {
        let origin = context.originating_component();
        let root_cause = impact
            .potential_sources
            .first()
            .map_or(origin, |s| s.component_id.as_str());

        let mut plan = RemediationPlan::new(context.correlation_id.clone());
        let push = |plan: &mut RemediationPlan, action: RemediationAction, why: String| {
            let duplicate = plan
                .actions
                .iter()
                .any(|a| a.name == action.name && a.target_component == action.target_component);
            if !duplicate && plan.actions.len() < self.config.max_actions {
                plan.rationale.push(why);
                plan.actions.push(action);
            }
        };

        if let Some(pattern) = pattern {
            for (name, rate) in pattern.successful_actions(self.config.min_success_rate) {
                let action = match self.config.template(&name) {
                    Some(template) => template.instantiate(Self::resolve(&template.target, origin, root_cause)),
                    None => RemediationAction::new(&name, origin),
                };
                let why = format!("{name} resolved pattern {} in {:.0}% of runs", pattern.id, rate * 100.0);
                push(&mut plan, action, why);
            }
        }

        // a freshly learned pattern carries a keyword category even when nothing matched
        let category = match pattern {
            Some(pattern) if classification.is_unknown() => pattern.category.as_str(),
            _ => classification.category.as_str(),
        };
        let playbook = self
            .config
            .playbooks
            .get(category)
            .or_else(|| self.config.playbooks.get(UNKNOWN_CATEGORY));
        if let Some(templates) = playbook {
            for template in templates {
                let target = Self::resolve(&template.target, origin, root_cause);
                let why = format!("{category} playbook: {} on {target}", template.name);
                push(&mut plan, template.instantiate(target), why);
            }
        }

        debug!(
            correlation_id = %context.correlation_id,
            category,
            actions = plan.actions.len(),
            "remediation planned"
        );
        plan
    }
}
