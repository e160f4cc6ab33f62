//! Remediation validation
//!
//! Pre-execution: plan sanity (targets exist, ordering respects declared
//! dependencies, each action's risk below the reject level, and the summed
//! risk of the plan below `max_plan_risk`). Post-execution: each action must
//! move its target's health toward recovery within a grace period, and the
//! finished execution record must be internally consistent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use triage_graph::{DependencyGraph, MetricsCollector};
use triage_model::{
    IssueSeverity, RemediationAction, RemediationExecution, RemediationPlan, RemediationStatus,
    RemediationValidationResult, RiskAssessment, RiskLevel, RollbackStatus, ValidationIssue,
};

/// Validator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Actions at or above this level need approval
    pub approval_level: RiskLevel,
    /// Actions at or above this level are rejected
    pub reject_level: RiskLevel,
    /// How long an action has to improve its target
    pub grace_period_ms: u64,
    /// Health polling interval during the grace period
    pub poll_interval_ms: u64,
    /// Health at or above this counts as recovered
    pub healthy_threshold: f64,
    /// Ceiling on the sum of the plan's action scores
    pub max_plan_risk: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            approval_level: RiskLevel::High,
            reject_level: RiskLevel::Critical,
            grace_period_ms: 5_000,
            poll_interval_ms: 250,
            healthy_threshold: 0.8,
            max_plan_risk: 2.0,
        }
    }
}

impl ValidatorConfig {
    /// With grace period
    #[inline]
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With plan risk ceiling
    #[inline]
    #[must_use]
    pub fn with_max_plan_risk(mut self, ceiling: f64) -> Self {
        self.max_plan_risk = ceiling;
        self
    }
}

/// Result of checking an action's effect
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verification {
    /// Target recovered or improved
    Verified {
        /// Health when verified
        health: f64,
    },
    /// Grace period passed without improvement
    NotImproved {
        /// Health before the action
        baseline: f64,
        /// Health at the deadline
        health: f64,
    },
    /// Cancelled while waiting
    Cancelled,
}

/// Pre- and post-execution checks
#[async_trait]
pub trait RemediationValidator: Send + Sync {
    /// Check a plan before execution
    fn validate_plan(
        &self,
        plan: &RemediationPlan,
        graph: &DependencyGraph,
        assessments: &[RiskAssessment],
    ) -> RemediationValidationResult;

    /// Current health of an action's target
    fn target_health(&self, action: &RemediationAction) -> f64;

    /// Wait for an executed action to show an effect
    async fn verify_action(
        &self,
        action: &RemediationAction,
        baseline: f64,
        cancel: &CancellationToken,
    ) -> Verification;

    /// Check a finished execution record
    fn validate_execution(&self, execution: &RemediationExecution) -> RemediationValidationResult;
}

/// [`RemediationValidator`] reading target health from a [`MetricsCollector`]
pub struct HealthValidator {
    metrics: Arc<dyn MetricsCollector>,
    config: ValidatorConfig,
}

impl HealthValidator {
    /// Create validator
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsCollector>, config: ValidatorConfig) -> Self {
        Self { metrics, config }
    }

    fn improved(&self, baseline: f64, health: f64) -> bool {
        health >= self.config.healthy_threshold || health > baseline
    }
}

#[async_trait]
impl RemediationValidator for HealthValidator {
    fn validate_plan(
        &self,
        plan: &RemediationPlan,
        graph: &DependencyGraph,
        assessments: &[RiskAssessment],
    ) -> RemediationValidationResult {
        let mut result = RemediationValidationResult::valid();
        if plan.is_empty() {
            result.push_issue(ValidationIssue::new(IssueSeverity::Warning, "plan", "plan has no actions"));
            return result;
        }

        let positions: HashMap<_, _> = plan.actions.iter().enumerate().map(|(i, a)| (a.id, i)).collect();
        if positions.len() != plan.actions.len() {
            result.push_issue(ValidationIssue::new(IssueSeverity::Error, "plan", "duplicate action ids"));
        }

        for (index, action) in plan.actions.iter().enumerate() {
            for target in action.targets() {
                if !graph.contains_component(target) {
                    result.push_issue(
                        ValidationIssue::new(
                            IssueSeverity::Error,
                            target,
                            format!("{} targets a component absent from the graph", action.name),
                        )
                        .for_action(action.id),
                    );
                }
            }

            for dependency in &action.depends_on {
                let message = match positions.get(dependency) {
                    Some(&at) if at < index => continue,
                    Some(_) => format!("{} runs before an action it depends on", action.name),
                    None => format!("{} depends on an action outside the plan", action.name),
                };
                result.push_issue(
                    ValidationIssue::new(IssueSeverity::Error, &action.target_component, message)
                        .for_action(action.id),
                );
            }

            match assessments.iter().find(|a| a.action_id == action.id) {
                None => result.push_issue(
                    ValidationIssue::new(IssueSeverity::Error, &action.target_component, "action has no risk assessment")
                        .for_action(action.id),
                ),
                Some(risk) if risk.level >= self.config.reject_level => result.push_issue(
                    ValidationIssue::new(
                        IssueSeverity::Critical,
                        &action.target_component,
                        format!("{} risk {:?} exceeds the ceiling", action.name, risk.level),
                    )
                    .for_action(action.id),
                ),
                Some(risk) if risk.level >= self.config.approval_level => {
                    result.require_approval(action.id, format!("{} assessed {:?} risk", action.name, risk.level));
                }
                Some(_) => {}
            }
        }

        let aggregate: f64 = assessments
            .iter()
            .filter(|a| positions.contains_key(&a.action_id))
            .map(|a| a.score)
            .sum();
        if aggregate > self.config.max_plan_risk {
            result.push_issue(ValidationIssue::new(
                IssueSeverity::Error,
                "plan",
                format!("aggregate risk {aggregate:.2} exceeds {:.2}", self.config.max_plan_risk),
            ));
        }

        debug!(
            aggregate_risk = aggregate,
            correlation_id = %plan.correlation_id,
            valid = result.is_valid,
            requires_approval = result.requires_approval,
            issues = result.issues.len(),
            "plan validated"
        );
        result
    }

    fn target_health(&self, action: &RemediationAction) -> f64 {
        self.metrics.health_score(&action.target_component)
    }

    async fn verify_action(
        &self,
        action: &RemediationAction,
        baseline: f64,
        cancel: &CancellationToken,
    ) -> Verification {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.grace_period_ms);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));

        loop {
            let health = self.target_health(action);
            if self.improved(baseline, health) {
                return Verification::Verified { health };
            }
            if tokio::time::Instant::now() >= deadline {
                return Verification::NotImproved { baseline, health };
            }
            tokio::select! {
                () = cancel.cancelled() => return Verification::Cancelled,
                () = tokio::time::sleep(poll.min(deadline.saturating_duration_since(tokio::time::Instant::now()))) => {}
            }
        }
    }

    fn validate_execution(&self, execution: &RemediationExecution) -> RemediationValidationResult {
        let mut result = RemediationValidationResult::valid();

        for violation in execution.invariant_violations() {
            result.push_issue(ValidationIssue::new(IssueSeverity::Critical, "execution", violation));
        }
        for action in &execution.actions {
            let issue = match action.status {
                RemediationStatus::Failed => ValidationIssue::new(
                    IssueSeverity::Error,
                    &action.target_component,
                    action.error.clone().unwrap_or_else(|| format!("{} failed", action.action_name)),
                ),
                RemediationStatus::Cancelled => ValidationIssue::new(
                    IssueSeverity::Error,
                    &action.target_component,
                    format!("{} was cancelled", action.action_name),
                ),
                RemediationStatus::Skipped => ValidationIssue::new(
                    IssueSeverity::Warning,
                    &action.target_component,
                    format!("{} was skipped", action.action_name),
                ),
                _ => continue,
            };
            result.push_issue(issue.for_action(action.action_id));
        }
        if let Some(rollback) = &execution.rollback {
            if rollback.status != RollbackStatus::FullyRolledBack {
                result.push_issue(ValidationIssue::new(
                    IssueSeverity::Critical,
                    "rollback",
                    format!("rollback ended {:?}; manual cleanup needed", rollback.status),
                ));
            }
        }
        result
    }
}
