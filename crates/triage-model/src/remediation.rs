//! Remediation plans and execution records
//!
//! A [`RemediationPlan`] is the ordered list of actions proposed for one
//! error. Admitting a plan creates a [`RemediationExecution`], the run-time
//! record that the executor advances action by action and the rollback
//! manager unwinds on failure.

use crate::ids::{ActionId, CorrelationId, ExecutionId};
use crate::risk::RiskLevel;
use crate::validation::RemediationValidationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single operation against one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    /// Action id
    pub id: ActionId,
    /// Action name, also its type for outcome history
    pub name: String,
    /// Primary target component
    pub target_component: String,
    /// Parameters passed to the handler
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// What the action is expected to achieve
    #[serde(default)]
    pub expected_effect: String,
    /// Name of the inverse operation; `None` means irreversible
    #[serde(default)]
    pub inverse: Option<String>,
    /// Actions that must run before this one
    #[serde(default)]
    pub depends_on: Vec<ActionId>,
    /// Other components the action touches
    #[serde(default)]
    pub additional_targets: Vec<String>,
}

impl RemediationAction {
    /// Create irreversible action
    #[must_use]
    pub fn new(name: impl Into<String>, target_component: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            name: name.into(),
            target_component: target_component.into(),
            parameters: BTreeMap::new(),
            expected_effect: String::new(),
            inverse: None,
            depends_on: Vec::new(),
            additional_targets: Vec::new(),
        }
    }

    /// With inverse operation
    #[inline]
    #[must_use]
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// With parameter
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

    /// With ordering dependency
    #[inline]
    #[must_use]
    pub fn after(mut self, action_id: ActionId) -> Self {
        self.depends_on.push(action_id);
        self
    }

    /// With an additional touched component
    #[inline]
    #[must_use]
    pub fn also_touching(mut self, component_id: impl Into<String>) -> Self {
        self.additional_targets.push(component_id.into());
        self
    }

    /// Whether an inverse exists
    #[inline]
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.inverse.is_some()
    }

    /// Every component the action touches, primary target first
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.target_component.as_str())
            .chain(self.additional_targets.iter().map(String::as_str))
    }
}

/// Ordered actions for one error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    /// Error the plan addresses
    pub correlation_id: CorrelationId,
    /// Actions in execution order
    pub actions: Vec<RemediationAction>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Why each action was chosen
    #[serde(default)]
    pub rationale: Vec<String>,
}

impl RemediationPlan {
    /// Empty plan
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            actions: Vec::new(),
            created_at: Utc::now(),
            rationale: Vec::new(),
        }
    }

    /// With action
    #[must_use]
    pub fn with_action(mut self, action: RemediationAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Whether the plan has no actions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Sorted, de-duplicated components touched by the plan
    #[must_use]
    pub fn target_components(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .actions
            .iter()
            .flat_map(RemediationAction::targets)
            .map(str::to_string)
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

/// Status of an action, and of a plan as the worst of its actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RemediationStatus {
    /// Not yet dispatched
    #[default]
    Pending,
    /// Blocked on human approval
    WaitingForApproval,
    /// Executing
    Running,
    /// Executed and verified
    Completed,
    /// Not run because an earlier action halted the plan
    Skipped,
    /// Cancelled or approval denied
    Cancelled,
    /// Execution or verification failed
    Failed,
}

impl RemediationStatus {
    /// Whether no further action transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemediationStatus::Completed
                | RemediationStatus::Skipped
                | RemediationStatus::Cancelled
                | RemediationStatus::Failed
        )
    }

    /// Ranking used when folding action statuses into a plan status
    #[must_use]
    pub fn badness(self) -> u8 {
        match self {
            RemediationStatus::Completed => 0,
            RemediationStatus::Pending => 1,
            RemediationStatus::Skipped => 2,
            RemediationStatus::Running => 3,
            RemediationStatus::WaitingForApproval => 4,
            RemediationStatus::Cancelled => 5,
            RemediationStatus::Failed => 6,
        }
    }
}

/// Risk decision recorded against an action before it ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    /// Assessed level
    pub level: RiskLevel,
    /// Assessed score
    pub score: f64,
    /// Whether the action was allowed to run
    pub approved: bool,
    /// Reason for the decision
    pub reason: Option<String>,
}

/// Run-time record of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationActionExecution {
    /// Action id
    pub action_id: ActionId,
    /// Action name
    pub action_name: String,
    /// Primary target
    pub target_component: String,
    /// Current status
    pub status: RemediationStatus,
    /// First dispatch
    pub started_at: Option<DateTime<Utc>>,
    /// Reached a terminal status
    pub ended_at: Option<DateTime<Utc>>,
    /// Dispatch attempts so far
    pub attempts: u32,
    /// Last failure
    pub error: Option<String>,
    /// Whether the inverse ran successfully
    pub rolled_back: bool,
    /// Risk decision, once made
    pub risk: Option<RiskDecision>,
    /// Stopped because an approver said no
    #[serde(default)]
    pub approval_denied: bool,
}

impl RemediationActionExecution {
    fn pending(action: &RemediationAction) -> Self {
        Self {
            action_id: action.id,
            action_name: action.name.clone(),
            target_component: action.target_component.clone(),
            status: RemediationStatus::Pending,
            started_at: None,
            ended_at: None,
            attempts: 0,
            error: None,
            rolled_back: false,
            risk: None,
            approval_denied: false,
        }
    }
}

/// Process resource usage at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// CPU usage percentage
    pub cpu_percent: f64,
    /// Resident memory
    pub memory_bytes: u64,
    /// Live threads
    pub thread_count: u32,
    /// When taken
    pub taken_at: DateTime<Utc>,
}

/// Per-run execution metrics
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemediationMetrics {
    /// Actions in the plan
    pub total_steps: usize,
    /// Actions completed
    pub completed_steps: usize,
    /// Actions failed
    pub failed_steps: usize,
    /// Actions skipped
    pub skipped_steps: usize,
    /// Actions cancelled
    pub cancelled_steps: usize,
    /// Wall time per action
    pub step_durations_ms: BTreeMap<ActionId, u64>,
    /// Retries per action (attempts beyond the first)
    pub step_retries: BTreeMap<ActionId, u32>,
    /// Snapshot at start
    pub start_snapshot: Option<ResourceSnapshot>,
    /// Snapshot at end
    pub end_snapshot: Option<ResourceSnapshot>,
}

impl RemediationMetrics {
    /// Count an action entering a terminal status
    pub fn record_terminal(&mut self, status: RemediationStatus) {
        match status {
            RemediationStatus::Completed => self.completed_steps += 1,
            RemediationStatus::Failed => self.failed_steps += 1,
            RemediationStatus::Skipped => self.skipped_steps += 1,
            RemediationStatus::Cancelled => self.cancelled_steps += 1,
            _ => {}
        }
    }

    /// Completed + failed + skipped
    #[inline]
    #[must_use]
    pub fn accounted_steps(&self) -> usize {
        self.completed_steps + self.failed_steps + self.skipped_steps
    }

    /// Total retries across all actions
    #[must_use]
    pub fn total_retries(&self) -> u32 {
        self.step_retries.values().sum()
    }
}

/// Final rollback status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RollbackStatus {
    /// Every completed action was reverted
    FullyRolledBack,
    /// Some reverts failed
    PartiallyRolledBack,
    /// Every revert failed
    RollbackFailed,
}

impl RollbackStatus {
    /// Status from revert tallies
    #[must_use]
    pub fn from_counts(reverted: usize, failed: usize) -> Self {
        match (reverted, failed) {
            (_, 0) => RollbackStatus::FullyRolledBack,
            (0, _) => RollbackStatus::RollbackFailed,
            _ => RollbackStatus::PartiallyRolledBack,
        }
    }
}

/// Revert attempt for one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackStep {
    /// Reverted action
    pub action_id: ActionId,
    /// Action name
    pub action_name: String,
    /// Inverse operation invoked
    pub inverse: Option<String>,
    /// Whether the revert succeeded
    pub succeeded: bool,
    /// Failure detail
    pub error: Option<String>,
    /// Wall time
    pub duration_ms: u64,
}

/// Rollback of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// Final status
    pub status: RollbackStatus,
    /// Steps in the order they ran (reverse action order)
    pub steps: Vec<RollbackStep>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub ended_at: DateTime<Utc>,
}

/// Run-time record of executing a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationExecution {
    /// Execution id
    pub execution_id: ExecutionId,
    /// Error the plan addresses
    pub correlation_id: CorrelationId,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time, once terminal
    pub ended_at: Option<DateTime<Utc>>,
    /// Worst action status
    pub status: RemediationStatus,
    /// Per-action records in plan order
    pub actions: Vec<RemediationActionExecution>,
    /// Metrics
    pub metrics: RemediationMetrics,
    /// Final validation
    pub validation: Option<RemediationValidationResult>,
    /// Rollback, if one ran
    pub rollback: Option<RollbackRecord>,
}

impl RemediationExecution {
    /// Admit a plan: every action starts `Pending`
    #[must_use]
    pub fn new(plan: &RemediationPlan) -> Self {
        let actions: Vec<_> = plan.actions.iter().map(RemediationActionExecution::pending).collect();
        let mut execution = Self {
            execution_id: ExecutionId::new(),
            correlation_id: plan.correlation_id.clone(),
            started_at: Utc::now(),
            ended_at: None,
            status: RemediationStatus::Pending,
            metrics: RemediationMetrics {
                total_steps: actions.len(),
                ..RemediationMetrics::default()
            },
            actions,
            validation: None,
            rollback: None,
        };
        execution.recompute_status();
        execution
    }

    /// Index of an action record
    #[must_use]
    pub fn position(&self, action_id: ActionId) -> Option<usize> {
        self.actions.iter().position(|a| a.action_id == action_id)
    }

    /// Fold action statuses into the plan status
    ///
    /// `Completed` only when every action completed; otherwise the worst
    /// action status.
    pub fn recompute_status(&mut self) {
        self.status = if self
            .actions
            .iter()
            .all(|a| a.status == RemediationStatus::Completed)
        {
            RemediationStatus::Completed
        } else {
            self.actions
                .iter()
                .map(|a| a.status)
                .max_by_key(|s| s.badness())
                .unwrap_or(RemediationStatus::Completed)
        };
    }

    /// Mark the run finished at `now`, never before `started_at`
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.recompute_status();
        self.ended_at = Some(now.max(self.started_at));
    }

    /// Whether the plan reached Completed, Failed or Cancelled
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            RemediationStatus::Completed | RemediationStatus::Failed | RemediationStatus::Cancelled
        )
    }

    /// Actions that completed, in plan order
    pub fn completed_actions(&self) -> impl Iterator<Item = &RemediationActionExecution> {
        self.actions
            .iter()
            .filter(|a| a.status == RemediationStatus::Completed)
    }

    /// Human-readable descriptions of broken record invariants
    #[must_use]
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.metrics.accounted_steps() > self.metrics.total_steps {
            violations.push(format!(
                "completed + failed + skipped steps ({}) exceed total steps ({})",
                self.metrics.accounted_steps(),
                self.metrics.total_steps
            ));
        }
        if let Some(end) = self.ended_at {
            if end < self.started_at {
                violations.push("execution ended before it started".to_string());
            }
        }
        for action in &self.actions {
            if let (Some(start), Some(end)) = (action.started_at, action.ended_at) {
                if end < start {
                    violations.push(format!("action {} ended before it started", action.action_name));
                }
            }
        }
        let any_failed = self.actions.iter().any(|a| a.status == RemediationStatus::Failed);
        if self.status == RemediationStatus::Completed && any_failed && self.rollback.is_none() {
            violations.push("plan completed with a failed action and no rollback record".to_string());
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn plan(n: usize) -> RemediationPlan {
        (0..n).fold(RemediationPlan::new(CorrelationId::new("c-1")), |p, i| {
            p.with_action(RemediationAction::new(format!("a{i}"), "svc").with_inverse("undo"))
        })
    }

    #[test]
    fn new_execution_is_pending() {
        let exec = RemediationExecution::new(&plan(3));
        assert_eq!(exec.status, RemediationStatus::Pending);
        assert_eq!(exec.metrics.total_steps, 3);
        assert!(exec.invariant_violations().is_empty());
    }

    #[test]
    fn plan_status_is_worst_action() {
        let mut exec = RemediationExecution::new(&plan(3));
        exec.actions[0].status = RemediationStatus::Completed;
        exec.actions[1].status = RemediationStatus::Failed;
        exec.actions[2].status = RemediationStatus::Skipped;
        exec.recompute_status();
        assert_eq!(exec.status, RemediationStatus::Failed);

        exec.actions[1].status = RemediationStatus::Completed;
        exec.actions[2].status = RemediationStatus::Completed;
        exec.recompute_status();
        assert_eq!(exec.status, RemediationStatus::Completed);
    }

    #[test]
    fn finish_never_precedes_start() {
        let mut exec = RemediationExecution::new(&plan(1));
        let earlier = exec.started_at - chrono::Duration::seconds(5);
        exec.finish(earlier);
        assert_eq!(exec.ended_at, Some(exec.started_at));
    }

    #[test]
    fn rollback_status_from_counts() {
        assert_eq!(RollbackStatus::from_counts(2, 0), RollbackStatus::FullyRolledBack);
        assert_eq!(RollbackStatus::from_counts(1, 1), RollbackStatus::PartiallyRolledBack);
        assert_eq!(RollbackStatus::from_counts(0, 2), RollbackStatus::RollbackFailed);
    }

    #[test]
    fn plan_targets_are_deduplicated() {
        let p = RemediationPlan::new(CorrelationId::new("c"))
            .with_action(RemediationAction::new("restart", "api").also_touching("cache"))
            .with_action(RemediationAction::new("flush", "cache"));
        assert_eq!(p.target_components(), vec!["api".to_string(), "cache".to_string()]);
    }

    fn terminal() -> impl Strategy<Value = RemediationStatus> {
        prop_oneof![
            Just(RemediationStatus::Completed),
            Just(RemediationStatus::Failed),
            Just(RemediationStatus::Skipped),
            Just(RemediationStatus::Cancelled),
            Just(RemediationStatus::Running),
        ]
    }

    proptest! {
        #[test]
        fn prop_terminal_counts_partition_recorded_statuses(statuses in prop::collection::vec(terminal(), 0..12)) {
            let mut metrics = RemediationMetrics { total_steps: statuses.len(), ..RemediationMetrics::default() };
            for status in &statuses {
                metrics.record_terminal(*status);
            }
            let counted = |s: RemediationStatus| statuses.iter().filter(|x| **x == s).count();
            prop_assert_eq!(metrics.completed_steps, counted(RemediationStatus::Completed));
            prop_assert_eq!(metrics.cancelled_steps, counted(RemediationStatus::Cancelled));
            prop_assert!(metrics.accounted_steps() <= metrics.total_steps);
        }
    }

    #[test]
    fn records_without_denial_flag_still_parse() {
        let exec = RemediationExecution::new(&plan(1));
        let mut json = serde_json::to_value(&exec).unwrap();
        json["actions"][0].as_object_mut().unwrap().remove("approval_denied");

        let parsed: RemediationExecution = serde_json::from_value(json).unwrap();
        assert!(!parsed.actions[0].approval_denied);
        assert_eq!(parsed, exec);
    }
}
