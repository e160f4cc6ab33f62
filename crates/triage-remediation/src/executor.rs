//! Sequential plan execution
//!
//! Actions run strictly in plan order. Each action:
//!
//! 1. waits for approval when the validator flagged it,
//! 2. runs with a per-attempt timeout and bounded retries with backoff,
//! 3. must pass post-verification before it counts as `Completed`.
//!
//! The first action that does not complete halts the plan: later actions
//! are `Skipped` (or `Cancelled` when the run itself was cancelled) and the
//! completed ones are handed to the [`RollbackManager`].

use crate::error::ActionError;
use crate::rollback::RollbackManager;
use crate::state::apply_transition;
use crate::validator::{RemediationValidator, Verification};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use triage_model::{
    ActionId, BackoffPolicy, RemediationAction, RemediationExecution, RemediationPlan, RemediationStatus,
    RemediationValidationResult, ResourceSnapshot, RiskAssessment, RiskDecision,
};

/// Performs and reverts actions against real components
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run an action
    async fn execute(&self, action: &RemediationAction) -> Result<(), ActionError>;

    /// Run an action's inverse
    async fn revert(&self, action: &RemediationAction) -> Result<(), ActionError>;
}

/// Decides on actions flagged as requiring approval
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// `true` to let the action run
    async fn request_approval(&self, action: &RemediationAction, reason: &str) -> bool;
}

/// Approves everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn request_approval(&self, _action: &RemediationAction, _reason: &str) -> bool {
        true
    }
}

/// Denies everything
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl ApprovalGate for DenyAll {
    async fn request_approval(&self, action: &RemediationAction, reason: &str) -> bool {
        info!(action = %action.name, reason, "approval denied");
        false
    }
}

/// Process resource usage source
pub trait ResourceProbe: Send + Sync {
    /// Current usage
    fn snapshot(&self) -> ResourceSnapshot;
}

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay between attempts
    pub backoff: BackoffPolicy,
    /// Timeout for one attempt
    pub action_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            action_timeout_ms: 30_000,
        }
    }
}

impl ExecutorConfig {
    /// With retry bound
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Runs admitted plans
#[async_trait]
pub trait RemediationExecutor: Send + Sync {
    /// Execute a validated plan to a terminal record
    async fn execute(
        &self,
        plan: &RemediationPlan,
        assessments: &[RiskAssessment],
        validation: &RemediationValidationResult,
        cancel: &CancellationToken,
    ) -> RemediationExecution;
}

/// Fail-fast sequential [`RemediationExecutor`]
pub struct SequentialExecutor {
    handler: Arc<dyn ActionHandler>,
    validator: Arc<dyn RemediationValidator>,
    approvals: Arc<dyn ApprovalGate>,
    rollback: Arc<dyn RollbackManager>,
    probe: Option<Arc<dyn ResourceProbe>>,
    config: ExecutorConfig,
}

enum Halt {
    Failed,
    Cancelled,
}

impl SequentialExecutor {
    /// Create executor
    #[must_use]
    pub fn new(
        handler: Arc<dyn ActionHandler>,
        validator: Arc<dyn RemediationValidator>,
        approvals: Arc<dyn ApprovalGate>,
        rollback: Arc<dyn RollbackManager>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            handler,
            validator,
            approvals,
            rollback,
            probe: None,
            config,
        }
    }

    /// With resource probe for start/end snapshots
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    fn transition(execution: &mut RemediationExecution, id: ActionId, to: RemediationStatus) {
        if let Err(err) = apply_transition(execution, id, to, Utc::now()) {
            // only reachable through a bug in the executor's own sequencing
            warn!(error = %err, "ignored invalid action transition");
        }
    }

    fn fail(execution: &mut RemediationExecution, index: usize, to: RemediationStatus, message: String) {
        let id = execution.actions[index].action_id;
        execution.actions[index].error = Some(message);
        Self::transition(execution, id, to);
    }

    async fn attempt(&self, action: &RemediationAction, cancel: &CancellationToken) -> Result<(), ActionError> {
        let timeout = Duration::from_millis(self.config.action_timeout_ms);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ActionError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.handler.execute(action)) => {
                outcome.unwrap_or(Err(ActionError::Timeout { timeout_ms: self.config.action_timeout_ms }))
            }
        }
    }

    /// Run with retries; returns the final result and the attempt count
    async fn run_with_retries(
        &self,
        action: &RemediationAction,
        cancel: &CancellationToken,
    ) -> (Result<(), ActionError>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(action, cancel).await {
                Ok(()) => return (Ok(()), attempt),
                Err(err) if err.is_retryable() && attempt <= self.config.max_retries => {
                    let delay = self.config.backoff.delay(attempt);
                    warn!(action = %action.name, attempt, error = %err, ?delay, "action attempt failed; retrying");
                    metrics::counter!("triage_action_retries_total").increment(1);
                    tokio::select! {
                        () = cancel.cancelled() => return (Err(ActionError::Cancelled), attempt),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return (Err(err), attempt),
            }
        }
    }

    /// Drive one action to a terminal status
    async fn run_action(
        &self,
        execution: &mut RemediationExecution,
        index: usize,
        action: &RemediationAction,
        validation: &RemediationValidationResult,
        cancel: &CancellationToken,
    ) -> Option<Halt> {
        let id = action.id;

        if validation.needs_approval(id) {
            Self::transition(execution, id, RemediationStatus::WaitingForApproval);
            let reason = validation.approval_reason.as_deref().unwrap_or("risk requires approval");
            let approved = tokio::select! {
                () = cancel.cancelled() => None,
                approved = self.approvals.request_approval(action, reason) => Some(approved),
            };
            match approved {
                None => {
                    Self::fail(execution, index, RemediationStatus::Cancelled, "cancelled awaiting approval".into());
                    return Some(Halt::Cancelled);
                }
                Some(false) => {
                    execution.actions[index].approval_denied = true;
                    if let Some(risk) = execution.actions[index].risk.as_mut() {
                        risk.approved = false;
                    }
                    Self::fail(execution, index, RemediationStatus::Cancelled, "approval denied".into());
                    return Some(Halt::Failed);
                }
                Some(true) => {}
            }
        }

        let baseline = self.validator.target_health(action);
        Self::transition(execution, id, RemediationStatus::Running);
        info!(action = %action.name, target = %action.target_component, "executing action");

        let begin = Instant::now();
        let (outcome, attempts) = self.run_with_retries(action, cancel).await;
        execution.actions[index].attempts = attempts;
        execution.metrics.step_retries.insert(id, attempts.saturating_sub(1));

        let halt = match outcome {
            Ok(()) => match self.validator.verify_action(action, baseline, cancel).await {
                Verification::Verified { health } => {
                    debug!(action = %action.name, health, "action verified");
                    Self::transition(execution, id, RemediationStatus::Completed);
                    metrics::counter!("triage_actions_completed_total").increment(1);
                    None
                }
                Verification::NotImproved { baseline, health } => {
                    let message = format!(
                        "post-validation failed: health {health:.2} did not improve from {baseline:.2}"
                    );
                    warn!(action = %action.name, %message, "action failed verification");
                    Self::fail(execution, index, RemediationStatus::Failed, message);
                    metrics::counter!("triage_actions_failed_total").increment(1);
                    Some(Halt::Failed)
                }
                Verification::Cancelled => {
                    Self::fail(execution, index, RemediationStatus::Cancelled, "cancelled during verification".into());
                    Some(Halt::Cancelled)
                }
            },
            Err(ActionError::Cancelled) => {
                Self::fail(execution, index, RemediationStatus::Cancelled, ActionError::Cancelled.to_string());
                Some(Halt::Cancelled)
            }
            Err(err) => {
                warn!(action = %action.name, attempts, error = %err, "action failed");
                Self::fail(execution, index, RemediationStatus::Failed, err.to_string());
                metrics::counter!("triage_actions_failed_total").increment(1);
                Some(Halt::Failed)
            }
        };

        let elapsed = u64::try_from(begin.elapsed().as_millis()).unwrap_or(u64::MAX);
        execution.metrics.step_durations_ms.insert(id, elapsed);
        halt
    }
}

#[async_trait]
impl RemediationExecutor for SequentialExecutor {
    async fn execute(
        &self,
        plan: &RemediationPlan,
        assessments: &[RiskAssessment],
        validation: &RemediationValidationResult,
        cancel: &CancellationToken,
    ) -> RemediationExecution {
        let mut execution = RemediationExecution::new(plan);
        execution.metrics.start_snapshot = self.probe.as_ref().map(|p| p.snapshot());
        info!(
            correlation_id = %plan.correlation_id,
            execution_id = %execution.execution_id,
            actions = plan.actions.len(),
            "executing remediation plan"
        );

        let mut halted: Option<Halt> = None;
        for (index, action) in plan.actions.iter().enumerate() {
            if let Some(risk) = assessments.iter().find(|a| a.action_id == action.id) {
                execution.actions[index].risk = Some(RiskDecision {
                    level: risk.level,
                    score: risk.score,
                    approved: true,
                    reason: validation.needs_approval(action.id).then(|| "approval required".to_string()),
                });
            }

            if halted.is_none() && cancel.is_cancelled() {
                halted = Some(Halt::Cancelled);
            }
            match halted {
                Some(Halt::Cancelled) => {
                    Self::transition(&mut execution, action.id, RemediationStatus::Cancelled);
                }
                Some(Halt::Failed) => {
                    Self::transition(&mut execution, action.id, RemediationStatus::Skipped);
                }
                None => {
                    halted = self.run_action(&mut execution, index, action, validation, cancel).await;
                }
            }
        }

        if halted.is_some() {
            let status = self.rollback.rollback(plan, &mut execution).await;
            debug!(?status, "rollback finished");
        }

        execution.metrics.end_snapshot = self.probe.as_ref().map(|p| p.snapshot());
        execution.finish(Utc::now());
        info!(
            correlation_id = %plan.correlation_id,
            status = ?execution.status,
            completed = execution.metrics.completed_steps,
            failed = execution.metrics.failed_steps,
            skipped = execution.metrics.skipped_steps,
            "remediation plan finished"
        );
        execution
    }
}
