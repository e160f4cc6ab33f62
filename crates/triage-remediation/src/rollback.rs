//! Rollback
//!
//! Unwinds the completed actions of a halted execution in reverse order.
//! Best effort: a failed revert is recorded and the remaining reverts still
//! run. The manager takes the execution record by `&mut`, so nothing else can
//! touch or retry it while it is being unwound.

use crate::executor::ActionHandler;
use crate::error::ActionError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use triage_model::{
    RemediationExecution, RemediationPlan, RemediationStatus, RollbackRecord, RollbackStatus, RollbackStep,
};

/// Rollback configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Timeout for one revert
    pub revert_timeout_ms: u64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            revert_timeout_ms: 30_000,
        }
    }
}

/// Reverts completed actions of a halted execution
#[async_trait]
pub trait RollbackManager: Send + Sync {
    /// Revert and attach a [`RollbackRecord`] to the execution
    async fn rollback(&self, plan: &RemediationPlan, execution: &mut RemediationExecution) -> RollbackStatus;
}

/// [`RollbackManager`] invoking each action's inverse, newest first
pub struct ReverseRollbackManager {
    handler: Arc<dyn ActionHandler>,
    config: RollbackConfig,
}

impl ReverseRollbackManager {
    /// Create manager
    #[must_use]
    pub fn new(handler: Arc<dyn ActionHandler>, config: RollbackConfig) -> Self {
        Self { handler, config }
    }
}

#[async_trait]
impl RollbackManager for ReverseRollbackManager {
    async fn rollback(&self, plan: &RemediationPlan, execution: &mut RemediationExecution) -> RollbackStatus {
        let started_at = Utc::now();
        let timeout = Duration::from_millis(self.config.revert_timeout_ms);
        let mut steps = Vec::new();

        for record in execution.actions.iter_mut().rev() {
            if record.status != RemediationStatus::Completed || record.rolled_back {
                continue;
            }
            let Some(action) = plan.actions.iter().find(|a| a.id == record.action_id) else {
                continue;
            };

            let begin = Instant::now();
            let outcome = match &action.inverse {
                None => Err(ActionError::Unsupported(format!("{} has no inverse", action.name))),
                Some(_) => tokio::time::timeout(timeout, self.handler.revert(action))
                    .await
                    .unwrap_or(Err(ActionError::Timeout {
                        timeout_ms: self.config.revert_timeout_ms,
                    })),
            };

            record.rolled_back = outcome.is_ok();
            match &outcome {
                Ok(()) => info!(action = %action.name, target = %action.target_component, "action reverted"),
                Err(err) => warn!(action = %action.name, error = %err, "revert failed; continuing rollback"),
            }
            steps.push(RollbackStep {
                action_id: action.id,
                action_name: action.name.clone(),
                inverse: action.inverse.clone(),
                succeeded: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
                duration_ms: u64::try_from(begin.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }

        let reverted = steps.iter().filter(|s| s.succeeded).count();
        let status = RollbackStatus::from_counts(reverted, steps.len() - reverted);
        if status == RollbackStatus::FullyRolledBack {
            info!(correlation_id = %execution.correlation_id, reverted, "rollback complete");
        } else {
            error!(
                correlation_id = %execution.correlation_id,
                reverted,
                failed = steps.len() - reverted,
                ?status,
                "rollback incomplete"
            );
        }

        execution.rollback = Some(RollbackRecord {
            status,
            steps,
            started_at,
            ended_at: Utc::now().max(started_at),
        });
        status
    }
}
