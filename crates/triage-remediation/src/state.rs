//! Action state machine
//!
//! ```text
//! Pending ──> WaitingForApproval ──> Running ──> Completed
//!    │               │                  │──────> Failed
//!    │               │                  └──────> Cancelled
//!    ├──> Running    ├──> Cancelled
//!    ├──> Cancelled  └──> Skipped
//!    └──> Skipped
//! ```
//!
//! Terminal states have no outgoing transitions, so an action is counted in
//! the run metrics at most once.

use crate::error::TransitionError;
use chrono::{DateTime, Utc};
use triage_model::{ActionId, RemediationExecution, RemediationStatus};

use RemediationStatus::{Cancelled, Completed, Failed, Pending, Running, Skipped, WaitingForApproval};

const FROM_PENDING: &[RemediationStatus] = &[Running, WaitingForApproval, Cancelled, Skipped];
const FROM_WAITING: &[RemediationStatus] = &[Running, Cancelled, Skipped];
const FROM_RUNNING: &[RemediationStatus] = &[Completed, Failed, Cancelled];

/// Statuses reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: RemediationStatus) -> &'static [RemediationStatus] {
    match from {
        Pending => FROM_PENDING,
        WaitingForApproval => FROM_WAITING,
        Running => FROM_RUNNING,
        Completed | Failed | Cancelled | Skipped => &[],
    }
}

/// Check a single transition against the table
///
/// # Errors
/// [`TransitionError::Invalid`] when `to` is not reachable from `from`.
pub fn validate_transition(from: RemediationStatus, to: RemediationStatus) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Invalid { from, to })
    }
}

/// Move one action of an execution to `to`
///
/// Stamps start/end times, counts terminal states in the run metrics and
/// refolds the plan status.
///
/// # Errors
/// [`TransitionError`] if the action is unknown or the move is not allowed;
/// the execution is left untouched.
pub fn apply_transition(
    execution: &mut RemediationExecution,
    action_id: ActionId,
    to: RemediationStatus,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let index = execution
        .position(action_id)
        .ok_or(TransitionError::UnknownAction(action_id))?;
    let record = &mut execution.actions[index];
    validate_transition(record.status, to)?;

    record.status = to;
    if to == Running {
        record.started_at.get_or_insert(now);
    } else if to.is_terminal() {
        let started = record.started_at.unwrap_or(now);
        record.ended_at = Some(now.max(started));
        execution.metrics.record_terminal(to);
    }
    execution.recompute_status();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_model::{CorrelationId, RemediationAction, RemediationPlan};

    #[test]
    fn pending_transitions() {
        assert!(validate_transition(Pending, Running).is_ok());
        assert!(validate_transition(Pending, WaitingForApproval).is_ok());
        assert!(validate_transition(Pending, Completed).is_err());
        assert!(validate_transition(Pending, Failed).is_err());
    }

    #[test]
    fn terminal_states_are_final() {
        for s in [Completed, Failed, Cancelled, Skipped] {
            assert!(allowed_transitions(s).is_empty());
            assert!(validate_transition(s, Running).is_err());
        }
    }

    #[test]
    fn apply_stamps_times_and_counts() {
        let plan = RemediationPlan::new(CorrelationId::new("c")).with_action(RemediationAction::new("restart", "api"));
        let id = plan.actions[0].id;
        let mut exec = RemediationExecution::new(&plan);
        let now = Utc::now();

        apply_transition(&mut exec, id, Running, now).unwrap();
        assert_eq!(exec.status, Running);
        assert_eq!(exec.actions[0].started_at, Some(now));

        apply_transition(&mut exec, id, Completed, now).unwrap();
        assert_eq!(exec.status, Completed);
        assert_eq!(exec.metrics.completed_steps, 1);

        let err = apply_transition(&mut exec, id, Failed, now).unwrap_err();
        assert_eq!(err, TransitionError::Invalid { from: Completed, to: Failed });
        assert_eq!(exec.metrics.failed_steps, 0);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let plan = RemediationPlan::new(CorrelationId::new("c"));
        let mut exec = RemediationExecution::new(&plan);
        let id = ActionId::new();
        assert_eq!(
            apply_transition(&mut exec, id, Running, Utc::now()),
            Err(TransitionError::UnknownAction(id))
        );
    }
}
