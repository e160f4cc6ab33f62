//! Error types for remediation

use triage_model::{ActionId, RemediationStatus};

/// Rejected action state change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Not in the transition table
    #[error("invalid transition {from:?} -> {to:?}")]
    Invalid {
        /// Current status
        from: RemediationStatus,
        /// Requested status
        to: RemediationStatus,
    },

    /// Action not part of the execution
    #[error("action {0} is not part of this execution")]
    UnknownAction(ActionId),
}

/// Failure reported by an [`crate::ActionHandler`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// Transient failure; worth retrying
    #[error("action failed: {0}")]
    Failed(String),

    /// Permanent failure; retrying will not help
    #[error("action rejected: {0}")]
    Rejected(String),

    /// Handler did not finish in time
    #[error("action timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout applied
        timeout_ms: u64,
    },

    /// Cancelled while running
    #[error("action cancelled")]
    Cancelled,

    /// Handler does not know this action
    #[error("no handler for action {0}")]
    Unsupported(String),
}

impl ActionError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ActionError::Failed("x".into()).is_retryable());
        assert!(ActionError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!ActionError::Rejected("x".into()).is_retryable());
        assert!(!ActionError::Cancelled.is_retryable());
    }
}
