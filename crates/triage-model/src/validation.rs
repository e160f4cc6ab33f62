//! Validation results

use crate::ids::ActionId;
use serde::{Deserialize, Serialize};

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssueSeverity {
    /// Informational
    Info,
    /// Does not block
    Warning,
    /// Blocks execution
    Error,
    /// Blocks execution and needs attention
    Critical,
}

impl IssueSeverity {
    /// Whether an issue of this severity invalidates the result
    #[inline]
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(self, IssueSeverity::Error | IssueSeverity::Critical)
    }
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Severity
    pub severity: IssueSeverity,
    /// Component the issue concerns
    pub component: String,
    /// Description
    pub message: String,
    /// Action the issue concerns, if any
    pub action_id: Option<ActionId>,
}

impl ValidationIssue {
    /// Create issue
    #[must_use]
    pub fn new(severity: IssueSeverity, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            component: component.into(),
            message: message.into(),
            action_id: None,
        }
    }

    /// With action
    #[inline]
    #[must_use]
    pub fn for_action(mut self, action_id: ActionId) -> Self {
        self.action_id = Some(action_id);
        self
    }
}

/// Outcome of a plan or execution check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationValidationResult {
    /// False once any blocking issue is recorded
    pub is_valid: bool,
    /// All findings
    pub issues: Vec<ValidationIssue>,
    /// Whether a human must approve before running
    pub requires_approval: bool,
    /// Why approval is needed
    pub approval_reason: Option<String>,
    /// Actions that need approval
    pub actions_requiring_approval: Vec<ActionId>,
}

impl Default for RemediationValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

impl RemediationValidationResult {
    /// A passing result with no findings
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            issues: Vec::new(),
            requires_approval: false,
            approval_reason: None,
            actions_requiring_approval: Vec::new(),
        }
    }

    /// Record a finding
    pub fn push_issue(&mut self, issue: ValidationIssue) {
        if issue.severity.is_blocking() {
            self.is_valid = false;
        }
        self.issues.push(issue);
    }

    /// Flag an action as requiring approval
    pub fn require_approval(&mut self, action_id: ActionId, reason: impl Into<String>) {
        self.requires_approval = true;
        if self.approval_reason.is_none() {
            self.approval_reason = Some(reason.into());
        }
        if !self.actions_requiring_approval.contains(&action_id) {
            self.actions_requiring_approval.push(action_id);
        }
    }

    /// Whether the action was flagged for approval
    #[must_use]
    pub fn needs_approval(&self, action_id: ActionId) -> bool {
        self.actions_requiring_approval.contains(&action_id)
    }

    /// Blocking findings
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity.is_blocking())
    }

    /// Non-blocking warnings
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning)
    }

    /// Fold another result into this one
    pub fn merge(&mut self, other: RemediationValidationResult) {
        self.is_valid &= other.is_valid;
        self.issues.extend(other.issues);
        if other.requires_approval {
            self.requires_approval = true;
            if self.approval_reason.is_none() {
                self.approval_reason = other.approval_reason;
            }
        }
        for id in other.actions_requiring_approval {
            if !self.actions_requiring_approval.contains(&id) {
                self.actions_requiring_approval.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_issue_invalidates() {
        let mut r = RemediationValidationResult::valid();
        r.push_issue(ValidationIssue::new(IssueSeverity::Warning, "db", "slow"));
        assert!(r.is_valid);

        r.push_issue(ValidationIssue::new(IssueSeverity::Error, "db", "missing"));
        assert!(!r.is_valid);
        assert_eq!(r.errors().count(), 1);
        assert_eq!(r.warnings().count(), 1);
    }

    #[test]
    fn merge_keeps_first_reason() {
        let id = ActionId::new();
        let mut a = RemediationValidationResult::valid();
        a.require_approval(id, "high risk");

        let mut b = RemediationValidationResult::valid();
        b.require_approval(id, "other");
        b.push_issue(ValidationIssue::new(IssueSeverity::Critical, "api", "down"));

        a.merge(b);
        assert!(!a.is_valid);
        assert_eq!(a.approval_reason.as_deref(), Some("high risk"));
        assert_eq!(a.actions_requiring_approval, vec![id]);
    }
}
