//! Risk assessment

use crate::ids::ActionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discrete risk ranking, ordered from least to most dangerous
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum RiskLevel {
    /// Safe to run unattended
    #[default]
    Low,
    /// Run with monitoring
    Medium,
    /// Needs approval
    High,
    /// Must not run
    Critical,
}

impl RiskLevel {
    /// Map a 0-1 risk score to a level
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score < 0.25 {
            RiskLevel::Low
        } else if score < 0.5 {
            RiskLevel::Medium
        } else if score < 0.75 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Risk of one candidate action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Assessed action
    pub action_id: ActionId,
    /// Action name
    pub action_name: String,
    /// Level
    pub level: RiskLevel,
    /// Raw score (0.0 - 1.0)
    pub score: f64,
    /// Nodes the action touches
    pub blast_radius: usize,
    /// Whether an inverse exists
    pub reversible: bool,
    /// Historical success rate of this action type, when known
    pub historical_success_rate: Option<f64>,
    /// Identified issues (never null, possibly empty)
    pub potential_issues: Vec<String>,
    /// Suggested mitigations (never null, possibly empty)
    pub mitigation_steps: Vec<String>,
    /// Free-form context
    pub context: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.74), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Critical);
    }
}
