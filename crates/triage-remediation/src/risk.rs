//! Risk assessment
//!
//! ```text
//! score = w_blast * (blast nodes / graph nodes)
//!       + w_irreversible * [no inverse]
//!       + w_history * (1 - success rate)      (or a flat penalty without history)
//! ```
//!
//! The score maps to a [`RiskLevel`] through fixed thresholds, except that an
//! irreversible action whose blast radius covers more than
//! `critical_blast_ratio` of the graph is always `Critical`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use triage_graph::{blast_radius, DependencyGraph};
use triage_model::{ActionHistory, RemediationAction, RiskAssessment, RiskLevel};

/// Risk weights and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Weight of the blast-radius ratio
    pub blast_weight: f64,
    /// Added when the action has no inverse
    pub irreversible_weight: f64,
    /// Weight of the historical failure rate
    pub history_weight: f64,
    /// Added instead of the history term when there are no outcomes
    pub unknown_history_penalty: f64,
    /// Irreversible actions above this ratio are always Critical
    pub critical_blast_ratio: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            blast_weight: 0.5,
            irreversible_weight: 0.3,
            history_weight: 0.2,
            unknown_history_penalty: 0.1,
            critical_blast_ratio: 0.5,
        }
    }
}

/// Scores candidate actions before they run
pub trait RiskAssessmentService: Send + Sync {
    /// Assess one action against the current graph and outcome history
    fn assess_risk(
        &self,
        action: &RemediationAction,
        graph: &DependencyGraph,
        history: &ActionHistory,
    ) -> RiskAssessment;
}

/// [`RiskAssessmentService`] using blast radius, reversibility and history
#[derive(Debug, Clone, Default)]
pub struct PatternRiskAssessor {
    config: RiskConfig,
}

impl PatternRiskAssessor {
    /// Create assessor
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }
}

impl RiskAssessmentService for PatternRiskAssessor {
    fn assess_risk(
        &self,
        action: &RemediationAction,
        graph: &DependencyGraph,
        history: &ActionHistory,
    ) -> RiskAssessment {
        let cfg = &self.config;
        let reach = blast_radius(graph, action.targets());
        let total = graph.node_count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = if total == 0 { 0.0 } else { reach.len() as f64 / total as f64 };
        let reversible = action.is_reversible();
        let rate = history.success_rate(&action.name);

        let history_term = rate.map_or(cfg.unknown_history_penalty, |r| cfg.history_weight * (1.0 - r));
        let irreversible_term = if reversible { 0.0 } else { cfg.irreversible_weight };
        let score = (cfg.blast_weight * ratio + irreversible_term + history_term).clamp(0.0, 1.0);

        let level = if !reversible && ratio > cfg.critical_blast_ratio {
            RiskLevel::Critical
        } else {
            RiskLevel::from_score(score)
        };

        let mut potential_issues = Vec::new();
        let mut mitigation_steps = Vec::new();

        if !reversible {
            potential_issues.push("no inverse operation; changes cannot be rolled back".to_string());
            mitigation_steps.push("snapshot affected state before running".to_string());
        }
        if ratio > cfg.critical_blast_ratio {
            potential_issues.push(format!("affects {} of {} components", reach.len(), total));
            mitigation_steps.push("stage the change on a subset of instances first".to_string());
        }
        for target in action.targets().filter(|t| !graph.contains_component(t)) {
            potential_issues.push(format!("target {target} is not in the dependency graph"));
        }
        match rate {
            Some(r) if r < 0.5 => {
                potential_issues.push(format!("historical success rate {:.0}%", r * 100.0));
                mitigation_steps.push("prefer an alternative action with better history".to_string());
            }
            None => {
                potential_issues.push(format!("no outcome history for {}", action.name));
                mitigation_steps.push("monitor the target closely after execution".to_string());
            }
            Some(_) => {}
        }

        let mut context = BTreeMap::new();
        context.insert("blast_ratio".to_string(), format!("{ratio:.2}"));
        context.insert("graph_nodes".to_string(), total.to_string());
        context.insert("attempts".to_string(), history.attempts(&action.name).to_string());

        RiskAssessment {
            action_id: action.id,
            action_name: action.name.clone(),
            level,
            score,
            blast_radius: reach.len(),
            reversible,
            historical_success_rate: rate,
            potential_issues,
            mitigation_steps,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_graph::{DependencyEdge, DependencyNode};
    use triage_model::DependencyType;

    // db -> api -> web, cache isolated
    fn graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        let db = g.add_node(DependencyNode::new("db", "data")).unwrap();
        let api = g.add_node(DependencyNode::new("api", "orders")).unwrap();
        let web = g.add_node(DependencyNode::new("web", "frontend")).unwrap();
        g.add_node(DependencyNode::new("cache", "cache")).unwrap();
        g.add_edge(db, api, DependencyEdge::of(DependencyType::Runtime)).unwrap();
        g.add_edge(api, web, DependencyEdge::of(DependencyType::Runtime)).unwrap();
        g
    }

    fn history(name: &str, ok: u32, failed: u32) -> ActionHistory {
        let mut h = ActionHistory::new();
        (0..ok).for_each(|_| h.record(name, true));
        (0..failed).for_each(|_| h.record(name, false));
        h
    }

    #[test]
    fn irreversible_wide_action_is_critical_despite_history() {
        let action = RemediationAction::new("drop-connections", "db");
        let a = PatternRiskAssessor::default().assess_risk(&action, &graph(), &history("drop-connections", 50, 0));
        assert_eq!(a.level, RiskLevel::Critical);
        assert_eq!(a.blast_radius, 3);
        assert!(!a.potential_issues.is_empty());
    }

    #[test]
    fn reversible_leaf_action_is_low() {
        let action = RemediationAction::new("flush", "cache").with_inverse("noop");
        let a = PatternRiskAssessor::default().assess_risk(&action, &graph(), &history("flush", 9, 1));
        assert_eq!(a.level, RiskLevel::Low);
        assert_eq!(a.historical_success_rate, Some(0.9));
        assert!(a.mitigation_steps.is_empty());
    }

    #[test]
    fn unknown_history_is_flagged() {
        let action = RemediationAction::new("restart", "web").with_inverse("noop");
        let a = PatternRiskAssessor::default().assess_risk(&action, &graph(), &ActionHistory::new());
        assert_eq!(a.historical_success_rate, None);
        assert!(a.potential_issues.iter().any(|i| i.contains("no outcome history")));
    }
}
