//! Impact analysis types
//!
//! A single [`ImpactAnalysisResult`] is produced per analysis run. It is the
//! error-level view over the dependency graph: the nodes the error reaches,
//! errors elsewhere in the graph that look related, and candidate root causes.

use crate::ids::{CorrelationId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of dependency an edge represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    /// Called at runtime
    #[default]
    Runtime,
    /// Linked at build time
    Compile,
    /// Development tooling only
    Development,
    /// Test-only dependency
    Test,
}

impl DependencyType {
    /// Weight used when an edge declares none
    #[inline]
    #[must_use]
    pub fn default_weight(self) -> f64 {
        match self {
            DependencyType::Runtime => 1.0,
            DependencyType::Compile => 0.6,
            DependencyType::Development => 0.3,
            DependencyType::Test => 0.2,
        }
    }
}

/// How badly a node is affected
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImpactSeverity {
    /// Negligible
    Low,
    /// Noticeable degradation
    Medium,
    /// Likely failing
    High,
    /// Failing
    Critical,
}

impl ImpactSeverity {
    /// Map a 0-1 impact score to a severity band
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            ImpactSeverity::Critical
        } else if score >= 0.5 {
            ImpactSeverity::High
        } else if score >= 0.25 {
            ImpactSeverity::Medium
        } else {
            ImpactSeverity::Low
        }
    }
}

/// How far an impact reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImpactScope {
    /// The failing node itself
    Local,
    /// A direct neighbor
    Component,
    /// Two or more hops away within the same service
    Service,
    /// Crosses a declared service boundary
    System,
}

impl ImpactScope {
    /// Scope from traversal distance and boundary crossing
    #[must_use]
    pub fn from_hops(hops: usize, crosses_service_boundary: bool) -> Self {
        if crosses_service_boundary {
            return ImpactScope::System;
        }
        match hops {
            0 => ImpactScope::Local,
            1 => ImpactScope::Component,
            _ => ImpactScope::Service,
        }
    }
}

/// A node reached by the error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactedNode {
    /// Graph node
    pub node_id: NodeId,
    /// Component id of the node
    pub component_id: String,
    /// Severity band
    pub severity: ImpactSeverity,
    /// Reach
    pub scope: ImpactScope,
    /// Traversal distance from the nearest error source
    pub hops: usize,
    /// Raw score the severity was derived from
    pub score: f64,
}

/// How a related error's node relates to the failing node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Shares a direct neighbor with the failing node
    Sibling,
    /// Its failures can propagate to the failing node
    Ancestor,
}

/// Why a related error was considered related
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchReason {
    /// Carries the given tag
    SharedTag(String),
    /// Same error type
    SameErrorType,
    /// Occurred within the correlation window
    CorrelationWindow,
}

/// An error elsewhere in the graph that appears related to the current one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedError {
    /// Node the error was observed on
    pub node_id: NodeId,
    /// Component id of that node
    pub component_id: String,
    /// Relation to the failing node
    pub relation: RelationKind,
    /// Correlation id of the other occurrence, when known
    pub correlation_id: Option<CorrelationId>,
    /// Error type
    pub error_type: String,
    /// Error message
    pub message: String,
    /// When it occurred
    pub occurred_at: DateTime<Utc>,
    /// Relatedness confidence (0.0 - 1.0)
    pub confidence: f64,
    /// What matched
    pub matched_on: Vec<MatchReason>,
}

/// Candidate root-cause node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialErrorSource {
    /// Candidate node
    pub node_id: NodeId,
    /// Component id of the candidate
    pub component_id: String,
    /// Confidence it is the root cause (0.0 - 1.0)
    pub confidence: f64,
    /// Severity if it is failing
    pub severity: ImpactSeverity,
    /// Reach of its failure
    pub scope: ImpactScope,
    /// Supporting evidence
    pub evidence: BTreeMap<String, String>,
    /// Downstream nodes its failure threatens
    pub threatened_nodes: Vec<NodeId>,
}

/// Graph-level facts about the snapshot an analysis ran on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphSummary {
    /// Nodes in the graph
    pub node_count: usize,
    /// Edges in the graph
    pub edge_count: usize,
    /// Nodes flagged as error sources
    pub source_count: usize,
}

/// Impact of one error over one dependency graph snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysisResult {
    /// Error the analysis belongs to
    pub correlation_id: CorrelationId,
    /// Graph facts
    pub summary: GraphSummary,
    /// Impacted nodes, most severe first
    pub impacted: Vec<ImpactedNode>,
    /// Related errors, most recent first
    pub related_errors: Vec<RelatedError>,
    /// Root-cause candidates, most likely first
    pub potential_sources: Vec<PotentialErrorSource>,
}

impl ImpactAnalysisResult {
    /// Empty result for a correlation id
    #[must_use]
    pub fn empty(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            summary: GraphSummary::default(),
            impacted: Vec::new(),
            related_errors: Vec::new(),
            potential_sources: Vec::new(),
        }
    }

    /// Highest severity among impacted nodes
    #[must_use]
    pub fn most_severe(&self) -> Option<ImpactSeverity> {
        self.impacted.iter().map(|n| n.severity).max()
    }

    /// Whether a node appears anywhere in the result
    #[must_use]
    pub fn references(&self, node_id: NodeId) -> bool {
        self.impacted.iter().any(|n| n.node_id == node_id)
            || self.related_errors.iter().any(|e| e.node_id == node_id)
            || self.potential_sources.iter().any(|s| {
                s.node_id == node_id || s.threatened_nodes.contains(&node_id)
            })
    }

    /// Every node id referenced by the result
    #[must_use]
    pub fn referenced_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .impacted
            .iter()
            .map(|n| n.node_id)
            .chain(self.related_errors.iter().map(|e| e.node_id))
            .chain(
                self.potential_sources
                    .iter()
                    .flat_map(|s| std::iter::once(s.node_id).chain(s.threatened_nodes.iter().copied())),
            )
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bands() {
        assert_eq!(ImpactSeverity::from_score(0.9), ImpactSeverity::Critical);
        assert_eq!(ImpactSeverity::from_score(0.5), ImpactSeverity::High);
        assert_eq!(ImpactSeverity::from_score(0.3), ImpactSeverity::Medium);
        assert_eq!(ImpactSeverity::from_score(0.0), ImpactSeverity::Low);
    }

    #[test]
    fn scope_from_hops() {
        assert_eq!(ImpactScope::from_hops(0, false), ImpactScope::Local);
        assert_eq!(ImpactScope::from_hops(1, false), ImpactScope::Component);
        assert_eq!(ImpactScope::from_hops(4, false), ImpactScope::Service);
        assert_eq!(ImpactScope::from_hops(1, true), ImpactScope::System);
        assert!(ImpactScope::System > ImpactScope::Service);
    }
}
