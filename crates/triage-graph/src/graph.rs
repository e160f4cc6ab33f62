//! Dependency graph
//!
//! Edges point in the direction failures travel: `a -> b` means a failure in
//! `a` affects `b` (i.e. `b` depends on `a`). A graph is built fresh for each
//! analysis and owned by that run.

use crate::error::GraphError;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use triage_model::{DependencyType, GraphSummary, NodeId, ObservedError};

/// A component in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// Node id
    pub id: NodeId,
    /// Component id
    pub component_id: String,
    /// Display name
    pub name: String,
    /// Owning service
    pub service: String,
    /// Whether the analyzed error originated here
    pub is_error_source: bool,
    /// Health snapshot (0.0 failing - 1.0 healthy)
    pub health_score: f64,
    /// Tags
    pub tags: Vec<String>,
    /// Recent errors observed on the component
    pub recent_errors: Vec<ObservedError>,
}

impl DependencyNode {
    /// Healthy node with a fresh id
    #[must_use]
    pub fn new(component_id: impl Into<String>, service: impl Into<String>) -> Self {
        let component_id = component_id.into();
        Self {
            id: NodeId::new(),
            name: component_id.clone(),
            component_id,
            service: service.into(),
            is_error_source: false,
            health_score: 1.0,
            tags: Vec::new(),
            recent_errors: Vec::new(),
        }
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// With health
    #[inline]
    #[must_use]
    pub fn with_health(mut self, health: f64) -> Self {
        self.health_score = health.clamp(0.0, 1.0);
        self
    }

    /// As error source
    #[inline]
    #[must_use]
    pub fn as_error_source(mut self) -> Self {
        self.is_error_source = true;
        self
    }

    /// With tags
    #[inline]
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// With recent errors
    #[inline]
    #[must_use]
    pub fn with_recent_errors(mut self, errors: Vec<ObservedError>) -> Self {
        self.recent_errors = errors;
        self
    }
}

/// Edge payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Dependency kind
    pub dependency_type: DependencyType,
    /// Propagation weight (0.0 - 1.0)
    pub weight: f64,
}

impl DependencyEdge {
    /// Edge with the kind's default weight
    #[must_use]
    pub fn of(dependency_type: DependencyType) -> Self {
        Self {
            dependency_type,
            weight: dependency_type.default_weight(),
        }
    }

    /// Edge with an explicit weight
    #[must_use]
    pub fn weighted(dependency_type: DependencyType, weight: f64) -> Self {
        Self {
            dependency_type,
            weight: weight.clamp(0.0, 1.0),
        }
    }
}

/// Components and the failure-propagation edges between them
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    inner: DiGraphMap<NodeId, DependencyEdge>,
    nodes: HashMap<NodeId, DependencyNode>,
    by_component: HashMap<String, NodeId>,
}

impl DependencyGraph {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    ///
    /// # Errors
    /// Rejects a duplicate node id or a second node for the same component.
    pub fn add_node(&mut self, node: DependencyNode) -> Result<NodeId, GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        if self.by_component.contains_key(&node.component_id) {
            return Err(GraphError::DuplicateComponent(node.component_id));
        }

        let id = node.id;
        self.inner.add_node(id);
        self.by_component.insert(node.component_id.clone(), id);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Add or replace the edge `from -> to`
    ///
    /// # Errors
    /// Both endpoints must already be nodes; self-loops are rejected.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, edge: DependencyEdge) -> Result<(), GraphError> {
        if from == to {
            return Err(GraphError::SelfLoop(from));
        }
        for id in [from, to] {
            if !self.nodes.contains_key(&id) {
                return Err(GraphError::NodeNotFound(id));
            }
        }
        self.inner.add_edge(from, to, edge);
        Ok(())
    }

    /// Node by id
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&DependencyNode> {
        self.nodes.get(&id)
    }

    /// Node for a component id
    #[must_use]
    pub fn node_by_component(&self, component_id: &str) -> Option<&DependencyNode> {
        self.by_component.get(component_id).and_then(|id| self.nodes.get(id))
    }

    /// Whether the node exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Whether a component has a node
    #[inline]
    #[must_use]
    pub fn contains_component(&self, component_id: &str) -> bool {
        self.by_component.contains_key(component_id)
    }

    /// All nodes, in no particular order
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    /// All edges as `(from, to, edge)`
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, &DependencyEdge)> {
        self.inner.all_edges()
    }

    /// Edge payload between two nodes
    #[must_use]
    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&DependencyEdge> {
        self.inner.edge_weight(from, to)
    }

    /// Nodes a failure in `id` propagates to
    pub fn downstream(&self, id: NodeId) -> impl Iterator<Item = (NodeId, DependencyEdge)> + '_ {
        self.inner
            .neighbors_directed(id, Direction::Outgoing)
            .filter_map(move |n| self.inner.edge_weight(id, n).map(|e| (n, *e)))
    }

    /// Nodes whose failure propagates to `id`
    pub fn upstream(&self, id: NodeId) -> impl Iterator<Item = (NodeId, DependencyEdge)> + '_ {
        self.inner
            .neighbors_directed(id, Direction::Incoming)
            .filter_map(move |n| self.inner.edge_weight(n, id).map(|e| (n, *e)))
    }

    /// Nodes flagged as error sources
    pub fn error_sources(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values().filter(|n| n.is_error_source)
    }

    /// Node count
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edge count
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Graph-level facts
    #[must_use]
    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            source_count: self.error_sources().count(),
        }
    }

    /// Nodes reachable from `id` along failure edges, including `id`
    #[must_use]
    pub fn reachable_from(&self, id: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        if !self.contains(id) {
            return seen;
        }

        let mut queue = VecDeque::from([id]);
        seen.insert(id);
        while let Some(current) = queue.pop_front() {
            for next in self.inner.neighbors_directed(current, Direction::Outgoing) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Edges whose endpoints are not both nodes; empty for a well-formed graph
    #[must_use]
    pub fn dangling_edges(&self) -> Vec<(NodeId, NodeId)> {
        self.inner
            .all_edges()
            .filter(|(a, b, _)| !self.nodes.contains_key(a) || !self.nodes.contains_key(b))
            .map(|(a, b, _)| (a, b))
            .collect()
    }
}
