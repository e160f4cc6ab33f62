//! Graph construction
//!
//! [`TopologyGraphBuilder`] roots the graph at the failing component and
//! expands it level by level through both dependencies and dependents. All
//! components of one level are resolved concurrently and joined before the
//! next level starts. Construction is all-or-nothing: any provider failure
//! aborts the build and no partial graph escapes.

use crate::error::GraphConstructionError;
use crate::graph::{DependencyEdge, DependencyGraph, DependencyNode};
use crate::metrics::MetricsCollector;
use crate::topology::{ComponentDescriptor, TopologyProvider};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use triage_model::{ErrorContext, NodeId};

/// Tag carried by nodes the topology could not describe
pub const EXTERNAL_TAG: &str = "external";

/// Graph construction bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum hops from the originating component
    pub max_depth: usize,
    /// Maximum nodes in one graph
    pub max_nodes: usize,
    /// Timeout for a single topology lookup
    pub lookup_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_nodes: 256,
            lookup_timeout_ms: 2_000,
        }
    }
}

impl GraphConfig {
    /// With max depth
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// With max nodes
    #[inline]
    #[must_use]
    pub fn with_max_nodes(mut self, nodes: usize) -> Self {
        self.max_nodes = nodes;
        self
    }

    /// Lookup timeout
    #[inline]
    #[must_use]
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// Builds a dependency graph for an error
#[async_trait]
pub trait GraphBuilder: Send + Sync {
    /// Build the graph rooted at the error's originating component
    async fn build(
        &self,
        context: &ErrorContext,
        cancel: &CancellationToken,
    ) -> Result<DependencyGraph, GraphConstructionError>;
}

/// [`GraphBuilder`] backed by a [`TopologyProvider`] and a [`MetricsCollector`]
pub struct TopologyGraphBuilder {
    topology: Arc<dyn TopologyProvider>,
    metrics: Arc<dyn MetricsCollector>,
    config: GraphConfig,
}

impl TopologyGraphBuilder {
    /// Create builder
    #[must_use]
    pub fn new(
        topology: Arc<dyn TopologyProvider>,
        metrics: Arc<dyn MetricsCollector>,
        config: GraphConfig,
    ) -> Self {
        Self {
            topology,
            metrics,
            config,
        }
    }

    async fn lookup(&self, component_id: &str) -> Result<Option<ComponentDescriptor>, GraphConstructionError> {
        let timeout = self.config.lookup_timeout();
        match tokio::time::timeout(timeout, self.topology.describe(component_id)).await {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(source)) => Err(GraphConstructionError::Topology {
                component: component_id.to_string(),
                source,
            }),
            Err(_) => Err(GraphConstructionError::Timeout {
                component: component_id.to_string(),
                timeout_ms: self.config.lookup_timeout_ms,
            }),
        }
    }

    async fn resolve_origin(&self, context: &ErrorContext) -> Result<ComponentDescriptor, GraphConstructionError> {
        let origin = context.originating_component();
        if let Some(found) = self.lookup(origin).await? {
            return Ok(found);
        }
        if origin != context.service_name {
            if let Some(found) = self.lookup(&context.service_name).await? {
                debug!(
                    component = origin,
                    service = %context.service_name,
                    "component unknown to topology; rooting graph at service"
                );
                return Ok(found);
            }
        }
        Err(GraphConstructionError::UnresolvedComponent(origin.to_string()))
    }

    fn snapshot(&self, descriptor: &ComponentDescriptor) -> DependencyNode {
        DependencyNode::new(descriptor.id.clone(), descriptor.service.clone())
            .with_health(self.metrics.health_score(&descriptor.id))
            .with_tags(descriptor.tags.iter().cloned())
            .with_recent_errors(self.metrics.recent_errors(&descriptor.id))
            .named(descriptor.display_name())
    }

    fn external(&self, component_id: &str) -> DependencyNode {
        DependencyNode::new(component_id, component_id)
            .with_health(self.metrics.health_score(component_id))
            .with_tags([EXTERNAL_TAG])
            .with_recent_errors(self.metrics.recent_errors(component_id))
    }
}

/// Failure-direction edges implied by a descriptor, as component id pairs
fn declared_edges(descriptor: &ComponentDescriptor) -> Vec<(String, String, DependencyEdge)> {
    let depends = descriptor.dependencies.iter().map(|d| {
        (
            d.component_id.clone(),
            descriptor.id.clone(),
            DependencyEdge::weighted(d.dependency_type, d.effective_weight()),
        )
    });
    let dependents = descriptor.dependents.iter().map(|d| {
        (
            descriptor.id.clone(),
            d.component_id.clone(),
            DependencyEdge::weighted(d.dependency_type, d.effective_weight()),
        )
    });
    depends.chain(dependents).collect()
}

#[async_trait]
impl GraphBuilder for TopologyGraphBuilder {
    async fn build(
        &self,
        context: &ErrorContext,
        cancel: &CancellationToken,
    ) -> Result<DependencyGraph, GraphConstructionError> {
        if cancel.is_cancelled() {
            return Err(GraphConstructionError::Cancelled);
        }

        let origin = self.resolve_origin(context).await?;
        let mut graph = DependencyGraph::new();
        let mut ids: HashMap<String, NodeId> = HashMap::new();
        let mut edges: Vec<(String, String, DependencyEdge)> = Vec::new();

        let root = graph.add_node(self.snapshot(&origin).as_error_source())?;
        ids.insert(origin.id.clone(), root);
        edges.extend(declared_edges(&origin));

        let mut frontier = vec![origin];
        let mut budget_hit = false;

        for depth in 1..=self.config.max_depth {
            let mut next: Vec<String> = Vec::new();
            let mut queued: HashSet<&str> = HashSet::new();
            for descriptor in &frontier {
                let neighbors = descriptor
                    .dependencies
                    .iter()
                    .chain(descriptor.dependents.iter())
                    .map(|d| d.component_id.as_str());
                for neighbor in neighbors {
                    if !ids.contains_key(neighbor) && queued.insert(neighbor) {
                        next.push(neighbor.to_string());
                    }
                }
            }
            if next.is_empty() {
                break;
            }

            let remaining = self.config.max_nodes.saturating_sub(graph.node_count());
            if next.len() > remaining {
                budget_hit = true;
                next.truncate(remaining);
            }
            if next.is_empty() {
                break;
            }

            let lookups = join_all(next.iter().map(|id| self.lookup(id)));
            let resolved = tokio::select! {
                () = cancel.cancelled() => return Err(GraphConstructionError::Cancelled),
                resolved = lookups => resolved,
            };

            let mut level = Vec::with_capacity(next.len());
            for (component_id, result) in next.into_iter().zip(resolved) {
                match result? {
                    Some(descriptor) => {
                        let id = graph.add_node(self.snapshot(&descriptor))?;
                        ids.insert(descriptor.id.clone(), id);
                        edges.extend(declared_edges(&descriptor));
                        level.push(descriptor);
                    }
                    None => {
                        let id = graph.add_node(self.external(&component_id))?;
                        ids.insert(component_id, id);
                    }
                }
            }

            debug!(depth, resolved = level.len(), nodes = graph.node_count(), "graph level expanded");
            frontier = level;
            if budget_hit {
                break;
            }
        }

        if budget_hit {
            warn!(
                correlation_id = %context.correlation_id,
                max_nodes = self.config.max_nodes,
                "graph truncated at node budget"
            );
        }

        for (from, to, edge) in edges {
            if let (Some(&a), Some(&b)) = (ids.get(&from), ids.get(&to)) {
                if a != b {
                    graph.add_edge(a, b, edge)?;
                }
            }
        }

        info!(
            correlation_id = %context.correlation_id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "dependency graph built"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SignalMetricsCollector;
    use crate::topology::{DeclaredDependency, StaticTopology};

    fn builder(topology: StaticTopology, config: GraphConfig) -> TopologyGraphBuilder {
        TopologyGraphBuilder::new(
            Arc::new(topology),
            Arc::new(SignalMetricsCollector::new()),
            config,
        )
    }

    fn chain(len: usize) -> StaticTopology {
        StaticTopology::from_components((0..len).map(|i| {
            let c = ComponentDescriptor::new(format!("c{i}"), "svc");
            if i + 1 < len {
                c.depends_on(DeclaredDependency::runtime(format!("c{}", i + 1)))
            } else {
                c
            }
        }))
    }

    #[tokio::test]
    async fn unresolved_origin_fails() {
        let b = builder(StaticTopology::new(), GraphConfig::default());
        let ctx = ErrorContext::new("c", "ghost", "E", "m");
        let err = b.build(&ctx, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, GraphConstructionError::UnresolvedComponent("ghost".into()));
    }

    #[tokio::test]
    async fn depth_is_bounded() {
        let b = builder(chain(10), GraphConfig::default().with_max_depth(2));
        let ctx = ErrorContext::new("c", "svc", "E", "m").with_component("c0");
        let graph = b.build(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.error_sources().count(), 1);
    }

    #[tokio::test]
    async fn node_budget_is_respected() {
        let b = builder(chain(10), GraphConfig::default().with_max_depth(10).with_max_nodes(4));
        let ctx = ErrorContext::new("c", "svc", "E", "m").with_component("c0");
        let graph = b.build(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(graph.node_count(), 4);
        assert!(graph.dangling_edges().is_empty());
    }

    #[tokio::test]
    async fn unknown_neighbors_become_external_leaves() {
        let topology = StaticTopology::from_components([
            ComponentDescriptor::new("api", "orders").depends_on(DeclaredDependency::runtime("payments-gw")),
        ]);
        let b = builder(topology, GraphConfig::default());
        let ctx = ErrorContext::new("c", "orders", "E", "m").with_component("api");
        let graph = b.build(&ctx, &CancellationToken::new()).await.unwrap();

        let gw = graph.node_by_component("payments-gw").unwrap();
        assert!(gw.tags.iter().any(|t| t == EXTERNAL_TAG));
        let api = graph.node_by_component("api").unwrap();
        assert!(graph.edge(gw.id, api.id).is_some());
    }

    #[tokio::test]
    async fn cancelled_build_returns_no_graph() {
        let b = builder(chain(3), GraphConfig::default());
        let ctx = ErrorContext::new("c", "svc", "E", "m").with_component("c0");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            b.build(&ctx, &cancel).await.unwrap_err(),
            GraphConstructionError::Cancelled
        );
    }
}
