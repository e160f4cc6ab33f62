//! Impact analysis
//!
//! Every operation here is a pure function of a [`DependencyGraph`] snapshot:
//! the graph is borrowed immutably and results only reference nodes it holds.
//!
//! Scoring:
//! - the error source scores `max(1 - health, severity)` where severity is the
//!   reported error severity mapped onto 0-1;
//! - a downstream node scores `path_weight * (base + (1 - base) * (1 - health))`,
//!   so lower health and heavier edges both raise severity;
//! - a root-cause candidate scores `path_weight * (0.7 * (1 - health) + 0.3 * recent)`
//!   where `recent` is 1 when the node saw an error inside the correlation window.

use crate::graph::{DependencyGraph, DependencyNode};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use triage_model::{
    ErrorContext, ImpactAnalysisResult, ImpactScope, ImpactSeverity, ImpactedNode, MatchReason,
    NodeId, PotentialErrorSource, RelatedError, RelationKind,
};

const SAME_TYPE_WEIGHT: f64 = 0.5;
const SHARED_TAG_WEIGHT: f64 = 0.3;
const WINDOW_WEIGHT: f64 = 0.2;

/// Impact analysis tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Errors closer than this in time are correlated
    pub correlation_window_secs: u64,
    /// Minimum confidence for a related error
    pub min_related_confidence: f64,
    /// Maximum related errors returned
    pub max_related_errors: usize,
    /// Minimum confidence for a root-cause candidate
    pub min_source_confidence: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            correlation_window_secs: 300,
            min_related_confidence: 0.2,
            max_related_errors: 50,
            min_source_confidence: 0.1,
        }
    }
}

impl AnalyzerConfig {
    fn window(&self) -> ChronoDuration {
        ChronoDuration::seconds(i64::try_from(self.correlation_window_secs).unwrap_or(i64::MAX))
    }
}

/// Analysis over a built graph
pub trait GraphAnalyzer: Send + Sync {
    /// Nodes the error reaches, most severe first
    fn analyze_impact(&self, context: &ErrorContext, graph: &DependencyGraph) -> Vec<ImpactedNode>;

    /// Errors on sibling and ancestor nodes that look related, newest first
    fn find_related_errors(&self, context: &ErrorContext, graph: &DependencyGraph) -> Vec<RelatedError>;

    /// Root-cause candidates, most likely first
    fn find_potential_sources(
        &self,
        context: &ErrorContext,
        graph: &DependencyGraph,
    ) -> Vec<PotentialErrorSource>;

    /// Full analysis result
    fn analyze(&self, context: &ErrorContext, graph: &DependencyGraph) -> ImpactAnalysisResult {
        ImpactAnalysisResult {
            correlation_id: context.correlation_id.clone(),
            summary: graph.summary(),
            impacted: self.analyze_impact(context, graph),
            related_errors: self.find_related_errors(context, graph),
            potential_sources: self.find_potential_sources(context, graph),
        }
    }
}

/// Default [`GraphAnalyzer`]
#[derive(Debug, Clone, Default)]
pub struct DefaultGraphAnalyzer {
    config: AnalyzerConfig,
}

/// Best known path to a node during traversal
#[derive(Debug, Clone, Copy)]
struct Reach {
    hops: usize,
    weight: f64,
    crosses_boundary: bool,
}

impl DefaultGraphAnalyzer {
    /// Analyzer with explicit tuning
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Error-source nodes, falling back to the originating component's node
    fn sources<'g>(context: &ErrorContext, graph: &'g DependencyGraph) -> Vec<&'g DependencyNode> {
        let mut sources: Vec<&DependencyNode> = graph.error_sources().collect();
        if sources.is_empty() {
            sources.extend(graph.node_by_component(context.originating_component()));
        }
        sources.sort_by_key(|n| n.id);
        sources
    }

    /// Breadth-first reach from `starts`, following downstream or upstream edges
    ///
    /// Keeps the shortest hop count per node and, among equally short paths,
    /// the heaviest weight product.
    fn traverse<'g>(
        graph: &'g DependencyGraph,
        starts: &[&'g DependencyNode],
        downstream: bool,
    ) -> HashMap<NodeId, Reach> {
        let mut reach: HashMap<NodeId, Reach> = HashMap::new();
        let mut origin_service: HashMap<NodeId, &'g str> = HashMap::new();
        let mut queue = VecDeque::new();

        for start in starts {
            reach.insert(
                start.id,
                Reach {
                    hops: 0,
                    weight: 1.0,
                    crosses_boundary: false,
                },
            );
            origin_service.insert(start.id, start.service.as_str());
            queue.push_back(start.id);
        }

        while let Some(current) = queue.pop_front() {
            let Some(&here) = reach.get(&current) else { continue };
            let service = origin_service.get(&current).copied().unwrap_or_default();

            let neighbors: Vec<_> = if downstream {
                graph.downstream(current).collect()
            } else {
                graph.upstream(current).collect()
            };
            for (next, edge) in neighbors {
                let Some(node) = graph.node(next) else { continue };
                let candidate = Reach {
                    hops: here.hops + 1,
                    weight: here.weight * edge.weight,
                    crosses_boundary: here.crosses_boundary || node.service != service,
                };
                match reach.get_mut(&next) {
                    None => {
                        reach.insert(next, candidate);
                        origin_service.insert(next, service);
                        queue.push_back(next);
                    }
                    Some(existing) if existing.hops == candidate.hops && candidate.weight > existing.weight => {
                        *existing = candidate;
                    }
                    Some(_) => {}
                }
            }
        }
        reach
    }

    fn base_score(context: &ErrorContext, node: &DependencyNode) -> f64 {
        let reported = f64::from(context.severity.value().saturating_sub(1)) / 4.0;
        (1.0 - node.health_score).max(reported).clamp(0.0, 1.0)
    }

    fn has_recent_error(&self, context: &ErrorContext, node: &DependencyNode, include_current: bool) -> bool {
        let window = self.config.window();
        include_current
            || node.recent_errors.iter().any(|e| {
                e.correlation_id.as_ref() != Some(&context.correlation_id)
                    && (e.occurred_at - context.timestamp).abs() <= window
            })
    }
}

fn by_score_desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

impl GraphAnalyzer for DefaultGraphAnalyzer {
    fn analyze_impact(&self, context: &ErrorContext, graph: &DependencyGraph) -> Vec<ImpactedNode> {
        let sources = Self::sources(context, graph);
        let Some(&primary) = sources.first() else {
            return Vec::new();
        };
        let base = Self::base_score(context, primary);

        let mut impacted: Vec<ImpactedNode> = Self::traverse(graph, &sources, true)
            .into_iter()
            .filter_map(|(id, reach)| {
                let node = graph.node(id)?;
                let score = if reach.hops == 0 {
                    Self::base_score(context, node)
                } else {
                    reach.weight * (base + (1.0 - base) * (1.0 - node.health_score))
                };
                Some(ImpactedNode {
                    node_id: id,
                    component_id: node.component_id.clone(),
                    severity: ImpactSeverity::from_score(score),
                    scope: ImpactScope::from_hops(reach.hops, reach.crosses_boundary),
                    hops: reach.hops,
                    score,
                })
            })
            .collect();

        impacted.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.scope.cmp(&a.scope))
                .then_with(|| by_score_desc(a.score, b.score))
                .then_with(|| a.hops.cmp(&b.hops))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        impacted
    }

    fn find_related_errors(&self, context: &ErrorContext, graph: &DependencyGraph) -> Vec<RelatedError> {
        let sources = Self::sources(context, graph);
        let Some(&origin) = sources.first() else {
            return Vec::new();
        };

        let ancestors: HashSet<NodeId> = Self::traverse(graph, &[origin], false)
            .into_keys()
            .filter(|id| *id != origin.id)
            .collect();

        let mut siblings: HashSet<NodeId> = HashSet::new();
        for (parent, _) in graph.upstream(origin.id) {
            siblings.extend(graph.downstream(parent).map(|(n, _)| n));
        }
        for (child, _) in graph.downstream(origin.id) {
            siblings.extend(graph.upstream(child).map(|(n, _)| n));
        }
        siblings.remove(&origin.id);

        let window = self.config.window();
        let mut related = Vec::new();

        let candidates = ancestors
            .iter()
            .map(|id| (*id, RelationKind::Ancestor))
            .chain(
                siblings
                    .iter()
                    .filter(|id| !ancestors.contains(id))
                    .map(|id| (*id, RelationKind::Sibling)),
            );

        for (id, relation) in candidates {
            let Some(node) = graph.node(id) else { continue };
            for error in &node.recent_errors {
                if error.correlation_id.as_ref() == Some(&context.correlation_id) {
                    continue;
                }

                let mut matched_on = Vec::new();
                let mut confidence = 0.0;
                if error.error_type.eq_ignore_ascii_case(&context.error_type) {
                    matched_on.push(MatchReason::SameErrorType);
                    confidence += SAME_TYPE_WEIGHT;
                }
                let shared: BTreeSet<&String> = error.tags.iter().filter(|t| context.tags.contains(t)).collect();
                if !shared.is_empty() {
                    confidence += SHARED_TAG_WEIGHT;
                    matched_on.extend(shared.into_iter().map(|t| MatchReason::SharedTag(t.clone())));
                }
                if (error.occurred_at - context.timestamp).abs() <= window {
                    matched_on.push(MatchReason::CorrelationWindow);
                    confidence += WINDOW_WEIGHT;
                }

                if matched_on.is_empty() || confidence < self.config.min_related_confidence {
                    continue;
                }
                related.push(RelatedError {
                    node_id: id,
                    component_id: node.component_id.clone(),
                    relation,
                    correlation_id: error.correlation_id.clone(),
                    error_type: error.error_type.clone(),
                    message: error.message.clone(),
                    occurred_at: error.occurred_at,
                    confidence: f64::min(confidence, 1.0),
                    matched_on,
                });
            }
        }

        related.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| by_score_desc(a.confidence, b.confidence))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        related.truncate(self.config.max_related_errors);
        related
    }

    fn find_potential_sources(
        &self,
        context: &ErrorContext,
        graph: &DependencyGraph,
    ) -> Vec<PotentialErrorSource> {
        let sources = Self::sources(context, graph);
        let Some(&origin) = sources.first() else {
            return Vec::new();
        };

        let mut candidates: Vec<PotentialErrorSource> = Self::traverse(graph, &[origin], false)
            .into_iter()
            .filter_map(|(id, reach)| {
                let node = graph.node(id)?;
                let recent = self.has_recent_error(context, node, id == origin.id);
                let evidence_score = 0.7 * (1.0 - node.health_score) + 0.3 * f64::from(u8::from(recent));
                let confidence = (reach.weight * evidence_score).clamp(0.0, 1.0);
                if confidence < self.config.min_source_confidence {
                    return None;
                }

                let downstream = Self::traverse(graph, &[node], true);
                let scope = downstream
                    .values()
                    .map(|r| ImpactScope::from_hops(r.hops, r.crosses_boundary))
                    .max()
                    .unwrap_or(ImpactScope::Local);
                let mut threatened: Vec<NodeId> = downstream.into_keys().filter(|n| *n != id).collect();
                threatened.sort();

                let mut evidence = BTreeMap::new();
                evidence.insert("health".to_string(), format!("{:.2}", node.health_score));
                evidence.insert("hops_to_error".to_string(), reach.hops.to_string());
                evidence.insert("path_weight".to_string(), format!("{:.2}", reach.weight));
                evidence.insert("recent_errors".to_string(), node.recent_errors.len().to_string());
                evidence.insert("service".to_string(), node.service.clone());

                Some(PotentialErrorSource {
                    node_id: id,
                    component_id: node.component_id.clone(),
                    confidence,
                    severity: ImpactSeverity::from_score(evidence_score),
                    scope,
                    evidence,
                    threatened_nodes: threatened,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            by_score_desc(a.confidence, b.confidence)
                .then_with(|| b.threatened_nodes.len().cmp(&a.threatened_nodes.len()))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        candidates
    }
}

/// Nodes reachable from any of the given components, including themselves
///
/// Components absent from the graph contribute nothing.
#[must_use]
pub fn blast_radius<'a>(graph: &DependencyGraph, components: impl IntoIterator<Item = &'a str>) -> BTreeSet<NodeId> {
    components
        .into_iter()
        .filter_map(|c| graph.node_by_component(c))
        .flat_map(|n| graph.reachable_from(n.id))
        .collect()
}
