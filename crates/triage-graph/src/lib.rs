//! # Triage Graph
//!
//! Builds the dependency graph around a failing component and analyzes how
//! the failure spreads through it.
//!
//! - [`TopologyProvider`] / [`StaticTopology`]: where component relationships come from
//! - [`MetricsCollector`] / [`SignalMetricsCollector`]: live health signals
//! - [`GraphBuilder`] / [`TopologyGraphBuilder`]: bounded, all-or-nothing construction
//! - [`GraphAnalyzer`] / [`DefaultGraphAnalyzer`]: impact, related errors, root-cause candidates

#![warn(unreachable_pub)]

pub mod analyzer;
pub mod builder;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod topology;

pub use analyzer::{blast_radius, AnalyzerConfig, DefaultGraphAnalyzer, GraphAnalyzer};
pub use builder::{GraphBuilder, GraphConfig, TopologyGraphBuilder, EXTERNAL_TAG};
pub use error::{GraphConstructionError, GraphError, TopologyError};
pub use graph::{DependencyEdge, DependencyGraph, DependencyNode};
pub use metrics::{MetricsCollector, MetricsConfig, SignalMetricsCollector};
pub use topology::{ComponentDescriptor, DeclaredDependency, StaticTopology, TopologyProvider};
