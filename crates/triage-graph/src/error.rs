//! Error types for graph construction

use triage_model::NodeId;

/// Structural error raised while mutating a [`crate::DependencyGraph`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Node id already present
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),

    /// Component already has a node
    #[error("component {0} already has a node")]
    DuplicateComponent(String),

    /// Edge endpoint missing from the graph
    #[error("edge endpoint {0} is not in the graph")]
    NodeNotFound(NodeId),

    /// Edge from a node to itself
    #[error("self-loop on node {0}")]
    SelfLoop(NodeId),
}

/// Failure reported by a [`crate::TopologyProvider`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// Provider could not be reached
    #[error("topology source unavailable: {0}")]
    Unavailable(String),

    /// Topology description is malformed
    #[error("invalid topology: {0}")]
    Invalid(String),

    /// Topology file could not be read
    #[error("failed to read topology: {0}")]
    Io(String),
}

/// Graph construction failed; no graph is returned
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphConstructionError {
    /// The component the error originated from is unknown to the topology
    #[error("cannot resolve originating component {0}")]
    UnresolvedComponent(String),

    /// The topology provider failed while resolving a component
    #[error("topology lookup for {component} failed: {source}")]
    Topology {
        /// Component being resolved
        component: String,
        /// Provider failure
        #[source]
        source: TopologyError,
    },

    /// The topology provider did not answer in time
    #[error("topology lookup for {component} timed out after {timeout_ms}ms")]
    Timeout {
        /// Component being resolved
        component: String,
        /// Per-lookup timeout
        timeout_ms: u64,
    },

    /// Construction was cancelled
    #[error("graph construction cancelled")]
    Cancelled,

    /// The graph rejected a node or edge
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
}
