//! Pipeline error taxonomy
//!
//! Every failure a pipeline run can surface maps to one [`ErrorKind`]. Only
//! graph construction and invalid input abort an analysis; everything else
//! degrades or is reported inside a structured result.

use serde::{Deserialize, Serialize};
use triage_graph::GraphConstructionError;
use triage_patterns::{ClassificationError, StoreError};

/// Failure kind, independent of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Context failed validation
    InvalidContext,
    /// Topology could not be resolved
    GraphConstruction,
    /// Pattern lookup failed during classification
    Classification,
    /// Plan rejected before execution
    ValidationFailure,
    /// An action failed
    Execution,
    /// Rollback left changes in place
    Rollback,
    /// Pattern store unreachable
    StoreConnectivity,
    /// Run was cancelled
    Cancelled,
}

/// Main pipeline error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Rejected input
    #[error("invalid error context: {0}")]
    InvalidContext(String),

    /// Dependency graph could not be built
    #[error("graph construction failed: {0}")]
    GraphConstruction(#[from] GraphConstructionError),

    /// Pattern store could not be consulted
    #[error("classification failed: {0}")]
    Classification(#[from] ClassificationError),

    /// Plan rejected by validation
    #[error("remediation plan rejected: {0}")]
    ValidationFailure(String),

    /// Plan halted on a failed action
    #[error("remediation failed: {0}")]
    Execution(String),

    /// Rollback did not fully revert the plan
    #[error("rollback incomplete: {0}")]
    Rollback(String),

    /// Pattern store unreachable
    #[error("pattern store unreachable: {0}")]
    StoreConnectivity(StoreError),

    /// Cancelled by shutdown or caller
    #[error("pipeline run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidContext(_) => ErrorKind::InvalidContext,
            PipelineError::GraphConstruction(_) => ErrorKind::GraphConstruction,
            PipelineError::Classification(_) => ErrorKind::Classification,
            PipelineError::ValidationFailure(_) => ErrorKind::ValidationFailure,
            PipelineError::Execution(_) => ErrorKind::Execution,
            PipelineError::Rollback(_) => ErrorKind::Rollback,
            PipelineError::StoreConnectivity(_) => ErrorKind::StoreConnectivity,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the run produced no usable analysis
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidContext(_) | PipelineError::GraphConstruction(_) | PipelineError::Cancelled
        )
    }

    /// Check if a later run for the same error could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::GraphConstruction(err) => matches!(
                err,
                GraphConstructionError::Timeout { .. } | GraphConstructionError::Topology { .. }
            ),
            PipelineError::Classification(_) | PipelineError::StoreConnectivity(_) | PipelineError::Execution(_) => {
                true
            }
            _ => false,
        }
    }

    /// Whether a human should look at the outcome
    #[inline]
    #[must_use]
    pub fn requires_human(&self) -> bool {
        matches!(self, PipelineError::Rollback(_) | PipelineError::ValidationFailure(_))
    }
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::StoreConnectivity(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_predicates() {
        let err = PipelineError::from(GraphConstructionError::UnresolvedComponent("ghost".into()));
        assert_eq!(err.kind(), ErrorKind::GraphConstruction);
        assert!(err.is_fatal());
        assert!(!err.is_retryable());

        let err = PipelineError::Rollback("1 of 2 reverts failed".into());
        assert!(!err.is_fatal());
        assert!(err.requires_human());

        let err = PipelineError::from(StoreError::Connectivity("down".into()));
        assert_eq!(err.kind(), ErrorKind::StoreConnectivity);
        assert!(err.is_retryable());
    }

    #[test]
    fn serializes_kind_and_message() {
        let json = serde_json::to_value(PipelineError::ValidationFailure("risk too high".into())).unwrap();
        assert_eq!(json["kind"], "ValidationFailure");
        assert_eq!(json["message"], "remediation plan rejected: risk too high");
    }
}
