//! # Triage Model
//!
//! Canonical data model shared by every stage of the triage pipeline:
//! error contexts, learned patterns, impact analysis, classification, risk,
//! validation and remediation records. Each concept has exactly one type;
//! the other crates convert at their boundaries rather than re-declaring
//! shapes.

#![warn(unreachable_pub)]

pub mod classification;
pub mod context;
pub mod ids;
pub mod impact;
pub mod pattern;
pub mod remediation;
pub mod retry;
pub mod risk;
pub mod validation;

pub use classification::{ErrorClassification, UNKNOWN_CATEGORY};
pub use context::{Analysis, AnalysisAlreadyAttached, ErrorContext, ErrorSeverity, ObservedError};
pub use ids::{ActionId, CorrelationId, ExecutionId, NodeId, PatternId};
pub use impact::{
    DependencyType, GraphSummary, ImpactAnalysisResult, ImpactScope, ImpactSeverity, ImpactedNode,
    MatchReason, PotentialErrorSource, RelatedError, RelationKind,
};
pub use pattern::{signature_tokens, ActionHistory, ErrorPattern, RemediationOutcome, MAX_OUTCOMES};
pub use remediation::{
    RemediationAction, RemediationActionExecution, RemediationExecution, RemediationMetrics,
    RemediationPlan, RemediationStatus, ResourceSnapshot, RiskDecision, RollbackRecord,
    RollbackStatus, RollbackStep,
};
pub use retry::BackoffPolicy;
pub use risk::{RiskAssessment, RiskLevel};
pub use validation::{IssueSeverity, RemediationValidationResult, ValidationIssue};
