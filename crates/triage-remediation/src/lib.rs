//! # Triage Remediation
//!
//! Guarded execution of remediation plans:
//!
//! - [`RiskAssessmentService`]: blast radius, reversibility and outcome history
//! - [`RemediationValidator`]: plan checks before, effect checks after
//! - [`RemediationExecutor`]: sequential, fail-fast, retried, cancellable
//! - [`RollbackManager`]: best-effort reverse unwinding
//!
//! Action status changes go through [`state::apply_transition`].

#![warn(unreachable_pub)]

pub mod error;
pub mod executor;
pub mod risk;
pub mod rollback;
pub mod state;
pub mod validator;

pub use error::{ActionError, TransitionError};
pub use executor::{
    ActionHandler, ApprovalGate, AutoApprove, DenyAll, ExecutorConfig, RemediationExecutor, ResourceProbe,
    SequentialExecutor,
};
pub use risk::{PatternRiskAssessor, RiskAssessmentService, RiskConfig};
pub use rollback::{ReverseRollbackManager, RollbackConfig, RollbackManager};
pub use state::{allowed_transitions, apply_transition, validate_transition};
pub use validator::{HealthValidator, RemediationValidator, ValidatorConfig, Verification};
