//! # Triage Core
//!
//! The pipeline that takes a runtime error from capture to remediation:
//!
//! - Builds the dependency graph around the failing component
//! - Traces impact and ranks root-cause candidates
//! - Classifies the error against learned patterns
//! - Plans, risk-scores, validates and executes remediation
//! - Rolls back on failure and learns from every outcome
//!
//! # Example
//!
//! ```rust,ignore
//! use triage_core::prelude::*;
//!
//! # async fn example(parts: Collaborators) -> Result<(), PipelineError> {
//! let orchestrator = Orchestrator::new(PipelineConfig::default(), parts);
//!
//! let context = ErrorContext::new("req-42", "orders", "TimeoutException", "query timed out");
//! let result = orchestrator.remediate_error(context).await?;
//!
//! println!("{} actions, succeeded: {}", result.plan.actions.len(), result.succeeded());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod llm;
pub mod locks;
pub mod orchestrator;
pub mod planner;

pub use config::{ConfigError, PipelineConfig};
pub use error::{ErrorKind, PipelineError};
pub use llm::{build_prompt, request_summary, LlmClient, LlmConfig, LlmError, NoopLlm};
pub use locks::{ComponentGuard, ComponentLocks};
pub use orchestrator::{validate_context, AnalysisResult, Collaborators, Orchestrator, RemediationResult};
pub use planner::{ActionTemplate, PlannerConfig, PlaybookPlanner, RemediationPlanner, TargetSelector};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the pipeline
    pub use crate::{
        AnalysisResult, Collaborators, LlmClient, Orchestrator, PipelineConfig, PipelineError, RemediationResult,
    };
    pub use triage_model::{CorrelationId, ErrorContext, ErrorSeverity, RemediationStatus};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
