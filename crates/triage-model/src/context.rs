//! Error context
//!
//! [`ErrorContext`] is the immutable snapshot captured at the failure site.
//! The only mutation ever permitted is attaching the [`Analysis`] produced by
//! the pipeline, and that may happen at most once.

use crate::classification::ErrorClassification;
use crate::ids::CorrelationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity reported at the failure site
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum ErrorSeverity {
    /// Informational, no user impact
    Info,
    /// Degraded but functional
    Low,
    /// Default severity for unhandled errors
    #[default]
    Medium,
    /// Request failed
    High,
    /// Service-wide failure
    Critical,
}

impl ErrorSeverity {
    /// Numeric value (1-5)
    #[inline]
    #[must_use]
    pub fn value(self) -> u8 {
        match self {
            ErrorSeverity::Info => 1,
            ErrorSeverity::Low => 2,
            ErrorSeverity::Medium => 3,
            ErrorSeverity::High => 4,
            ErrorSeverity::Critical => 5,
        }
    }

    /// Inverse of [`ErrorSeverity::value`], saturating at both ends
    #[inline]
    #[must_use]
    pub fn from_value(value: u8) -> Self {
        match value {
            0 | 1 => ErrorSeverity::Info,
            2 => ErrorSeverity::Low,
            3 => ErrorSeverity::Medium,
            4 => ErrorSeverity::High,
            _ => ErrorSeverity::Critical,
        }
    }
}

/// Returned when an analysis is attached to a context that already has one
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("analysis already attached to context {0}")]
pub struct AnalysisAlreadyAttached(pub CorrelationId);

/// Analysis outcome attached to an [`ErrorContext`] once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Classification against stored patterns
    pub classification: ErrorClassification,
    /// Component believed to be the root cause, if any
    pub root_cause_component: Option<String>,
    /// Free-text analysis returned by the language model
    pub summary: Option<String>,
    /// True when the language model was unavailable or returned nothing
    pub degraded: bool,
    /// When the analysis finished
    pub analyzed_at: DateTime<Utc>,
}

/// Immutable snapshot of a runtime failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Correlation id of the originating occurrence
    pub correlation_id: CorrelationId,
    /// Service that raised the error
    pub service_name: String,
    /// Operation (endpoint, handler, job) that failed
    #[serde(default)]
    pub operation_name: String,
    /// Failing component, when narrower than the service
    #[serde(default)]
    pub component_id: Option<String>,
    /// Error type name
    pub error_type: String,
    /// Error message
    pub message: String,
    /// Captured stack trace
    #[serde(default)]
    pub stack_trace: Option<String>,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Reported severity
    #[serde(default)]
    pub severity: ErrorSeverity,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Additional key/value context
    #[serde(default)]
    pub additional_context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    analysis: Option<Analysis>,
}

impl ErrorContext {
    /// Capture a new context stamped with the current time
    #[must_use]
    pub fn new(
        correlation_id: impl Into<CorrelationId>,
        service_name: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            service_name: service_name.into(),
            operation_name: String::new(),
            component_id: None,
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
            timestamp: Utc::now(),
            severity: ErrorSeverity::default(),
            tags: Vec::new(),
            additional_context: BTreeMap::new(),
            analysis: None,
        }
    }

    /// With operation name
    #[inline]
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation_name = operation.into();
        self
    }

    /// With failing component
    #[inline]
    #[must_use]
    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    /// With severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// With a tag
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// With capture timestamp
    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// With stack trace
    #[inline]
    #[must_use]
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// With an additional context entry
    #[inline]
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_context.insert(key.into(), value.into());
        self
    }

    /// Component the dependency graph is rooted at
    #[inline]
    #[must_use]
    pub fn originating_component(&self) -> &str {
        self.component_id.as_deref().unwrap_or(&self.service_name)
    }

    /// Attached analysis, if produced
    #[inline]
    #[must_use]
    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    /// Attach the pipeline's analysis
    ///
    /// # Errors
    /// Returns [`AnalysisAlreadyAttached`] if an analysis is already present;
    /// the existing analysis is kept.
    pub fn attach_analysis(&mut self, analysis: Analysis) -> Result<(), AnalysisAlreadyAttached> {
        if self.analysis.is_some() {
            return Err(AnalysisAlreadyAttached(self.correlation_id.clone()));
        }
        self.analysis = Some(analysis);
        Ok(())
    }

    /// Lightweight observation of this error for per-component history
    #[must_use]
    pub fn to_observation(&self) -> ObservedError {
        ObservedError {
            correlation_id: Some(self.correlation_id.clone()),
            error_type: self.error_type.clone(),
            message: self.message.clone(),
            tags: self.tags.clone(),
            occurred_at: self.timestamp,
        }
    }
}

/// A recent error seen on a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedError {
    /// Correlation id of the occurrence, when known
    pub correlation_id: Option<CorrelationId>,
    /// Error type name
    pub error_type: String,
    /// Error message
    pub message: String,
    /// Tags carried by the occurrence
    pub tags: Vec<String>,
    /// When it happened
    pub occurred_at: DateTime<Utc>,
}

impl ObservedError {
    /// Create observation
    #[must_use]
    pub fn new(error_type: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id: None,
            error_type: error_type.into(),
            message: String::new(),
            tags: Vec::new(),
            occurred_at,
        }
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

    /// With message
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
