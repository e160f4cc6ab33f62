//! Language-model enrichment
//!
//! The model is an optional narrator: it receives a plain-text summary of the
//! analysis and returns free text. An empty, failed or late answer marks the
//! analysis degraded and never fails it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use triage_model::{ErrorClassification, ErrorContext, ImpactAnalysisResult};

/// LLM client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Skip the call entirely when false
    pub enabled: bool,
    /// Upper bound for one call
    pub timeout_ms: u64,
    /// Prompts are truncated to this many characters
    pub max_prompt_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 10_000,
            max_prompt_chars: 8_000,
        }
    }
}

impl LlmConfig {
    /// With timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Call timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Why no usable answer came back
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// No answer within the timeout
    #[error("language model timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Client could not reach the model
    #[error("language model unavailable: {0}")]
    Unavailable(String),

    /// Model answered with nothing
    #[error("language model returned an empty response")]
    Empty,

    /// Enrichment switched off
    #[error("language model disabled")]
    Disabled,

    /// Run cancelled while waiting
    #[error("language model call cancelled")]
    Cancelled,
}

/// Black-box text analysis
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Analyze `prompt`, answering within `timeout`
    async fn analyze(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError>;
}

/// Client that never answers; every analysis runs pattern-only
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLlm;

#[async_trait]
impl LlmClient for NoopLlm {
    async fn analyze(&self, _prompt: &str, _timeout: Duration) -> Result<String, LlmError> {
        Ok(String::new())
    }
}

/// Call the client under the configured timeout and `cancel`
///
/// # Errors
/// [`LlmError`] for disabled, late, cancelled, failed or empty answers.
pub async fn request_summary(
    client: &dyn LlmClient,
    prompt: &str,
    config: &LlmConfig,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    if !config.enabled {
        return Err(LlmError::Disabled);
    }
    let timeout = config.timeout();
    let answer = tokio::select! {
        () = cancel.cancelled() => return Err(LlmError::Cancelled),
        answer = tokio::time::timeout(timeout, client.analyze(prompt, timeout)) => answer,
    };
    let text = answer.map_err(|_| LlmError::Timeout {
        timeout_ms: config.timeout_ms,
    })??;
    let text = text.trim();
    if text.is_empty() {
        Err(LlmError::Empty)
    } else {
        Ok(text.to_string())
    }
}

/// Plain-text prompt describing one analyzed error
#[must_use]
pub fn build_prompt(
    context: &ErrorContext,
    impact: &ImpactAnalysisResult,
    classification: &ErrorClassification,
    max_chars: usize,
) -> String {
    let mut prompt = String::new();
    // writing into a String cannot fail
    let _ = writeln!(prompt, "Service: {}", context.service_name);
    if !context.operation_name.is_empty() {
        let _ = writeln!(prompt, "Operation: {}", context.operation_name);
    }
    let _ = writeln!(prompt, "Component: {}", context.originating_component());
    let _ = writeln!(prompt, "Error: {}: {}", context.error_type, context.message);
    let _ = writeln!(prompt, "Severity: {:?}", context.severity);
    if !context.tags.is_empty() {
        let _ = writeln!(prompt, "Tags: {}", context.tags.join(", "));
    }
    let _ = writeln!(
        prompt,
        "Classification: {} (confidence {:.2})",
        classification.category, classification.confidence
    );
    let _ = writeln!(
        prompt,
        "Graph: {} components, {} dependencies",
        impact.summary.node_count, impact.summary.edge_count
    );
    for node in &impact.impacted {
        let _ = writeln!(
            prompt,
            "Impacted: {} {:?}/{:?} after {} hops",
            node.component_id, node.severity, node.scope, node.hops
        );
    }
    for source in &impact.potential_sources {
        let _ = writeln!(
            prompt,
            "Suspect: {} confidence {:.2}",
            source.component_id, source.confidence
        );
    }
    if let Some(trace) = &context.stack_trace {
        let _ = writeln!(prompt, "Stack trace:\n{trace}");
    }
    prompt.push_str("Explain the most likely root cause and how to remediate it.");

    if prompt.chars().count() > max_chars {
        prompt = prompt.chars().take(max_chars).collect();
    }
    prompt
}
