//! Pattern learning
//!
//! Writes analysis and remediation results back into the store. A context
//! that matched no pattern gets a new one whose id is derived from service,
//! error type and message signature, so repeated occurrences converge on the
//! same record.

use crate::classifier::categorize_error_type;
use crate::error::StoreError;
use crate::store::PatternStore;
use std::sync::Arc;
use tracing::{debug, warn};
use triage_model::{
    signature_tokens, ActionHistory, ErrorClassification, ErrorContext, ErrorPattern, PatternId,
    RemediationOutcome,
};

/// Records occurrences and outcomes against stored patterns
#[derive(Clone)]
pub struct PatternLearner {
    store: Arc<dyn PatternStore>,
}

impl PatternLearner {
    /// Create learner
    #[must_use]
    pub fn new(store: Arc<dyn PatternStore>) -> Self {
        Self { store }
    }

    /// Record one occurrence of `ctx`, creating its pattern if needed
    ///
    /// # Errors
    /// Propagates store failures; callers decide whether to drop them.
    pub async fn record_occurrence(
        &self,
        ctx: &ErrorContext,
        classification: &ErrorClassification,
    ) -> Result<PatternId, StoreError> {
        let signature = signature_tokens(&ctx.message);
        let id = classification
            .matched_pattern
            .clone()
            .unwrap_or_else(|| PatternId::derive(&ctx.service_name, &ctx.error_type, &signature));

        let pattern = match self.store.get_pattern(&id).await? {
            Some(mut existing) => {
                existing.record_occurrence(ctx.timestamp);
                for tag in &ctx.tags {
                    if !existing.tags.contains(tag) {
                        existing.tags.push(tag.clone());
                    }
                }
                existing
            }
            None => {
                let category = if classification.is_unknown() {
                    categorize_error_type(&ctx.error_type, &ctx.message).to_string()
                } else {
                    classification.category.clone()
                };
                let mut fresh = ErrorPattern::new(id.clone(), &ctx.service_name, &ctx.error_type, category, ctx.timestamp)
                    .with_tags(ctx.tags.iter().cloned())
                    .with_signature(signature)
                    .with_severity(ctx.severity.value().max(classification.severity));
                if let Some(component) = &ctx.component_id {
                    fresh = fresh.with_component(component);
                }
                fresh
            }
        };

        self.store.save_pattern(&pattern).await?;
        debug!(
            pattern_id = %id,
            occurrences = pattern.occurrence_count,
            correlation_id = %ctx.correlation_id,
            "pattern occurrence recorded"
        );
        Ok(id)
    }

    /// Append remediation outcomes to a pattern
    ///
    /// Returns `false` when the pattern no longer exists.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn record_outcomes(
        &self,
        id: &PatternId,
        outcomes: Vec<RemediationOutcome>,
    ) -> Result<bool, StoreError> {
        let Some(mut pattern) = self.store.get_pattern(id).await? else {
            return Ok(false);
        };
        let recorded = outcomes.len();
        for outcome in outcomes {
            pattern.record_outcome(outcome);
        }
        self.store.save_pattern(&pattern).await?;
        debug!(pattern_id = %id, recorded, "remediation outcomes recorded");
        Ok(true)
    }

    /// Action success history across a service's patterns
    ///
    /// Empty when the store is unreachable.
    pub async fn action_history(&self, service_name: &str) -> ActionHistory {
        match self.store.get_patterns_by_service(service_name).await {
            Ok(patterns) => ActionHistory::from_patterns(&patterns),
            Err(err) => {
                warn!(service = service_name, error = %err, "action history unavailable");
                ActionHistory::new()
            }
        }
    }
}
