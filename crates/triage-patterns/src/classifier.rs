//! Error classification against learned patterns
//!
//! Candidates are gathered from the store by owning service, by each tag on
//! the context and by a heuristic category, then scored:
//!
//! ```text
//! similarity = w_type * type_match + w_tags * jaccard(tags) + w_msg * jaccard(message tokens)
//! ```
//!
//! `type_match` is 1 for an exact (case-insensitive) error type and 0.5 when
//! one type name contains the other. The best candidate wins if it clears
//! `min_similarity`; ties go to the pattern seen most often, then most
//! recently.

use crate::error::ClassificationError;
use crate::store::PatternStore;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use triage_graph::DependencyNode;
use triage_model::{
    signature_tokens, ErrorClassification, ErrorContext, ErrorPattern, UNKNOWN_CATEGORY,
};

/// Classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum similarity for a candidate to be accepted
    pub min_similarity: f64,
    /// Weight of the error type match
    pub type_weight: f64,
    /// Weight of tag overlap
    pub tag_weight: f64,
    /// Weight of message token overlap
    pub message_weight: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.5,
            type_weight: 0.6,
            tag_weight: 0.3,
            message_weight: 0.1,
        }
    }
}

impl ClassifierConfig {
    /// With acceptance threshold
    #[inline]
    #[must_use]
    pub fn with_min_similarity(mut self, threshold: f64) -> Self {
        self.min_similarity = threshold;
        self
    }
}

/// Matches errors against stored patterns
#[async_trait]
pub trait ErrorClassifier: Send + Sync {
    /// Classify an error; "Unknown" with zero confidence when nothing matches
    ///
    /// # Errors
    /// [`ClassificationError::Store`] when the pattern store cannot be queried.
    async fn classify(&self, ctx: &ErrorContext) -> Result<ErrorClassification, ClassificationError>;

    /// Probability (0-1) that a node is failing
    ///
    /// Decreases as health rises; increases with historical failures.
    async fn calculate_error_probability(&self, node: &DependencyNode) -> f64;
}

/// [`ErrorClassifier`] backed by a [`PatternStore`]
pub struct PatternClassifier {
    store: Arc<dyn PatternStore>,
    config: ClassifierConfig,
}

impl PatternClassifier {
    /// Create classifier
    #[must_use]
    pub fn new(store: Arc<dyn PatternStore>, config: ClassifierConfig) -> Self {
        Self { store, config }
    }

    /// Similarity of a context to a pattern, with its three components
    #[must_use]
    pub fn similarity(&self, ctx: &ErrorContext, pattern: &ErrorPattern) -> Similarity {
        let type_match = type_match(&ctx.error_type, &pattern.error_type);
        let tag_overlap = jaccard(
            ctx.tags.iter().map(String::as_str),
            pattern.tags.iter().map(String::as_str),
        );
        let tokens = signature_tokens(&ctx.message);
        let message_overlap = jaccard(
            tokens.iter().map(String::as_str),
            pattern.message_signature.iter().map(String::as_str),
        );

        let score = self.config.type_weight * type_match
            + self.config.tag_weight * tag_overlap
            + self.config.message_weight * message_overlap;

        Similarity {
            score: round_score(score).clamp(0.0, 1.0),
            type_match,
            tag_overlap,
            message_overlap,
        }
    }

    async fn candidates(&self, ctx: &ErrorContext) -> Result<Vec<ErrorPattern>, ClassificationError> {
        let category = categorize_error_type(&ctx.error_type, &ctx.message);

        let by_service = self.store.get_patterns_by_service(&ctx.service_name);
        let by_category = self.store.get_patterns_by_category(category);
        let by_type = self.store.get_patterns_by_error_type(&ctx.error_type);
        let by_tags = try_join_all(ctx.tags.iter().map(|t| self.store.get_patterns_by_tag(t)));

        let (service, category, same_type, tags) = futures::try_join!(by_service, by_category, by_type, by_tags)?;

        let mut seen = BTreeSet::new();
        Ok(service
            .into_iter()
            .chain(category)
            .chain(same_type)
            .chain(tags.into_iter().flatten())
            .filter(|p| seen.insert(p.id.clone()))
            .collect())
    }

    async fn historical_failures(&self, node: &DependencyNode) -> u64 {
        match self.store.get_patterns_by_service(&node.service).await {
            Ok(patterns) => patterns
                .iter()
                .filter(|p| p.component_id.as_deref() == Some(node.component_id.as_str()))
                .map(|p| p.occurrence_count)
                .sum(),
            Err(err) => {
                warn!(component = %node.component_id, error = %err, "pattern history unavailable");
                0
            }
        }
    }
}

#[async_trait]
impl ErrorClassifier for PatternClassifier {
    async fn classify(&self, ctx: &ErrorContext) -> Result<ErrorClassification, ClassificationError> {
        let candidates = self.candidates(ctx).await?;

        let best = candidates
            .iter()
            .map(|p| (p, self.similarity(ctx, p)))
            .max_by(|(a, sa), (b, sb)| {
                sa.score
                    .total_cmp(&sb.score)
                    .then(a.occurrence_count.cmp(&b.occurrence_count))
                    .then(a.last_seen.cmp(&b.last_seen))
                    .then_with(|| b.id.cmp(&a.id))
            });

        let Some((pattern, sim)) = best.filter(|(_, s)| s.score >= self.config.min_similarity) else {
            debug!(
                correlation_id = %ctx.correlation_id,
                candidates = candidates.len(),
                "no pattern cleared the similarity threshold"
            );
            return Ok(ErrorClassification::unknown(ctx.severity));
        };

        debug!(
            correlation_id = %ctx.correlation_id,
            pattern_id = %pattern.id,
            confidence = sim.score,
            "error classified"
        );

        Ok(
            ErrorClassification::new(&pattern.category, sim.score, pattern.severity.max(ctx.severity.value()))
                .with_pattern(pattern.id.clone())
                .with_metadata("type_match", format!("{:.2}", sim.type_match))
                .with_metadata("tag_overlap", format!("{:.2}", sim.tag_overlap))
                .with_metadata("message_overlap", format!("{:.2}", sim.message_overlap))
                .with_metadata("candidates", candidates.len().to_string()),
        )
    }

    async fn calculate_error_probability(&self, node: &DependencyNode) -> f64 {
        let recent = u64::try_from(node.recent_errors.len()).unwrap_or(u64::MAX);
        let failures = self.historical_failures(node).await.saturating_add(recent);
        error_probability(node.health_score, failures)
    }
}

/// Components of a similarity score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    /// Weighted total (0-1)
    pub score: f64,
    /// Error type match (0, 0.5 or 1)
    pub type_match: f64,
    /// Tag Jaccard index
    pub tag_overlap: f64,
    /// Message token Jaccard index
    pub message_overlap: f64,
}

/// Round to four decimals so weight sums like `0.6 + 0.3` land on `0.9`
fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Blend health and failure history into a probability
///
/// `0.6 * (1 - health) + 0.4 * (1 - e^(-failures / 10))`
#[must_use]
pub fn error_probability(health: f64, failures: u64) -> f64 {
    let health = if health.is_nan() { 1.0 } else { health.clamp(0.0, 1.0) };
    #[allow(clippy::cast_precision_loss)]
    let history = 1.0 - (-(failures as f64) / 10.0).exp();
    (0.6 * (1.0 - health) + 0.4 * history).clamp(0.0, 1.0)
}

/// Heuristic category from an error type name and message
#[must_use]
pub fn categorize_error_type(error_type: &str, message: &str) -> &'static str {
    let haystack = format!("{error_type} {message}").to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if any(&["timeout", "timed out", "deadline"]) {
        "Timeout"
    } else if any(&["connection", "connect", "socket", "unreachable", "refused", "network"]) {
        "Connectivity"
    } else if any(&["outofmemory", "out of memory", "exhausted", "quota", "disk full", "too many"]) {
        "Resource"
    } else if any(&["nullreference", "null reference", "nullpointer", "null pointer"]) {
        "NullReference"
    } else if any(&["validation", "argument", "invalid", "format"]) {
        "Validation"
    } else if any(&["unauthorized", "forbidden", "security", "access denied", "authentication"]) {
        "Security"
    } else {
        UNKNOWN_CATEGORY
    }
}

fn type_match(a: &str, b: &str) -> f64 {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    if a.is_empty() || b.is_empty() {
        0.0
    } else if a == b {
        1.0
    } else if a.contains(&b) || b.contains(&a) {
        0.5
    } else {
        0.0
    }
}

fn jaccard<'a>(a: impl Iterator<Item = &'a str>, b: impl Iterator<Item = &'a str>) -> f64 {
    let a: BTreeSet<String> = a.map(str::to_lowercase).collect();
    let b: BTreeSet<String> = b.map(str::to_lowercase).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = a.intersection(&b).count() as f64 / union as f64;
    ratio
}
