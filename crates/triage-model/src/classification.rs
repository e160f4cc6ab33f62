//! Error classification

use crate::context::ErrorSeverity;
use crate::ids::PatternId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category assigned when nothing in the pattern catalog matches
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Result of matching an error against stored patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Category label
    pub category: String,
    /// Match confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Numeric severity (1-5, see [`ErrorSeverity::value`])
    pub severity: u8,
    /// Pattern the classification was derived from
    pub matched_pattern: Option<PatternId>,
    /// Free-form metadata (scores, matched fields)
    pub metadata: BTreeMap<String, String>,
}

impl ErrorClassification {
    /// Create classification, clamping confidence into range
    #[must_use]
    pub fn new(category: impl Into<String>, confidence: f64, severity: u8) -> Self {
        Self {
            category: category.into(),
            confidence: confidence.clamp(0.0, 1.0),
            severity,
            matched_pattern: None,
            metadata: BTreeMap::new(),
        }
    }

    /// The "Unknown" classification with zero confidence
    #[must_use]
    pub fn unknown(severity: ErrorSeverity) -> Self {
        Self::new(UNKNOWN_CATEGORY, 0.0, severity.value())
    }

    /// With matched pattern
    #[inline]
    #[must_use]
    pub fn with_pattern(mut self, id: PatternId) -> Self {
        self.matched_pattern = Some(id);
        self
    }

    /// With metadata entry
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True for the fallback classification
    #[inline]
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.category == UNKNOWN_CATEGORY && self.matched_pattern.is_none()
    }
}
