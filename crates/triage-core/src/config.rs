//! Pipeline configuration
//!
//! One TOML document configures every stage. Every table is optional; missing
//! keys take their defaults.
//!
//! ```toml
//! max_clock_skew_secs = 120
//!
//! [graph]
//! max_depth = 4
//!
//! [store]
//! retention_days = 14
//!
//! [planner.playbooks]
//! Timeout = [{ name = "raise-timeout", target = "error_source", inverse = "restore-timeout" }]
//! ```

use crate::llm::LlmConfig;
use crate::planner::PlannerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use triage_graph::{AnalyzerConfig, GraphConfig, MetricsConfig};
use triage_patterns::{ClassifierConfig, StoreConfig};
use triage_remediation::{ExecutorConfig, RiskConfig, RollbackConfig, ValidatorConfig};

/// Configuration could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File unreadable
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File being read
        path: String,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML or wrong shape
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed but nonsensical
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for a whole pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Graph construction bounds
    pub graph: GraphConfig,
    /// Impact analysis tuning
    pub analyzer: AnalyzerConfig,
    /// Health signal tuning for the built-in collector
    pub metrics: MetricsConfig,
    /// Pattern matching thresholds
    pub classifier: ClassifierConfig,
    /// Pattern store connection and retention
    pub store: StoreConfig,
    /// Risk weights
    pub risk: RiskConfig,
    /// Plan and effect checks
    pub validator: ValidatorConfig,
    /// Retries and timeouts for actions
    pub executor: ExecutorConfig,
    /// Revert timeouts
    pub rollback: RollbackConfig,
    /// Language-model enrichment
    pub llm: LlmConfig,
    /// Playbooks and plan bounds
    pub planner: PlannerConfig,
    /// Contexts stamped further in the future are rejected
    pub max_clock_skew_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            graph: GraphConfig::default(),
            analyzer: AnalyzerConfig::default(),
            metrics: MetricsConfig::default(),
            classifier: ClassifierConfig::default(),
            store: StoreConfig::default(),
            risk: RiskConfig::default(),
            validator: ValidatorConfig::default(),
            executor: ExecutorConfig::default(),
            rollback: RollbackConfig::default(),
            llm: LlmConfig::default(),
            planner: PlannerConfig::default(),
            max_clock_skew_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With graph bounds
    #[inline]
    #[must_use]
    pub fn with_graph(mut self, graph: GraphConfig) -> Self {
        self.graph = graph;
        self
    }

    /// With validator config
    #[inline]
    #[must_use]
    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    /// With executor config
    #[inline]
    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// With planner config
    #[inline]
    #[must_use]
    pub fn with_planner(mut self, planner: PlannerConfig) -> Self {
        self.planner = planner;
        self
    }

    /// With LLM config
    #[inline]
    #[must_use]
    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = llm;
        self
    }

    /// Maximum future clock skew accepted on a context
    #[must_use]
    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.max_clock_skew_secs).unwrap_or(i64::MAX))
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// [`ConfigError`] when the file is unreadable, malformed or invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Reject values no stage can work with
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(key: &str, value: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{key} must be within 0..=1, got {value}")))
            }
        }
        fn positive(key: &str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                Err(ConfigError::Invalid(format!("{key} must be greater than zero")))
            } else {
                Ok(())
            }
        }

        positive("graph.max_depth", self.graph.max_depth as u64)?;
        positive("graph.max_nodes", self.graph.max_nodes as u64)?;
        positive("graph.lookup_timeout_ms", self.graph.lookup_timeout_ms)?;
        positive("metrics.window_size", self.metrics.window_size as u64)?;
        positive("store.cache_capacity", self.store.cache_capacity)?;
        positive("store.retention_days", u64::from(self.store.retention_days))?;
        positive("store.op_timeout_ms", self.store.op_timeout_ms)?;
        positive("executor.action_timeout_ms", self.executor.action_timeout_ms)?;
        positive("rollback.revert_timeout_ms", self.rollback.revert_timeout_ms)?;
        positive("planner.max_actions", self.planner.max_actions as u64)?;

        unit("analyzer.min_related_confidence", self.analyzer.min_related_confidence)?;
        unit("analyzer.min_source_confidence", self.analyzer.min_source_confidence)?;
        unit("metrics.success_weight", self.metrics.success_weight)?;
        unit("classifier.min_similarity", self.classifier.min_similarity)?;
        unit("risk.critical_blast_ratio", self.risk.critical_blast_ratio)?;
        unit("validator.healthy_threshold", self.validator.healthy_threshold)?;
        unit("planner.min_success_rate", self.planner.min_success_rate)?;

        if self.validator.approval_level > self.validator.reject_level {
            return Err(ConfigError::Invalid(
                "validator.approval_level must not exceed validator.reject_level".into(),
            ));
        }
        if self.validator.max_plan_risk.is_nan() || self.validator.max_plan_risk <= 0.0 {
            return Err(ConfigError::Invalid("validator.max_plan_risk must be positive".into()));
        }
        if self.store.backoff.multiplier < 1.0 || self.executor.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid("backoff multiplier must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use triage_model::RiskLevel;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(PipelineConfig::from_toml_str("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            max_clock_skew_secs = 60

            [graph]
            max_depth = 5

            [validator]
            approval_level = "Medium"
            "#,
        )
        .unwrap();
        assert_eq!(config.graph.max_depth, 5);
        assert_eq!(config.graph.max_nodes, GraphConfig::default().max_nodes);
        assert_eq!(config.validator.approval_level, RiskLevel::Medium);
        assert_eq!(config.max_clock_skew(), chrono::Duration::seconds(60));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = PipelineConfig::from_toml_str("[classifier]\nmin_similarity = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("classifier.min_similarity")));

        let err = PipelineConfig::from_toml_str("[validator]\nmax_plan_risk = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("max_plan_risk")));

        let err = PipelineConfig::from_toml_str("[graph]\nmax_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("graph.max_depth")));
    }

    #[test]
    fn playbooks_parse_from_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [planner.playbooks]
            Timeout = [
                { name = "raise-timeout", target = "error_source", inverse = "restore-timeout" },
                { name = "failover", target = { component = "postgres-replica" } },
            ]
            "#,
        )
        .unwrap();
        let timeout = &config.planner.playbooks["Timeout"];
        assert_eq!(timeout.len(), 2);
        assert_eq!(
            timeout[1].target,
            crate::planner::TargetSelector::Component("postgres-replica".into())
        );
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.toml");
        std::fs::write(&path, "[executor]\nmax_retries = 1\n").unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap().executor.max_retries, 1);

        let err = PipelineConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { ref path, .. } if path.ends_with("absent.toml")));
    }
}
