//! Pipeline orchestrator
//!
//! Sequences one pipeline run per correlation id:
//!
//! ```text
//! analyze:   validate context -> (build graph -> impact) || classify
//!            -> error probabilities -> LLM summary -> learn occurrence
//! remediate: analyze -> plan -> assess risk -> validate plan -> lock targets
//!            -> execute (retry / rollback) -> validate execution -> learn outcomes
//! ```
//!
//! A second request for a correlation id that is already in flight joins the
//! running task instead of starting another. Runs are spawned, so a caller
//! that stops waiting does not stall the joiners. Every run gets a child of
//! the orchestrator's shutdown token.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::llm::{build_prompt, request_summary, LlmClient, LlmError, NoopLlm};
use crate::locks::ComponentLocks;
use crate::planner::{PlaybookPlanner, RemediationPlanner};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use triage_graph::{
    DefaultGraphAnalyzer, DependencyGraph, GraphAnalyzer, GraphBuilder, GraphConstructionError, MetricsCollector,
    TopologyGraphBuilder, TopologyProvider,
};
use triage_model::{
    Analysis, CorrelationId, ErrorClassification, ErrorContext, ImpactAnalysisResult, IssueSeverity, PatternId,
    RemediationExecution, RemediationOutcome, RemediationPlan, RemediationStatus, RemediationValidationResult,
    RiskAssessment, RollbackStatus, ValidationIssue,
};
use triage_patterns::{ErrorClassifier, PatternClassifier, PatternLearner, PatternStore};
use triage_remediation::{
    ActionHandler, ApprovalGate, HealthValidator, PatternRiskAssessor, RemediationExecutor, RemediationValidator,
    ReverseRollbackManager, RiskAssessmentService, SequentialExecutor,
};

/// Injected pipeline stages
#[derive(Clone)]
pub struct Collaborators {
    /// Builds the dependency graph
    pub graph_builder: Arc<dyn GraphBuilder>,
    /// Impact and root-cause analysis
    pub analyzer: Arc<dyn GraphAnalyzer>,
    /// Live component health
    pub metrics: Arc<dyn MetricsCollector>,
    /// Pattern catalog
    pub store: Arc<dyn PatternStore>,
    /// Pattern matching
    pub classifier: Arc<dyn ErrorClassifier>,
    /// Occurrence and outcome recording
    pub learner: Arc<PatternLearner>,
    /// Plan construction
    pub planner: Arc<dyn RemediationPlanner>,
    /// Per-action risk
    pub risk: Arc<dyn RiskAssessmentService>,
    /// Plan and execution checks
    pub validator: Arc<dyn RemediationValidator>,
    /// Plan execution
    pub executor: Arc<dyn RemediationExecutor>,
    /// Optional narrative analysis
    pub llm: Arc<dyn LlmClient>,
}

impl Collaborators {
    /// Wire the default implementation of every stage
    #[must_use]
    pub fn standard(
        config: &PipelineConfig,
        topology: Arc<dyn TopologyProvider>,
        metrics: Arc<dyn MetricsCollector>,
        store: Arc<dyn PatternStore>,
        handler: Arc<dyn ActionHandler>,
        approvals: Arc<dyn ApprovalGate>,
    ) -> Self {
        let validator: Arc<dyn RemediationValidator> =
            Arc::new(HealthValidator::new(Arc::clone(&metrics), config.validator.clone()));
        let rollback = Arc::new(ReverseRollbackManager::new(Arc::clone(&handler), config.rollback.clone()));
        let executor = SequentialExecutor::new(
            handler,
            Arc::clone(&validator),
            approvals,
            rollback,
            config.executor.clone(),
        );

        Self {
            graph_builder: Arc::new(TopologyGraphBuilder::new(
                topology,
                Arc::clone(&metrics),
                config.graph.clone(),
            )),
            analyzer: Arc::new(DefaultGraphAnalyzer::new(config.analyzer.clone())),
            classifier: Arc::new(PatternClassifier::new(Arc::clone(&store), config.classifier.clone())),
            learner: Arc::new(PatternLearner::new(Arc::clone(&store))),
            planner: Arc::new(PlaybookPlanner::new(config.planner.clone())),
            risk: Arc::new(PatternRiskAssessor::new(config.risk.clone())),
            validator,
            executor: Arc::new(executor),
            llm: Arc::new(NoopLlm),
            metrics,
            store,
        }
    }

    /// With language-model client
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = llm;
        self
    }

    /// With executor
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn RemediationExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

/// Outcome of analyzing one error
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    /// Error the analysis belongs to
    pub correlation_id: CorrelationId,
    /// The context, with its analysis attached
    pub context: ErrorContext,
    /// Impact over the dependency graph
    pub impact: ImpactAnalysisResult,
    /// Pattern classification, `Unknown` when degraded
    pub classification: ErrorClassification,
    /// Failure probability per component
    pub error_probabilities: BTreeMap<String, f64>,
    /// Most likely root-cause component
    pub root_cause: Option<String>,
    /// Pattern the occurrence was recorded on
    pub pattern_id: Option<PatternId>,
    /// True when the language model gave no usable answer
    pub degraded: bool,
    /// Language-model summary
    pub summary: Option<String>,
    /// Non-fatal problems met on the way
    pub warnings: Vec<String>,
    /// Graph the analysis was computed over
    #[serde(skip)]
    pub graph: Arc<DependencyGraph>,
}

/// Outcome of remediating one error
#[derive(Debug, Clone, Serialize)]
pub struct RemediationResult {
    /// Analysis the plan was built from
    pub analysis: AnalysisResult,
    /// Planned actions
    pub plan: RemediationPlan,
    /// Risk per planned action
    pub assessments: Vec<RiskAssessment>,
    /// Pre-execution validation
    pub validation: RemediationValidationResult,
    /// Execution record; `None` when the plan never ran
    pub execution: Option<RemediationExecution>,
    /// Why the remediation did not succeed
    pub failure: Option<PipelineError>,
    /// Rollback that left changes in place, reported beside `failure`
    pub rollback_failure: Option<PipelineError>,
    /// Non-fatal problems met on the way
    pub warnings: Vec<String>,
}

impl RemediationResult {
    /// Whether every action completed
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
            && self
                .execution
                .as_ref()
                .map_or(self.plan.is_empty(), |e| e.status == RemediationStatus::Completed)
    }
}

type SharedRun<T> = Shared<BoxFuture<'static, Result<T, PipelineError>>>;

/// Runs currently in flight, keyed by correlation id
struct InFlight<T> {
    runs: Arc<DashMap<CorrelationId, SharedRun<T>>>,
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
        }
    }

    /// Join the run for `id`, or spawn `start()` as the new one
    fn join_or_spawn<F, Fut>(&self, id: &CorrelationId, start: F) -> SharedRun<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        match self.runs.entry(id.clone()) {
            Entry::Occupied(entry) => {
                debug!(correlation_id = %id, "joining in-flight run");
                metrics::counter!("triage_runs_joined_total").increment(1);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let runs = Arc::clone(&self.runs);
                let key = id.clone();
                let run = start();
                let task = tokio::spawn(async move {
                    let result = run.await;
                    runs.remove(&key);
                    result
                });
                let shared = async move {
                    task.await.unwrap_or_else(|join| {
                        if join.is_cancelled() {
                            Err(PipelineError::Cancelled)
                        } else {
                            Err(PipelineError::Execution(format!("pipeline task panicked: {join}")))
                        }
                    })
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        }
    }

    fn len(&self) -> usize {
        self.runs.len()
    }
}

struct Inner {
    config: PipelineConfig,
    parts: Collaborators,
    locks: ComponentLocks,
    analyses: InFlight<AnalysisResult>,
    remediations: InFlight<RemediationResult>,
    shutdown: CancellationToken,
}

/// Entry point for the triage pipeline
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create orchestrator
    #[must_use]
    pub fn new(config: PipelineConfig, parts: Collaborators) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                parts,
                locks: ComponentLocks::new(),
                analyses: InFlight::new(),
                remediations: InFlight::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Analyze an error: impact, classification, error probabilities
    ///
    /// # Errors
    /// [`PipelineError::InvalidContext`], [`PipelineError::GraphConstruction`]
    /// or [`PipelineError::Cancelled`]. Classification, LLM and learning
    /// failures degrade the result instead.
    pub async fn analyze_error(&self, context: ErrorContext) -> Result<AnalysisResult, PipelineError> {
        self.admit(&context)?;
        Inner::analysis(&self.inner, context).await
    }

    /// Analyze and remediate an error
    ///
    /// Plan rejection and execution failures are reported inside the
    /// [`RemediationResult`].
    ///
    /// # Errors
    /// Whatever [`Orchestrator::analyze_error`] fails with.
    pub async fn remediate_error(&self, context: ErrorContext) -> Result<RemediationResult, PipelineError> {
        self.admit(&context)?;
        let inner = Arc::clone(&self.inner);
        let id = context.correlation_id.clone();
        let span = info_span!("pipeline", correlation_id = %id, stage = "remediate");
        self.inner
            .remediations
            .join_or_spawn(&id, move || inner.remediate(context).instrument(span))
            .await
    }

    /// Check a context before it enters the pipeline
    #[must_use]
    pub fn validate_context(&self, context: &ErrorContext) -> RemediationValidationResult {
        validate_context(context, self.inner.config.max_clock_skew(), Utc::now())
    }

    /// Delete patterns past the retention period
    ///
    /// # Errors
    /// [`PipelineError::StoreConnectivity`] when the store is unreachable.
    pub async fn purge_expired_patterns(&self) -> Result<usize, PipelineError> {
        let purged = self.inner.parts.store.purge_expired(Utc::now()).await?;
        info!(purged, "expired patterns purged");
        Ok(purged)
    }

    /// Runs currently in flight (analyses, remediations)
    #[must_use]
    pub fn in_flight(&self) -> (usize, usize) {
        (self.inner.analyses.len(), self.inner.remediations.len())
    }

    /// Cancel every run; new runs fail with [`PipelineError::Cancelled`]
    pub fn shutdown(&self) {
        info!("pipeline shutting down");
        self.inner.shutdown.cancel();
    }

    fn admit(&self, context: &ErrorContext) -> Result<(), PipelineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let validation = self.validate_context(context);
        if validation.is_valid {
            Ok(())
        } else {
            let reasons: Vec<&str> = validation.errors().map(|i| i.message.as_str()).collect();
            Err(PipelineError::InvalidContext(reasons.join("; ")))
        }
    }
}

impl Inner {
    fn analysis(this: &Arc<Self>, context: ErrorContext) -> SharedRun<AnalysisResult> {
        let inner = Arc::clone(this);
        let id = context.correlation_id.clone();
        let span = info_span!("pipeline", correlation_id = %id, stage = "analyze");
        this.analyses
            .join_or_spawn(&id, move || inner.analyze(context).instrument(span))
    }

    async fn analyze(self: Arc<Self>, mut context: ErrorContext) -> Result<AnalysisResult, PipelineError> {
        let parts = &self.parts;
        let cancel = self.shutdown.child_token();
        let mut warnings = Vec::new();
        metrics::counter!("triage_analyses_total").increment(1);

        let origin = context.originating_component().to_string();
        parts.metrics.record_error(&origin, context.to_observation());

        let graph_stage = async {
            let graph = parts.graph_builder.build(&context, &cancel).await.map_err(|err| match err {
                GraphConstructionError::Cancelled => PipelineError::Cancelled,
                other => PipelineError::GraphConstruction(other),
            })?;
            let impact = parts.analyzer.analyze(&context, &graph);
            Ok::<_, PipelineError>((graph, impact))
        };
        let (graph_stage, classified) = tokio::join!(graph_stage, parts.classifier.classify(&context));
        let (graph, impact) = graph_stage.map_err(|err| {
            error!(error = %err, "graph construction failed");
            err
        })?;

        let classification = classified.unwrap_or_else(|err| {
            warn!(error = %err, "classification degraded to Unknown");
            metrics::counter!("triage_classification_degraded_total").increment(1);
            warnings.push(format!("classification degraded: {err}"));
            ErrorClassification::unknown(context.severity)
        });

        let probabilities = join_all(graph.nodes().map(|node| async move {
            (node.component_id.clone(), parts.classifier.calculate_error_probability(node).await)
        }))
        .await;
        let error_probabilities: BTreeMap<String, f64> = probabilities.into_iter().collect();

        let prompt = build_prompt(&context, &impact, &classification, self.config.llm.max_prompt_chars);
        let summary = match request_summary(parts.llm.as_ref(), &prompt, &self.config.llm, &cancel).await {
            Ok(text) => Some(text),
            Err(LlmError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(err) => {
                debug!(error = %err, "continuing with pattern-only analysis");
                None
            }
        };
        let degraded = summary.is_none();

        let pattern_id = match parts.learner.record_occurrence(&context, &classification).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(error = %err, "pattern occurrence dropped");
                warnings.push(format!("pattern not recorded: {err}"));
                None
            }
        };

        let root_cause = impact.potential_sources.first().map(|s| s.component_id.clone());
        let attached = context.attach_analysis(Analysis {
            classification: classification.clone(),
            root_cause_component: root_cause.clone(),
            summary: summary.clone(),
            degraded,
            analyzed_at: Utc::now(),
        });
        if let Err(err) = attached {
            warn!(error = %err, "keeping previously attached analysis");
        }

        info!(
            category = %classification.category,
            confidence = classification.confidence,
            impacted = impact.impacted.len(),
            root_cause = root_cause.as_deref().unwrap_or("-"),
            degraded,
            "error analyzed"
        );
        Ok(AnalysisResult {
            correlation_id: context.correlation_id.clone(),
            context,
            impact,
            classification,
            error_probabilities,
            root_cause,
            pattern_id,
            degraded,
            summary,
            warnings,
            graph: Arc::new(graph),
        })
    }

    async fn remediate(self: Arc<Self>, context: ErrorContext) -> Result<RemediationResult, PipelineError> {
        let analysis = Inner::analysis(&self, context).await?;
        let parts = &self.parts;
        let cancel = self.shutdown.child_token();
        let mut warnings = Vec::new();
        metrics::counter!("triage_remediations_total").increment(1);

        let pattern = match &analysis.pattern_id {
            Some(id) => parts.store.get_pattern(id).await.unwrap_or_else(|err| {
                warn!(error = %err, "planning without pattern history");
                warnings.push(format!("pattern history unavailable: {err}"));
                None
            }),
            None => None,
        };
        let plan = parts
            .planner
            .plan(&analysis.context, &analysis.impact, &analysis.classification, pattern.as_ref());
        let history = parts.learner.action_history(&analysis.context.service_name).await;
        let assessments: Vec<RiskAssessment> = plan
            .actions
            .iter()
            .map(|action| parts.risk.assess_risk(action, &analysis.graph, &history))
            .collect();
        let validation = parts.validator.validate_plan(&plan, &analysis.graph, &assessments);

        let mut result = RemediationResult {
            analysis,
            plan,
            assessments,
            validation,
            execution: None,
            failure: None,
            rollback_failure: None,
            warnings,
        };

        if !result.validation.is_valid {
            let reasons: Vec<&str> = result.validation.errors().map(|i| i.message.as_str()).collect();
            let reasons = reasons.join("; ");
            warn!(%reasons, "remediation plan rejected");
            result.failure = Some(PipelineError::ValidationFailure(reasons));
            return Ok(result);
        }
        if result.plan.is_empty() {
            info!("no remediation actions planned");
            return Ok(result);
        }

        let targets = result.plan.target_components();
        let Some(_guard) = self.locks.acquire(targets, &cancel).await else {
            result.failure = Some(PipelineError::Cancelled);
            return Ok(result);
        };

        let mut execution = parts
            .executor
            .execute(&result.plan, &result.assessments, &result.validation, &cancel)
            .await;
        execution.validation = Some(parts.validator.validate_execution(&execution));

        if let Some(id) = &result.analysis.pattern_id {
            let outcomes = self.outcomes(&execution);
            if !outcomes.is_empty() {
                match parts.learner.record_outcomes(id, outcomes).await {
                    Ok(true) => {}
                    Ok(false) => result.warnings.push(format!("pattern {id} vanished before outcomes were recorded")),
                    Err(err) => {
                        warn!(error = %err, "remediation outcomes dropped");
                        result.warnings.push(format!("outcomes not recorded: {err}"));
                    }
                }
            }
        }

        let (failure, rollback_failure) = failures_of(&execution);
        if let Some(err) = &failure {
            warn!(error = %err, status = ?execution.status, "remediation did not complete");
        }
        result.failure = failure;
        result.rollback_failure = rollback_failure;
        result.execution = Some(execution);
        Ok(result)
    }

    /// Outcomes of actions that actually ran to success or failure
    fn outcomes(&self, execution: &RemediationExecution) -> Vec<RemediationOutcome> {
        execution
            .actions
            .iter()
            .filter(|a| matches!(a.status, RemediationStatus::Completed | RemediationStatus::Failed))
            .map(|a| RemediationOutcome {
                action_name: a.action_name.clone(),
                success: a.status == RemediationStatus::Completed,
                duration_ms: execution.metrics.step_durations_ms.get(&a.action_id).copied().unwrap_or(0),
                final_health: Some(self.parts.metrics.health_score(&a.target_component)),
                recorded_at: a.ended_at.unwrap_or_else(Utc::now),
            })
            .collect()
    }
}

/// Primary failure and, separately, an incomplete rollback
fn failures_of(execution: &RemediationExecution) -> (Option<PipelineError>, Option<PipelineError>) {
    let denied = execution.actions.iter().find(|a| a.approval_denied);
    let failure = match (execution.status, denied) {
        (RemediationStatus::Completed, _) => None,
        (_, Some(action)) => Some(PipelineError::ValidationFailure(format!(
            "approval denied for {} on {}",
            action.action_name, action.target_component
        ))),
        (RemediationStatus::Cancelled, None) => Some(PipelineError::Cancelled),
        _ => {
            let reason = execution
                .actions
                .iter()
                .find(|a| matches!(a.status, RemediationStatus::Failed | RemediationStatus::Cancelled))
                .map_or_else(
                    || format!("plan ended {:?}", execution.status),
                    |a| format!("{}: {}", a.action_name, a.error.as_deref().unwrap_or("failed")),
                );
            Some(PipelineError::Execution(reason))
        }
    };

    let rollback_failure = execution.rollback.as_ref().and_then(|record| {
        (record.status != RollbackStatus::FullyRolledBack).then(|| {
            let failed: Vec<&str> = record
                .steps
                .iter()
                .filter(|s| !s.succeeded)
                .map(|s| s.action_name.as_str())
                .collect();
            PipelineError::Rollback(format!("{:?}; not reverted: {}", record.status, failed.join(", ")))
        })
    });
    (failure, rollback_failure)
}

/// Structural checks on a context
///
/// Blank correlation id, service or error type and timestamps more than
/// `max_skew` ahead of `now` are errors; a missing message is a warning.
#[must_use]
pub fn validate_context(
    context: &ErrorContext,
    max_skew: chrono::Duration,
    now: chrono::DateTime<Utc>,
) -> RemediationValidationResult {
    let mut result = RemediationValidationResult::valid();
    let mut reject = |message: String| result.push_issue(ValidationIssue::new(IssueSeverity::Error, "context", message));

    if context.correlation_id.is_blank() {
        reject("correlation id is empty".into());
    }
    if context.service_name.trim().is_empty() {
        reject("service name is empty".into());
    }
    if context.error_type.trim().is_empty() {
        reject("error type is empty".into());
    }
    if context.timestamp > now + max_skew {
        reject(format!("timestamp {} is ahead of the clock", context.timestamp.to_rfc3339()));
    }
    if context.message.trim().is_empty() {
        result.push_issue(ValidationIssue::new(IssueSeverity::Warning, "context", "error message is empty"));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn blank_fields_are_errors() {
        let ctx = ErrorContext::new(" ", "", "TimeoutException", "");
        let result = validate_context(&ctx, Duration::minutes(5), Utc::now());
        assert!(!result.is_valid);
        assert_eq!(result.errors().count(), 2);
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn future_timestamps_beyond_skew_are_rejected() {
        let now = Utc::now();
        let ctx = ErrorContext::new("c", "orders", "TimeoutException", "late").with_timestamp(now + Duration::minutes(2));
        assert!(validate_context(&ctx, Duration::minutes(5), now).is_valid);
        assert!(!validate_context(&ctx, Duration::seconds(30), now).is_valid);
    }

    #[test]
    fn rollback_failure_does_not_mask_execution_failure() {
        use triage_model::{RemediationAction, RollbackRecord, RollbackStep};

        let plan = RemediationPlan::new("c".into())
            .with_action(RemediationAction::new("flush", "redis").with_inverse("warm"))
            .with_action(RemediationAction::new("restart", "api"));
        let mut exec = RemediationExecution::new(&plan);
        exec.actions[0].status = RemediationStatus::Completed;
        exec.actions[1].status = RemediationStatus::Failed;
        exec.actions[1].error = Some("boom".into());
        exec.rollback = Some(RollbackRecord {
            status: RollbackStatus::RollbackFailed,
            steps: vec![RollbackStep {
                action_id: plan.actions[0].id,
                action_name: "flush".into(),
                inverse: Some("warm".into()),
                succeeded: false,
                error: Some("refused".into()),
                duration_ms: 1,
            }],
            started_at: Utc::now(),
            ended_at: Utc::now(),
        });
        exec.finish(Utc::now());

        let (failure, rollback) = failures_of(&exec);
        assert_eq!(failure, Some(PipelineError::Execution("restart: boom".into())));
        assert!(matches!(rollback, Some(PipelineError::Rollback(msg)) if msg.contains("flush")));
    }
}
