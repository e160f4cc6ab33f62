use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use triage_core::{
    ActionTemplate, Collaborators, LlmClient, LlmError, Orchestrator, PipelineConfig, PipelineError, PlannerConfig,
    TargetSelector,
};
use triage_graph::MetricsCollector;
use triage_model::{CorrelationId, ErrorContext, PatternId, RemediationStatus};
use triage_patterns::{InMemoryBackend, PatternStore, RemotePatternStore, StoreConfig};
use triage_remediation::{ApprovalGate, AutoApprove, DenyAll};
use triage_test_utils::{fixtures, ScriptedHandler, StaticMetrics};

struct Harness {
    orchestrator: Orchestrator,
    metrics: Arc<StaticMetrics>,
    store: Arc<RemotePatternStore>,
    handler: Arc<ScriptedHandler>,
}

async fn harness_with(config: PipelineConfig, handler: ScriptedHandler, connect: bool) -> Harness {
    harness_gated(config, handler, connect, Arc::new(AutoApprove)).await
}

async fn harness_gated(
    config: PipelineConfig,
    handler: ScriptedHandler,
    connect: bool,
    approvals: Arc<dyn ApprovalGate>,
) -> Harness {
    let metrics = Arc::new(StaticMetrics::new());
    let store = Arc::new(RemotePatternStore::new(Arc::new(InMemoryBackend::new()), StoreConfig::default()));
    if connect {
        store.connect().await.unwrap();
    }
    let handler = Arc::new(handler);
    let parts = Collaborators::standard(
        &config,
        Arc::new(fixtures::checkout_topology()),
        metrics.clone(),
        store.clone(),
        handler.clone(),
        approvals,
    );
    Harness {
        orchestrator: Orchestrator::new(config, parts),
        metrics,
        store,
        handler,
    }
}

async fn harness() -> Harness {
    harness_with(PipelineConfig::default(), ScriptedHandler::new(), true).await
}

#[tokio::test]
async fn analysis_covers_graph_and_records_pattern() {
    let h = harness().await;
    let result = h.orchestrator.analyze_error(fixtures::timeout_context()).await.unwrap();

    assert!(!result.impact.impacted.is_empty());
    assert!(result
        .impact
        .impacted
        .iter()
        .all(|node| result.graph.contains_component(&node.component_id)));
    assert!(result.classification.is_unknown());
    assert!(result.degraded);
    assert!(result.summary.is_none());
    assert!(result.warnings.is_empty());
    assert!(result.context.analysis().is_some());
    assert_eq!(result.error_probabilities.len(), result.graph.node_count());

    let id = result.pattern_id.expect("occurrence recorded");
    let pattern = h.store.get_pattern(&id).await.unwrap().unwrap();
    assert_eq!(pattern.category, "Timeout");
    assert_eq!(pattern.occurrence_count, 1);
}

#[tokio::test]
async fn stored_pattern_drives_classification() {
    let h = harness().await;
    h.store.save_pattern(&fixtures::null_reference_pattern()).await.unwrap();

    let result = h.orchestrator.analyze_error(fixtures::null_reference_context()).await.unwrap();
    assert_eq!(result.classification.category, "NullReference");
    assert!(result.classification.confidence >= 0.9);
    assert_eq!(result.pattern_id, Some(PatternId::new("null-orders")));

    let pattern = h.store.get_pattern(&PatternId::new("null-orders")).await.unwrap().unwrap();
    assert_eq!(pattern.occurrence_count, 2);
}

#[tokio::test]
async fn concurrent_requests_share_one_run() {
    let h = harness().await;
    let (a, b) = tokio::join!(
        h.orchestrator.analyze_error(fixtures::timeout_context()),
        h.orchestrator.analyze_error(fixtures::timeout_context()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.pattern_id, b.pattern_id);
    assert!(Arc::ptr_eq(&a.graph, &b.graph));

    // the error was observed and learned once
    assert_eq!(h.metrics.recent_errors("orders-api").len(), 1);
    let pattern = h.store.get_pattern(a.pattern_id.as_ref().unwrap()).await.unwrap().unwrap();
    assert_eq!(pattern.occurrence_count, 1);
    assert_eq!(h.orchestrator.in_flight(), (0, 0));
}

#[tokio::test]
async fn unknown_component_fails_graph_construction() {
    let h = harness().await;
    let ctx = ErrorContext::new("corr-ghost", "ghosts", "TimeoutException", "timed out").with_component("ghost");
    let err = h.orchestrator.analyze_error(ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::GraphConstruction(_)));
    assert!(err.is_fatal());
    assert_eq!(h.orchestrator.in_flight(), (0, 0));
}

#[tokio::test]
async fn invalid_context_is_rejected_before_any_work() {
    let h = harness().await;
    let ctx = ErrorContext::new("corr-bad", "", "TimeoutException", "timed out").with_component("orders-api");
    let err = h.orchestrator.remediate_error(ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidContext(ref msg) if msg.contains("service name")));
    assert!(h.metrics.recent_errors("orders-api").is_empty());
    assert!(h.handler.calls().is_empty());
}

#[tokio::test]
async fn remediation_completes_and_feeds_next_plan() {
    let h = harness().await;
    let first = h.orchestrator.remediate_error(fixtures::timeout_context()).await.unwrap();

    assert!(first.succeeded(), "failure: {:?}", first.failure);
    let execution = first.execution.as_ref().unwrap();
    assert_eq!(execution.status, RemediationStatus::Completed);
    assert!(execution.validation.as_ref().is_some_and(|v| v.is_valid));
    assert_eq!(
        h.handler.calls(),
        vec!["execute:raise-timeout", "execute:recycle-connections"]
    );

    let pattern = h
        .store
        .get_pattern(first.analysis.pattern_id.as_ref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pattern.outcomes.len(), 2);

    let mut repeat = fixtures::timeout_context();
    repeat.correlation_id = CorrelationId::new("corr-timeout-2");
    let second = h.orchestrator.remediate_error(repeat).await.unwrap();
    assert_eq!(second.analysis.classification.category, "Timeout");
    assert!(second.plan.rationale[0].contains("resolved pattern"));
    assert!(second.succeeded());
}

#[tokio::test]
async fn failed_action_rolls_back_completed_steps() {
    let h = harness_with(
        PipelineConfig::default(),
        ScriptedHandler::new().fail_on("recycle-connections"),
        true,
    )
    .await;
    let result = h.orchestrator.remediate_error(fixtures::timeout_context()).await.unwrap();

    assert!(!result.succeeded());
    assert!(matches!(result.failure, Some(PipelineError::Execution(ref msg)) if msg.starts_with("recycle-connections")));
    assert_eq!(result.rollback_failure, None);
    assert_eq!(
        h.handler.calls(),
        vec![
            "execute:raise-timeout",
            "execute:recycle-connections",
            "revert:raise-timeout",
        ]
    );
}

#[tokio::test]
async fn critical_plan_is_rejected_without_running() {
    let planner = PlannerConfig::default().with_playbook(
        "Timeout",
        vec![ActionTemplate::new("drop-connections", TargetSelector::Component("postgres".into()))],
    );
    let h = harness_with(PipelineConfig::default().with_planner(planner), ScriptedHandler::new(), true).await;
    let result = h.orchestrator.remediate_error(fixtures::timeout_context()).await.unwrap();

    assert!(!result.validation.is_valid);
    assert!(matches!(result.failure, Some(PipelineError::ValidationFailure(_))));
    assert!(result.execution.is_none());
    assert!(h.handler.calls().is_empty());
}

#[tokio::test]
async fn denied_approval_is_a_validation_failure() {
    // irreversible on orders-api: 2 of 5 nodes, High but below the Critical blast ratio
    let planner = PlannerConfig::default().with_playbook(
        "Timeout",
        vec![ActionTemplate::new("restart", TargetSelector::Component("orders-api".into()))],
    );
    let h = harness_gated(
        PipelineConfig::default().with_planner(planner),
        ScriptedHandler::new(),
        true,
        Arc::new(DenyAll),
    )
    .await;
    let result = h.orchestrator.remediate_error(fixtures::timeout_context()).await.unwrap();

    assert!(result.validation.is_valid);
    assert!(result.validation.requires_approval);
    let failure = result.failure.as_ref().unwrap();
    assert!(matches!(failure, PipelineError::ValidationFailure(msg) if msg.contains("approval denied")));
    assert!(failure.requires_human());
    assert_eq!(h.handler.executions_of("restart"), 0);
    assert!(result.execution.as_ref().unwrap().actions[0].approval_denied);
}

#[tokio::test]
async fn unreachable_store_degrades_analysis() {
    let h = harness_with(PipelineConfig::default(), ScriptedHandler::new(), false).await;
    let result = h.orchestrator.analyze_error(fixtures::timeout_context()).await.unwrap();

    assert!(result.classification.is_unknown());
    assert_eq!(result.pattern_id, None);
    assert_eq!(result.warnings.len(), 2);
    assert!(!result.impact.impacted.is_empty());
}

#[tokio::test]
async fn shutdown_rejects_new_runs() {
    let h = harness().await;
    h.orchestrator.shutdown();
    let err = h.orchestrator.analyze_error(fixtures::timeout_context()).await.unwrap_err();
    assert_eq!(err, PipelineError::Cancelled);
    assert!(!err.requires_human());
}

struct CannedLlm;

#[async_trait]
impl LlmClient for CannedLlm {
    async fn analyze(&self, prompt: &str, _timeout: Duration) -> Result<String, LlmError> {
        assert!(prompt.contains("TimeoutException"));
        Ok("  Connection pool exhausted on orders-api.  ".to_string())
    }
}

#[tokio::test]
async fn llm_summary_clears_degraded_flag() {
    let config = PipelineConfig::default();
    let metrics = Arc::new(StaticMetrics::new());
    let store = Arc::new(RemotePatternStore::new(Arc::new(InMemoryBackend::new()), StoreConfig::default()));
    store.connect().await.unwrap();
    let parts = Collaborators::standard(
        &config,
        Arc::new(fixtures::checkout_topology()),
        metrics,
        store,
        Arc::new(ScriptedHandler::new()),
        Arc::new(AutoApprove),
    )
    .with_llm(Arc::new(CannedLlm));
    let orchestrator = Orchestrator::new(config, parts);

    let result = orchestrator.analyze_error(fixtures::timeout_context()).await.unwrap();
    assert!(!result.degraded);
    assert_eq!(result.summary.as_deref(), Some("Connection pool exhausted on orders-api."));
    assert_eq!(
        result.context.analysis().and_then(|a| a.summary.as_deref()),
        Some("Connection pool exhausted on orders-api.")
    );
}
