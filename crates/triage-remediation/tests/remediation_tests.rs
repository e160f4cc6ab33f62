use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use triage_graph::{DependencyEdge, DependencyGraph, DependencyNode};
use triage_model::{
    ActionHistory, DependencyType, RemediationAction, RemediationExecution, RemediationPlan, RemediationStatus,
    RemediationValidationResult, ResourceSnapshot, RiskAssessment, RiskLevel, RollbackStatus,
};
use triage_remediation::{
    allowed_transitions, apply_transition, validate_transition, ApprovalGate, AutoApprove, DenyAll,
    ExecutorConfig, HealthValidator, PatternRiskAssessor, RemediationExecutor, RemediationValidator,
    ResourceProbe, ReverseRollbackManager, RiskAssessmentService, RollbackConfig, SequentialExecutor, ValidatorConfig,
};
use triage_test_utils::{fixtures, ScriptedHandler, StaticMetrics};

fn status() -> impl Strategy<Value = RemediationStatus> {
    prop_oneof![
        Just(RemediationStatus::Pending),
        Just(RemediationStatus::WaitingForApproval),
        Just(RemediationStatus::Running),
        Just(RemediationStatus::Completed),
        Just(RemediationStatus::Skipped),
        Just(RemediationStatus::Cancelled),
        Just(RemediationStatus::Failed),
    ]
}

proptest! {
    #[test]
    fn prop_transitions_match_table(from in status(), to in status()) {
        let res = validate_transition(from, to);
        prop_assert_eq!(res.is_ok(), allowed_transitions(from).contains(&to));
    }

    #[test]
    fn prop_step_counters_never_exceed_total(
        n in 1usize..6,
        moves in prop::collection::vec((0usize..6, status()), 0..40),
    ) {
        let plan = (0..n).fold(RemediationPlan::new("corr".into()), |p, i| {
            p.with_action(RemediationAction::new(format!("a{i}"), "svc"))
        });
        let mut exec = RemediationExecution::new(&plan);
        for (index, to) in moves {
            let id = plan.actions[index % n].id;
            let _ = apply_transition(&mut exec, id, to, chrono::Utc::now());
            prop_assert!(exec.metrics.accounted_steps() <= exec.metrics.total_steps);
            prop_assert!(exec.invariant_violations().is_empty());
        }
    }

    #[test]
    fn prop_irreversible_wide_actions_are_critical(rate_ok in 0u32..50, rate_failed in 0u32..50, extra in 0usize..3) {
        // c0 reaches the whole chain; at most two isolated extras keep it above half the graph
        let mut graph = DependencyGraph::new();
        let chain: Vec<_> = (0..4)
            .map(|i| graph.add_node(DependencyNode::new(format!("c{i}"), "svc")).unwrap())
            .collect();
        for pair in chain.windows(2) {
            graph.add_edge(pair[0], pair[1], DependencyEdge::of(DependencyType::Runtime)).unwrap();
        }
        for i in 0..extra {
            graph.add_node(DependencyNode::new(format!("x{i}"), "svc")).unwrap();
        }

        let mut history = ActionHistory::new();
        (0..rate_ok).for_each(|_| history.record("purge", true));
        (0..rate_failed).for_each(|_| history.record("purge", false));

        let action = RemediationAction::new("purge", "c0");
        let risk = PatternRiskAssessor::default().assess_risk(&action, &graph, &history);
        prop_assert_eq!(risk.level, RiskLevel::Critical);
    }
}

struct Harness {
    handler: Arc<ScriptedHandler>,
    executor: SequentialExecutor,
}

fn harness(handler: ScriptedHandler, approvals: Arc<dyn ApprovalGate>, metrics: StaticMetrics) -> Harness {
    let handler = Arc::new(handler);
    let validator = Arc::new(HealthValidator::new(
        Arc::new(metrics),
        ValidatorConfig::default().with_grace_period(Duration::from_secs(1)),
    ));
    let rollback = Arc::new(ReverseRollbackManager::new(handler.clone(), RollbackConfig::default()));
    let executor = SequentialExecutor::new(
        handler.clone(),
        validator,
        approvals,
        rollback,
        ExecutorConfig::default().with_max_retries(2),
    );
    Harness { handler, executor }
}

fn low_risk(plan: &RemediationPlan) -> Vec<RiskAssessment> {
    plan.actions
        .iter()
        .map(|a| RiskAssessment {
            action_id: a.id,
            action_name: a.name.clone(),
            level: RiskLevel::Low,
            score: 0.1,
            blast_radius: 1,
            reversible: true,
            historical_success_rate: None,
            potential_issues: Vec::new(),
            mitigation_steps: Vec::new(),
            context: Default::default(),
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn second_action_failure_skips_third_and_rolls_back_first() {
    let h = harness(
        ScriptedHandler::new().fail_on("restart-api"),
        Arc::new(AutoApprove),
        StaticMetrics::new(),
    );
    let plan = fixtures::three_step_plan();
    let exec = h
        .executor
        .execute(&plan, &low_risk(&plan), &RemediationValidationResult::valid(), &CancellationToken::new())
        .await;

    let statuses: Vec<_> = exec.actions.iter().map(|a| a.status).collect();
    assert_eq!(
        statuses,
        vec![RemediationStatus::Completed, RemediationStatus::Failed, RemediationStatus::Skipped]
    );
    assert_eq!(exec.status, RemediationStatus::Failed);

    let rollback = exec.rollback.as_ref().unwrap();
    assert_eq!(rollback.status, RollbackStatus::FullyRolledBack);
    assert_eq!(rollback.steps.len(), 1);
    assert_eq!(rollback.steps[0].action_name, "flush-cache");
    assert!(exec.actions[0].rolled_back);

    assert_eq!(
        h.handler.calls(),
        vec!["execute:flush-cache", "execute:restart-api", "revert:flush-cache"]
    );
    assert_eq!(exec.metrics.completed_steps, 1);
    assert_eq!(exec.metrics.failed_steps, 1);
    assert_eq!(exec.metrics.skipped_steps, 1);
    assert!(exec.invariant_violations().is_empty());
    assert!(exec.ended_at.unwrap() >= exec.started_at);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let h = harness(
        ScriptedHandler::new().flaky("restart-api", 2),
        Arc::new(AutoApprove),
        StaticMetrics::new(),
    );
    let plan = fixtures::three_step_plan();
    let exec = h
        .executor
        .execute(&plan, &low_risk(&plan), &RemediationValidationResult::valid(), &CancellationToken::new())
        .await;

    assert_eq!(exec.status, RemediationStatus::Completed);
    assert_eq!(h.handler.executions_of("restart-api"), 3);
    assert_eq!(exec.metrics.step_retries[&plan.actions[1].id], 2);
    assert_eq!(exec.metrics.total_retries(), 2);
    assert!(exec.rollback.is_none());
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() {
    let h = harness(
        ScriptedHandler::new().flaky("flush-cache", 10),
        Arc::new(AutoApprove),
        StaticMetrics::new(),
    );
    let plan = fixtures::three_step_plan();
    let exec = h
        .executor
        .execute(&plan, &low_risk(&plan), &RemediationValidationResult::valid(), &CancellationToken::new())
        .await;

    assert_eq!(exec.actions[0].status, RemediationStatus::Failed);
    assert_eq!(exec.actions[0].attempts, 3);
    assert_eq!(exec.status, RemediationStatus::Failed);
    let rollback = exec.rollback.as_ref().unwrap();
    assert!(rollback.steps.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unimproved_health_fails_reported_success() {
    let metrics = StaticMetrics::new().with_health("redis", 0.2);
    let h = harness(ScriptedHandler::new(), Arc::new(AutoApprove), metrics);
    let plan = fixtures::three_step_plan();
    let exec = h
        .executor
        .execute(&plan, &low_risk(&plan), &RemediationValidationResult::valid(), &CancellationToken::new())
        .await;

    assert_eq!(exec.actions[0].status, RemediationStatus::Failed);
    assert!(exec.actions[0].error.as_deref().unwrap().contains("post-validation"));
    assert_eq!(exec.actions[1].status, RemediationStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn denied_approval_halts_plan() {
    let h = harness(ScriptedHandler::new(), Arc::new(DenyAll), StaticMetrics::new());
    let plan = fixtures::three_step_plan();
    let mut validation = RemediationValidationResult::valid();
    validation.require_approval(plan.actions[1].id, "high risk");

    let exec = h
        .executor
        .execute(&plan, &low_risk(&plan), &validation, &CancellationToken::new())
        .await;

    assert_eq!(exec.actions[0].status, RemediationStatus::Completed);
    assert_eq!(exec.actions[1].status, RemediationStatus::Cancelled);
    assert_eq!(exec.actions[2].status, RemediationStatus::Skipped);
    assert_eq!(exec.actions[1].risk.as_ref().map(|r| r.approved), Some(false));
    assert!(exec.actions[1].approval_denied);
    assert!(!exec.actions[0].approval_denied);
    assert_eq!(exec.rollback.as_ref().unwrap().status, RollbackStatus::FullyRolledBack);
    assert!(!h.handler.calls().contains(&"execute:restart-api".to_string()));
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_running_cancels_and_rolls_back() {
    let h = harness(
        ScriptedHandler::new().slow("restart-api", Duration::from_secs(10)),
        Arc::new(AutoApprove),
        StaticMetrics::new(),
    );
    let plan = fixtures::three_step_plan();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let exec = h
        .executor
        .execute(&plan, &low_risk(&plan), &RemediationValidationResult::valid(), &cancel)
        .await;

    assert_eq!(exec.actions[0].status, RemediationStatus::Completed);
    assert_eq!(exec.actions[1].status, RemediationStatus::Cancelled);
    assert_eq!(exec.actions[2].status, RemediationStatus::Cancelled);
    assert_eq!(exec.status, RemediationStatus::Cancelled);
    assert!(exec.actions[0].rolled_back);
}

#[tokio::test(start_paused = true)]
async fn partial_rollback_is_reported() {
    let h = harness(
        ScriptedHandler::new().fail_on("scale-web").fail_revert_on("flush-cache"),
        Arc::new(AutoApprove),
        StaticMetrics::new(),
    );
    let plan = fixtures::three_step_plan();
    let exec = h
        .executor
        .execute(&plan, &low_risk(&plan), &RemediationValidationResult::valid(), &CancellationToken::new())
        .await;

    let rollback = exec.rollback.as_ref().unwrap();
    assert_eq!(rollback.status, RollbackStatus::PartiallyRolledBack);
    let order: Vec<_> = rollback.steps.iter().map(|s| s.action_name.as_str()).collect();
    assert_eq!(order, vec!["restart-api", "flush-cache"]);
}

#[test]
fn validator_flags_high_risk_plan_for_approval() {
    let metrics: Arc<StaticMetrics> = Arc::new(StaticMetrics::new());
    let validator = HealthValidator::new(metrics, ValidatorConfig::default());
    let mut graph = DependencyGraph::new();
    for c in ["redis", "orders-api", "checkout-web"] {
        graph.add_node(DependencyNode::new(c, "svc")).unwrap();
    }
    let plan = fixtures::three_step_plan();
    let mut risks = low_risk(&plan);
    risks[1].level = RiskLevel::High;

    let result = validator.validate_plan(&plan, &graph, &risks);
    assert!(result.is_valid);
    assert!(result.requires_approval);
    assert_eq!(result.actions_requiring_approval, vec![plan.actions[1].id]);
}

struct FixedSnapshots;

impl ResourceProbe for FixedSnapshots {
    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_percent: 12.5,
            memory_bytes: 64 << 20,
            thread_count: 8,
            taken_at: chrono::Utc::now(),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn resource_snapshots_bracket_the_run() {
    let h = harness(ScriptedHandler::new(), Arc::new(AutoApprove), StaticMetrics::new());
    let executor = h.executor.with_probe(Arc::new(FixedSnapshots));
    let plan = fixtures::three_step_plan();
    let exec = executor
        .execute(&plan, &low_risk(&plan), &RemediationValidationResult::valid(), &CancellationToken::new())
        .await;

    assert_eq!(exec.status, RemediationStatus::Completed);
    let start = exec.metrics.start_snapshot.as_ref().unwrap();
    let end = exec.metrics.end_snapshot.as_ref().unwrap();
    assert_eq!(start.thread_count, 8);
    assert!(end.taken_at >= start.taken_at);
}
