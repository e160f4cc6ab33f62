//! Sample contexts, topologies, patterns and plans

use chrono::Utc;
use triage_graph::{ComponentDescriptor, DeclaredDependency, StaticTopology};
use triage_model::{
    signature_tokens, CorrelationId, DependencyType, ErrorContext, ErrorPattern, ErrorSeverity, PatternId, RemediationAction,
    RemediationOutcome, RemediationPlan,
};

/// postgres <- orders-api <- checkout-web, redis <- orders-api, postgres <- billing-worker
pub fn checkout_topology() -> StaticTopology {
    StaticTopology::from_components([
        ComponentDescriptor::new("postgres", "orders").with_tags(["sql"]),
        ComponentDescriptor::new("redis", "cache"),
        ComponentDescriptor::new("orders-api", "orders")
            .depends_on(DeclaredDependency::runtime("postgres"))
            .depends_on(DeclaredDependency::new("redis", DependencyType::Runtime).with_weight(0.5)),
        ComponentDescriptor::new("checkout-web", "frontend").depends_on(DeclaredDependency::runtime("orders-api")),
        ComponentDescriptor::new("billing-worker", "billing").depends_on(DeclaredDependency::runtime("postgres")),
    ])
}

/// Same topology as [`checkout_topology`], as TOML
pub const CHECKOUT_TOPOLOGY_TOML: &str = r#"
[[component]]
id = "postgres"
service = "orders"
tags = ["sql"]

[[component]]
id = "redis"
service = "cache"

[[component]]
id = "orders-api"
service = "orders"
dependencies = [
    { component_id = "postgres", dependency_type = "runtime" },
    { component_id = "redis", dependency_type = "runtime", weight = 0.5 },
]

[[component]]
id = "checkout-web"
service = "frontend"
dependencies = [{ component_id = "orders-api", dependency_type = "runtime" }]

[[component]]
id = "billing-worker"
service = "billing"
dependencies = [{ component_id = "postgres", dependency_type = "runtime" }]
"#;

/// Database timeout surfacing in orders-api
pub fn timeout_context() -> ErrorContext {
    ErrorContext::new(
        CorrelationId::new("corr-timeout"),
        "orders",
        "TimeoutException",
        "Query against orders table timed out after 30000 ms",
    )
    .with_operation("POST /orders")
    .with_component("orders-api")
    .with_severity(ErrorSeverity::High)
    .with_tag("sql")
    .with_tag("timeout")
}

const NULL_REFERENCE_MESSAGE: &str = "Object reference not set to an instance of an object";

/// Null dereference in orders-api
pub fn null_reference_context() -> ErrorContext {
    ErrorContext::new(
        CorrelationId::new("corr-null"),
        "orders",
        "NullReferenceException",
        NULL_REFERENCE_MESSAGE,
    )
    .with_component("orders-api")
    .with_tag("orders")
    .with_tag("checkout")
}

/// Stored pattern matching [`null_reference_context`]
pub fn null_reference_pattern() -> ErrorPattern {
    ErrorPattern::new(
        PatternId::new("null-orders"),
        "orders",
        "NullReferenceException",
        "NullReference",
        Utc::now(),
    )
    .with_component("orders-api")
    .with_signature(signature_tokens(NULL_REFERENCE_MESSAGE))
    .with_tags(["orders", "checkout"])
    .with_severity(4)
}

pub fn outcome(action: &str, success: bool) -> RemediationOutcome {
    RemediationOutcome {
        action_name: action.to_string(),
        success,
        duration_ms: 25,
        final_health: None,
        recorded_at: Utc::now(),
    }
}

/// Three reversible actions against the checkout topology, in order
pub fn three_step_plan() -> RemediationPlan {
    RemediationPlan::new(CorrelationId::new("corr-plan"))
        .with_action(RemediationAction::new("flush-cache", "redis").with_inverse("warm-cache"))
        .with_action(RemediationAction::new("restart-api", "orders-api").with_inverse("restart-api"))
        .with_action(RemediationAction::new("scale-web", "checkout-web").with_inverse("scale-web-down"))
}
