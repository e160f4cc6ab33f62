use pretty_assertions::assert_eq;
use std::sync::Arc;
use triage_graph::DependencyNode;
use triage_model::{ErrorClassification, ErrorContext, ErrorPattern, ErrorSeverity, PatternId, UNKNOWN_CATEGORY};
use triage_patterns::{
    ClassificationError, ClassifierConfig, ConnectionState, ErrorClassifier, InMemoryBackend, PatternClassifier,
    PatternLearner, PatternStore, RemotePatternStore, StoreConfig, StoreError,
};
use triage_test_utils::{fixtures, FlakyBackend};

async fn connected_store(backend: Arc<dyn triage_patterns::PatternBackend>) -> RemotePatternStore {
    let store = RemotePatternStore::new(backend, StoreConfig::default());
    store.connect().await.unwrap();
    store
}

#[tokio::test]
async fn save_then_get_returns_latest_content() {
    let store = connected_store(Arc::new(InMemoryBackend::new())).await;
    let mut pattern = fixtures::null_reference_pattern();
    store.save_pattern(&pattern).await.unwrap();

    pattern.occurrence_count = 42;
    pattern.tags.push("hot".into());
    store.save_pattern(&pattern).await.unwrap();

    assert_eq!(store.pattern_count().await.unwrap(), 1);
    assert_eq!(store.get_pattern(&pattern.id).await.unwrap(), Some(pattern.clone()));
    assert_eq!(store.get_patterns_by_tag("hot").await.unwrap(), vec![pattern]);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_reconnects_and_concurrent_reads_wait() {
    let backend = Arc::new(FlakyBackend::new());
    let store = connected_store(backend.clone()).await;
    store.save_pattern(&fixtures::null_reference_pattern()).await.unwrap();

    backend.set_down(true);
    let first = tokio::spawn({
        let store = store.clone();
        async move { store.get_patterns_by_service("orders").await }
    });

    let mut states = store.subscribe();
    states
        .wait_for(|s| *s == ConnectionState::Reconnecting)
        .await
        .unwrap();

    let second = tokio::spawn({
        let store = store.clone();
        async move { store.get_patterns_by_service("orders").await }
    });
    tokio::task::yield_now().await;
    assert_eq!(store.connection_state(), ConnectionState::Reconnecting);
    assert!(!second.is_finished());

    backend.set_down(false);
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(store.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnect_disconnects_and_fails_fast() {
    let backend = Arc::new(FlakyBackend::new());
    let store = connected_store(backend.clone()).await;

    backend.set_down(true);
    let err = store.pattern_count().await.unwrap_err();
    assert!(err.is_connectivity());
    assert_eq!(store.connection_state(), ConnectionState::Disconnected);

    let calls = backend.calls();
    let err = store.get_patterns_by_service("orders").await.unwrap_err();
    assert!(matches!(err, StoreError::Connectivity(_)));
    assert_eq!(backend.calls(), calls, "disconnected store must not touch the backend");
    assert!(!store.validate_connection().await);
}

#[tokio::test]
async fn failed_connect_stays_disconnected() {
    let backend = Arc::new(FlakyBackend::new());
    backend.set_down(true);
    let store = RemotePatternStore::new(backend.clone(), StoreConfig::default());

    assert!(store.connect().await.is_err());
    assert_eq!(store.connection_state(), ConnectionState::Disconnected);

    backend.set_down(false);
    store.connect().await.unwrap();
    assert!(store.validate_connection().await);
}

#[tokio::test]
async fn null_reference_matches_stored_pattern() {
    let store = Arc::new(connected_store(Arc::new(InMemoryBackend::new())).await);
    let pattern = fixtures::null_reference_pattern();
    store.save_pattern(&pattern).await.unwrap();

    let classifier = PatternClassifier::new(store, ClassifierConfig::default());
    let classification = classifier.classify(&fixtures::null_reference_context()).await.unwrap();

    assert!(classification.confidence >= 0.9, "confidence {}", classification.confidence);
    assert_eq!(classification.category, pattern.category);
    assert_eq!(classification.matched_pattern, Some(pattern.id));
}

#[tokio::test]
async fn type_and_tag_match_reaches_threshold_without_message() {
    let store = Arc::new(connected_store(Arc::new(InMemoryBackend::new())).await);
    let mut pattern = fixtures::null_reference_pattern();
    pattern.message_signature.clear();
    store.save_pattern(&pattern).await.unwrap();

    let ctx = ErrorContext::new("corr-short", "orders", "NullReferenceException", "Object reference not set")
        .with_tag("orders")
        .with_tag("checkout");
    let classifier = PatternClassifier::new(store, ClassifierConfig::default());
    let classification = classifier.classify(&ctx).await.unwrap();

    assert_eq!(classification.category, "NullReference");
    assert!(classification.confidence >= 0.9, "confidence {}", classification.confidence);
}

#[tokio::test]
async fn same_error_type_from_another_service_is_a_candidate() {
    let store = Arc::new(connected_store(Arc::new(InMemoryBackend::new())).await);
    let pattern = ErrorPattern::new(
        PatternId::new("ledger-mismatch"),
        "billing",
        "LedgerMismatchException",
        "Consistency",
        chrono::Utc::now(),
    );
    store.save_pattern(&pattern).await.unwrap();
    assert_eq!(
        store.get_patterns_by_error_type("ledgermismatchexception").await.unwrap(),
        vec![pattern.clone()]
    );

    let ctx = ErrorContext::new("corr-ledger", "orders", "LedgerMismatchException", "totals differ");
    let classifier = PatternClassifier::new(store, ClassifierConfig::default());
    let classification = classifier.classify(&ctx).await.unwrap();

    assert_eq!(classification.category, "Consistency");
    assert_eq!(classification.matched_pattern, Some(pattern.id));
}

#[tokio::test]
async fn empty_store_classifies_as_unknown() {
    let store = Arc::new(connected_store(Arc::new(InMemoryBackend::new())).await);
    let classifier = PatternClassifier::new(store, ClassifierConfig::default());

    let classification = classifier.classify(&fixtures::null_reference_context()).await.unwrap();
    assert_eq!(classification.category, UNKNOWN_CATEGORY);
    assert_eq!(classification.confidence, 0.0);
    assert!(classification.is_unknown());
}

#[tokio::test]
async fn weak_match_stays_unknown() {
    let store = Arc::new(connected_store(Arc::new(InMemoryBackend::new())).await);
    let mut pattern = fixtures::null_reference_pattern();
    pattern.error_type = "InvalidOperationException".into();
    store.save_pattern(&pattern).await.unwrap();

    let classifier = PatternClassifier::new(store, ClassifierConfig::default());
    let classification = classifier.classify(&fixtures::null_reference_context()).await.unwrap();
    assert!(classification.is_unknown());
}

#[tokio::test]
async fn disconnected_store_is_a_classification_error() {
    let store = Arc::new(RemotePatternStore::new(Arc::new(InMemoryBackend::new()), StoreConfig::default()));
    let classifier = PatternClassifier::new(store, ClassifierConfig::default());

    let err = classifier.classify(&fixtures::timeout_context()).await.unwrap_err();
    assert!(matches!(err, ClassificationError::Store(e) if e.is_connectivity()));
}

#[tokio::test]
async fn error_probability_tracks_health_and_history() {
    let store = Arc::new(connected_store(Arc::new(InMemoryBackend::new())).await);
    let mut pattern = fixtures::null_reference_pattern();
    pattern.occurrence_count = 30;
    store.save_pattern(&pattern).await.unwrap();
    let classifier = PatternClassifier::new(store, ClassifierConfig::default());

    let healthy = DependencyNode::new("orders-api", "orders").with_health(0.95);
    let sick = DependencyNode::new("orders-api", "orders").with_health(0.1);
    let unseen = DependencyNode::new("billing-worker", "orders").with_health(0.95);

    let p_healthy = classifier.calculate_error_probability(&healthy).await;
    let p_sick = classifier.calculate_error_probability(&sick).await;
    let p_unseen = classifier.calculate_error_probability(&unseen).await;

    assert!(p_sick > p_healthy);
    assert!(p_healthy > p_unseen);
}

#[tokio::test]
async fn learner_converges_on_one_pattern() {
    let store: Arc<RemotePatternStore> = Arc::new(connected_store(Arc::new(InMemoryBackend::new())).await);
    let learner = PatternLearner::new(store.clone());
    let ctx = fixtures::timeout_context();
    let unknown = ErrorClassification::unknown(ErrorSeverity::High);

    let first = learner.record_occurrence(&ctx, &unknown).await.unwrap();
    let again = ctx.clone().with_timestamp(ctx.timestamp + chrono::Duration::seconds(5));
    let second = learner.record_occurrence(&again, &unknown).await.unwrap();

    assert_eq!(first, second);
    let stored = store.get_pattern(&first).await.unwrap().unwrap();
    assert_eq!(stored.occurrence_count, 2);
    assert_eq!(stored.category, "Timeout");
    assert_eq!(stored.component_id.as_deref(), Some("orders-api"));

    assert!(learner
        .record_outcomes(&first, vec![fixtures::outcome("restart-api", true), fixtures::outcome("restart-api", false)])
        .await
        .unwrap());
    let history = learner.action_history("orders").await;
    assert_eq!(history.success_rate("restart-api"), Some(0.5));
}
