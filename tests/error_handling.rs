//! Error handling tests.

use std::sync::Arc;
use suite_metrics::{
    CreationType, DashboardOptions, EngineConfig, ExecutionResult, GenerationQuality,
    MemoryRecordStore, MetricsDashboard, MetricsError, MetricsService, NewExecution,
    NewGeneration, NewTestCase, RecordId, ReportKind, Scope, SubscriptionManager, TestCasePatch,
};

fn service_with(config: EngineConfig) -> (Arc<MemoryRecordStore>, Arc<MetricsService>) {
    let store = Arc::new(MemoryRecordStore::new());
    let service = Arc::new(MetricsService::new(store.clone(), config));
    (store, service)
}

fn no_retries() -> EngineConfig {
    EngineConfig {
        store_retries: 0,
        ..Default::default()
    }
}

fn dashboard(service: Arc<MetricsService>) -> MetricsDashboard {
    MetricsDashboard::open(
        Arc::new(SubscriptionManager::new(service)),
        Scope::suite("suite"),
        DashboardOptions {
            auto_refresh: false,
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn test_store_failure_surfaces_as_store_query() {
    let (store, service) = service_with(no_retries());
    store.fail_next_queries(1);

    let result = service.snapshot(&Scope::suite("suite"), true);
    assert!(matches!(result, Err(MetricsError::StoreQuery(_))));
}

#[test]
fn test_failed_read_is_not_cached() {
    let (store, service) = service_with(no_retries());
    let scope = Scope::suite("suite");

    store.fail_next_queries(1);
    assert!(service.snapshot(&scope, true).is_err());
    assert!(service.cache().is_empty());
    assert!(service.snapshot(&scope, true).is_ok());
}

#[test]
fn test_failed_refresh_keeps_previous_snapshot() {
    let (store, service) = service_with(no_retries());
    let dashboard = dashboard(service);
    assert!(dashboard.snapshot().is_some());

    store.fail_next_queries(1);
    assert!(dashboard.clear_cache_and_refresh().is_err());

    let state = dashboard.state();
    assert!(state.snapshot.is_some());
    assert!(!state.loading);
    assert!(matches!(state.error, Some(MetricsError::StoreQuery(_))));

    dashboard.refresh().unwrap();
    assert!(dashboard.state().error.is_none());
}

#[test]
fn test_report_failure_is_all_or_nothing() {
    let (store, service) = service_with(no_retries());
    let dashboard = dashboard(service);

    store.fail_next_queries(1);
    let result = dashboard.generate_report(ReportKind::Overview);
    assert!(matches!(result, Err(MetricsError::StoreQuery(_))));
}

#[test]
fn test_update_unknown_test_case() {
    let (_, service) = service_with(EngineConfig::default());
    let result = dashboard(service).update_test_case(
        RecordId(99),
        TestCasePatch {
            title: Some("renamed".to_string()),
            ..Default::default()
        },
    );
    assert!(matches!(
        result,
        Err(MetricsError::NotFound {
            collection: "test_cases",
            id: RecordId(99)
        })
    ));
}

#[test]
fn test_record_in_other_suite_is_not_found() {
    let (_, service) = service_with(EngineConfig::default());
    let other = Scope::suite("other");
    let record = service
        .create_test_case(&other, NewTestCase::new("elsewhere", CreationType::Manual))
        .unwrap();

    let result = dashboard(service).track_recording(record.id);
    assert!(matches!(result, Err(MetricsError::NotFound { .. })));
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let (store, service) = service_with(EngineConfig::default());
    let dashboard = dashboard(service);

    let mut negative = NewTestCase::new("bad", CreationType::Manual);
    negative.estimated_duration = -1.0;
    assert!(matches!(
        dashboard.create_test_case(negative),
        Err(MetricsError::InvalidInput(_))
    ));

    let case = dashboard
        .create_test_case(NewTestCase::new("good", CreationType::Manual))
        .unwrap();
    assert!(matches!(
        dashboard.execute_test_case(
            case.id,
            NewExecution {
                result: ExecutionResult::Passed,
                duration: f64::NAN,
                executed_by: "qa".to_string(),
            },
        ),
        Err(MetricsError::InvalidInput(_))
    ));

    assert!(matches!(
        dashboard.track_generation(NewGeneration {
            prompt: "p".to_string(),
            model: "m".to_string(),
            tokens_used: 10,
            cost: f64::INFINITY,
            test_cases_generated: 1,
            success_rate: 50.0,
            quality: GenerationQuality::Fair,
        }),
        Err(MetricsError::InvalidInput(_))
    ));

    // Rejected writes never reach the activity log.
    assert_eq!(store.activity_log(&Scope::suite("suite")).len(), 1);
}

#[test]
fn test_error_messages() {
    assert_eq!(
        MetricsError::StoreQuery("timeout".into()).to_string(),
        "Store query failed: timeout"
    );
    assert!(MetricsError::StoreQuery("x".into()).is_retryable());
    assert!(!MetricsError::InvalidInput("x".into()).is_retryable());
}
