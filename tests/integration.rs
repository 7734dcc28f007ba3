//! Integration tests for the metrics engine.

use std::sync::Arc;
use std::time::{Duration, Instant};
use suite_metrics::{
    Coverage, CreationType, DashboardOptions, EngineConfig, ExecutionResult, Filters,
    GenerationQuality, ManualClock, MemoryRecordStore, MetricsDashboard, MetricsService,
    NewExecution, NewGeneration, NewTestCase, Outcome, Priority, RecordStore, ReportKind, Scope,
    SubscriptionManager, TestCasePatch, TestCaseStatus, Timestamp,
};

const START: Timestamp = Timestamp(1_700_000_000_000_000);

struct Engine {
    store: Arc<MemoryRecordStore>,
    clock: Arc<ManualClock>,
    service: Arc<MetricsService>,
    manager: Arc<SubscriptionManager>,
}

fn engine() -> Engine {
    let clock = Arc::new(ManualClock::new(START));
    let store = Arc::new(MemoryRecordStore::with_clock(clock.clone()));
    let service = Arc::new(MetricsService::with_clock(
        store.clone(),
        EngineConfig::default(),
        clock.clone(),
    ));
    let manager = Arc::new(SubscriptionManager::new(service.clone()));
    Engine {
        store,
        clock,
        service,
        manager,
    }
}

fn manual_only() -> DashboardOptions {
    DashboardOptions {
        auto_refresh: false,
        ..Default::default()
    }
}

fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// 10 cases: 3 automated, 2 AI generated, 4 tagged, 5 functional.
fn seed_reference_suite(store: &MemoryRecordStore, scope: &Scope) {
    for i in 0..10 {
        let creation_type = match i {
            0..=2 => CreationType::Automated,
            3..=4 => CreationType::AiGenerated,
            _ => CreationType::Manual,
        };
        let mut input = NewTestCase::new(format!("case {}", i), creation_type).with_coverage(
            Coverage {
                functional: i % 2 == 0,
                ..Default::default()
            },
        );
        if i < 4 {
            input = input.with_tags(["smoke"]);
        }
        store.create_test_case(scope, input).unwrap();
    }
}

// --- Realistic Workflow Tests ---

#[test]
fn test_reference_suite_metrics() {
    let e = engine();
    let scope = Scope::suite("checkout");
    seed_reference_suite(&e.store, &scope);

    let snapshot = e.service.snapshot(&scope, true).unwrap();
    let metrics = &snapshot.test_cases;
    assert_eq!(metrics.total, 10);
    assert_eq!(metrics.by_creation.manual, 5);
    assert_eq!(metrics.by_creation.automated, 3);
    assert_eq!(metrics.by_creation.ai_generated, 2);
    assert_eq!(metrics.with_tags, 4);
    assert_eq!(metrics.functional_coverage, 50);
    assert_eq!(metrics.edge_case_coverage, 0);
    assert_eq!(snapshot.automation.automated, 3);
    assert_eq!(snapshot.automation.automation_ratio, 30);
    assert_eq!(snapshot.automation.automation_coverage, 40);

    // Tagged 40, recorded 0, executed 0, all updated just now 100.
    assert_eq!(snapshot.quality_score, 35);
}

#[test]
fn test_empty_suite_is_all_zero() {
    let e = engine();
    let snapshot = e.service.snapshot(&Scope::suite("empty"), true).unwrap();

    assert_eq!(snapshot.test_cases.total, 0);
    assert_eq!(snapshot.test_cases.functional_coverage, 0);
    assert_eq!(snapshot.test_cases.avg_execution_duration, 0.0);
    assert_eq!(snapshot.automation.automation_ratio, 0);
    assert_eq!(snapshot.ai.cost_per_test_case, 0.0);
    assert_eq!(snapshot.quality_score, 0);
}

#[test]
fn test_dashboard_lifecycle() {
    let e = engine();
    let scope = Scope::suite("checkout");
    let dashboard = MetricsDashboard::open(e.manager.clone(), scope.clone(), manual_only()).unwrap();

    let case = dashboard
        .create_test_case(
            NewTestCase::new("pay by card", CreationType::Manual)
                .with_priority(Priority::High)
                .with_tags(["payments"]),
        )
        .unwrap();
    e.clock.advance(Duration::from_secs(30));
    dashboard
        .execute_test_case(
            case.id,
            NewExecution {
                result: ExecutionResult::Passed,
                duration: 4.0,
                executed_by: "qa".to_string(),
            },
        )
        .unwrap();
    dashboard.track_recording(case.id).unwrap();
    dashboard
        .update_test_case(
            case.id,
            TestCasePatch {
                status: Some(TestCaseStatus::Outdated),
                ..Default::default()
            },
        )
        .unwrap();

    let state = dashboard.state();
    assert!(state.error.is_none());
    let snapshot = state.snapshot.unwrap();
    assert_eq!(snapshot.test_cases.total, 1);
    assert_eq!(snapshot.test_cases.executed, 1);
    assert_eq!(snapshot.test_cases.with_recording, 1);
    assert_eq!(snapshot.test_cases.by_status.outdated, 1);
    assert_eq!(snapshot.test_cases.by_priority.high, 1);
    assert_eq!(snapshot.quality_score, 100);

    assert_eq!(e.store.activity_log(&scope).len(), 4);
}

#[test]
fn test_sprint_dashboard_sees_only_its_sprint() {
    let e = engine();
    let sprint = Scope::sprint("checkout", "s1");
    e.store
        .create_test_case(
            &Scope::sprint("checkout", "s2"),
            NewTestCase::new("other", CreationType::Manual),
        )
        .unwrap();

    let dashboard = MetricsDashboard::open(e.manager.clone(), sprint, manual_only()).unwrap();
    dashboard
        .create_test_case(NewTestCase::new("mine", CreationType::Manual))
        .unwrap();

    assert_eq!(dashboard.snapshot().unwrap().test_cases.total, 1);
    assert_eq!(
        e.service
            .snapshot(&Scope::suite("checkout"), true)
            .unwrap()
            .test_cases
            .total,
        2
    );
}

#[test]
fn test_generation_tracking_feeds_ai_metrics() {
    let e = engine();
    let dashboard = MetricsDashboard::open(e.manager.clone(), Scope::suite("ai"), manual_only()).unwrap();

    for (cost, generated) in [(0.5, 5), (0.3, 3)] {
        dashboard
            .track_generation(NewGeneration {
                prompt: "cover login".to_string(),
                model: "model-a".to_string(),
                tokens_used: 1000,
                cost,
                test_cases_generated: generated,
                success_rate: 90.0,
                quality: GenerationQuality::Good,
            })
            .unwrap();
    }

    let ai = dashboard.snapshot().unwrap().ai;
    assert_eq!(ai.total_generations, 2);
    assert_eq!(ai.total_tokens_used, 2000);
    assert_eq!(ai.avg_test_cases_per_generation, 4);
    assert_eq!(ai.success_rate, 100);
    assert_eq!(ai.cost_per_test_case, 0.1);
    assert_eq!(ai.by_quality.good, 2);
}

#[test]
fn test_filtered_metrics() {
    let e = engine();
    let scope = Scope::suite("checkout");
    seed_reference_suite(&e.store, &scope);

    let ai_only = Filters::creation_type(CreationType::AiGenerated);
    let metrics = e.service.test_case_metrics(&scope, &ai_only, true).unwrap();
    assert_eq!(metrics.total, 2);

    let all = e.service.test_case_metrics(&scope, &Filters::none(), true).unwrap();
    assert_eq!(all.total, 10);
}

// --- Caching ---

#[test]
fn test_cache_serves_until_ttl() {
    let e = engine();
    let scope = Scope::suite("checkout");
    let dashboard = MetricsDashboard::open(e.manager.clone(), scope.clone(), manual_only()).unwrap();

    // A write the engine never sees: the cached snapshot stays put.
    e.store
        .create_test_case(&scope, NewTestCase::new("hidden", CreationType::Manual))
        .unwrap();
    assert_eq!(dashboard.refresh().unwrap().test_cases.total, 0);

    e.clock.advance(Duration::from_secs(5 * 60));
    assert_eq!(dashboard.refresh().unwrap().test_cases.total, 1);
}

#[test]
fn test_clear_cache_and_refresh() {
    let e = engine();
    let scope = Scope::suite("checkout");
    let dashboard = MetricsDashboard::open(e.manager.clone(), scope.clone(), manual_only()).unwrap();

    e.store
        .create_test_case(&scope, NewTestCase::new("hidden", CreationType::Manual))
        .unwrap();
    assert_eq!(dashboard.clear_cache_and_refresh().unwrap().test_cases.total, 1);
}

#[test]
fn test_report_reflects_store_not_cache() {
    let e = engine();
    let scope = Scope::suite("checkout");
    let dashboard = MetricsDashboard::open(e.manager.clone(), scope.clone(), manual_only()).unwrap();
    seed_reference_suite(&e.store, &scope);

    let report = dashboard.generate_report(ReportKind::Coverage).unwrap();
    assert_eq!(report.kind, ReportKind::Coverage);
    assert_eq!(report.test_cases.total, 10);
    assert_eq!(report.automation.automation_ratio, 30);
    assert_eq!(report.summary.ai_contribution, 20);
    assert_eq!(report.summary.coverage_score, 17);
}

// --- Refresh Modes ---

#[test]
fn test_realtime_replaces_polling() {
    let e = engine();
    let dashboard = MetricsDashboard::open(
        e.manager.clone(),
        Scope::suite("checkout"),
        DashboardOptions::default(),
    )
    .unwrap();
    assert!(dashboard.is_polling());
    assert_eq!(e.store.listener_count(), 0);

    dashboard.set_realtime(true).unwrap();
    assert!(dashboard.is_realtime());
    assert!(!dashboard.is_polling());
    assert_eq!(e.store.listener_count(), 2);

    dashboard.shutdown();
    assert!(!dashboard.is_realtime());
    assert_eq!(e.store.listener_count(), 0);
}

#[test]
fn test_realtime_picks_up_external_writes() {
    let e = engine();
    let scope = Scope::suite("checkout");
    let dashboard = MetricsDashboard::open(
        e.manager.clone(),
        scope.clone(),
        DashboardOptions {
            enable_realtime: true,
            ..Default::default()
        },
    )
    .unwrap();

    let case = e
        .service
        .create_test_case(&scope, NewTestCase::new("external", CreationType::Automated))
        .unwrap();
    e.service
        .execute_test_case(
            &scope,
            case.id,
            NewExecution {
                result: ExecutionResult::Failed,
                duration: 1.5,
                executed_by: "ci".to_string(),
            },
        )
        .unwrap();

    assert!(wait_until(|| {
        let state = dashboard.state();
        state.recent_executions.len() == 1
            && state
                .snapshot
                .map_or(false, |s| s.test_cases.executed == 1)
    }));
    assert_eq!(dashboard.recent_executions()[0].executed_by, "ci");
}

#[test]
fn test_outcome_wraps_results() {
    let e = engine();
    let dashboard = MetricsDashboard::open(e.manager.clone(), Scope::suite("x"), manual_only()).unwrap();

    let ok: Outcome<_> = dashboard.refresh().into();
    assert!(ok.success);
    assert!(ok.data.is_some());

    e.store.fail_next_queries(10);
    let failed: Outcome<_> = dashboard.clear_cache_and_refresh().into();
    assert!(!failed.success);
    assert!(failed.data.is_none());
    assert!(failed.error.is_some());
}
