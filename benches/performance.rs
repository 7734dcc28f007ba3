//! Performance benchmarks for metric aggregation and caching.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use suite_metrics::metrics::{compute_snapshot, test_case_metrics};
use suite_metrics::{
    Coverage, CreationType, EngineConfig, MemoryRecordStore, MetricsService, NewTestCase,
    RecordId, RecordStore, Scope, TestCaseRecord, Timestamp,
};

const NOW: Timestamp = Timestamp(1_700_000_000_000_000);
const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn records(count: u64) -> Vec<TestCaseRecord> {
    (0..count)
        .map(|i| {
            let creation_type = match i % 3 {
                0 => CreationType::Manual,
                1 => CreationType::Automated,
                _ => CreationType::AiGenerated,
            };
            let mut input = NewTestCase::new(format!("case {}", i), creation_type).with_coverage(
                Coverage {
                    functional: i % 2 == 0,
                    edge_case: i % 5 == 0,
                    negative: i % 7 == 0,
                },
            );
            if i % 4 == 0 {
                input = input.with_tags(["smoke"]);
            }
            let written = NOW.saturating_sub(Duration::from_secs(i * 3600));
            input.into_record(RecordId(i), Scope::suite("bench"), written)
        })
        .collect()
}

/// Benchmark aggregation with varying suite sizes
fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");

    for size in [10, 100, 1000, 10_000] {
        let records = records(size);

        group.bench_with_input(
            BenchmarkId::new("test_case_metrics", size),
            &records,
            |b, records| {
                b.iter(|| black_box(test_case_metrics(records, NOW, WEEK)));
            },
        );

        group.bench_with_input(BenchmarkId::new("snapshot", size), &records, |b, records| {
            let scope = Scope::suite("bench");
            b.iter(|| black_box(compute_snapshot(&scope, records, &[], NOW, WEEK).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark cached reads against recomputation
fn bench_cached_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_snapshot");

    let store = Arc::new(MemoryRecordStore::new());
    let scope = Scope::suite("bench");
    for record in records(1000) {
        store
            .create_test_case(
                &scope,
                NewTestCase::new(record.title, record.creation_type).with_coverage(record.coverage),
            )
            .unwrap();
    }
    let service = MetricsService::new(store, EngineConfig::default());
    service.snapshot(&scope, true).unwrap();

    group.bench_function("hit", |b| {
        b.iter(|| black_box(service.snapshot(&scope, true).unwrap()));
    });

    group.bench_function("recompute", |b| {
        b.iter(|| black_box(service.snapshot(&scope, false).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_aggregation, bench_cached_snapshot);

criterion_main!(benches);
