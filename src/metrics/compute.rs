//! Pure aggregation over in-memory record sets.
//!
//! Every percentage goes through [`percent`], which is built on
//! [`safe_ratio`]; an empty set yields 0, never a division error.

use super::types::{
    AiMetrics, AutomationMetrics, ComplexityBreakdown, CreationBreakdown,
    GenerationQualityBreakdown, MetricsSnapshot, PriorityBreakdown, StatusBreakdown,
    TestCaseMetrics,
};
use crate::error::{MetricsError, Result};
use crate::types::{
    AiGenerationRecord, Complexity, CoverageDimension, CreationType, GenerationQuality, Priority,
    Scope, TestCaseRecord, TestCaseStatus, Timestamp,
};
use std::time::Duration;

/// `numerator / denominator`, or 0 when the denominator is zero, negative or not finite.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    numerator / denominator
}

/// Rounded percentage of `count` over `total`.
pub fn percent(count: usize, total: usize) -> u32 {
    (safe_ratio(count as f64, total as f64) * 100.0).round() as u32
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Percentage of records covering `dimension`.
pub fn calculate_coverage(records: &[TestCaseRecord], dimension: CoverageDimension) -> u32 {
    let covered = records
        .iter()
        .filter(|r| r.coverage.covers(dimension))
        .count();
    percent(covered, records.len())
}

/// Aggregate counts and percentages over test cases.
///
/// `now` and `recency_window` decide which records count as recently updated.
pub fn test_case_metrics(
    records: &[TestCaseRecord],
    now: Timestamp,
    recency_window: Duration,
) -> TestCaseMetrics {
    let since = now.saturating_sub(recency_window);

    let mut metrics = TestCaseMetrics {
        total: records.len(),
        functional_coverage: calculate_coverage(records, CoverageDimension::Functional),
        edge_case_coverage: calculate_coverage(records, CoverageDimension::EdgeCase),
        negative_coverage: calculate_coverage(records, CoverageDimension::Negative),
        ..Default::default()
    };

    let mut creation = CreationBreakdown::default();
    let mut status = StatusBreakdown::default();
    let mut priority = PriorityBreakdown::default();
    let mut complexity = ComplexityBreakdown::default();
    let mut executed_duration = 0.0;

    for record in records {
        match record.creation_type {
            CreationType::Manual => creation.manual += 1,
            CreationType::Automated => creation.automated += 1,
            CreationType::AiGenerated => creation.ai_generated += 1,
        }
        match record.status {
            TestCaseStatus::Active => status.active += 1,
            TestCaseStatus::Outdated => status.outdated += 1,
            TestCaseStatus::Draft => status.draft += 1,
        }
        match record.priority {
            Priority::High => priority.high += 1,
            Priority::Medium => priority.medium += 1,
            Priority::Low => priority.low += 1,
        }
        match record.metadata.complexity {
            Complexity::Low => complexity.low += 1,
            Complexity::Medium => complexity.medium += 1,
            Complexity::High => complexity.high += 1,
        }

        if !record.tags.is_empty() {
            metrics.with_tags += 1;
        }
        if !record.linked_bugs.is_empty() {
            metrics.with_linked_bugs += 1;
        }
        if record.has_recording {
            metrics.with_recording += 1;
        }
        if record.updated_at > since {
            metrics.recently_updated += 1;
        }
        if record.metadata.last_executed.is_some() {
            metrics.executed += 1;
            executed_duration += record.metadata.actual_duration;
        }
    }

    metrics.by_creation = creation;
    metrics.by_status = status;
    metrics.by_priority = priority;
    metrics.by_complexity = complexity;
    metrics.avg_execution_duration =
        round_to(safe_ratio(executed_duration, metrics.executed as f64), 2);
    metrics.update_frequency = update_frequency(records, since);

    metrics
}

/// Updates landing after `since`. Kept apart from `recently_updated` so the
/// two signals can diverge once update history is tracked per record.
fn update_frequency(records: &[TestCaseRecord], since: Timestamp) -> usize {
    records.iter().filter(|r| r.updated_at > since).count()
}

/// Efficiency of AI generation events.
pub fn ai_metrics(generations: &[AiGenerationRecord]) -> AiMetrics {
    if generations.is_empty() {
        return AiMetrics::default();
    }

    let total = generations.len();
    let successful = generations.iter().filter(|g| g.success_rate > 0.0).count();
    let total_test_cases: u64 = generations
        .iter()
        .map(|g| u64::from(g.test_cases_generated))
        .sum();
    let total_cost: f64 = generations.iter().map(|g| g.cost).sum();
    let total_tokens_used = generations.iter().map(|g| g.tokens_used).sum();

    let mut by_quality = GenerationQualityBreakdown::default();
    for generation in generations {
        match generation.quality {
            GenerationQuality::Excellent => by_quality.excellent += 1,
            GenerationQuality::Good => by_quality.good += 1,
            GenerationQuality::Fair => by_quality.fair += 1,
            GenerationQuality::Poor => by_quality.poor += 1,
        }
    }

    AiMetrics {
        success_rate: percent(successful, total),
        avg_test_cases_per_generation: safe_ratio(total_test_cases as f64, total as f64).round()
            as u32,
        total_generations: total,
        cost_per_test_case: round_to(safe_ratio(total_cost, total_test_cases as f64), 3),
        total_tokens_used,
        total_cost: round_to(total_cost, 4),
        by_quality,
    }
}

/// How much of the suite runs without a human.
pub fn automation_metrics(records: &[TestCaseRecord]) -> AutomationMetrics {
    let automated = records.iter().filter(|r| r.is_automated).count();
    let functional = records.iter().filter(|r| r.coverage.functional).count();
    let automated_functional = records
        .iter()
        .filter(|r| r.is_automated && r.coverage.functional)
        .count();

    AutomationMetrics {
        automated,
        automation_ratio: percent(automated, records.len()),
        automation_coverage: percent(automated_functional, functional),
    }
}

/// Mean of the tagged, recorded, executed and recently updated shares.
///
/// Always within `0..=100`.
pub fn quality_score(metrics: &TestCaseMetrics) -> u32 {
    let total = metrics.total as f64;
    let shares = [
        metrics.with_tags,
        metrics.with_recording,
        metrics.executed,
        metrics.recently_updated,
    ];
    let sum: f64 = shares
        .iter()
        .map(|&count| safe_ratio(count as f64, total) * 100.0)
        .sum();
    (sum / shares.len() as f64).round().clamp(0.0, 100.0) as u32
}

/// Full snapshot for a scope from already-loaded records.
pub fn compute_snapshot(
    scope: &Scope,
    records: &[TestCaseRecord],
    generations: &[AiGenerationRecord],
    now: Timestamp,
    recency_window: Duration,
) -> Result<MetricsSnapshot> {
    let test_cases = test_case_metrics(records, now, recency_window);
    let snapshot = MetricsSnapshot {
        scope: scope.clone(),
        quality_score: quality_score(&test_cases),
        automation: automation_metrics(records),
        ai: ai_metrics(generations),
        test_cases,
        computed_at: now,
        generation: 0,
    };
    validate_snapshot(&snapshot)?;
    Ok(snapshot)
}

/// Reject snapshots carrying non-finite numbers (e.g. from corrupt durations or costs).
pub fn validate_snapshot(snapshot: &MetricsSnapshot) -> Result<()> {
    let fields = [
        (
            "avg_execution_duration",
            snapshot.test_cases.avg_execution_duration,
        ),
        ("cost_per_test_case", snapshot.ai.cost_per_test_case),
        ("total_cost", snapshot.ai.total_cost),
    ];
    for (name, value) in fields {
        if !value.is_finite() {
            return Err(MetricsError::Computation(format!(
                "{} is not finite for scope {}",
                name, snapshot.scope
            )));
        }
    }
    Ok(())
}
