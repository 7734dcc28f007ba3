//! Metrics aggregation.
//!
//! Side-effect free functions turning record sets into aggregates:
//! - Test case counts, breakdowns and coverage percentages
//! - Automation ratio and coverage
//! - AI generation efficiency
//! - A combined quality score
//!
//! Callers load the records; nothing here touches the store or the cache.

mod compute;
mod types;

pub use compute::{
    ai_metrics, automation_metrics, calculate_coverage, compute_snapshot, percent, quality_score,
    safe_ratio, test_case_metrics, validate_snapshot,
};
pub use types::{
    AiMetrics, AutomationMetrics, ComplexityBreakdown, CreationBreakdown,
    GenerationQualityBreakdown, MetricsSnapshot, PriorityBreakdown, StatusBreakdown,
    TestCaseMetrics,
};
