//! Aggregate types produced by the metrics computer.

use crate::types::{Scope, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationBreakdown {
    pub manual: usize,
    pub automated: usize,
    pub ai_generated: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBreakdown {
    pub active: usize,
    pub outdated: usize,
    pub draft: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityBreakdown {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationQualityBreakdown {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

/// Counts and percentages over a set of test cases.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCaseMetrics {
    pub total: usize,
    pub by_creation: CreationBreakdown,
    pub with_tags: usize,
    pub with_linked_bugs: usize,
    pub with_recording: usize,

    /// Percentages in `0..=100`.
    pub functional_coverage: u32,
    pub edge_case_coverage: u32,
    pub negative_coverage: u32,

    pub by_status: StatusBreakdown,
    /// Updated within the recency window.
    pub recently_updated: usize,
    /// Executed at least once.
    pub executed: usize,
    /// Mean `actual_duration` over executed test cases, in minutes.
    pub avg_execution_duration: f64,
    pub by_priority: PriorityBreakdown,
    pub by_complexity: ComplexityBreakdown,
    /// Updates within the recency window.
    pub update_frequency: usize,
}

/// Efficiency of AI generation events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AiMetrics {
    /// Percentage of generations that produced anything usable.
    pub success_rate: u32,
    pub avg_test_cases_per_generation: u32,
    pub total_generations: usize,
    pub cost_per_test_case: f64,
    pub total_tokens_used: u64,
    pub total_cost: f64,
    pub by_quality: GenerationQualityBreakdown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationMetrics {
    pub automated: usize,
    /// Automated share of all test cases.
    pub automation_ratio: u32,
    /// Automated share of functional test cases.
    pub automation_coverage: u32,
}

/// Everything a dashboard shows for one scope at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub scope: Scope,
    pub test_cases: TestCaseMetrics,
    pub automation: AutomationMetrics,
    pub ai: AiMetrics,
    pub quality_score: u32,
    pub computed_at: Timestamp,
    /// Cache generation observed before the records were read.
    ///
    /// Of two snapshots of one scope, the one with the higher generation
    /// read the store later. Zero when computed outside a service.
    pub generation: u64,
}
