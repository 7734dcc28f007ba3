//! Metric reports.

use crate::error::Result;
use crate::metrics::{percent, quality_score, AutomationMetrics, TestCaseMetrics};
use crate::service::MetricsService;
use crate::types::{Filters, Scope, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// What a report is for. Every kind carries the same aggregates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Overview,
    Coverage,
    Automation,
    Quality,
}

/// Headline numbers derived from a report's aggregates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Share of test cases written by AI.
    pub ai_contribution: u32,
    /// Mean of the functional, edge case and negative coverage.
    pub coverage_score: u32,
    pub quality_score: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub kind: ReportKind,
    pub scope: Scope,
    pub test_cases: TestCaseMetrics,
    pub automation: AutomationMetrics,
    pub summary: ReportSummary,
    pub generated_at: Timestamp,
}

/// Builds reports from freshly computed aggregates.
pub struct ReportGenerator {
    service: Arc<MetricsService>,
}

impl ReportGenerator {
    pub fn new(service: Arc<MetricsService>) -> Self {
        Self { service }
    }

    /// Generate a report, never reading the cache.
    ///
    /// Fails as a whole if any aggregate fails; no partial report is returned.
    pub fn generate(&self, scope: &Scope, kind: ReportKind) -> Result<Report> {
        let test_cases = self
            .service
            .test_case_metrics(scope, &Filters::none(), false)?;
        let automation = self.service.automation_metrics(scope, false)?;

        let report = Report {
            kind,
            scope: scope.clone(),
            summary: summarize(&test_cases),
            test_cases,
            automation,
            generated_at: self.service.now(),
        };

        info!(scope = %scope, ?kind, total = report.test_cases.total, "report generated");
        Ok(report)
    }
}

/// Derive the summary block from test case metrics.
pub fn summarize(metrics: &TestCaseMetrics) -> ReportSummary {
    let coverage_sum = metrics.functional_coverage
        + metrics.edge_case_coverage
        + metrics.negative_coverage;

    ReportSummary {
        ai_contribution: percent(metrics.by_creation.ai_generated, metrics.total),
        coverage_score: (f64::from(coverage_sum) / 3.0).round() as u32,
        quality_score: quality_score(metrics),
    }
}
