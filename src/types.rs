//! Core record types for test suites.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unique identifier for a stored record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    /// This timestamp moved back by `duration`, clamped at the epoch floor of `i64`.
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration_micros(duration)))
    }

    /// This timestamp moved forward by `duration`.
    pub fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration_micros(duration)))
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is in the future.
    pub fn elapsed_since(self, earlier: Timestamp) -> Duration {
        let delta = self.0.saturating_sub(earlier.0);
        if delta <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(delta as u64)
        }
    }
}

fn duration_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// The `(suite, sprint?)` pair an aggregate is computed over.
///
/// A suite-wide scope (`sprint_id == None`) covers every record in the suite,
/// including records assigned to a sprint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub suite_id: String,
    pub sprint_id: Option<String>,
}

impl Scope {
    /// Scope covering the whole suite.
    pub fn suite(suite_id: impl Into<String>) -> Self {
        Self {
            suite_id: suite_id.into(),
            sprint_id: None,
        }
    }

    /// Scope restricted to one sprint of a suite.
    pub fn sprint(suite_id: impl Into<String>, sprint_id: impl Into<String>) -> Self {
        Self {
            suite_id: suite_id.into(),
            sprint_id: Some(sprint_id.into()),
        }
    }

    /// Whether a record living in `record_scope` belongs to this scope.
    pub fn contains(&self, record_scope: &Scope) -> bool {
        if self.suite_id != record_scope.suite_id {
            return false;
        }
        match &self.sprint_id {
            None => true,
            Some(sprint) => record_scope.sprint_id.as_deref() == Some(sprint.as_str()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sprint_id {
            Some(sprint) => write!(f, "{}/{}", self.suite_id, sprint),
            None => write!(f, "{}", self.suite_id),
        }
    }
}

/// How a test case came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationType {
    Manual,
    Automated,
    AiGenerated,
}

/// Lifecycle status of a test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseStatus {
    Active,
    Outdated,
    Draft,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Scenario kinds a test case may cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageDimension {
    Functional,
    EdgeCase,
    Negative,
}

impl CoverageDimension {
    pub const ALL: [CoverageDimension; 3] = [
        CoverageDimension::Functional,
        CoverageDimension::EdgeCase,
        CoverageDimension::Negative,
    ];
}

/// Coverage flags of a single test case.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub functional: bool,
    pub edge_case: bool,
    pub negative: bool,
}

impl Coverage {
    pub fn covers(&self, dimension: CoverageDimension) -> bool {
        match dimension {
            CoverageDimension::Functional => self.functional,
            CoverageDimension::EdgeCase => self.edge_case,
            CoverageDimension::Negative => self.negative,
        }
    }
}

/// Execution bookkeeping attached to a test case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCaseMetadata {
    /// Estimated run time in minutes.
    pub estimated_duration: f64,
    /// Run time of the latest execution in minutes.
    pub actual_duration: f64,
    pub complexity: Complexity,
    pub last_executed: Option<Timestamp>,
    pub execution_count: u32,
}

impl Default for TestCaseMetadata {
    fn default() -> Self {
        Self {
            estimated_duration: 0.0,
            actual_duration: 0.0,
            complexity: Complexity::Medium,
            last_executed: None,
            execution_count: 0,
        }
    }
}

/// A stored test case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    pub id: RecordId,
    pub scope: Scope,
    pub title: String,
    pub creation_type: CreationType,
    pub status: TestCaseStatus,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub linked_bugs: BTreeSet<String>,
    pub has_recording: bool,
    pub is_automated: bool,
    pub coverage: Coverage,
    pub metadata: TestCaseMetadata,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for creating a test case (before id, scope and timestamps are assigned).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTestCase {
    pub title: String,
    pub creation_type: CreationType,
    pub status: TestCaseStatus,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub linked_bugs: BTreeSet<String>,
    pub has_recording: bool,
    pub is_automated: bool,
    pub coverage: Coverage,
    pub estimated_duration: f64,
    pub complexity: Complexity,
}

impl NewTestCase {
    /// An active, medium-priority test case with no coverage, tags or recording.
    pub fn new(title: impl Into<String>, creation_type: CreationType) -> Self {
        Self {
            title: title.into(),
            creation_type,
            status: TestCaseStatus::Active,
            priority: Priority::Medium,
            tags: BTreeSet::new(),
            linked_bugs: BTreeSet::new(),
            has_recording: false,
            is_automated: creation_type == CreationType::Automated,
            coverage: Coverage::default(),
            estimated_duration: 0.0,
            complexity: Complexity::Medium,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_coverage(mut self, coverage: Coverage) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TestCaseStatus) -> Self {
        self.status = status;
        self
    }

    pub fn automated(mut self, is_automated: bool) -> Self {
        self.is_automated = is_automated;
        self
    }

    /// Build the stored record.
    pub fn into_record(self, id: RecordId, scope: Scope, now: Timestamp) -> TestCaseRecord {
        TestCaseRecord {
            id,
            scope,
            title: self.title,
            creation_type: self.creation_type,
            status: self.status,
            priority: self.priority,
            tags: self.tags,
            linked_bugs: self.linked_bugs,
            has_recording: self.has_recording,
            is_automated: self.is_automated,
            coverage: self.coverage,
            metadata: TestCaseMetadata {
                estimated_duration: self.estimated_duration,
                complexity: self.complexity,
                ..TestCaseMetadata::default()
            },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a test case. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestCasePatch {
    pub title: Option<String>,
    pub status: Option<TestCaseStatus>,
    pub priority: Option<Priority>,
    pub tags: Option<BTreeSet<String>>,
    pub linked_bugs: Option<BTreeSet<String>>,
    pub has_recording: Option<bool>,
    pub is_automated: Option<bool>,
    pub coverage: Option<Coverage>,
    pub estimated_duration: Option<f64>,
    pub actual_duration: Option<f64>,
    pub complexity: Option<Complexity>,
    pub last_executed: Option<Timestamp>,
    pub execution_count: Option<u32>,
}

impl TestCasePatch {
    /// Apply the patch and bump `updated_at`.
    pub fn apply(self, record: &mut TestCaseRecord, now: Timestamp) {
        if let Some(title) = self.title {
            record.title = title;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(tags) = self.tags {
            record.tags = tags;
        }
        if let Some(linked_bugs) = self.linked_bugs {
            record.linked_bugs = linked_bugs;
        }
        if let Some(has_recording) = self.has_recording {
            record.has_recording = has_recording;
        }
        if let Some(is_automated) = self.is_automated {
            record.is_automated = is_automated;
        }
        if let Some(coverage) = self.coverage {
            record.coverage = coverage;
        }
        if let Some(estimated) = self.estimated_duration {
            record.metadata.estimated_duration = estimated;
        }
        if let Some(actual) = self.actual_duration {
            record.metadata.actual_duration = actual;
        }
        if let Some(complexity) = self.complexity {
            record.metadata.complexity = complexity;
        }
        if let Some(last_executed) = self.last_executed {
            record.metadata.last_executed = Some(last_executed);
        }
        if let Some(count) = self.execution_count {
            record.metadata.execution_count = count;
        }
        record.updated_at = now;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// One AI generation event. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiGenerationRecord {
    pub id: RecordId,
    pub scope: Scope,
    pub prompt: String,
    pub model: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub test_cases_generated: u32,
    /// Percentage in `0..=100`.
    pub success_rate: f64,
    pub quality: GenerationQuality,
    pub created_at: Timestamp,
}

/// Input for tracking an AI generation event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewGeneration {
    pub prompt: String,
    pub model: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub test_cases_generated: u32,
    pub success_rate: f64,
    pub quality: GenerationQuality,
}

impl NewGeneration {
    pub fn into_record(self, id: RecordId, scope: Scope, now: Timestamp) -> AiGenerationRecord {
        AiGenerationRecord {
            id,
            scope,
            prompt: self.prompt,
            model: self.model,
            tokens_used: self.tokens_used,
            cost: self.cost,
            test_cases_generated: self.test_cases_generated,
            success_rate: self.success_rate,
            quality: self.quality,
            created_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    Passed,
    Failed,
    Skipped,
}

/// One execution of a test case. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: RecordId,
    pub scope: Scope,
    pub test_case_id: RecordId,
    pub result: ExecutionResult,
    /// Run time in minutes.
    pub duration: f64,
    pub executed_by: String,
    pub executed_at: Timestamp,
}

/// Input for recording an execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewExecution {
    pub result: ExecutionResult,
    pub duration: f64,
    pub executed_by: String,
}

/// Kinds of entries written to the activity log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TestCaseCreated,
    TestCaseUpdated,
    TestCaseExecuted,
    GenerationTracked,
    RecordingTracked,
}

/// An activity log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub record_id: Option<RecordId>,
    pub detail: String,
    pub at: Timestamp,
}

/// Filter criteria for test case queries.
///
/// Set-valued fields are ordered, so two equal filters always serialize to
/// the same bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filters {
    pub status: Option<TestCaseStatus>,
    pub creation_type: Option<CreationType>,
    pub priority: Option<Priority>,
    /// Records must carry every listed tag.
    pub tags: BTreeSet<String>,
}

impl Filters {
    /// No filtering.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn status(status: TestCaseStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn creation_type(creation_type: CreationType) -> Self {
        Self {
            creation_type: Some(creation_type),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.creation_type.is_none()
            && self.priority.is_none()
            && self.tags.is_empty()
    }

    /// Check if a record passes the filter.
    pub fn matches(&self, record: &TestCaseRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(creation_type) = self.creation_type {
            if record.creation_type != creation_type {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if record.priority != priority {
                return false;
            }
        }
        self.tags.iter().all(|tag| record.tags.contains(tag))
    }
}
