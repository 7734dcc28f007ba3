//! Record store interface.
//!
//! The engine reads and writes records through [`RecordStore`] and learns
//! about changes through listeners. A listener is a bounded channel of
//! [`StoreEvent`]s; the store never calls back into engine code.
//!
//! [`MemoryRecordStore`] is an in-process implementation.

mod memory;

pub use memory::MemoryRecordStore;

use crate::error::Result;
use crate::types::{
    ActivityEvent, AiGenerationRecord, ExecutionRecord, Filters, NewExecution, NewGeneration,
    NewTestCase, RecordId, Scope, TestCasePatch, TestCaseRecord,
};
use serde::{Deserialize, Serialize};

/// Record collections a listener can watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    TestCases,
    Generations,
    Executions,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::TestCases => "test_cases",
            Collection::Generations => "generations",
            Collection::Executions => "executions",
        }
    }
}

/// Events delivered to store listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    /// A record in a watched collection was written.
    Changed {
        collection: Collection,
        record_id: RecordId,
    },
    /// The store could not serve the listener (e.g. lost permission).
    Error { message: String },
}

/// Unique identifier for a store listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receiving end of a store listener.
pub struct StoreListener {
    pub id: ListenerId,
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

/// Persisted test suite records.
///
/// Every call may block on I/O. Implementations must be safe to share
/// between threads.
pub trait RecordStore: Send + Sync {
    /// Test cases in `scope` passing `filters`.
    fn query_test_cases(&self, scope: &Scope, filters: &Filters) -> Result<Vec<TestCaseRecord>>;

    /// AI generation events in `scope`.
    fn query_generations(&self, scope: &Scope) -> Result<Vec<AiGenerationRecord>>;

    /// The `limit` most recent executions in `scope`, newest first.
    fn query_executions(&self, scope: &Scope, limit: usize) -> Result<Vec<ExecutionRecord>>;

    fn get_test_case(&self, scope: &Scope, id: RecordId) -> Result<Option<TestCaseRecord>>;

    fn create_test_case(&self, scope: &Scope, input: NewTestCase) -> Result<TestCaseRecord>;

    /// Apply a patch. Fails with `NotFound` for unknown ids.
    fn update_test_case(
        &self,
        scope: &Scope,
        id: RecordId,
        patch: TestCasePatch,
    ) -> Result<TestCaseRecord>;

    fn append_generation(&self, scope: &Scope, input: NewGeneration)
        -> Result<AiGenerationRecord>;

    /// Append an execution and fold it into its test case in one step:
    /// `actual_duration`, `last_executed` and `execution_count` are updated
    /// under the same write. Fails with `NotFound` for unknown test cases.
    fn append_execution(
        &self,
        scope: &Scope,
        test_case_id: RecordId,
        input: NewExecution,
    ) -> Result<ExecutionRecord>;

    /// Listen for writes to any of `collections` within `scope`.
    fn subscribe(&self, scope: &Scope, collections: &[Collection]) -> Result<StoreListener>;

    /// Release a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: ListenerId);

    /// Append to the scope's activity log.
    fn append_activity(&self, scope: &Scope, event: ActivityEvent) -> Result<()>;
}
