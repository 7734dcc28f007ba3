//! In-process record store.

use super::{Collection, ListenerId, RecordStore, StoreEvent, StoreListener};
use crate::clock::{Clock, SystemClock};
use crate::error::{MetricsError, Result};
use crate::types::{
    ActivityEvent, AiGenerationRecord, ExecutionRecord, Filters, NewExecution, NewGeneration,
    NewTestCase, RecordId, Scope, TestCasePatch, TestCaseRecord,
};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default number of undelivered change events per listener.
const DEFAULT_LISTENER_BUFFER: usize = 64;

#[derive(Default)]
struct StoreData {
    test_cases: BTreeMap<RecordId, TestCaseRecord>,
    generations: Vec<AiGenerationRecord>,
    executions: Vec<ExecutionRecord>,
    activity: Vec<(Scope, ActivityEvent)>,
}

struct Listener {
    scope: Scope,
    collections: Vec<Collection>,
    sender: Sender<StoreEvent>,
}

impl Listener {
    fn wants(&self, collection: Collection, record_scope: &Scope) -> bool {
        self.collections.contains(&collection) && self.scope.contains(record_scope)
    }
}

/// Injected failures and latency.
#[derive(Default)]
struct Faults {
    failing_queries: u32,
    query_delay: Duration,
    fail_activity: bool,
}

/// Record store kept entirely in memory.
///
/// Writes notify every listener whose scope contains the written record.
/// A listener whose buffer is full already has a change pending, so the
/// extra notification is dropped rather than the listener.
pub struct MemoryRecordStore {
    data: RwLock<StoreData>,
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    next_record_id: AtomicU64,
    next_listener_id: AtomicU64,
    query_count: AtomicU64,
    listener_buffer: usize,
    faults: Mutex<Faults>,
    clock: Arc<dyn Clock>,
}

impl MemoryRecordStore {
    /// Create an empty store stamping records with the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping records with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            listeners: RwLock::new(HashMap::new()),
            next_record_id: AtomicU64::new(1),
            next_listener_id: AtomicU64::new(1),
            query_count: AtomicU64::new(0),
            listener_buffer: DEFAULT_LISTENER_BUFFER,
            faults: Mutex::new(Faults::default()),
            clock,
        }
    }

    /// Make the next `count` queries fail with a store error.
    pub fn fail_next_queries(&self, count: u32) {
        self.faults.lock().failing_queries = count;
    }

    /// Delay every query by `delay`.
    pub fn set_query_delay(&self, delay: Duration) {
        self.faults.lock().query_delay = delay;
    }

    /// Make activity log writes fail.
    pub fn fail_activity_log(&self, fail: bool) {
        self.faults.lock().fail_activity = fail;
    }

    /// Push an error to every listener watching `scope`.
    pub fn emit_error(&self, scope: &Scope, message: &str) {
        let listeners = self.listeners.read();
        for listener in listeners.values() {
            if listener.scope.contains(scope) || scope.contains(&listener.scope) {
                let _ = listener.sender.try_send(StoreEvent::Error {
                    message: message.to_string(),
                });
            }
        }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Number of collection queries served (including failed ones).
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }

    /// Activity log entries recorded for records in `scope`.
    pub fn activity_log(&self, scope: &Scope) -> Vec<ActivityEvent> {
        self.data
            .read()
            .activity
            .iter()
            .filter(|(event_scope, _)| scope.contains(event_scope))
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn next_id(&self) -> RecordId {
        RecordId(self.next_record_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Apply injected latency and failures to a query.
    fn begin_query(&self, what: &str) -> Result<()> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let mut faults = self.faults.lock();
            if faults.failing_queries > 0 {
                faults.failing_queries -= 1;
                return Err(MetricsError::StoreQuery(format!(
                    "{} query rejected: permission denied",
                    what
                )));
            }
            faults.query_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(())
    }

    /// Notify matching listeners. Drops listeners whose receiver is gone.
    fn broadcast(&self, collection: Collection, record_scope: &Scope, record_id: RecordId) {
        let mut to_remove = Vec::new();

        {
            let listeners = self.listeners.read();
            for (id, listener) in listeners.iter() {
                if !listener.wants(collection, record_scope) {
                    continue;
                }
                let event = StoreEvent::Changed {
                    collection,
                    record_id,
                };
                match listener.sender.try_send(event) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => to_remove.push(*id),
                }
            }
        }

        if !to_remove.is_empty() {
            let mut listeners = self.listeners.write();
            for id in to_remove {
                listeners.remove(&id);
            }
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn query_test_cases(&self, scope: &Scope, filters: &Filters) -> Result<Vec<TestCaseRecord>> {
        self.begin_query(Collection::TestCases.as_str())?;
        Ok(self
            .data
            .read()
            .test_cases
            .values()
            .filter(|r| scope.contains(&r.scope) && filters.matches(r))
            .cloned()
            .collect())
    }

    fn query_generations(&self, scope: &Scope) -> Result<Vec<AiGenerationRecord>> {
        self.begin_query(Collection::Generations.as_str())?;
        Ok(self
            .data
            .read()
            .generations
            .iter()
            .filter(|g| scope.contains(&g.scope))
            .cloned()
            .collect())
    }

    fn query_executions(&self, scope: &Scope, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.begin_query(Collection::Executions.as_str())?;
        let mut executions: Vec<ExecutionRecord> = self
            .data
            .read()
            .executions
            .iter()
            .filter(|e| scope.contains(&e.scope))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.executed_at.cmp(&a.executed_at).then(b.id.cmp(&a.id)));
        executions.truncate(limit);
        Ok(executions)
    }

    fn get_test_case(&self, scope: &Scope, id: RecordId) -> Result<Option<TestCaseRecord>> {
        Ok(self
            .data
            .read()
            .test_cases
            .get(&id)
            .filter(|r| scope.contains(&r.scope))
            .cloned())
    }

    fn create_test_case(&self, scope: &Scope, input: NewTestCase) -> Result<TestCaseRecord> {
        let record = input.into_record(self.next_id(), scope.clone(), self.clock.now());
        self.data.write().test_cases.insert(record.id, record.clone());
        self.broadcast(Collection::TestCases, scope, record.id);
        Ok(record)
    }

    fn update_test_case(
        &self,
        scope: &Scope,
        id: RecordId,
        patch: TestCasePatch,
    ) -> Result<TestCaseRecord> {
        let updated = {
            let mut data = self.data.write();
            let record = data
                .test_cases
                .get_mut(&id)
                .filter(|r| scope.contains(&r.scope))
                .ok_or(MetricsError::NotFound {
                    collection: Collection::TestCases.as_str(),
                    id,
                })?;
            patch.apply(record, self.clock.now());
            record.clone()
        };
        self.broadcast(Collection::TestCases, &updated.scope, id);
        Ok(updated)
    }

    fn append_generation(
        &self,
        scope: &Scope,
        input: NewGeneration,
    ) -> Result<AiGenerationRecord> {
        let record = input.into_record(self.next_id(), scope.clone(), self.clock.now());
        self.data.write().generations.push(record.clone());
        self.broadcast(Collection::Generations, scope, record.id);
        Ok(record)
    }

    fn append_execution(
        &self,
        scope: &Scope,
        test_case_id: RecordId,
        input: NewExecution,
    ) -> Result<ExecutionRecord> {
        let record = {
            let mut data = self.data.write();
            let now = self.clock.now();
            let test_case = data
                .test_cases
                .get_mut(&test_case_id)
                .filter(|r| scope.contains(&r.scope))
                .ok_or(MetricsError::NotFound {
                    collection: Collection::TestCases.as_str(),
                    id: test_case_id,
                })?;

            let record = ExecutionRecord {
                id: self.next_id(),
                scope: test_case.scope.clone(),
                test_case_id,
                result: input.result,
                duration: input.duration,
                executed_by: input.executed_by,
                executed_at: now,
            };
            let metadata = &mut test_case.metadata;
            metadata.actual_duration = record.duration;
            metadata.last_executed = Some(now);
            metadata.execution_count = metadata.execution_count.saturating_add(1);
            test_case.updated_at = now;

            data.executions.push(record.clone());
            record
        };

        self.broadcast(Collection::Executions, &record.scope, record.id);
        self.broadcast(Collection::TestCases, &record.scope, test_case_id);
        Ok(record)
    }

    fn subscribe(&self, scope: &Scope, collections: &[Collection]) -> Result<StoreListener> {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.listener_buffer);

        self.listeners.write().insert(
            id,
            Listener {
                scope: scope.clone(),
                collections: collections.to_vec(),
                sender,
            },
        );

        Ok(StoreListener { id, receiver })
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.write().remove(&id);
    }

    fn append_activity(&self, scope: &Scope, event: ActivityEvent) -> Result<()> {
        if self.faults.lock().fail_activity {
            return Err(MetricsError::StoreQuery("activity log unavailable".into()));
        }
        self.data.write().activity.push((scope.clone(), event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{CreationType, ExecutionResult, Timestamp};

    fn execution(result: ExecutionResult) -> NewExecution {
        NewExecution {
            result,
            duration: 1.5,
            executed_by: "qa".to_string(),
        }
    }

    #[test]
    fn test_scoped_queries() {
        let store = MemoryRecordStore::new();
        let sprint = Scope::sprint("suite", "s1");
        store
            .create_test_case(&sprint, NewTestCase::new("a", CreationType::Manual))
            .unwrap();
        store
            .create_test_case(&Scope::suite("suite"), NewTestCase::new("b", CreationType::Manual))
            .unwrap();
        store
            .create_test_case(&Scope::suite("other"), NewTestCase::new("c", CreationType::Manual))
            .unwrap();

        let suite_wide = store
            .query_test_cases(&Scope::suite("suite"), &Filters::none())
            .unwrap();
        assert_eq!(suite_wide.len(), 2);

        let sprint_only = store.query_test_cases(&sprint, &Filters::none()).unwrap();
        assert_eq!(sprint_only.len(), 1);
        assert_eq!(sprint_only[0].title, "a");
    }

    #[test]
    fn test_update_unknown_is_not_found() {
        let store = MemoryRecordStore::new();
        let result =
            store.update_test_case(&Scope::suite("s"), RecordId(99), TestCasePatch::default());
        assert!(matches!(result, Err(MetricsError::NotFound { .. })));
    }

    #[test]
    fn test_listener_receives_matching_changes() {
        let store = MemoryRecordStore::new();
        let scope = Scope::suite("suite");
        let listener = store.subscribe(&scope, &[Collection::TestCases]).unwrap();

        let record = store
            .create_test_case(&scope, NewTestCase::new("a", CreationType::Manual))
            .unwrap();
        store
            .append_execution(&scope, record.id, execution(ExecutionResult::Passed))
            .unwrap();
        store
            .create_test_case(&Scope::suite("other"), NewTestCase::new("b", CreationType::Manual))
            .unwrap();

        // Creation, then the execution folded into the test case.
        for _ in 0..2 {
            assert_eq!(
                listener.receiver.try_recv().unwrap(),
                StoreEvent::Changed {
                    collection: Collection::TestCases,
                    record_id: record.id,
                }
            );
        }
        assert!(listener.receiver.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_and_disconnect_release_listeners() {
        let store = MemoryRecordStore::new();
        let scope = Scope::suite("suite");

        let kept = store.subscribe(&scope, &[Collection::TestCases]).unwrap();
        let dropped = store.subscribe(&scope, &[Collection::TestCases]).unwrap();
        assert_eq!(store.listener_count(), 2);

        store.unsubscribe(kept.id);
        assert_eq!(store.listener_count(), 1);

        drop(dropped);
        store
            .create_test_case(&scope, NewTestCase::new("a", CreationType::Manual))
            .unwrap();
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_executions_newest_first_and_limited() {
        let clock = Arc::new(ManualClock::new(Timestamp(0)));
        let store = MemoryRecordStore::with_clock(clock.clone());
        let scope = Scope::suite("suite");
        let case = store
            .create_test_case(&scope, NewTestCase::new("flaky", CreationType::Manual))
            .unwrap();

        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            store
                .append_execution(&scope, case.id, execution(ExecutionResult::Failed))
                .unwrap();
        }

        let recent = store.query_executions(&scope, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].executed_at, Timestamp(5_000_000));
        assert!(recent.windows(2).all(|w| w[0].executed_at >= w[1].executed_at));
    }

    #[test]
    fn test_injected_query_failures() {
        let store = MemoryRecordStore::new();
        let scope = Scope::suite("suite");
        store.fail_next_queries(1);

        assert!(matches!(
            store.query_generations(&scope),
            Err(MetricsError::StoreQuery(_))
        ));
        assert!(store.query_generations(&scope).is_ok());
        assert_eq!(store.query_count(), 2);
    }
}
