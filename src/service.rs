//! Metrics service tying the store, cache and computer together.

use crate::cache::{cache_key, AggregateKind, CachedAggregate, MetricsCache};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{MetricsError, Result};
use crate::metrics::{
    ai_metrics, automation_metrics, compute_snapshot, test_case_metrics, AiMetrics,
    AutomationMetrics, MetricsSnapshot, TestCaseMetrics,
};
use crate::store::{Collection, RecordStore};
use crate::types::{
    ActivityEvent, ActivityKind, AiGenerationRecord, ExecutionRecord, Filters, NewExecution,
    NewGeneration, NewTestCase, RecordId, Scope, TestCasePatch, TestCaseRecord, Timestamp,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cached metrics over a record store.
///
/// Reads go through the cache unless told otherwise. Every mutation
/// invalidates the cached aggregates of the touched suite.
pub struct MetricsService {
    store: Arc<dyn RecordStore>,
    cache: MetricsCache,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl MetricsService {
    /// Create a service using the wall clock.
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn RecordStore>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = MetricsCache::new(config.cache_ttl, config.cache_capacity, clock.clone());
        Self {
            store,
            cache,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn cache(&self) -> &MetricsCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // --- Cached Reads ---

    /// Full snapshot for a scope.
    pub fn snapshot(&self, scope: &Scope, use_cache: bool) -> Result<MetricsSnapshot> {
        let key = cache_key(scope, AggregateKind::Snapshot, &Filters::none());
        if use_cache {
            if let Some(CachedAggregate::Snapshot(snapshot)) = self.cache.get(&key) {
                return Ok(snapshot);
            }
        }

        let generation = self.cache.generation();
        let snapshot = self.compute_fresh_snapshot(scope, generation)?;
        self.cache
            .set_if_current(key, CachedAggregate::Snapshot(snapshot.clone()), generation);
        Ok(snapshot)
    }

    /// Test case metrics over the records passing `filters`.
    pub fn test_case_metrics(
        &self,
        scope: &Scope,
        filters: &Filters,
        use_cache: bool,
    ) -> Result<TestCaseMetrics> {
        let key = cache_key(scope, AggregateKind::TestCases, filters);
        if use_cache {
            if let Some(CachedAggregate::TestCases(metrics)) = self.cache.get(&key) {
                return Ok(metrics);
            }
        }

        let generation = self.cache.generation();
        let records = self.load_test_cases(scope, filters)?;
        let metrics = test_case_metrics(&records, self.clock.now(), self.config.recency_window);
        self.cache
            .set_if_current(key, CachedAggregate::TestCases(metrics.clone()), generation);
        Ok(metrics)
    }

    pub fn automation_metrics(&self, scope: &Scope, use_cache: bool) -> Result<AutomationMetrics> {
        let key = cache_key(scope, AggregateKind::Automation, &Filters::none());
        if use_cache {
            if let Some(CachedAggregate::Automation(metrics)) = self.cache.get(&key) {
                return Ok(metrics);
            }
        }

        let generation = self.cache.generation();
        let records = self.load_test_cases(scope, &Filters::none())?;
        let metrics = automation_metrics(&records);
        self.cache
            .set_if_current(key, CachedAggregate::Automation(metrics), generation);
        Ok(metrics)
    }

    pub fn ai_metrics(&self, scope: &Scope, use_cache: bool) -> Result<AiMetrics> {
        let key = cache_key(scope, AggregateKind::Ai, &Filters::none());
        if use_cache {
            if let Some(CachedAggregate::Ai(metrics)) = self.cache.get(&key) {
                return Ok(metrics);
            }
        }

        let generation = self.cache.generation();
        let generations = self.retrying(Collection::Generations, || {
            self.store.query_generations(scope)
        })?;
        let metrics = ai_metrics(&generations);
        self.cache
            .set_if_current(key, CachedAggregate::Ai(metrics.clone()), generation);
        Ok(metrics)
    }

    /// The most recent executions, newest first.
    pub fn recent_executions(&self, scope: &Scope) -> Result<Vec<ExecutionRecord>> {
        let limit = self.config.execution_feed_limit;
        self.retrying(Collection::Executions, || {
            self.store.query_executions(scope, limit)
        })
    }

    /// Drop every cached aggregate of the scope's suite.
    pub fn invalidate(&self, scope: &Scope) -> usize {
        self.cache.invalidate_suite(&scope.suite_id)
    }

    /// Invalidate the scope, recompute its snapshot from the store and cache the result.
    pub(crate) fn recompute_after_change(&self, scope: &Scope) -> Result<MetricsSnapshot> {
        self.invalidate(scope);
        let generation = self.cache.generation();
        let snapshot = self.compute_fresh_snapshot(scope, generation)?;
        self.cache.set_if_current(
            cache_key(scope, AggregateKind::Snapshot, &Filters::none()),
            CachedAggregate::Snapshot(snapshot.clone()),
            generation,
        );
        Ok(snapshot)
    }

    /// Recompute a snapshot from the store, ignoring the cache entirely.
    ///
    /// `generation` must be read from the cache before this call.
    fn compute_fresh_snapshot(&self, scope: &Scope, generation: u64) -> Result<MetricsSnapshot> {
        let records = self.load_test_cases(scope, &Filters::none())?;
        let generations = self.retrying(Collection::Generations, || {
            self.store.query_generations(scope)
        })?;
        debug!(
            scope = %scope,
            test_cases = records.len(),
            generations = generations.len(),
            "recomputed metrics snapshot"
        );
        let mut snapshot = compute_snapshot(
            scope,
            &records,
            &generations,
            self.clock.now(),
            self.config.recency_window,
        )?;
        snapshot.generation = generation;
        Ok(snapshot)
    }

    fn load_test_cases(&self, scope: &Scope, filters: &Filters) -> Result<Vec<TestCaseRecord>> {
        self.retrying(Collection::TestCases, || {
            self.store.query_test_cases(scope, filters)
        })
    }

    /// Run a store read, retrying store errors up to `store_retries` extra times.
    fn retrying<T, F>(&self, collection: Collection, mut query: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match query() {
                Err(e) if e.is_retryable() && attempt < self.config.store_retries => {
                    attempt += 1;
                    warn!(
                        collection = collection.as_str(),
                        attempt,
                        error = %e,
                        "store query failed, retrying"
                    );
                }
                result => return result,
            }
        }
    }

    // --- Mutations ---

    pub fn create_test_case(&self, scope: &Scope, input: NewTestCase) -> Result<TestCaseRecord> {
        validate_duration("estimated_duration", input.estimated_duration)?;
        let record = self.store.create_test_case(scope, input)?;
        self.after_write(
            scope,
            ActivityKind::TestCaseCreated,
            Some(record.id),
            format!("created \"{}\"", record.title),
        );
        Ok(record)
    }

    pub fn update_test_case(
        &self,
        scope: &Scope,
        id: RecordId,
        patch: TestCasePatch,
    ) -> Result<TestCaseRecord> {
        if let Some(estimated) = patch.estimated_duration {
            validate_duration("estimated_duration", estimated)?;
        }
        if let Some(actual) = patch.actual_duration {
            validate_duration("actual_duration", actual)?;
        }
        let record = self.store.update_test_case(scope, id, patch)?;
        self.after_write(
            scope,
            ActivityKind::TestCaseUpdated,
            Some(id),
            format!("updated \"{}\"", record.title),
        );
        Ok(record)
    }

    /// Record an execution and fold it into the test case's metadata.
    ///
    /// The store applies both in one write, so concurrent executions of the
    /// same test case never lose a count.
    pub fn execute_test_case(
        &self,
        scope: &Scope,
        id: RecordId,
        input: NewExecution,
    ) -> Result<ExecutionRecord> {
        validate_duration("duration", input.duration)?;
        let execution = match self.store.append_execution(scope, id, input) {
            Ok(execution) => execution,
            Err(e) => {
                self.invalidate(scope);
                return Err(e);
            }
        };
        self.after_write(
            scope,
            ActivityKind::TestCaseExecuted,
            Some(id),
            format!("{:?} in {} min", execution.result, execution.duration),
        );
        Ok(execution)
    }

    pub fn track_generation(
        &self,
        scope: &Scope,
        input: NewGeneration,
    ) -> Result<AiGenerationRecord> {
        if !(0.0..=100.0).contains(&input.success_rate) {
            return Err(MetricsError::InvalidInput(format!(
                "success_rate must be within 0..=100, got {}",
                input.success_rate
            )));
        }
        if !input.cost.is_finite() || input.cost < 0.0 {
            return Err(MetricsError::InvalidInput(format!(
                "cost must be a non-negative number, got {}",
                input.cost
            )));
        }
        let record = self.store.append_generation(scope, input)?;
        self.after_write(
            scope,
            ActivityKind::GenerationTracked,
            Some(record.id),
            format!(
                "{} generated {} test cases",
                record.model, record.test_cases_generated
            ),
        );
        Ok(record)
    }

    /// Mark a test case as having a recording attached.
    pub fn track_recording(&self, scope: &Scope, id: RecordId) -> Result<TestCaseRecord> {
        let record = self.store.update_test_case(
            scope,
            id,
            TestCasePatch {
                has_recording: Some(true),
                ..Default::default()
            },
        )?;
        self.after_write(
            scope,
            ActivityKind::RecordingTracked,
            Some(id),
            format!("recording attached to \"{}\"", record.title),
        );
        Ok(record)
    }

    /// Invalidate the suite's aggregates and log the activity.
    ///
    /// Activity log failures never fail the write that caused them.
    fn after_write(
        &self,
        scope: &Scope,
        kind: ActivityKind,
        record_id: Option<RecordId>,
        detail: String,
    ) {
        self.invalidate(scope);

        let event = ActivityEvent {
            kind,
            record_id,
            detail,
            at: self.clock.now(),
        };
        if let Err(e) = self.store.append_activity(scope, event) {
            warn!(scope = %scope, ?kind, error = %e, "failed to append activity log");
        }
    }
}

fn validate_duration(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(MetricsError::InvalidInput(format!(
            "{} must be a non-negative number, got {}",
            field, value
        )));
    }
    Ok(())
}
