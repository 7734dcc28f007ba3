//! Consumer-facing dashboard over one scope.

use crate::config::DEFAULT_REFRESH_INTERVAL;
use crate::error::{MetricsError, Result};
use crate::metrics::MetricsSnapshot;
use crate::report::{Report, ReportGenerator, ReportKind};
use crate::service::MetricsService;
use crate::subscriptions::{SubscriptionHandle, SubscriptionManager};
use crate::types::{
    AiGenerationRecord, ExecutionRecord, NewExecution, NewGeneration, NewTestCase, RecordId,
    Scope, TestCasePatch, TestCaseRecord, Timestamp,
};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a dashboard keeps itself fresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DashboardOptions {
    /// Poll on a timer. Ignored while `enable_realtime` is set.
    pub auto_refresh: bool,
    /// Poll interval.
    /// Default: 30 seconds
    pub refresh_interval: Duration,
    /// Follow store changes through push subscriptions.
    pub enable_realtime: bool,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            enable_realtime: false,
        }
    }
}

/// What a dashboard currently shows.
#[derive(Clone, Debug, Default)]
pub struct DashboardState {
    pub snapshot: Option<MetricsSnapshot>,
    /// Filled in realtime mode only.
    pub recent_executions: Vec<ExecutionRecord>,
    pub loading: bool,
    /// Last failure; cleared by the next successful load.
    pub error: Option<MetricsError>,
    pub last_updated: Option<Timestamp>,
}

impl DashboardState {
    /// Take a snapshot unless the one shown read the store later.
    ///
    /// Snapshots are ordered by the cache generation taken before their
    /// read, not by when they finished.
    fn apply_snapshot(&mut self, snapshot: MetricsSnapshot) {
        let newer = self
            .snapshot
            .as_ref()
            .map_or(true, |current| snapshot.generation >= current.generation);
        if newer {
            self.last_updated = Some(snapshot.computed_at);
            self.snapshot = Some(snapshot);
        }
        self.error = None;
    }
}

/// Loads snapshots into the shared state.
#[derive(Clone)]
struct Loader {
    service: Arc<MetricsService>,
    subscriptions: Arc<SubscriptionManager>,
    scope: Scope,
    state: Arc<RwLock<DashboardState>>,
}

impl Loader {
    fn load(&self, use_cache: bool) -> Result<MetricsSnapshot> {
        self.state.write().loading = true;
        // Same gate as the push feeds: a load and a recompute never interleave.
        let result = self
            .subscriptions
            .serialized(&self.scope, || self.service.snapshot(&self.scope, use_cache));

        let mut state = self.state.write();
        state.loading = false;
        match &result {
            Ok(snapshot) => state.apply_snapshot(snapshot.clone()),
            Err(e) => {
                warn!(scope = %self.scope, error = %e, "failed to load metrics");
                state.error = Some(e.clone());
            }
        }
        result
    }
}

/// Timer thread calling a loader until stopped.
struct PollTimer {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl PollTimer {
    fn start(loader: Loader, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let name = format!("metrics-poll-{}", loader.scope);
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        debug!(scope = %loader.scope, "poll tick");
                        let _ = loader.load(true);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| MetricsError::Computation(format!("failed to start poll timer: {}", e)))?;

        Ok(Self {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }

    fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The single active freshness strategy of a dashboard.
enum RefreshMode {
    Idle,
    Polling(PollTimer),
    Realtime {
        metrics: SubscriptionHandle,
        executions: SubscriptionHandle,
    },
}

impl RefreshMode {
    fn name(&self) -> &'static str {
        match self {
            RefreshMode::Idle => "idle",
            RefreshMode::Polling(_) => "polling",
            RefreshMode::Realtime { .. } => "realtime",
        }
    }
}

/// Metrics for one scope, kept fresh by polling or by push subscriptions.
///
/// At most one of the two runs at a time. Mutations made through the
/// dashboard refresh it explicitly when no push subscription will.
pub struct MetricsDashboard {
    loader: Loader,
    reports: ReportGenerator,
    options: Mutex<DashboardOptions>,
    mode: Mutex<RefreshMode>,
}

impl MetricsDashboard {
    /// Open a dashboard: load once, then start polling or push updates.
    ///
    /// A failed initial load is recorded in the state, not returned.
    pub fn open(
        subscriptions: Arc<SubscriptionManager>,
        scope: Scope,
        options: DashboardOptions,
    ) -> Result<Self> {
        let service = Arc::clone(subscriptions.service());
        let dashboard = Self {
            loader: Loader {
                service: Arc::clone(&service),
                subscriptions,
                scope,
                state: Arc::new(RwLock::new(DashboardState::default())),
            },
            reports: ReportGenerator::new(service),
            options: Mutex::new(options),
            mode: Mutex::new(RefreshMode::Idle),
        };

        let _ = dashboard.loader.load(true);
        dashboard.apply_options(options)?;
        Ok(dashboard)
    }

    pub fn scope(&self) -> &Scope {
        &self.loader.scope
    }

    pub fn options(&self) -> DashboardOptions {
        *self.options.lock()
    }

    pub fn state(&self) -> DashboardState {
        self.loader.state.read().clone()
    }

    pub fn snapshot(&self) -> Option<MetricsSnapshot> {
        self.loader.state.read().snapshot.clone()
    }

    /// Executions pushed by the realtime feed, newest first. Empty otherwise.
    pub fn recent_executions(&self) -> Vec<ExecutionRecord> {
        self.loader.state.read().recent_executions.clone()
    }

    pub fn is_realtime(&self) -> bool {
        matches!(*self.mode.lock(), RefreshMode::Realtime { .. })
    }

    pub fn is_polling(&self) -> bool {
        matches!(*self.mode.lock(), RefreshMode::Polling(_))
    }

    // --- Freshness ---

    /// Reload metrics, using a cached snapshot if one is still valid.
    pub fn refresh(&self) -> Result<MetricsSnapshot> {
        self.loader.load(true)
    }

    /// Drop the scope's cached aggregates and reload from the store.
    pub fn clear_cache_and_refresh(&self) -> Result<MetricsSnapshot> {
        self.loader.service.invalidate(&self.loader.scope);
        self.loader.load(false)
    }

    /// Generate a report from freshly computed aggregates.
    pub fn generate_report(&self, kind: ReportKind) -> Result<Report> {
        self.reports.generate(&self.loader.scope, kind)
    }

    /// Switch push updates on or off. Turning them on stops polling.
    pub fn set_realtime(&self, enabled: bool) -> Result<()> {
        let options = {
            let mut options = self.options.lock();
            options.enable_realtime = enabled;
            *options
        };
        self.apply_options(options)
    }

    /// Switch polling on or off. Has no effect on the mode while realtime is enabled.
    pub fn set_auto_refresh(&self, enabled: bool) -> Result<()> {
        let options = {
            let mut options = self.options.lock();
            options.auto_refresh = enabled;
            *options
        };
        self.apply_options(options)
    }

    /// Stop polling and dispose push subscriptions.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.mode.lock(), RefreshMode::Idle);
        if !matches!(previous, RefreshMode::Idle) {
            info!(scope = %self.loader.scope, mode = previous.name(), "dashboard shut down");
        }
        drop(previous);
    }

    fn apply_options(&self, options: DashboardOptions) -> Result<()> {
        let mut mode = self.mode.lock();

        // Tear down first so the two strategies never overlap.
        let previous = std::mem::replace(&mut *mode, RefreshMode::Idle);
        drop(previous);

        *mode = if options.enable_realtime {
            self.start_realtime()?
        } else if options.auto_refresh {
            RefreshMode::Polling(PollTimer::start(
                self.loader.clone(),
                options.refresh_interval,
            )?)
        } else {
            RefreshMode::Idle
        };

        info!(scope = %self.loader.scope, mode = mode.name(), "dashboard refresh mode set");
        Ok(())
    }

    fn start_realtime(&self) -> Result<RefreshMode> {
        let scope = &self.loader.scope;

        let on_snapshot = Arc::clone(&self.loader.state);
        let on_metrics_error = Arc::clone(&self.loader.state);
        let metrics = self.loader.subscriptions.subscribe_metrics(
            scope,
            move |snapshot| on_snapshot.write().apply_snapshot(snapshot),
            move |error| on_metrics_error.write().error = Some(error),
        )?;

        let on_executions = Arc::clone(&self.loader.state);
        let on_executions_error = Arc::clone(&self.loader.state);
        let executions = self.loader.subscriptions.subscribe_executions(
            scope,
            move |executions| on_executions.write().recent_executions = executions,
            move |error| on_executions_error.write().error = Some(error),
        )?;

        match self.loader.service.recent_executions(scope) {
            Ok(recent) => self.loader.state.write().recent_executions = recent,
            Err(e) => self.loader.state.write().error = Some(e),
        }

        Ok(RefreshMode::Realtime {
            metrics,
            executions,
        })
    }

    /// Refresh after a write unless a push subscription will.
    fn refresh_after_write(&self) {
        if !self.is_realtime() {
            let _ = self.loader.load(true);
        }
    }

    // --- Mutations ---

    pub fn create_test_case(&self, input: NewTestCase) -> Result<TestCaseRecord> {
        let record = self
            .loader
            .service
            .create_test_case(&self.loader.scope, input)?;
        self.refresh_after_write();
        Ok(record)
    }

    pub fn update_test_case(&self, id: RecordId, patch: TestCasePatch) -> Result<TestCaseRecord> {
        let record = self
            .loader
            .service
            .update_test_case(&self.loader.scope, id, patch)?;
        self.refresh_after_write();
        Ok(record)
    }

    pub fn execute_test_case(&self, id: RecordId, input: NewExecution) -> Result<ExecutionRecord> {
        let execution = self
            .loader
            .service
            .execute_test_case(&self.loader.scope, id, input)?;
        self.refresh_after_write();
        Ok(execution)
    }

    pub fn track_generation(&self, input: NewGeneration) -> Result<AiGenerationRecord> {
        let record = self
            .loader
            .service
            .track_generation(&self.loader.scope, input)?;
        self.refresh_after_write();
        Ok(record)
    }

    pub fn track_recording(&self, id: RecordId) -> Result<TestCaseRecord> {
        let record = self
            .loader
            .service
            .track_recording(&self.loader.scope, id)?;
        self.refresh_after_write();
        Ok(record)
    }
}

impl Drop for MetricsDashboard {
    fn drop(&mut self) {
        self.shutdown();
    }
}
