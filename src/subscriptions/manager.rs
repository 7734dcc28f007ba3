//! Subscription manager running one worker per live feed.

use crate::error::{MetricsError, Result};
use crate::metrics::MetricsSnapshot;
use crate::service::MetricsService;
use crate::store::{Collection, StoreEvent};
use crate::types::{ExecutionRecord, Scope};
use crossbeam_channel::{bounded, select, Receiver};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use super::types::{
    DeliveryGuard, ErrorCallback, FeedKind, Registry, SubscriptionHandle, SubscriptionId,
    UpdateCallback,
};

/// Collections whose writes change a metrics snapshot.
const METRICS_COLLECTIONS: [Collection; 2] = [Collection::TestCases, Collection::Generations];

/// Opens push subscriptions and keeps their results fresh.
///
/// Each subscription owns one store listener and one worker thread. The
/// worker handles change events one at a time, folding events that queued
/// up during a recompute into a single follow-up recompute, so a delivered
/// value always reflects the latest change seen. Recomputes of the same
/// scope never overlap, even across subscriptions.
pub struct SubscriptionManager {
    service: Arc<MetricsService>,
    registry: Arc<Registry>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(service: Arc<MetricsService>) -> Self {
        Self {
            service,
            registry: Arc::new(Registry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn service(&self) -> &Arc<MetricsService> {
        &self.service
    }

    /// Deliver a fresh snapshot after every test case or generation write in `scope`.
    ///
    /// Each change invalidates the scope's cached aggregates and recomputes
    /// the snapshot from the store before calling `on_update`.
    pub fn subscribe_metrics<U, E>(
        &self,
        scope: &Scope,
        on_update: U,
        on_error: E,
    ) -> Result<SubscriptionHandle>
    where
        U: FnMut(MetricsSnapshot) + Send + 'static,
        E: FnMut(MetricsError) + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let target = scope.clone();
        self.spawn_feed(
            scope,
            FeedKind::Metrics,
            &METRICS_COLLECTIONS,
            move || service.recompute_after_change(&target),
            Box::new(on_update),
            Box::new(on_error),
        )
    }

    /// Deliver the most recent executions in `scope` after every execution write.
    pub fn subscribe_executions<U, E>(
        &self,
        scope: &Scope,
        on_update: U,
        on_error: E,
    ) -> Result<SubscriptionHandle>
    where
        U: FnMut(Vec<ExecutionRecord>) + Send + 'static,
        E: FnMut(MetricsError) + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let target = scope.clone();
        self.spawn_feed(
            scope,
            FeedKind::Executions,
            &[Collection::Executions],
            move || service.recent_executions(&target),
            Box::new(on_update),
            Box::new(on_error),
        )
    }

    /// Number of subscriptions not yet disposed.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of live subscriptions for one scope.
    pub fn active_count_for(&self, scope: &Scope) -> usize {
        self.registry.count_for(scope)
    }

    /// Run `compute` while holding the scope's recompute gate.
    ///
    /// Feeds of the same scope never recompute while it runs.
    pub(crate) fn serialized<T>(&self, scope: &Scope, compute: impl FnOnce() -> T) -> T {
        let gate = self.registry.gate(scope);
        let result = {
            let _serialized = gate.lock();
            compute()
        };
        drop(gate);
        self.registry.release_gate(scope);
        result
    }

    fn spawn_feed<T, C>(
        &self,
        scope: &Scope,
        kind: FeedKind,
        collections: &[Collection],
        compute: C,
        on_update: UpdateCallback<T>,
        on_error: ErrorCallback,
    ) -> Result<SubscriptionHandle>
    where
        T: Send + 'static,
        C: Fn() -> Result<T> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let store = Arc::clone(self.service.store());
        let listener = store.subscribe(scope, collections)?;
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let guard = Arc::new(DeliveryGuard::new());

        let worker = FeedWorker {
            id,
            scope: scope.clone(),
            events: listener.receiver,
            stop: stop_rx,
            gate: self.registry.gate(scope),
            registry: Arc::clone(&self.registry),
            guard: Arc::clone(&guard),
            compute,
            on_update,
            on_error,
        };

        let spawned = thread::Builder::new()
            .name(format!("metrics-feed-{}", id.0))
            .spawn(move || worker.run());
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                store.unsubscribe(listener.id);
                self.registry.release_gate(scope);
                return Err(MetricsError::Computation(format!(
                    "failed to start subscription worker: {}",
                    e
                )));
            }
        };

        self.registry.insert(id, scope.clone(), kind);
        info!(id = id.0, scope = %scope, ?kind, "subscription opened");

        Ok(SubscriptionHandle {
            id,
            scope: scope.clone(),
            kind,
            guard,
            store,
            listener_id: listener.id,
            stop: Mutex::new(Some(stop_tx)),
            worker_thread: join.thread().id(),
            registry: Arc::clone(&self.registry),
        })
    }
}

/// Actor consuming one store listener.
struct FeedWorker<T, C> {
    id: SubscriptionId,
    scope: Scope,
    events: Receiver<StoreEvent>,
    stop: Receiver<()>,
    gate: Arc<Mutex<()>>,
    registry: Arc<Registry>,
    guard: Arc<DeliveryGuard>,
    compute: C,
    on_update: UpdateCallback<T>,
    on_error: ErrorCallback,
}

impl<T, C> FeedWorker<T, C>
where
    C: Fn() -> Result<T>,
{
    fn run(mut self) {
        loop {
            let first = select! {
                recv(self.stop) -> _ => None,
                // Err means the store released the listener.
                recv(self.events) -> event => event.ok(),
            };
            let Some(first) = first else {
                break;
            };

            // Fold everything that queued up meanwhile into one pass.
            let pending: Vec<StoreEvent> = std::iter::once(first)
                .chain(self.events.try_iter())
                .collect();
            let mut changed = false;
            for event in pending {
                match event {
                    StoreEvent::Changed { .. } => changed = true,
                    StoreEvent::Error { message } => {
                        self.report(MetricsError::StoreQuery(message));
                    }
                }
            }

            if !self.guard.is_active() {
                break;
            }
            if changed {
                self.recompute();
            }
        }

        let FeedWorker {
            id,
            scope,
            gate,
            registry,
            ..
        } = self;
        drop(gate);
        registry.release_gate(&scope);
        debug!(id = id.0, scope = %scope, "subscription worker stopped");
    }

    fn recompute(&mut self) {
        let gate = Arc::clone(&self.gate);
        let _serialized = gate.lock();
        if !self.guard.is_active() {
            return;
        }

        let compute = &self.compute;
        let result = panic::catch_unwind(AssertUnwindSafe(compute))
            .unwrap_or_else(|payload| Err(MetricsError::Computation(panic_message(payload))));

        match result {
            Ok(value) => {
                let on_update = &mut self.on_update;
                self.guard.deliver(|| on_update(value));
            }
            Err(e) => self.report(e),
        }
    }

    fn report(&mut self, error: MetricsError) {
        warn!(id = self.id.0, scope = %self.scope, error = %error, "subscription error");
        let on_error = &mut self.on_error;
        self.guard.deliver(|| on_error(error));
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("recompute panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("recompute panicked: {}", message)
    } else {
        "recompute panicked".to_string()
    }
}
