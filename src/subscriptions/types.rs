//! Subscription types for live metric feeds.

use crate::error::MetricsError;
use crate::store::{ListenerId, RecordStore};
use crate::types::Scope;
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::info;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// What a subscription delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Full metric snapshots, recomputed on every test case or generation write.
    Metrics,
    /// The most recent executions, newest first.
    Executions,
}

/// Called with each fresh value.
pub type UpdateCallback<T> = Box<dyn FnMut(T) + Send>;

/// Called with store and computation errors. Errors never end a subscription.
pub type ErrorCallback = Box<dyn FnMut(MetricsError) + Send>;

/// State shared between a handle and its worker.
pub(crate) struct DeliveryGuard {
    active: AtomicBool,
    /// Held while a callback runs, so disposal can wait it out.
    delivering: Mutex<()>,
}

impl DeliveryGuard {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            delivering: Mutex::new(()),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run `deliver` unless the subscription was disposed. Returns whether it ran.
    pub(crate) fn deliver<F: FnOnce()>(&self, deliver: F) -> bool {
        let _delivering = self.delivering.lock();
        if !self.is_active() {
            return false;
        }
        deliver();
        true
    }

    /// Mark inactive. Returns false if already inactive.
    fn deactivate(&self, wait_for_delivery: bool) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        if wait_for_delivery {
            drop(self.delivering.lock());
        }
        true
    }
}

/// Bookkeeping shared by a manager and all of its handles.
#[derive(Default)]
pub(crate) struct Registry {
    active: RwLock<HashMap<SubscriptionId, (Scope, FeedKind)>>,
    gates: Mutex<HashMap<Scope, Arc<Mutex<()>>>>,
}

impl Registry {
    pub(crate) fn insert(&self, id: SubscriptionId, scope: Scope, kind: FeedKind) {
        self.active.write().insert(id, (scope, kind));
    }

    pub(crate) fn remove(&self, id: SubscriptionId) {
        self.active.write().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.active.read().len()
    }

    pub(crate) fn count_for(&self, scope: &Scope) -> usize {
        self.active.read().values().filter(|(s, _)| s == scope).count()
    }

    /// Lock serializing recomputes of one scope.
    ///
    /// Callers hand it back with [`release_gate`](Self::release_gate) once
    /// they drop their clone.
    pub(crate) fn gate(&self, scope: &Scope) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the scope's gate if nothing but the registry holds it.
    pub(crate) fn release_gate(&self, scope: &Scope) {
        let mut gates = self.gates.lock();
        if gates
            .get(scope)
            .map_or(false, |gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(scope);
        }
    }

    #[cfg(test)]
    pub(crate) fn gate_count(&self) -> usize {
        self.gates.lock().len()
    }
}

/// Handle to a live subscription.
///
/// [`dispose`](Self::dispose) stops delivery immediately and releases the
/// store listener. Dropping the handle disposes it too.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub scope: Scope,
    pub kind: FeedKind,
    pub(crate) guard: Arc<DeliveryGuard>,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) listener_id: ListenerId,
    pub(crate) stop: Mutex<Option<Sender<()>>>,
    pub(crate) worker_thread: ThreadId,
    pub(crate) registry: Arc<Registry>,
}

impl SubscriptionHandle {
    /// Stop delivery and release the store listener.
    ///
    /// After this returns no callback of this subscription runs again. A
    /// callback already running on another thread is waited for; calling
    /// this from inside a callback is allowed. Repeated calls are no-ops.
    pub fn dispose(&self) {
        let on_worker = thread::current().id() == self.worker_thread;
        if !self.guard.deactivate(!on_worker) {
            return;
        }

        self.store.unsubscribe(self.listener_id);
        // Disconnecting the stop channel wakes the worker.
        drop(self.stop.lock().take());
        self.registry.remove(self.id);

        info!(id = self.id.0, scope = %self.scope, kind = ?self.kind, "subscription disposed");
    }

    pub fn is_active(&self) -> bool {
        self.guard.is_active()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}
