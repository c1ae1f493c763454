//! Fan-out listener registry.
//!
//! The registry is the dispatcher's single listener: the worker talks to one
//! `ListenerRegistry` and the registry forwards every callback to the
//! listeners registered at that moment, in insertion order.
//!
//! ## Concurrency
//!
//! Mutation and snapshotting are serialized by an internal mutex. Callbacks
//! run on a snapshot taken under that mutex, so a listener may register or
//! unregister listeners from inside a callback without deadlocking. A
//! listener removed while a broadcast is underway may still receive that one
//! broadcast.
//!
//! ## Requeue vote
//!
//! `error` is delivered to *every* listener (no short circuit) and the
//! result is the OR of all votes.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use courier_core::{Connection, ExecutionError, RequestJob, RequestListener, TransactionId};

/// Ordered set of listeners (no duplicates by pointer identity).
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn RequestListener>>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

fn same_listener(a: &Arc<dyn RequestListener>, b: &Arc<dyn RequestListener>) -> bool {
    // Compare data pointers only; vtable pointers are not stable across codegen units.
    core::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn RequestListener>>> {
        // A panicking listener must not take the whole registry down.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a listener; returns `false` if it was already registered.
    pub fn add(&self, listener: Arc<dyn RequestListener>) -> bool {
        let mut listeners = self.lock();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister a listener; returns `false` if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn RequestListener>) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn contains(&self, listener: &Arc<dyn RequestListener>) -> bool {
        self.lock().iter().any(|l| same_listener(l, listener))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn RequestListener>> {
        self.lock().clone()
    }
}

impl RequestListener for ListenerRegistry {
    fn starting(&self, connection: &dyn Connection, job: &dyn RequestJob) {
        for l in self.snapshot() {
            l.starting(connection, job);
        }
    }

    fn download_progress(&self, connection: &dyn Connection, job: &dyn RequestJob, bytes: u64) {
        for l in self.snapshot() {
            l.download_progress(connection, job, bytes);
        }
    }

    fn upload_progress(&self, connection: &dyn Connection, job: &dyn RequestJob, bytes: u64) {
        for l in self.snapshot() {
            l.upload_progress(connection, job, bytes);
        }
    }

    fn done(&self, connection: &dyn Connection, job: &dyn RequestJob, tx: &TransactionId) {
        for l in self.snapshot() {
            l.done(connection, job, tx);
        }
    }

    fn error(
        &self,
        connection: &dyn Connection,
        job: &dyn RequestJob,
        error: &ExecutionError,
    ) -> bool {
        self.snapshot()
            .iter()
            .fold(false, |requeue, l| l.error(connection, job, error) | requeue)
    }
}
