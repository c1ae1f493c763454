//! Pending queue bridge.
//!
//! Producers that run before any worker exists park their jobs here. The
//! next worker to prepare its loop replays them, in order, exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use courier_core::RequestJob;

/// Cheaply cloneable handle to an ordered job queue.
#[derive(Clone, Default)]
pub struct PendingQueue {
    jobs: Arc<Mutex<VecDeque<Arc<dyn RequestJob>>>>,
}

impl fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQueue")
            .field("len", &self.len())
            .finish()
    }
}

static GLOBAL: OnceLock<PendingQueue> = OnceLock::new();

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide queue used by workers that were not given their own.
    pub fn global() -> &'static PendingQueue {
        GLOBAL.get_or_init(PendingQueue::new)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<dyn RequestJob>>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, job: Arc<dyn RequestJob>) {
        self.lock().push_back(job);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Hand every queued job to `f` in order, then clear the queue.
    ///
    /// The lock is held for the whole drain, so a concurrent `push` lands
    /// either before (and is drained) or after (and stays queued).
    pub fn drain_into<F>(&self, f: F) -> usize
    where
        F: FnMut(Arc<dyn RequestJob>),
    {
        self.drain_then(f, || {})
    }

    /// Like [`drain_into`](Self::drain_into), then runs `after` while the
    /// lock is still held.
    pub(crate) fn drain_then<F, A>(&self, f: F, after: A) -> usize
    where
        F: FnMut(Arc<dyn RequestJob>),
        A: FnOnce(),
    {
        let mut jobs = self.lock();
        let drained = jobs.len();
        jobs.drain(..).for_each(f);
        after();
        drained
    }
}
