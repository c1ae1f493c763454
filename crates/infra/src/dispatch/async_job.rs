//! Detached executors for async jobs.
//!
//! Each async job gets its own thread. The executor keeps only a `Weak` to
//! the worker: if the worker is dropped mid-run, the job still finishes but
//! the exit bookkeeping is skipped.

use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use tracing::debug;

use courier_core::{
    Connection, ExecutionError, ExecutionHandle, JobContext, MessageId, RequestJob, RequestListener,
    TransactionId,
};
use courier_events::ListenerRegistry;

use super::worker::{WorkerShared, lock};

pub(crate) struct AsyncExecutor {
    pub(crate) worker: Weak<WorkerShared>,
    pub(crate) job: Arc<dyn RequestJob>,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) context: JobContext,
    pub(crate) handle: ExecutionHandle,
    /// Key in the worker's async job list.
    pub(crate) ticket: u64,
    /// In-flight entry owned by this run, if any.
    pub(crate) claimed: Option<MessageId>,
    /// Job listener registered for this run only.
    pub(crate) custom: Option<Arc<dyn RequestListener>>,
}

impl AsyncExecutor {
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(self.handle.name().to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        if self.worker.strong_count() == 0 {
            debug!(executor = self.handle.name(), "worker gone before async job started");
            return;
        }

        match self.execute() {
            Ok(tx) => {
                debug!(job_id = %self.job.id(), tx = %tx, "async job done");
                if let Some(worker) = self.worker.upgrade() {
                    worker.record_success();
                }
            }
            Err(err) => self.fail(err),
        }
        self.finish();
    }

    fn execute(&self) -> Result<TransactionId, ExecutionError> {
        self.handle.check()?;
        let listener: &dyn RequestListener = self.listeners.as_ref();
        let connection = self.connection.as_ref();
        let job = self.job.as_ref();

        listener.starting(connection, job);
        let tx = job.execute(connection, listener, &self.context)?;
        job.done();
        listener.done(connection, job, &tx);
        Ok(tx)
    }

    fn fail(&self, err: ExecutionError) {
        if self.handle.is_canceled() {
            debug!(executor = self.handle.name(), "async job canceled");
            return;
        }
        match self.worker.upgrade() {
            Some(worker) => {
                worker.handle_failure(self.connection.as_ref(), &self.job, &self.listeners, err)
            }
            None => debug!(executor = self.handle.name(), error = %err, "worker gone; async failure ignored"),
        }
    }

    fn finish(&self) {
        if let Some(worker) = self.worker.upgrade() {
            worker.finish_async(self.ticket, self.claimed, self.custom.as_ref());
        }
    }
}

#[derive(Debug, Default)]
struct AsyncJobsInner {
    next_ticket: u64,
    handles: Vec<(u64, ExecutionHandle)>,
}

/// Live async executors, by ticket.
#[derive(Debug, Default)]
pub(crate) struct AsyncJobs {
    inner: Mutex<AsyncJobsInner>,
}

impl AsyncJobs {
    pub(crate) fn insert(&self, handle: ExecutionHandle) -> u64 {
        let mut inner = lock(&self.inner);
        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        inner.handles.push((ticket, handle));
        ticket
    }

    pub(crate) fn remove(&self, ticket: u64) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.handles.len();
        inner.handles.retain(|(t, _)| *t != ticket);
        inner.handles.len() != before
    }

    /// Take every handle, leaving the list empty.
    pub(crate) fn drain(&self) -> Vec<ExecutionHandle> {
        lock(&self.inner)
            .handles
            .drain(..)
            .map(|(_, handle)| handle)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).handles.len()
    }
}
