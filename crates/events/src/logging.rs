//! Listener that mirrors lifecycle callbacks into `tracing`.

use tracing::{debug, trace, warn};

use courier_core::{Connection, ExecutionError, RequestJob, RequestListener, TransactionId};

/// Emits one `tracing` event per callback.
///
/// Votes according to `requeue_on_error`, so it can double as the default
/// retry policy for a worker (`always` = unbounded retry, `never` = drop).
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener {
    requeue_on_error: bool,
}

impl LoggingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requeue_on_error(mut self, requeue: bool) -> Self {
        self.requeue_on_error = requeue;
        self
    }
}

impl RequestListener for LoggingListener {
    fn starting(&self, _connection: &dyn Connection, job: &dyn RequestJob) {
        debug!(job_id = %job.id(), is_async = job.is_async(), "job starting");
    }

    fn download_progress(&self, _connection: &dyn Connection, job: &dyn RequestJob, bytes: u64) {
        trace!(job_id = %job.id(), bytes, "download progress");
    }

    fn upload_progress(&self, _connection: &dyn Connection, job: &dyn RequestJob, bytes: u64) {
        trace!(job_id = %job.id(), bytes, "upload progress");
    }

    fn done(&self, _connection: &dyn Connection, job: &dyn RequestJob, tx: &TransactionId) {
        debug!(job_id = %job.id(), tx = %tx, "job done");
    }

    fn error(&self, _connection: &dyn Connection, job: &dyn RequestJob, error: &ExecutionError) -> bool {
        warn!(
            job_id = %job.id(),
            error = %error,
            requeue = self.requeue_on_error,
            "job failed"
        );
        self.requeue_on_error
    }
}
