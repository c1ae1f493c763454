use crate::connection::Connection;
use crate::error::ExecutionError;
use crate::id::TransactionId;
use crate::job::RequestJob;

/// Observer of job lifecycle callbacks.
///
/// Every method has a no-op default so listeners implement only what they
/// care about. Callbacks run on the thread executing the job (the dispatch
/// thread or an async executor).
pub trait RequestListener: Send + Sync {
    fn starting(&self, _connection: &dyn Connection, _job: &dyn RequestJob) {}

    fn download_progress(&self, _connection: &dyn Connection, _job: &dyn RequestJob, _bytes: u64) {}

    fn upload_progress(&self, _connection: &dyn Connection, _job: &dyn RequestJob, _bytes: u64) {}

    fn done(&self, _connection: &dyn Connection, _job: &dyn RequestJob, _tx: &TransactionId) {}

    /// Returns the requeue vote for the failed job.
    fn error(
        &self,
        _connection: &dyn Connection,
        _job: &dyn RequestJob,
        _error: &ExecutionError,
    ) -> bool {
        false
    }
}
