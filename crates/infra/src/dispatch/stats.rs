use chrono::{DateTime, Utc};
use serde::Serialize;

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Jobs admitted past the in-flight check and actually run.
    pub jobs_dispatched: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_requeued: u64,
    pub dropped_interrupted: u64,
    pub dropped_disconnected: u64,
    pub dropped_canceled: u64,
    pub dropped_duplicate: u64,
    /// Async executors alive at snapshot time.
    pub async_running: usize,
    /// When the loop finished preparing.
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkerStats {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_interrupted
            + self.dropped_disconnected
            + self.dropped_canceled
            + self.dropped_duplicate
    }
}

/// Why a job was discarded without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropReason {
    Interrupted,
    Disconnected,
    Canceled,
    Duplicate,
}

impl WorkerStats {
    pub(crate) fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::Interrupted => self.dropped_interrupted += 1,
            DropReason::Disconnected => self.dropped_disconnected += 1,
            DropReason::Canceled => self.dropped_canceled += 1,
            DropReason::Duplicate => self.dropped_duplicate += 1,
        }
    }
}
