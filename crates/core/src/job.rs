//! Job contract.
//!
//! A job is the unit producers hand to the worker. It knows how to turn
//! itself into a [`Request`](crate::Request) and run it on the connection;
//! the worker decides *when* and *where* (inline on the dispatch thread, or on
//! a detached executor for async jobs).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::Connection;
use crate::context::JobContext;
use crate::error::ExecutionError;
use crate::id::{JobId, MessageUri, TransactionId};
use crate::listener::RequestListener;

/// Marks a job as the message-send variant and carries its dedup data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub uri: MessageUri,
    /// Attachment id. When present the job may be sent again while the same
    /// message is already in flight (the attachment is delivered separately).
    pub attachment: Option<String>,
}

impl MessageRef {
    pub fn new(uri: MessageUri) -> Self {
        Self {
            uri,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }

    pub fn allows_resend(&self) -> bool {
        self.attachment.is_some()
    }
}

/// Cooperative cancellation token for a detached executor.
///
/// Cloning shares the flag. Jobs that run long (uploads) should poll
/// [`ExecutionHandle::is_canceled`] and bail out with
/// [`ExecutionError::Interrupted`].
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    name: Arc<str>,
    canceled: Arc<AtomicBool>,
}

impl ExecutionHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// `Err(Interrupted)` once canceled; handy with `?` inside `execute`.
    pub fn check(&self) -> Result<(), ExecutionError> {
        if self.is_canceled() {
            Err(ExecutionError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// A unit of outgoing work.
pub trait RequestJob: Send + Sync + fmt::Debug {
    fn id(&self) -> JobId;

    /// Async jobs run on their own executor instead of the dispatch thread.
    fn is_async(&self) -> bool {
        false
    }

    /// Checked on every dispatch; canceled jobs are dropped silently.
    fn is_canceled(&self, _ctx: &JobContext) -> bool {
        false
    }

    /// Run the job. `listener` receives progress callbacks.
    fn execute(
        &self,
        connection: &dyn Connection,
        listener: &dyn RequestListener,
        ctx: &JobContext,
    ) -> Result<TransactionId, ExecutionError>;

    /// Finalize after a successful execution. Must be idempotent.
    fn done(&self);

    /// Listener registered only for the duration of this job's execution.
    fn listener(&self) -> Option<Arc<dyn RequestListener>> {
        None
    }

    /// Receives the executor handle of each async run. A retried job gets a
    /// fresh handle and must observe that one.
    fn attach_execution(&self, _handle: ExecutionHandle) {}

    /// `Some` for message-send jobs (subject to in-flight dedup).
    fn message(&self) -> Option<MessageRef> {
        None
    }
}
