//! Message-send job.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::json;
use tracing::trace;

use courier_core::{
    Connection, ExecutionError, ExecutionHandle, JobContext, JobId, MessageRef, MessageUri, Request,
    RequestJob, RequestListener, TransactionId,
};

pub const MESSAGE_SEND_KIND: &str = "message.send";

/// Attachment uploaded ahead of the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub mime: String,
    pub size: u64,
}

/// Sends one stored message to a peer.
///
/// Canceled as soon as the message disappears from the store. Jobs with an
/// attachment run asynchronously by default, since the upload may take a
/// while and can be interrupted through the attached [`ExecutionHandle`].
pub struct MessageSendJob {
    id: JobId,
    uri: MessageUri,
    peer: String,
    body: String,
    attachment: Option<Attachment>,
    is_async: bool,
    listener: Option<Arc<dyn RequestListener>>,
    /// Handle of the current async run; replaced by every retry.
    execution: RwLock<Option<ExecutionHandle>>,
    done: AtomicBool,
}

impl fmt::Debug for MessageSendJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSendJob")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("peer", &self.peer)
            .field("attachment", &self.attachment)
            .field("is_async", &self.is_async)
            .finish_non_exhaustive()
    }
}

impl MessageSendJob {
    pub fn new(uri: MessageUri, peer: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            uri,
            peer: peer.into(),
            body: body.into(),
            attachment: None,
            is_async: false,
            listener: None,
            execution: RwLock::new(None),
            done: AtomicBool::new(false),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self.is_async = true;
        self
    }

    pub fn asynchronous(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RequestListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn uri(&self) -> &MessageUri {
        &self.uri
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Handle of the latest async run, once the worker attached one.
    pub fn execution(&self) -> Option<ExecutionHandle> {
        self.execution
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_canceled(&self) -> Result<(), ExecutionError> {
        match self.execution() {
            Some(handle) => handle.check(),
            None => Ok(()),
        }
    }

    fn request(&self) -> Request {
        let attachment = self.attachment.as_ref().map(|a| {
            json!({ "id": a.id, "mime": a.mime, "size": a.size })
        });
        Request::new(
            self.id,
            MESSAGE_SEND_KIND,
            json!({
                "uri": self.uri.as_str(),
                "to": self.peer,
                "body": self.body,
                "attachment": attachment,
            }),
        )
    }
}

impl RequestJob for MessageSendJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    fn is_canceled(&self, ctx: &JobContext) -> bool {
        !ctx.store().message_exists(&self.uri)
    }

    fn execute(
        &self,
        connection: &dyn Connection,
        listener: &dyn RequestListener,
        ctx: &JobContext,
    ) -> Result<TransactionId, ExecutionError> {
        self.check_canceled()?;
        if let Some(attachment) = &self.attachment {
            trace!(job_id = %self.id, attachment = %attachment.id, "uploading attachment");
            listener.upload_progress(connection, self, attachment.size);
            self.check_canceled()?;
        }
        connection.execute(&self.request(), ctx)
    }

    fn done(&self) {
        self.done.store(true, Ordering::Release);
    }

    fn listener(&self) -> Option<Arc<dyn RequestListener>> {
        self.listener.clone()
    }

    fn attach_execution(&self, handle: ExecutionHandle) {
        *self.execution.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn message(&self) -> Option<MessageRef> {
        let message = MessageRef::new(self.uri.clone());
        Some(match &self.attachment {
            Some(a) => message.with_attachment(a.id.clone()),
            None => message,
        })
    }
}
