use std::fmt;
use std::sync::Arc;

use courier_core::{
    Connection, ExecutionError, JobContext, JobId, Request, RequestJob, RequestListener,
    TransactionId,
};

/// A plain request: a kind and a JSON payload sent as-is.
///
/// Used for everything that is not a message send (receipts, presence,
/// key lookups). Never deduplicated.
pub struct PayloadJob {
    id: JobId,
    kind: String,
    payload: serde_json::Value,
    is_async: bool,
    listener: Option<Arc<dyn RequestListener>>,
}

impl fmt::Debug for PayloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadJob")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("is_async", &self.is_async)
            .finish_non_exhaustive()
    }
}

impl PayloadJob {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            kind: kind.into(),
            payload,
            is_async: false,
            listener: None,
        }
    }

    pub fn asynchronous(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RequestListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl RequestJob for PayloadJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    fn execute(
        &self,
        connection: &dyn Connection,
        _listener: &dyn RequestListener,
        ctx: &JobContext,
    ) -> Result<TransactionId, ExecutionError> {
        let request = Request::new(self.id, self.kind.clone(), self.payload.clone());
        connection.execute(&request, ctx)
    }

    fn done(&self) {}

    fn listener(&self) -> Option<Arc<dyn RequestListener>> {
        self.listener.clone()
    }
}
