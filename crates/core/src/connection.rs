//! Connection seam (the persistent session every request goes through).

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::context::JobContext;
use crate::endpoint::Endpoint;
use crate::error::ExecutionError;
use crate::id::{JobId, TransactionId};

/// Opaque request body built by a job and handed to the connection.
///
/// Encoding onto the wire is the connection's business; the dispatcher only
/// moves these around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub job_id: JobId,
    /// Routing hint for the transport, e.g. `message.send`.
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Request {
    pub fn new(job_id: JobId, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_id,
            kind: kind.into(),
            payload,
        }
    }
}

/// The single persistent connection shared by all jobs of a worker.
///
/// Implementations own reconnection; the dispatcher only asks whether the
/// session is usable and serializes synchronous sends through
/// [`Connection::execution_lock`].
pub trait Connection: Send + Sync {
    /// Whether the session is established and ready to carry requests.
    fn is_connected(&self) -> bool;

    /// Send a request and wait for its transaction id.
    fn execute(&self, request: &Request, ctx: &JobContext) -> Result<TransactionId, ExecutionError>;

    /// Lock held by the dispatcher for the whole synchronous
    /// execute + callbacks + cleanup sequence.
    fn execution_lock(&self) -> &Mutex<()>;

    /// Open the session. Called once from the worker thread before it
    /// starts processing messages.
    fn start(&self) {}

    /// Close the session for good.
    fn shutdown(&self);

    /// Switch to another server for the next (re)connection.
    fn set_endpoint(&self, endpoint: Endpoint);
}
