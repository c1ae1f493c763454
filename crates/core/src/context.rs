//! Execution context handed to jobs.

use std::fmt;
use std::sync::Arc;

use crate::id::MessageUri;

/// Persistent job store, as seen by the dispatcher.
///
/// Only the cancellation lookup is needed here: a message-send job is
/// canceled once its stored message is gone.
pub trait JobStore: Send + Sync {
    fn message_exists(&self, uri: &MessageUri) -> bool;
}

/// Shared context passed to `is_canceled` and `execute`.
#[derive(Clone)]
pub struct JobContext {
    store: Arc<dyn JobStore>,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("store", &"<dyn JobStore>")
            .finish()
    }
}

impl JobContext {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }
}
