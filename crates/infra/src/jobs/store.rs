//! In-memory message store.

use std::collections::HashSet;
use std::sync::RwLock;

use courier_core::{JobStore, MessageUri};

/// Set of stored message URIs.
///
/// Removing a message cancels any send job that still refers to it.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    messages: RwLock<HashSet<MessageUri>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: MessageUri) -> bool {
        self.messages
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(uri)
    }

    pub fn remove(&self, uri: &MessageUri) -> bool {
        self.messages
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(uri)
    }

    pub fn len(&self) -> usize {
        self.messages.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for InMemoryJobStore {
    fn message_exists(&self, uri: &MessageUri) -> bool {
        self.messages
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains(uri)
    }
}
