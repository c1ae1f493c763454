//! Set of message ids currently being sent.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use courier_core::MessageId;

/// Outcome of [`InFlightSet::try_claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Inserted; the caller owns the entry and must release it.
    Claimed,
    /// Already in flight, but the job carries an attachment and may proceed.
    /// Nothing was inserted, so nothing must be released.
    Override,
    /// Already in flight; drop the job.
    Duplicate,
}


#[derive(Debug, Default)]
pub struct InFlightSet {
    ids: Mutex<HashSet<MessageId>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<MessageId>> {
        self.ids.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn try_claim(&self, id: MessageId, attachment_override: bool) -> Claim {
        let mut ids = self.lock();
        if ids.insert(id) {
            Claim::Claimed
        } else if attachment_override {
            Claim::Override
        } else {
            Claim::Duplicate
        }
    }

    /// Returns `false` if the id was not in flight.
    pub fn release(&self, id: MessageId) -> bool {
        self.lock().remove(&id)
    }
}
