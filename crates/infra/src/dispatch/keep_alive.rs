//! Keep-alive reference count.
//!
//! While the count is above zero the worker must not schedule its idle
//! timer. Async executors `hold` for their whole lifetime; outer code may
//! hold too (e.g. while a UI is attached).

use std::sync::atomic::{AtomicUsize, Ordering};

/// Non-negative atomic counter. Releasing at zero is a no-op.
#[derive(Debug, Default)]
pub struct KeepAlive {
    count: AtomicUsize,
}

impl KeepAlive {
    pub fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// Increment and return the new count.
    pub fn hold(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement (clamped at zero) and return the new count.
    pub fn release(&self) -> usize {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_sub(1))
            })
            .unwrap_or_default();
        previous.saturating_sub(1)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_held(&self) -> bool {
        self.count() > 0
    }
}
