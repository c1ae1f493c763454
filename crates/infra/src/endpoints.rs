//! Round-robin endpoint rotation.

use std::sync::atomic::{AtomicUsize, Ordering};

use courier_core::Endpoint;

/// Cycles through the configured endpoints. The first call to
/// [`next`](Self::next) yields the first endpoint.
#[derive(Debug, Default)]
pub struct EndpointRotation {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
}

impl EndpointRotation {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    /// `None` when no endpoints are configured.
    pub fn next(&self) -> Option<Endpoint> {
        if self.endpoints.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        Some(self.endpoints[i].clone())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
