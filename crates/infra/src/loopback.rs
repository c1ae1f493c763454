//! Connection that answers every request locally.
//!
//! Stands in for the network client in the demo driver and benchmarks:
//! requests are recorded and acknowledged with a sequential transaction id.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use courier_core::{Connection, Endpoint, ExecutionError, JobContext, Request, TransactionId};

#[derive(Debug, Default)]
pub struct LoopbackConnection {
    connected: AtomicBool,
    started: AtomicBool,
    execution_lock: Mutex<()>,
    endpoint: Mutex<Option<Endpoint>>,
    sent: Mutex<Vec<Request>>,
    next_tx: AtomicU64,
    latency: Duration,
    record: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl LoopbackConnection {
    /// A connected loopback that records every request.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            record: true,
            ..Self::default()
        }
    }

    /// Sleep this long inside every `execute`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Stop keeping a copy of sent requests (long-running benchmarks).
    pub fn without_recording(mut self) -> Self {
        self.record = false;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        lock(&self.endpoint).clone()
    }

    pub fn sent(&self) -> Vec<Request> {
        lock(&self.sent).clone()
    }

    pub fn sent_count(&self) -> u64 {
        self.next_tx.load(Ordering::Acquire)
    }
}

impl Connection for LoopbackConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn execute(&self, request: &Request, _ctx: &JobContext) -> Result<TransactionId, ExecutionError> {
        if !self.is_connected() {
            return Err(ExecutionError::Disconnected);
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.record {
            lock(&self.sent).push(request.clone());
        }
        let n = self.next_tx.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(TransactionId::new(format!("loopback-{n}")))
    }

    fn execution_lock(&self) -> &Mutex<()> {
        &self.execution_lock
    }

    fn start(&self) {
        self.started.store(true, Ordering::Release);
        info!(endpoint = ?self.endpoint(), "loopback connection started");
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        debug!(sent = self.sent_count(), "loopback connection shut down");
    }

    fn set_endpoint(&self, endpoint: Endpoint) {
        *lock(&self.endpoint) = Some(endpoint);
    }
}
