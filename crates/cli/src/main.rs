//! Demo driver: sends every stdin line as a message through a loopback
//! connection, then prints the worker stats as JSON.

use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{info, warn};

use courier_core::{JobContext, LifecycleController, MessageId, MessageUri};
use courier_events::LoggingListener;
use courier_infra::{InMemoryJobStore, LoopbackConnection, MessageSendJob, RequestWorker, WorkerConfig};

const MESSAGES_BASE: &str = "content://courier/messages";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle controller that only logs; the demo exits on its own.
struct LoggingLifecycle;

impl LifecycleController for LoggingLifecycle {
    fn start_keep_alive(&self) {
        info!("keep-alive requested");
    }

    fn stop_if_idle(&self) {
        info!("worker idle; would stop");
    }

    fn fully_idle(&self) {
        info!("idle timeout; would hand over to push");
    }
}

fn main() -> anyhow::Result<()> {
    courier_observability::init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let peer = std::env::var("COURIER_PEER").unwrap_or_else(|_| "echo@localhost".to_string());

    let store = Arc::new(InMemoryJobStore::new());
    let conn = Arc::new(LoopbackConnection::new());
    let worker = RequestWorker::new(
        conn.clone(),
        Arc::new(LoggingLifecycle),
        JobContext::new(store.clone()),
        config,
    );
    worker.add_listener(Arc::new(LoggingListener::new()), false);
    worker.add_listener(Arc::new(LoggingListener::new()), true);
    worker.start().context("failed to start request worker")?;

    let mut submitted = 0u64;
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        submitted += 1;
        let uri = MessageUri::for_message(MESSAGES_BASE, MessageId::new(submitted));
        store.insert(uri.clone());
        worker
            .submit(Arc::new(MessageSendJob::new(uri, peer.as_str(), line)))
            .context("worker refused message")?;
    }

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while conn.sent_count() < submitted && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    if conn.sent_count() < submitted {
        warn!(submitted, sent = conn.sent_count(), "gave up waiting for the queue to drain");
    }

    let stats = worker.stats();
    worker.shutdown();
    worker.wait_terminated(Duration::from_secs(1));

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
