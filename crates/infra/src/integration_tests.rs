//! Integration tests for the request worker.
//!
//! Each test drives a real loop thread against a scripted connection and
//! recording listeners.
//!
//! Verifies:
//! - callback ordering, FIFO dispatch and requeue on a positive vote
//! - drop policy (interrupted, disconnected, canceled, duplicate)
//! - keep-alive balance and the idle timer
//! - pending queue replay, shutdown and endpoint rotation

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use serde_json::json;

    use courier_core::{
        Connection, Endpoint, ExecutionError, ExecutionHandle, JobContext, JobId, LifecycleController,
        MessageRef, MessageUri, Request, RequestJob, RequestListener, TransactionId,
    };

    use crate::config::WorkerConfig;
    use crate::dispatch::{RequestWorker, SubmitError};
    use crate::jobs::{Attachment, InMemoryJobStore, MessageSendJob, PayloadJob};
    use crate::pending::PendingQueue;

    const SETTLE: Duration = Duration::from_secs(3);

    // --- fixtures ----------------------------------------------------------

    #[derive(Default)]
    struct ScriptedConnection {
        connected: AtomicBool,
        started: AtomicBool,
        lock: Mutex<()>,
        executed: Mutex<Vec<JobId>>,
        failures_left: AtomicUsize,
        shutdowns: AtomicUsize,
        endpoints: Mutex<Vec<Endpoint>>,
    }

    impl ScriptedConnection {
        fn connected() -> Self {
            Self {
                connected: AtomicBool::new(true),
                ..Self::default()
            }
        }

        fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        fn fail_next(&self, n: usize) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        fn executed(&self) -> Vec<JobId> {
            self.executed.lock().unwrap().clone()
        }

        fn endpoints(&self) -> Vec<Endpoint> {
            self.endpoints.lock().unwrap().clone()
        }
    }

    impl Connection for ScriptedConnection {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn execute(&self, request: &Request, _ctx: &JobContext) -> Result<TransactionId, ExecutionError> {
            self.executed.lock().unwrap().push(request.job_id);
            let scripted_failure = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if scripted_failure {
                return Err(ExecutionError::io("scripted failure"));
            }
            Ok(TransactionId::new(format!("tx-{}", request.job_id)))
        }

        fn execution_lock(&self) -> &Mutex<()> {
            &self.lock
        }

        fn start(&self) {
            self.started.store(true, Ordering::SeqCst);
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.set_connected(false);
        }

        fn set_endpoint(&self, endpoint: Endpoint) {
            self.endpoints.lock().unwrap().push(endpoint);
        }
    }

    #[derive(Default)]
    struct RecordingLifecycle {
        keep_alive: AtomicUsize,
        stop_if_idle: AtomicUsize,
        fully_idle: AtomicUsize,
    }

    impl LifecycleController for RecordingLifecycle {
        fn start_keep_alive(&self) {
            self.keep_alive.fetch_add(1, Ordering::SeqCst);
        }

        fn stop_if_idle(&self) {
            self.stop_if_idle.fetch_add(1, Ordering::SeqCst);
        }

        fn fully_idle(&self) {
            self.fully_idle.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Journals `(job, event)` pairs and votes a fixed answer on errors.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(JobId, &'static str)>>,
        requeue: bool,
    }

    impl Recorder {
        fn voting(requeue: bool) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                requeue,
            })
        }

        fn push(&self, job: &dyn RequestJob, event: &'static str) {
            self.events.lock().unwrap().push((job.id(), event));
        }

        fn events_for(&self, id: JobId) -> Vec<&'static str> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(job, _)| *job == id)
                .map(|(_, e)| *e)
                .collect()
        }

        fn count(&self, event: &str) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, e)| *e == event)
                .count()
        }

        fn is_empty(&self) -> bool {
            self.events.lock().unwrap().is_empty()
        }
    }

    impl RequestListener for Recorder {
        fn starting(&self, _c: &dyn Connection, job: &dyn RequestJob) {
            self.push(job, "starting");
        }

        fn upload_progress(&self, _c: &dyn Connection, job: &dyn RequestJob, _bytes: u64) {
            self.push(job, "upload");
        }

        fn done(&self, _c: &dyn Connection, job: &dyn RequestJob, _tx: &TransactionId) {
            self.push(job, "done");
        }

        fn error(&self, _c: &dyn Connection, job: &dyn RequestJob, _e: &ExecutionError) -> bool {
            self.push(job, "error");
            self.requeue
        }
    }

    /// Async job that parks inside `execute` until its gate opens or its
    /// execution handle is canceled.
    #[derive(Debug)]
    struct BlockingJob {
        id: JobId,
        uri: Option<MessageUri>,
        gate: Mutex<mpsc::Receiver<()>>,
        handle: Mutex<Option<ExecutionHandle>>,
        entered: AtomicBool,
        saw_cancel: AtomicBool,
    }

    impl BlockingJob {
        fn new(uri: Option<MessageUri>) -> (Arc<Self>, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let job = Arc::new(Self {
                id: JobId::new(),
                uri,
                gate: Mutex::new(rx),
                handle: Mutex::new(None),
                entered: AtomicBool::new(false),
                saw_cancel: AtomicBool::new(false),
            });
            (job, tx)
        }
    }

    impl RequestJob for BlockingJob {
        fn id(&self) -> JobId {
            self.id
        }

        fn is_async(&self) -> bool {
            true
        }

        fn execute(
            &self,
            connection: &dyn Connection,
            _listener: &dyn RequestListener,
            ctx: &JobContext,
        ) -> Result<TransactionId, ExecutionError> {
            self.entered.store(true, Ordering::SeqCst);
            loop {
                if self.handle.lock().unwrap().as_ref().is_some_and(|h| h.is_canceled()) {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    return Err(ExecutionError::Interrupted);
                }
                match self.gate.lock().unwrap().recv_timeout(Duration::from_millis(5)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            connection.execute(&Request::new(self.id, "blocking", serde_json::Value::Null), ctx)
        }

        fn done(&self) {}

        fn attach_execution(&self, handle: ExecutionHandle) {
            *self.handle.lock().unwrap() = Some(handle);
        }

        fn message(&self) -> Option<MessageRef> {
            self.uri.clone().map(MessageRef::new)
        }
    }

    /// Votes to requeue, and parks inside the second upload until its gate
    /// opens.
    struct StallOnRetry {
        uploads: AtomicUsize,
        reached: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl RequestListener for StallOnRetry {
        fn upload_progress(&self, _c: &dyn Connection, _job: &dyn RequestJob, _bytes: u64) {
            if self.uploads.fetch_add(1, Ordering::SeqCst) == 1 {
                let _ = self.reached.lock().unwrap().send(());
                let _ = self.gate.lock().unwrap().recv_timeout(SETTLE);
            }
        }

        fn error(&self, _c: &dyn Connection, _job: &dyn RequestJob, _e: &ExecutionError) -> bool {
            true
        }
    }

    /// Journals lifecycle calls; `stop_if_idle` parks until its gate opens.
    struct StallingLifecycle {
        journal: Mutex<Vec<&'static str>>,
        stopping: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl LifecycleController for StallingLifecycle {
        fn start_keep_alive(&self) {
            self.journal.lock().unwrap().push("start_keep_alive");
        }

        fn stop_if_idle(&self) {
            let _ = self.stopping.lock().unwrap().send(());
            let _ = self.gate.lock().unwrap().recv_timeout(SETTLE);
            self.journal.lock().unwrap().push("stop_if_idle");
        }

        fn fully_idle(&self) {
            self.journal.lock().unwrap().push("fully_idle");
        }
    }

    struct Harness {
        worker: Arc<RequestWorker>,
        conn: Arc<ScriptedConnection>,
        lifecycle: Arc<RecordingLifecycle>,
        store: Arc<InMemoryJobStore>,
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default()
            .with_name("test-worker")
            .with_idle_timeout(Duration::from_millis(150))
            .with_retry_delay(Duration::from_millis(20))
            .with_submit_retry(20, Duration::from_millis(10))
    }

    fn harness_with(config: WorkerConfig, pending: PendingQueue) -> Harness {
        let conn = Arc::new(ScriptedConnection::connected());
        let lifecycle = Arc::new(RecordingLifecycle::default());
        let store = Arc::new(InMemoryJobStore::new());
        let worker = RequestWorker::new(
            conn.clone(),
            lifecycle.clone(),
            JobContext::new(store.clone()),
            config,
        )
        .with_pending_queue(pending);

        Harness {
            worker: Arc::new(worker),
            conn,
            lifecycle,
            store,
        }
    }

    fn started(config: WorkerConfig) -> Harness {
        let h = harness_with(config, PendingQueue::new());
        h.worker.start().unwrap();
        assert!(wait_until(SETTLE, || h.worker.is_running()), "worker never became ready");
        h
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn ping() -> Arc<PayloadJob> {
        Arc::new(PayloadJob::new("ping", json!({})))
    }

    fn uri(n: u64) -> MessageUri {
        MessageUri::new(format!("content://messages/{n}"))
    }

    // --- dispatch ----------------------------------------------------------

    #[test]
    fn sync_job_reports_starting_then_done() {
        let h = started(fast_config());
        let recorder = Recorder::voting(false);
        h.worker.add_listener(recorder.clone(), false);

        let job = ping();
        let id = job.id();
        h.worker.submit(job).unwrap();

        assert!(wait_until(SETTLE, || recorder.events_for(id).len() == 2));
        assert_eq!(recorder.events_for(id), ["starting", "done"]);

        let stats = h.worker.stats();
        assert_eq!(stats.jobs_dispatched, 1);
        assert_eq!(stats.jobs_succeeded, 1);
        assert!(stats.started_at.is_some());
        assert!(h.conn.started.load(Ordering::SeqCst));
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let h = started(fast_config());
        let jobs: Vec<_> = (0..20).map(|_| ping()).collect();
        for job in &jobs {
            h.worker.submit(job.clone()).unwrap();
        }

        assert!(wait_until(SETTLE, || h.conn.executed().len() == 20));
        let expected: Vec<_> = jobs.iter().map(|j| j.id()).collect();
        assert_eq!(h.conn.executed(), expected);
    }

    #[test]
    fn delayed_submit_runs_after_immediate_one() {
        let h = started(fast_config());
        let late = ping();
        let early = ping();
        h.worker.submit_after(late.clone(), Duration::from_millis(80)).unwrap();
        h.worker.submit(early.clone()).unwrap();

        assert!(wait_until(SETTLE, || h.conn.executed().len() == 2));
        assert_eq!(h.conn.executed(), [early.id(), late.id()]);
    }

    #[test]
    fn disconnected_jobs_are_discarded_not_retried() {
        let h = started(fast_config());
        let recorder = Recorder::voting(true);
        h.worker.add_listener(recorder.clone(), false);
        h.conn.set_connected(false);

        h.worker.submit(ping()).unwrap();
        assert!(wait_until(SETTLE, || h.worker.stats().dropped_disconnected == 1));

        h.conn.set_connected(true);
        thread::sleep(Duration::from_millis(150));

        assert!(h.conn.executed().is_empty());
        assert!(recorder.is_empty());
        assert_eq!(h.worker.stats().jobs_dispatched, 0);
    }

    #[test]
    fn canceled_message_is_dropped_without_callbacks() {
        let h = started(fast_config());
        let recorder = Recorder::voting(false);
        h.worker.add_listener(recorder.clone(), false);

        // never stored, so already canceled
        let job = Arc::new(MessageSendJob::new(uri(41), "alice@example.net", "hi"));
        h.worker.submit(job).unwrap();

        assert!(wait_until(SETTLE, || h.worker.stats().dropped_canceled == 1));
        assert!(recorder.is_empty());
        assert!(h.conn.executed().is_empty());
    }

    #[test]
    fn failure_vote_requeues_until_success() {
        let h = started(fast_config());
        let recorder = Recorder::voting(true);
        h.worker.add_listener(recorder.clone(), false);
        h.conn.fail_next(3);

        let job = ping();
        let id = job.id();
        h.worker.submit(job).unwrap();

        assert!(wait_until(SETTLE, || h.worker.stats().jobs_succeeded == 1));
        assert_eq!(h.conn.executed(), vec![id; 4]);
        assert_eq!(recorder.count("error"), 3);
        assert_eq!(recorder.count("starting"), 4);
        assert_eq!(recorder.count("done"), 1);

        let stats = h.worker.stats();
        assert_eq!(stats.jobs_failed, 3);
        assert_eq!(stats.jobs_requeued, 3);
    }

    #[test]
    fn always_failing_job_is_retried_without_cap() {
        let h = started(fast_config());
        let recorder = Recorder::voting(true);
        h.worker.add_listener(recorder.clone(), false);
        h.conn.fail_next(usize::MAX);

        h.worker.submit(ping()).unwrap();

        assert!(wait_until(SETTLE, || h.conn.executed().len() >= 12));
        assert!(recorder.count("error") >= 11);
        assert_eq!(recorder.count("done"), 0);
        assert_eq!(h.worker.stats().jobs_succeeded, 0);
    }

    #[test]
    fn failure_without_vote_is_dropped() {
        let h = started(fast_config());
        let recorder = Recorder::voting(false);
        h.worker.add_listener(recorder.clone(), false);
        h.conn.fail_next(1);

        let job = ping();
        let id = job.id();
        h.worker.submit(job).unwrap();

        assert!(wait_until(SETTLE, || recorder.events_for(id) == ["starting", "error"]));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(h.conn.executed().len(), 1);
        assert_eq!(h.worker.stats().jobs_requeued, 0);
    }

    #[test]
    fn unparsable_message_uri_takes_the_error_path() {
        let h = started(fast_config());
        let recorder = Recorder::voting(false);
        h.worker.add_listener(recorder.clone(), false);

        let bad = MessageUri::new("content://messages/draft");
        h.store.insert(bad.clone());
        let job = Arc::new(MessageSendJob::new(bad, "alice@example.net", "hi"));
        let id = job.id();
        h.worker.submit(job).unwrap();

        assert!(wait_until(SETTLE, || recorder.events_for(id) == ["error"]));
        assert!(h.conn.executed().is_empty());
        assert_eq!(h.worker.stats().jobs_failed, 1);
    }

    #[test]
    fn custom_listener_only_sees_its_own_run() {
        let h = started(fast_config());
        let custom = Recorder::voting(false);
        let own = Arc::new(PayloadJob::new("ping", json!({})).with_listener(custom.clone()));
        let other = ping();

        h.worker.submit(own.clone()).unwrap();
        h.worker.submit(other.clone()).unwrap();
        assert!(wait_until(SETTLE, || h.conn.executed().len() == 2));

        assert_eq!(custom.events_for(own.id()), ["starting", "done"]);
        assert!(custom.events_for(other.id()).is_empty());
    }

    #[test]
    fn job_listener_already_registered_globally_survives_the_run() {
        let h = started(fast_config());
        let shared = Recorder::voting(false);
        h.worker.add_listener(shared.clone(), false);

        let own = Arc::new(PayloadJob::new("ping", json!({})).with_listener(shared.clone()));
        h.worker.submit(own.clone()).unwrap();
        assert!(wait_until(SETTLE, || h.conn.executed().len() == 1));
        assert_eq!(shared.events_for(own.id()), ["starting", "done"]);

        let next = ping();
        h.worker.submit(next.clone()).unwrap();
        assert!(wait_until(SETTLE, || shared.events_for(next.id()) == ["starting", "done"]));
        assert!(h.worker.remove_listener(&(shared as Arc<dyn RequestListener>), false));
    }

    // --- in-flight dedup ---------------------------------------------------

    #[test]
    fn in_flight_message_is_deduplicated_unless_attachment() {
        let h = started(fast_config());
        h.store.insert(uri(1));

        let (first, gate) = BlockingJob::new(Some(uri(1)));
        h.worker.submit(first.clone()).unwrap();
        assert!(wait_until(SETTLE, || first.entered.load(Ordering::SeqCst)));

        // plain duplicates are dropped, and do not free the first claim
        for expected in 1..=2 {
            let dup = Arc::new(MessageSendJob::new(uri(1), "alice@example.net", "again"));
            h.worker.submit(dup).unwrap();
            assert!(wait_until(SETTLE, || h.worker.stats().dropped_duplicate == expected));
        }

        let with_file = Arc::new(
            MessageSendJob::new(uri(1), "alice@example.net", "")
                .with_attachment(Attachment {
                    id: "file-1".into(),
                    mime: "image/jpeg".into(),
                    size: 1024,
                })
                .asynchronous(false),
        );
        h.worker.submit(with_file.clone()).unwrap();
        assert!(wait_until(SETTLE, || h.conn.executed().contains(&with_file.id())));

        gate.send(()).unwrap();
        assert!(wait_until(SETTLE, || {
            let stats = h.worker.stats();
            stats.jobs_succeeded == 2 && stats.async_running == 0
        }));

        let after = Arc::new(MessageSendJob::new(uri(1), "alice@example.net", "later"));
        h.worker.submit(after.clone()).unwrap();
        assert!(wait_until(SETTLE, || h.conn.executed().contains(&after.id())));
        let stats = h.worker.stats();
        assert_eq!(stats.dropped_duplicate, 2);
        assert_eq!(stats.jobs_dispatched, 3);
    }

    // --- async -------------------------------------------------------------

    #[test]
    fn async_job_uses_async_registry_and_balances_keep_alive() {
        let h = started(fast_config());
        let sync_recorder = Recorder::voting(false);
        let async_recorder = Recorder::voting(false);
        h.worker.add_listener(sync_recorder.clone(), false);
        h.worker.add_listener(async_recorder.clone(), true);

        let job = Arc::new(PayloadJob::new("upload", json!({ "size": 10 })).asynchronous(true));
        let id = job.id();
        h.worker.submit(job).unwrap();

        assert!(wait_until(SETTLE, || async_recorder.events_for(id) == ["starting", "done"]));
        assert!(wait_until(SETTLE, || {
            h.worker.keep_alive_count() == 0 && h.worker.stats().async_running == 0
        }));
        assert!(sync_recorder.is_empty());
    }

    #[test]
    fn async_failure_votes_on_async_registry() {
        let h = started(fast_config());
        let async_recorder = Recorder::voting(true);
        h.worker.add_listener(async_recorder.clone(), true);
        h.conn.fail_next(1);

        let job = Arc::new(PayloadJob::new("upload", json!({})).asynchronous(true));
        let id = job.id();
        h.worker.submit(job).unwrap();

        assert!(wait_until(SETTLE, || {
            async_recorder.events_for(id) == ["starting", "error", "starting", "done"]
        }));
        assert!(wait_until(SETTLE, || h.worker.keep_alive_count() == 0));
    }

    // --- pending queue -----------------------------------------------------

    #[test]
    fn pending_jobs_replay_in_order_exactly_once() {
        let pending = PendingQueue::new();
        let jobs: Vec<_> = (0..5).map(|_| ping()).collect();
        for job in &jobs {
            pending.push(job.clone());
        }

        let h = harness_with(fast_config(), pending.clone());
        h.worker.start().unwrap();

        assert!(wait_until(SETTLE, || h.conn.executed().len() == 5));
        let expected: Vec<_> = jobs.iter().map(|j| j.id()).collect();
        assert_eq!(h.conn.executed(), expected);
        assert!(pending.is_empty());

        thread::sleep(Duration::from_millis(100));
        assert_eq!(h.conn.executed().len(), 5);
    }

    #[test]
    fn submit_before_start_gives_up_after_bounded_wait() {
        let config = fast_config().with_submit_retry(3, Duration::from_millis(5));
        let h = harness_with(config, PendingQueue::new());

        assert_eq!(h.worker.submit(ping()), Err(SubmitError::NotReady));
    }

    #[test]
    fn submit_waits_for_loop_to_become_ready() {
        let h = harness_with(fast_config(), PendingQueue::new());
        let worker = h.worker.clone();
        let starter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            worker.start().unwrap();
        });

        h.worker.submit(ping()).unwrap();
        starter.join().unwrap();
        assert!(wait_until(SETTLE, || h.conn.executed().len() == 1));
    }

    // --- shutdown ----------------------------------------------------------

    #[test]
    fn shutdown_cancels_async_jobs_and_refuses_new_work() {
        let h = started(fast_config());
        let async_recorder = Recorder::voting(true);
        h.worker.add_listener(async_recorder.clone(), true);

        let (job, _gate) = BlockingJob::new(None);
        h.worker.submit(job.clone()).unwrap();
        assert!(wait_until(SETTLE, || job.entered.load(Ordering::SeqCst)));

        h.worker.shutdown();

        assert!(wait_until(SETTLE, || job.saw_cancel.load(Ordering::SeqCst)));
        assert_eq!(h.worker.submit(ping()), Err(SubmitError::Interrupted));
        assert!(!h.worker.is_running());
        assert!(h.worker.connection().is_none());
        assert!(h.worker.wait_terminated(SETTLE));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(async_recorder.count("error"), 0);

        h.worker.shutdown();
        assert_eq!(h.conn.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_cancels_a_retried_async_run() {
        let h = started(fast_config());
        let (reached_tx, reached) = mpsc::channel();
        let (gate, gate_rx) = mpsc::channel();
        h.worker.add_listener(
            Arc::new(StallOnRetry {
                uploads: AtomicUsize::new(0),
                reached: Mutex::new(reached_tx),
                gate: Mutex::new(gate_rx),
            }),
            true,
        );
        h.store.insert(uri(9));
        h.conn.fail_next(1);

        let job = Arc::new(MessageSendJob::new(uri(9), "erin@example.net", "").with_attachment(Attachment {
            id: "file-9".into(),
            mime: "image/png".into(),
            size: 4096,
        }));
        h.worker.submit(job.clone()).unwrap();

        // second run is parked in its upload
        reached.recv_timeout(SETTLE).unwrap();
        assert_eq!(h.conn.executed().len(), 1);

        h.worker.shutdown();
        gate.send(()).unwrap();

        assert!(wait_until(SETTLE, || h.worker.keep_alive_count() == 0));
        assert!(job.execution().is_some_and(|handle| handle.is_canceled()));
        assert_eq!(h.conn.executed().len(), 1);
        assert!(!job.is_done());
    }

    #[test]
    fn dropping_the_worker_mid_async_run_is_harmless() {
        let h = started(fast_config());
        let (job, _gate) = BlockingJob::new(None);
        h.worker.submit(job.clone()).unwrap();
        assert!(wait_until(SETTLE, || job.entered.load(Ordering::SeqCst)));

        drop(h);

        assert!(wait_until(SETTLE, || job.saw_cancel.load(Ordering::SeqCst)));
    }

    // --- keep-alive and idle -----------------------------------------------

    #[test]
    fn idle_timer_hands_over_to_push_when_registered() {
        let h = harness_with(fast_config(), PendingQueue::new());
        h.worker.set_push_registration_id(Some("push-token".into()));
        h.worker.start().unwrap();

        assert!(wait_until(SETTLE, || h.lifecycle.fully_idle.load(Ordering::SeqCst) >= 1));
    }

    #[test]
    fn idle_timer_without_push_registration_keeps_running() {
        let h = started(fast_config());
        thread::sleep(Duration::from_millis(400));

        assert_eq!(h.lifecycle.fully_idle.load(Ordering::SeqCst), 0);
        assert!(h.worker.is_running());
    }

    #[test]
    fn hold_suppresses_idle_timer_until_release() {
        let h = harness_with(fast_config(), PendingQueue::new());
        h.worker.set_push_registration_id(Some("push-token".into()));
        h.worker.hold();
        h.worker.start().unwrap();
        assert!(wait_until(SETTLE, || h.worker.is_running()));

        thread::sleep(Duration::from_millis(400));
        assert_eq!(h.lifecycle.fully_idle.load(Ordering::SeqCst), 0);

        h.worker.release();
        assert_eq!(h.worker.keep_alive_count(), 0);
        assert!(wait_until(SETTLE, || h.lifecycle.fully_idle.load(Ordering::SeqCst) >= 1));
    }

    #[test]
    fn release_never_goes_below_zero() {
        let h = started(fast_config());
        h.worker.release();
        h.worker.release();
        assert_eq!(h.worker.keep_alive_count(), 0);

        h.worker.hold();
        assert_eq!(h.worker.keep_alive_count(), 1);
        h.worker.release();
        assert_eq!(h.worker.keep_alive_count(), 0);
    }

    #[test]
    fn new_work_pushes_idle_timer_back() {
        let config = fast_config().with_idle_timeout(Duration::from_millis(250));
        let h = harness_with(config, PendingQueue::new());
        h.worker.set_push_registration_id(Some("push-token".into()));
        h.worker.start().unwrap();

        for _ in 0..8 {
            h.worker.submit(ping()).unwrap();
            thread::sleep(Duration::from_millis(60));
        }
        assert_eq!(h.lifecycle.fully_idle.load(Ordering::SeqCst), 0);

        assert!(wait_until(SETTLE, || h.lifecycle.fully_idle.load(Ordering::SeqCst) >= 1));
    }

    #[test]
    fn mark_idle_stops_once_drained_and_submit_wakes_up() {
        let h = started(fast_config());

        h.worker.mark_idle();
        assert!(wait_until(SETTLE, || h.lifecycle.stop_if_idle.load(Ordering::SeqCst) == 1));
        assert_eq!(h.lifecycle.keep_alive.load(Ordering::SeqCst), 0);

        h.worker.submit(ping()).unwrap();
        assert_eq!(h.lifecycle.keep_alive.load(Ordering::SeqCst), 1);

        // flag cleared: a second submit does not restart keep-alive
        h.worker.submit(ping()).unwrap();
        assert_eq!(h.lifecycle.keep_alive.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_racing_stop_restarts_keep_alive_after_the_stop() {
        let (stopping_tx, stopping) = mpsc::channel();
        let (gate, gate_rx) = mpsc::channel();
        let lifecycle = Arc::new(StallingLifecycle {
            journal: Mutex::new(Vec::new()),
            stopping: Mutex::new(stopping_tx),
            gate: Mutex::new(gate_rx),
        });
        let conn = Arc::new(ScriptedConnection::connected());
        let worker = Arc::new(
            RequestWorker::new(
                conn.clone(),
                lifecycle.clone(),
                JobContext::new(Arc::new(InMemoryJobStore::new())),
                fast_config(),
            )
            .with_pending_queue(PendingQueue::new()),
        );
        worker.start().unwrap();
        assert!(wait_until(SETTLE, || worker.is_running()));

        worker.mark_idle();
        stopping.recv_timeout(SETTLE).unwrap();

        let submitter = {
            let worker = worker.clone();
            thread::spawn(move || worker.submit(ping()))
        };
        thread::sleep(Duration::from_millis(50));
        gate.send(()).unwrap();

        submitter.join().unwrap().unwrap();
        assert!(wait_until(SETTLE, || conn.executed().len() == 1));
        assert_eq!(*lifecycle.journal.lock().unwrap(), ["stop_if_idle", "start_keep_alive"]);
    }

    // --- connection supervision --------------------------------------------

    #[test]
    fn respawn_rotates_endpoints_round_robin() {
        let a = Endpoint::new("a.example.net", 5222);
        let b = Endpoint::new("b.example.net", 5222);
        let h = started(fast_config().with_endpoints([a.clone(), b.clone()]));
        assert!(wait_until(SETTLE, || h.conn.started.load(Ordering::SeqCst)));
        assert_eq!(h.conn.endpoints(), [a.clone()]);

        h.worker.child_respawning("connection reset");
        h.worker.child_respawning("connection reset");
        h.worker.child_terminated("closed");

        assert_eq!(h.conn.endpoints(), [a.clone(), b, a]);
    }
}
