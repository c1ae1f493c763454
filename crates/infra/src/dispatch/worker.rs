//! Request worker: single-threaded dispatcher in front of one connection.
//!
//! Producers on any thread call [`RequestWorker::submit`]; the loop thread
//! dispatches jobs one at a time, inline for sync jobs or on a detached
//! executor for async ones.
//!
//! ## Dispatch decisions
//!
//! For every `Request` the loop, in order:
//!
//! 1. drops the job if the worker is interrupted,
//! 2. drops it if there is no connected connection (the job is *lost*, not
//!    parked; the connection layer is expected to resubmit on reconnect),
//! 3. drops it if the job reports itself canceled,
//! 4. registers the job's own listener for the duration of the run (one
//!    that is already registered stays registered afterwards),
//! 5. takes the connection's execution lock,
//! 6. drops message-send jobs whose message is already in flight (unless
//!    they carry an attachment),
//! 7. runs the job, or hands it to an async executor.
//!
//! Failures go to the listeners; if any of them votes for it the job is
//! submitted again after `retry_delay`. There is no retry cap.
//!
//! ## Threads and ownership
//!
//! `RequestWorker` owns the shared state. The loop thread and async executors
//! only keep `Weak` references and tolerate the worker being gone. Dropping
//! the `RequestWorker` shuts it down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use courier_core::{
    Connection, ExecutionError, ExecutionHandle, JobContext, JobId, LifecycleController, MessageId,
    RequestJob, RequestListener,
};
use courier_events::ListenerRegistry;

use crate::config::WorkerConfig;
use crate::endpoints::EndpointRotation;
use crate::pending::PendingQueue;

use super::async_job::{AsyncExecutor, AsyncJobs};
use super::in_flight::{Claim, InFlightSet};
use super::keep_alive::KeepAlive;
use super::looper::{self, Envelope, LoopMessage, LoopSender, Looper};
use super::stats::{DropReason, WorkerStats};

/// Why [`RequestWorker::submit`] refused a job. The job is dropped either way.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("request worker has been interrupted")]
    Interrupted,
    #[error("request worker did not become ready")]
    NotReady,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

enum Admission {
    /// Run it; `Some` when this job owns an in-flight entry.
    Proceed(Option<MessageId>),
    Duplicate(MessageId),
}

/// State shared between the worker handle, its loop thread and its async
/// executors.
pub(crate) struct WorkerShared {
    pub(crate) config: WorkerConfig,
    context: JobContext,
    lifecycle: Arc<dyn LifecycleController>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    listeners: Arc<ListenerRegistry>,
    async_listeners: Arc<ListenerRegistry>,
    async_jobs: AsyncJobs,
    in_flight: InFlightSet,
    pub(crate) keep_alive: KeepAlive,
    interrupted: AtomicBool,
    /// Set by `mark_idle`, cleared by the next `submit`. Also serializes the two.
    idle: Mutex<bool>,
    /// Present once the loop is prepared.
    sender: RwLock<Option<LoopSender>>,
    push_registration_id: RwLock<Option<String>>,
    endpoints: EndpointRotation,
    stats: Mutex<WorkerStats>,
}

impl WorkerShared {
    fn new(
        connection: Arc<dyn Connection>,
        lifecycle: Arc<dyn LifecycleController>,
        context: JobContext,
        config: WorkerConfig,
    ) -> Self {
        Self {
            keep_alive: KeepAlive::new(config.initial_holds),
            endpoints: EndpointRotation::new(config.endpoints.clone()),
            config,
            context,
            lifecycle,
            connection: RwLock::new(Some(connection)),
            listeners: Arc::new(ListenerRegistry::new()),
            async_listeners: Arc::new(ListenerRegistry::new()),
            async_jobs: AsyncJobs::default(),
            in_flight: InFlightSet::new(),
            interrupted: AtomicBool::new(false),
            idle: Mutex::new(false),
            sender: RwLock::new(None),
            push_registration_id: RwLock::new(None),
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    fn sender(&self) -> Option<LoopSender> {
        read(&self.sender).clone()
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        read(&self.connection).clone()
    }

    fn registry(&self, is_async: bool) -> &Arc<ListenerRegistry> {
        if is_async {
            &self.async_listeners
        } else {
            &self.listeners
        }
    }

    fn record_drop(&self, reason: DropReason) {
        lock(&self.stats).record_drop(reason);
    }

    pub(crate) fn record_success(&self) {
        lock(&self.stats).jobs_succeeded += 1;
    }

    // --- loop preparation -------------------------------------------------

    /// Install the sender and replay the pending queue, atomically with
    /// respect to producers pushing into that queue. Returns whether the idle
    /// timer starts armed.
    fn prepare(&self, sender: LoopSender, pending: &PendingQueue) -> bool {
        let replayed = pending.drain_then(
            |job| {
                sender.post(LoopMessage::Request(job));
            },
            || *write(&self.sender) = Some(sender.clone()),
        );
        lock(&self.stats).started_at = Some(Utc::now());
        info!(worker = %self.config.name, replayed, "dispatch loop ready");
        !self.keep_alive.is_held()
    }

    pub(crate) fn loop_exited(&self) {
        write(&self.sender).take();
        info!(worker = %self.config.name, "dispatch loop terminated");
    }

    // --- producer side ----------------------------------------------------

    pub(crate) fn submit(&self, job: Arc<dyn RequestJob>, delay: Duration) -> Result<(), SubmitError> {
        let job_id = job.id();
        let mut idle = lock(&self.idle);
        let sender = self.await_ready(job_id)?;

        if !sender.post_after(LoopMessage::Request(job), delay) {
            warn!(worker = %self.config.name, job_id = %job_id, "dispatch loop is gone; dropping job");
            return Err(SubmitError::NotReady);
        }
        trace!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "job queued");

        let was_idle = std::mem::replace(&mut *idle, false);
        drop(idle);
        if was_idle {
            debug!(worker = %self.config.name, "work arrived while idle; starting keep-alive");
            self.lifecycle.start_keep_alive();
        }
        Ok(())
    }

    fn await_ready(&self, job_id: JobId) -> Result<LoopSender, SubmitError> {
        let mut attempts = 0;
        loop {
            if self.is_interrupted() {
                debug!(job_id = %job_id, "worker interrupted; dropping submitted job");
                return Err(SubmitError::Interrupted);
            }
            if let Some(sender) = self.sender() {
                return Ok(sender);
            }
            if attempts >= self.config.submit_attempts {
                warn!(
                    worker = %self.config.name,
                    job_id = %job_id,
                    attempts,
                    "worker not ready; dropping submitted job"
                );
                return Err(SubmitError::NotReady);
            }
            attempts += 1;
            thread::sleep(self.config.submit_backoff);
        }
    }

    pub(crate) fn hold(&self) {
        let count = self.keep_alive.hold();
        if let Some(sender) = self.sender() {
            sender.post(LoopMessage::DisarmIdle);
        }
        trace!(count, "keep-alive hold");
    }

    pub(crate) fn release(&self) {
        let count = self.keep_alive.release();
        if count == 0 {
            if let Some(sender) = self.sender() {
                sender.post(LoopMessage::ArmIdle);
            }
        }
        trace!(count, "keep-alive release");
    }

    fn mark_idle(&self) {
        *lock(&self.idle) = true;
        match self.sender() {
            Some(sender) => {
                sender.post(LoopMessage::ArmStopIfIdle);
            }
            None => debug!(worker = %self.config.name, "loop not prepared; idle flag set only"),
        }
    }

    fn shutdown(&self) {
        if self.interrupted.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(worker = %self.config.name, "shutting down request worker");

        for handle in self.async_jobs.drain() {
            debug!(executor = handle.name(), "terminating async job");
            handle.cancel();
        }
        let sender = write(&self.sender).take();
        if let Some(sender) = sender {
            sender.post(LoopMessage::Quit);
        }
        let connection = write(&self.connection).take();
        if let Some(connection) = connection {
            connection.shutdown();
        }
    }

    // --- loop side --------------------------------------------------------

    pub(crate) fn dispatch(self: &Arc<Self>, job: Arc<dyn RequestJob>) {
        let job_id = job.id();

        if self.is_interrupted() {
            info!(worker = %self.config.name, job_id = %job_id, "worker is not running; dropping job");
            self.record_drop(DropReason::Interrupted);
            return;
        }
        let Some(connection) = self.connection().filter(|c| c.is_connected()) else {
            debug!(job_id = %job_id, "connection not ready; discarding job");
            self.record_drop(DropReason::Disconnected);
            return;
        };
        if job.is_canceled(&self.context) {
            debug!(job_id = %job_id, "job canceled; dropping");
            self.record_drop(DropReason::Canceled);
            return;
        }

        let is_async = job.is_async();
        let registry = self.registry(is_async);
        // only a listener added here is removed again after the run
        let custom = job.listener().filter(|listener| registry.add(listener.clone()));

        let _exclusive = lock(connection.execution_lock());

        let claimed = match self.admit(job.as_ref()) {
            Ok(Admission::Proceed(claimed)) => claimed,
            Ok(Admission::Duplicate(message_id)) => {
                debug!(job_id = %job_id, message_id = %message_id, "message already in flight; dropping job");
                self.record_drop(DropReason::Duplicate);
                unregister(registry, custom.as_ref());
                return;
            }
            Err(err) => {
                self.handle_failure(connection.as_ref(), &job, registry, err);
                unregister(registry, custom.as_ref());
                return;
            }
        };
        lock(&self.stats).jobs_dispatched += 1;

        if is_async {
            self.launch_async(job, Arc::clone(&connection), claimed, custom);
            return;
        }

        match self.run_inline(connection.as_ref(), job.as_ref()) {
            Ok(()) => self.record_success(),
            Err(err) => self.handle_failure(connection.as_ref(), &job, registry, err),
        }
        if let Some(message_id) = claimed {
            self.in_flight.release(message_id);
        }
        unregister(registry, custom.as_ref());
    }

    fn admit(&self, job: &dyn RequestJob) -> Result<Admission, ExecutionError> {
        let Some(message) = job.message() else {
            return Ok(Admission::Proceed(None));
        };
        let message_id = message.uri.message_id()?;

        Ok(match self.in_flight.try_claim(message_id, message.allows_resend()) {
            Claim::Claimed => Admission::Proceed(Some(message_id)),
            Claim::Override => {
                debug!(message_id = %message_id, "message in flight; resending for attachment");
                Admission::Proceed(None)
            }
            Claim::Duplicate => Admission::Duplicate(message_id),
        })
    }

    fn run_inline(&self, connection: &dyn Connection, job: &dyn RequestJob) -> Result<(), ExecutionError> {
        let listener: &dyn RequestListener = self.listeners.as_ref();
        listener.starting(connection, job);
        let tx = job.execute(connection, listener, &self.context)?;
        job.done();
        listener.done(connection, job, &tx);
        Ok(())
    }

    fn launch_async(
        self: &Arc<Self>,
        job: Arc<dyn RequestJob>,
        connection: Arc<dyn Connection>,
        claimed: Option<MessageId>,
        custom: Option<Arc<dyn RequestListener>>,
    ) {
        self.hold();
        let handle = ExecutionHandle::new(format!("{}-async-{}", self.config.name, job.id()));
        job.attach_execution(handle.clone());
        let ticket = self.async_jobs.insert(handle.clone());

        let executor = AsyncExecutor {
            worker: Arc::downgrade(self),
            job: job.clone(),
            connection,
            listeners: self.async_listeners.clone(),
            context: self.context.clone(),
            handle,
            ticket,
            claimed,
            custom: custom.clone(),
        };
        if let Err(err) = executor.spawn() {
            error!(job_id = %job.id(), error = %err, "could not spawn async executor");
            self.finish_async(ticket, claimed, custom.as_ref());
        }
    }

    /// Exit bookkeeping of an async run.
    pub(crate) fn finish_async(
        &self,
        ticket: u64,
        claimed: Option<MessageId>,
        custom: Option<&Arc<dyn RequestListener>>,
    ) {
        if let Some(message_id) = claimed {
            self.in_flight.release(message_id);
        }
        self.async_jobs.remove(ticket);
        self.release();
        unregister(&self.async_listeners, custom);
    }

    /// Route a failed run to `registry` and requeue if voted for.
    pub(crate) fn handle_failure(
        &self,
        connection: &dyn Connection,
        job: &Arc<dyn RequestJob>,
        registry: &ListenerRegistry,
        err: ExecutionError,
    ) {
        let job_id = job.id();
        if self.is_interrupted() || err.is_interrupted() {
            debug!(job_id = %job_id, "worker interrupted; abandoning job");
            return;
        }

        error!(worker = %self.config.name, job_id = %job_id, error = %err, "request failed");
        lock(&self.stats).jobs_failed += 1;

        if registry.error(connection, job.as_ref(), &err) {
            let delay = self.config.retry_delay;
            debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "requeuing job");
            lock(&self.stats).jobs_requeued += 1;
            if let Err(submit_err) = self.submit(job.clone(), delay) {
                warn!(job_id = %job_id, error = %submit_err, "could not requeue job");
            }
        }
    }

    pub(crate) fn idle_timer_expired(&self) {
        if read(&self.push_registration_id).is_some() {
            info!(worker = %self.config.name, "idle timeout; handing over to push delivery");
            self.lifecycle.fully_idle();
        } else {
            debug!(worker = %self.config.name, "idle timeout without push registration");
        }
    }

    /// Runs `stop_if_idle` with the idle flag locked, so a racing `submit`
    /// restarts keep-alive only after the stop went out.
    pub(crate) fn stop_if_still_idle(&self) {
        let idle = lock(&self.idle);
        if *idle {
            debug!(worker = %self.config.name, "still idle; stopping");
            self.lifecycle.stop_if_idle();
        }
    }
}

fn unregister(registry: &ListenerRegistry, listener: Option<&Arc<dyn RequestListener>>) {
    if let Some(listener) = listener {
        registry.remove(listener);
    }
}

fn run_loop(
    worker: Weak<WorkerShared>,
    sender: LoopSender,
    inbox: std::sync::mpsc::Receiver<Envelope>,
    pending: PendingQueue,
) {
    let idle_armed = {
        let Some(shared) = worker.upgrade() else {
            return;
        };
        if shared.is_interrupted() {
            debug!(worker = %shared.config.name, "interrupted before the loop started");
            return;
        }
        if let Some(connection) = shared.connection() {
            if let Some(endpoint) = shared.endpoints.next() {
                connection.set_endpoint(endpoint);
            }
            connection.start();
        }
        shared.prepare(sender, &pending)
    };
    Looper::new(worker, inbox, idle_armed).run();
}

/// Handle to a request worker.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct RequestWorker {
    shared: Arc<WorkerShared>,
    pending: PendingQueue,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for RequestWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestWorker")
            .field("name", &self.shared.config.name)
            .field("running", &self.is_running())
            .field("keep_alive", &self.shared.keep_alive.count())
            .finish()
    }
}

impl RequestWorker {
    /// Create a worker. Nothing runs until [`start`](Self::start).
    ///
    /// Jobs parked in [`PendingQueue::global`] are replayed when the loop
    /// starts; use [`with_pending_queue`](Self::with_pending_queue) to replay
    /// from a private queue instead.
    pub fn new(
        connection: Arc<dyn Connection>,
        lifecycle: Arc<dyn LifecycleController>,
        context: JobContext,
        config: WorkerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared::new(connection, lifecycle, context, config)),
            pending: PendingQueue::global().clone(),
            join: Mutex::new(None),
        }
    }

    pub fn with_pending_queue(mut self, queue: PendingQueue) -> Self {
        self.pending = queue;
        self
    }

    /// Spawn the loop thread. Calling it again is a no-op.
    pub fn start(&self) -> std::io::Result<()> {
        let mut join = lock(&self.join);
        if join.is_some() {
            warn!(worker = %self.shared.config.name, "request worker already started");
            return Ok(());
        }

        let (sender, inbox) = looper::channel();
        let worker = Arc::downgrade(&self.shared);
        let pending = self.pending.clone();
        let handle = thread::Builder::new()
            .name(self.shared.config.name.clone())
            .spawn(move || run_loop(worker, sender, inbox, pending))?;
        *join = Some(handle);
        Ok(())
    }

    pub fn submit(&self, job: Arc<dyn RequestJob>) -> Result<(), SubmitError> {
        self.shared.submit(job, Duration::ZERO)
    }

    /// Queue `job` to run no earlier than `delay` from now.
    pub fn submit_after(&self, job: Arc<dyn RequestJob>, delay: Duration) -> Result<(), SubmitError> {
        self.shared.submit(job, delay)
    }

    /// Register a listener on the sync (`is_async == false`) or async registry.
    pub fn add_listener(&self, listener: Arc<dyn RequestListener>, is_async: bool) -> bool {
        self.shared.registry(is_async).add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RequestListener>, is_async: bool) -> bool {
        self.shared.registry(is_async).remove(listener)
    }

    /// Keep the worker from going idle until the matching [`release`](Self::release).
    pub fn hold(&self) {
        self.shared.hold();
    }

    pub fn release(&self) {
        self.shared.release();
    }

    pub fn keep_alive_count(&self) -> usize {
        self.shared.keep_alive.count()
    }

    /// Ask the lifecycle controller to stop once the queue drains, unless
    /// new work is submitted first.
    pub fn mark_idle(&self) {
        self.shared.mark_idle();
    }

    /// Interrupt the worker: cancel async jobs, stop the loop, shut the
    /// connection down. Does not wait for the loop thread.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn is_running(&self) -> bool {
        !self.shared.is_interrupted() && read(&self.shared.sender).is_some()
    }

    /// Wait up to `timeout` for the loop thread to exit. Returns whether it did.
    pub fn wait_terminated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut join = lock(&self.join);
        let Some(handle) = join.as_ref() else {
            return true;
        };
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if let Some(handle) = join.take() {
            let _ = handle.join();
        }
        true
    }

    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.shared.connection()
    }

    /// `Some` once push delivery is registered; the idle timer then hands
    /// the account over to push instead of keeping the connection up.
    pub fn set_push_registration_id(&self, id: Option<String>) {
        *write(&self.shared.push_registration_id) = id;
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = lock(&self.shared.stats).clone();
        stats.async_running = self.shared.async_jobs.len();
        stats
    }

    /// The connection's session ended for good.
    pub fn child_terminated(&self, reason: &str) {
        debug!(worker = %self.shared.config.name, reason, "connection terminated");
    }

    /// The connection is about to reconnect; point it at the next endpoint.
    pub fn child_respawning(&self, reason: &str) {
        let Some(connection) = self.shared.connection() else {
            return;
        };
        match self.shared.endpoints.next() {
            Some(endpoint) => {
                info!(worker = %self.shared.config.name, reason, endpoint = %endpoint, "connection respawning");
                connection.set_endpoint(endpoint);
            }
            None => debug!(worker = %self.shared.config.name, reason, "connection respawning"),
        }
    }
}

impl Drop for RequestWorker {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}
