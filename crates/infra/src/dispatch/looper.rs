//! Message loop of the dispatch thread.
//!
//! The loop thread owns a timer-ordered queue. Other threads post into it
//! through a [`LoopSender`] (an `mpsc` channel); the loop moves arrivals into
//! the queue, runs whatever is due, and sleeps until the next due message.
//!
//! ## Idle callbacks
//!
//! Each time the loop runs out of due messages after having handled at least
//! one (and once right after preparing), it runs its idle callbacks:
//!
//! - the *idle timer* callback, while armed, clears any scheduled `Idle` and
//!   schedules a fresh one `idle_timeout` ahead if the keep-alive count is
//!   zero. A steady trickle of work therefore keeps pushing the timer back.
//! - one-shot *stop-if-idle* callbacks, installed by `mark_idle`.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use courier_core::RequestJob;

use super::worker::WorkerShared;

/// Ten years; stands in for "never" when a delay overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

#[derive(Debug)]
pub(crate) enum LoopMessage {
    Request(Arc<dyn RequestJob>),
    /// The idle timer expired.
    Idle,
    /// Unregister the idle timer callback (keep-alive went above zero).
    DisarmIdle,
    /// Register the idle timer callback (keep-alive dropped to zero).
    ArmIdle,
    /// Install a one-shot stop-if-idle callback.
    ArmStopIfIdle,
    /// Leave the loop, discarding everything still queued.
    Quit,
}

#[derive(Debug)]
pub(crate) struct Envelope {
    due: Instant,
    message: LoopMessage,
}

/// Posting side of the loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopSender {
    tx: Sender<Envelope>,
}

impl LoopSender {
    /// Returns `false` if the loop is gone.
    pub(crate) fn post(&self, message: LoopMessage) -> bool {
        self.post_after(message, Duration::ZERO)
    }

    pub(crate) fn post_after(&self, message: LoopMessage, delay: Duration) -> bool {
        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.tx.send(Envelope { due, message }).is_ok()
    }
}

pub(crate) fn channel() -> (LoopSender, Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel();
    (LoopSender { tx }, rx)
}

/// Timer-ordered queue. Messages due at the same instant keep arrival order.
#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    entries: BTreeMap<(Instant, u64), LoopMessage>,
    seq: u64,
}

impl MessageQueue {
    pub(crate) fn insert(&mut self, due: Instant, message: LoopMessage) {
        self.seq += 1;
        self.entries.insert((due, self.seq), message);
    }

    /// Pop the earliest message if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<LoopMessage> {
        let entry = self.entries.first_entry()?;
        if entry.key().0 > now {
            return None;
        }
        Some(entry.remove())
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(due, _)| *due)
    }

    /// Remove every scheduled `Idle`; returns how many were removed.
    pub(crate) fn remove_idle(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, m| !matches!(m, LoopMessage::Idle));
        before - self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OneShot {
    StopIfIdle,
}

/// State owned by the loop thread.
///
/// Holds only a `Weak` to the worker; a strong reference is taken per
/// message and dropped before blocking again.
pub(crate) struct Looper {
    worker: Weak<WorkerShared>,
    inbox: Receiver<Envelope>,
    queue: MessageQueue,
    idle_armed: bool,
    one_shots: Vec<OneShot>,
    /// Something was handled since the idle callbacks last ran.
    dirty: bool,
    quitting: bool,
}

impl Looper {
    pub(crate) fn new(worker: Weak<WorkerShared>, inbox: Receiver<Envelope>, idle_armed: bool) -> Self {
        Self {
            worker,
            inbox,
            queue: MessageQueue::default(),
            idle_armed,
            one_shots: Vec::new(),
            dirty: true,
            quitting: false,
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            if !self.drain_inbox() || self.quitting {
                break;
            }

            let now = Instant::now();
            if let Some(message) = self.queue.pop_due(now) {
                let Some(worker) = self.worker.upgrade() else {
                    break;
                };
                self.handle(&worker, message);
                self.dirty = true;
                continue;
            }

            if self.dirty {
                self.dirty = false;
                let Some(worker) = self.worker.upgrade() else {
                    break;
                };
                self.run_idle_callbacks(&worker);
                continue;
            }

            let arrived = match self.queue.next_due() {
                Some(due) => match self.inbox.recv_timeout(due.saturating_duration_since(now)) {
                    Ok(envelope) => Some(envelope),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.inbox.recv() {
                    Ok(envelope) => Some(envelope),
                    Err(_) => break,
                },
            };
            if let Some(envelope) = arrived {
                self.accept(envelope);
            }
        }

        let discarded = self.queue.len();
        self.queue.clear();
        if let Some(worker) = self.worker.upgrade() {
            worker.loop_exited();
        }
        debug!(discarded, "dispatch loop exited");
    }

    /// Move every waiting arrival into the queue. `false` once all senders
    /// are gone.
    fn drain_inbox(&mut self) -> bool {
        loop {
            match self.inbox.try_recv() {
                Ok(envelope) => self.accept(envelope),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn accept(&mut self, envelope: Envelope) {
        match envelope.message {
            LoopMessage::Quit => self.quitting = true,
            message => self.queue.insert(envelope.due, message),
        }
    }

    fn handle(&mut self, worker: &Arc<WorkerShared>, message: LoopMessage) {
        match message {
            LoopMessage::Request(job) => {
                self.queue.remove_idle();
                worker.dispatch(job);
            }
            LoopMessage::Idle => worker.idle_timer_expired(),
            LoopMessage::DisarmIdle => {
                trace!("idle timer disarmed");
                self.idle_armed = false;
                self.queue.remove_idle();
            }
            LoopMessage::ArmIdle => {
                trace!("idle timer armed");
                self.queue.remove_idle();
                self.idle_armed = true;
            }
            LoopMessage::ArmStopIfIdle => {
                if !self.one_shots.contains(&OneShot::StopIfIdle) {
                    self.one_shots.push(OneShot::StopIfIdle);
                }
            }
            LoopMessage::Quit => self.quitting = true,
        }
    }

    fn run_idle_callbacks(&mut self, worker: &WorkerShared) {
        if self.idle_armed {
            self.queue.remove_idle();
            if !worker.keep_alive.is_held() {
                let timeout = worker.config.idle_timeout;
                let due = Instant::now()
                    .checked_add(timeout)
                    .unwrap_or_else(|| Instant::now() + FAR_FUTURE);
                self.queue.insert(due, LoopMessage::Idle);
                trace!(timeout_ms = timeout.as_millis() as u64, "idle timer scheduled");
            }
        }

        for callback in std::mem::take(&mut self.one_shots) {
            match callback {
                OneShot::StopIfIdle => worker.stop_if_still_idle(),
            }
        }
    }
}
