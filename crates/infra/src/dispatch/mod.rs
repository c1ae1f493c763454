//! The request dispatcher.
//!
//! - [`RequestWorker`]: loop thread, submit path, idle and shutdown handling
//! - [`KeepAlive`]: reference count that suppresses the idle timer
//! - [`InFlightSet`]: dedup of message-send jobs
//! - async executors for jobs that must not block the loop

mod async_job;
pub mod in_flight;
pub mod keep_alive;
mod looper;
mod stats;
mod worker;

pub use in_flight::{Claim, InFlightSet};
pub use keep_alive::KeepAlive;
pub use stats::WorkerStats;
pub use worker::{RequestWorker, SubmitError};
