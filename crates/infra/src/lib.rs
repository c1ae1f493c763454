//! Request dispatch infrastructure: the worker, its jobs, and the pieces
//! producers use before a worker exists.

pub mod config;
pub mod dispatch;
pub mod endpoints;
pub mod jobs;
pub mod loopback;
pub mod pending;

pub use config::{ConfigError, WorkerConfig};
pub use dispatch::{RequestWorker, SubmitError, WorkerStats};
pub use endpoints::EndpointRotation;
pub use jobs::{Attachment, InMemoryJobStore, MessageSendJob, PayloadJob};
pub use loopback::LoopbackConnection;
pub use pending::PendingQueue;

#[cfg(test)]
mod integration_tests;
