//! `courier-core`: request dispatch building blocks.
//!
//! This crate contains the **contracts** shared by the dispatcher and its
//! collaborators (no threads, no IO): identifiers, the error model, and the
//! job / listener / connection / lifecycle seams.

pub mod connection;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod id;
pub mod job;
pub mod lifecycle;
pub mod listener;

pub use connection::{Connection, Request};
pub use context::{JobContext, JobStore};
pub use endpoint::Endpoint;
pub use error::{DomainError, DomainResult, ExecutionError};
pub use id::{JobId, MessageId, MessageUri, TransactionId};
pub use job::{ExecutionHandle, MessageRef, RequestJob};
pub use lifecycle::LifecycleController;
pub use listener::RequestListener;
