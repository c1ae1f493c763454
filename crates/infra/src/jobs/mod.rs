//! Concrete jobs and the in-memory store they are canceled against.

pub mod message_send;
pub mod payload;
pub mod store;

pub use message_send::{Attachment, MessageSendJob, MESSAGE_SEND_KIND};
pub use payload::PayloadJob;
pub use store::InMemoryJobStore;
