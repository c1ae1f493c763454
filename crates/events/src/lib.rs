//! Listener plumbing for job lifecycle callbacks.
//!
//! - [`ListenerRegistry`]: ordered, thread-safe fan-out of callbacks to many
//!   listeners (itself a [`RequestListener`])
//! - [`LoggingListener`]: emits every callback as a `tracing` event

pub mod logging;
pub mod registry;

pub use logging::LoggingListener;
pub use registry::ListenerRegistry;

pub use courier_core::RequestListener;
