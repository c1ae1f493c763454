//! Process-wide logging setup.

pub mod subscriber;

pub use subscriber::{LogFormat, ParseLogFormatError};

/// Initialize logging with the format named by `COURIER_LOG_FORMAT`
/// (JSON when unset or unrecognized).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let format = std::env::var(subscriber::ENV_LOG_FORMAT)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    subscriber::init(format);
}
