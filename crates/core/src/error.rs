//! Error model.

use thiserror::Error;

/// Result type used for identifier parsing and validation.
pub type DomainResult<T> = Result<T, DomainError>;

/// Validation-level error.
///
/// Keep this focused on deterministic failures (malformed identifiers, bad
/// input). Transport failures belong in [`ExecutionError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Failure raised while executing a job against the connection.
///
/// Never returned to producers: the dispatcher routes it to the registered
/// listeners, whose `error` votes decide whether the job is requeued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The connection dropped while the request was in progress.
    #[error("connection lost")]
    Disconnected,

    /// The server refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Transport-level IO failure.
    #[error("io error: {0}")]
    Io(String),

    /// The job refers to a resource that cannot be resolved.
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Execution was interrupted (worker teardown or canceled executor).
    #[error("execution interrupted")]
    Interrupted,
}

impl ExecutionError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl From<DomainError> for ExecutionError {
    fn from(value: DomainError) -> Self {
        Self::InvalidResource(value.to_string())
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::Interrupted => Self::Interrupted,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe => Self::Disconnected,
            _ => Self::Io(value.to_string()),
        }
    }
}
