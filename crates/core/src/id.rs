//! Strongly-typed identifiers used across the dispatcher.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identity of a submitted job (logging / tracing only, not used for dedup).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered), so ids sort in submission order.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("JobId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Identity of a stored message; the dedup key for message-send jobs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource reference of a stored message, e.g. `content://messages/42`.
///
/// The trailing path segment carries the numeric [`MessageId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageUri(String);

impl MessageUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Build the canonical uri for a message id under `base`.
    pub fn for_message(base: &str, id: MessageId) -> Self {
        Self(format!("{}/{}", base.trim_end_matches('/'), id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the message id out of the last path segment.
    pub fn message_id(&self) -> DomainResult<MessageId> {
        let path = match self.0.split_once("://") {
            Some((_, rest)) => rest,
            None => self.0.as_str(),
        };
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segment = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DomainError::invalid_id(format!("MessageId: no id in {}", self.0)))?;

        segment
            .parse::<u64>()
            .map(MessageId)
            .map_err(|e| DomainError::invalid_id(format!("MessageId: {segment}: {e}")))
    }
}

impl core::fmt::Display for MessageUri {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction id handed back by the server for a completed request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_is_parsed_from_last_segment() {
        let uri = MessageUri::new("content://org.courier.messages/messages/42");
        assert_eq!(uri.message_id().unwrap(), MessageId::new(42));
    }

    #[test]
    fn message_id_ignores_trailing_slash_and_query() {
        assert_eq!(
            MessageUri::new("content://messages/7/?fresh=1").message_id().unwrap(),
            MessageId::new(7)
        );
        assert_eq!(MessageUri::new("messages/9").message_id().unwrap(), MessageId::new(9));
    }

    #[test]
    fn non_numeric_segment_is_rejected() {
        let err = MessageUri::new("content://messages/draft").message_id().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.contains("draft")));
    }

    #[test]
    fn uri_without_path_is_rejected() {
        assert!(MessageUri::new("content://").message_id().is_err());
    }

    #[test]
    fn for_message_round_trips_through_message_id() {
        let uri = MessageUri::for_message("content://messages/", MessageId::new(1234));
        assert_eq!(uri.as_str(), "content://messages/1234");
        assert_eq!(uri.message_id().unwrap().get(), 1234);
    }

    #[test]
    fn job_id_parses_from_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
