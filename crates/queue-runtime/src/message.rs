//! Queue names, message identifiers and the outgoing/delivered message shapes.

use crate::error::ValidationError;
use crate::provider::ProviderType;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Service Bus queue (entity path)
///
/// Follows the entity naming rules: 1-260 characters of letters,
/// digits, periods, hyphens, underscores and slashes, starting and ending with
/// a letter or digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        if name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, '.', '-', '_' and '/' allowed".to_string(),
            });
        }

        let starts_ok = name.starts_with(|c: char| c.is_ascii_alphanumeric());
        let ends_ok = name.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !starts_ok || !ends_ok {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "must start and end with a letter or digit".to_string(),
            });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Application-assigned `MessageId` broker property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Random 32-character hex identifier
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// UTC instant used for enqueue times and lock expiry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp shifted forward by `duration`
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339())
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Outgoing message; the body is sent as-is
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub message_id: Option<MessageId>,
    pub correlation_id: Option<String>,
    pub time_to_live: Option<Duration>,
}

impl Message {
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            attributes: HashMap::new(),
            message_id: None,
            correlation_id: None,
            time_to_live: None,
        }
    }

    /// Create a message whose body is the UTF-8 encoding of `text`
    pub fn from_text(text: &str) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Custom property, sent as a message header
    pub fn with_attribute(mut self, key: String, value: String) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Use an explicit message ID instead of a generated one
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Broker discards the message if not received within `ttl`
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

/// A message received from the queue with broker-assigned metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub sequence_number: i64,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub correlation_id: Option<String>,
    pub lock_token: LockToken,
    pub delivery_count: u32,
    pub enqueued_at: Timestamp,
}

impl ReceivedMessage {
    /// Body decoded as UTF-8, if it is valid UTF-8
    pub fn body_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

}

/// Opaque handle identifying one delivered, peek-locked message instance
///
/// Used to complete or abandon the message. The handle is only valid until
/// the broker's lock expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    token: String,
    message_id: MessageId,
    locked_until: Timestamp,
    provider_type: ProviderType,
}

impl LockToken {
    /// Create new lock token
    pub fn new(
        token: String,
        message_id: MessageId,
        locked_until: Timestamp,
        provider_type: ProviderType,
    ) -> Self {
        Self {
            token,
            message_id,
            locked_until,
            provider_type,
        }
    }

    /// Get token string
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Message this lock belongs to
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// When the broker releases the lock
    pub fn locked_until(&self) -> &Timestamp {
        &self.locked_until
    }

    /// Check if the lock has expired
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.locked_until
    }

    /// Get time until the lock expires
    pub fn time_until_expiry(&self) -> Duration {
        let now = Timestamp::now();
        if now >= self.locked_until {
            Duration::zero()
        } else {
            self.locked_until.as_datetime() - now.as_datetime()
        }
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
