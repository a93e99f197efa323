//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use crate::provider::ProviderType;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Longest delivery delay SQS accepts
pub const MAX_DELAY: Duration = Duration::from_secs(900);

/// Largest batch a single receive may return
pub const MAX_RECEIVE_BATCH: u32 = 10;

/// Longest visibility timeout SQS accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Longest long-poll window SQS accepts
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Address of a queue: the SQS queue URL, or a plain name for the in-memory provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueUrl(String);

impl QueueUrl {
    /// Create new queue address with validation
    pub fn new(url: String) -> Result<Self, ValidationError> {
        if url.is_empty() || url.len() > 2048 {
            return Err(ValidationError::OutOfRange {
                field: "queue_url".to_string(),
                message: "must be 1-2048 characters".to_string(),
            });
        }

        if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: "whitespace and control characters are not allowed".to_string(),
            });
        }

        Ok(Self(url))
    }

    /// Get queue address as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueUrl {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier assigned to a message by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
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

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from milliseconds since the Unix epoch (SQS `SentTimestamp`)
    pub fn from_epoch_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent to a queue
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    /// Time before the message first becomes visible to consumers
    pub delay: Duration,
}

impl Message {
    /// Create new message with body
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            attributes: HashMap::new(),
            delay: Duration::ZERO,
        }
    }

    /// Create a message whose body is the JSON encoding of `value`
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, SerializationError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(body))
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Delay first delivery of the message
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Check the message against the limits shared by all providers
    pub fn validate(&self, max_size: usize) -> Result<(), ValidationError> {
        if self.body.is_empty() {
            return Err(ValidationError::Required {
                field: "body".to_string(),
            });
        }

        let size = self.size();
        if size > max_size {
            return Err(ValidationError::OutOfRange {
                field: "body".to_string(),
                message: format!("{} bytes exceeds maximum of {} bytes", size, max_size),
            });
        }

        if self.delay > MAX_DELAY {
            return Err(ValidationError::OutOfRange {
                field: "delay".to_string(),
                message: format!("{:?} exceeds maximum of {:?}", self.delay, MAX_DELAY),
            });
        }

        if let Some(key) = self.attributes.keys().find(|k| k.is_empty()) {
            return Err(ValidationError::InvalidFormat {
                field: "attributes".to_string(),
                message: format!("attribute name '{}' must not be empty", key),
            });
        }

        Ok(())
    }

    /// Size counted against the backend limit: body plus attribute names and values
    pub fn size(&self) -> usize {
        self.body.len()
            + self
                .attributes
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    /// Number of times the message has been received, including this delivery
    pub receive_count: u32,
    pub sent_at: Option<Timestamp>,
}

impl ReceivedMessage {
    /// Body as UTF-8 text
    pub fn body_str(&self) -> Result<&str, SerializationError> {
        std::str::from_utf8(&self.body).map_err(|_| SerializationError::InvalidUtf8)
    }

    /// Decode the body as JSON
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Opaque token identifying one delivery of a message; required for deletion
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle {
    handle: String,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String, provider_type: ProviderType) -> Self {
        Self {
            handle,
            provider_type,
        }
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.handle)
    }
}

/// Result of deleting a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Already deleted, or the receipt expired and the message was redelivered
    NotFound,
}

// ============================================================================
// Receive Options
// ============================================================================

/// Configuration options for receiving messages from queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Maximum number of messages to receive in a batch
    pub max_messages: u32,
    /// How long received messages stay hidden from other consumers
    pub visibility_timeout: Duration,
    /// Long-poll window; zero returns immediately
    pub wait_time: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            visibility_timeout: Duration::from_secs(300),
            wait_time: Duration::ZERO,
        }
    }
}

impl ReceiveOptions {
    /// Create new receive options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of messages to receive
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = max;
        self
    }

    /// Set visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Set long-poll wait time
    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = wait;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_messages == 0 || self.max_messages > MAX_RECEIVE_BATCH {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: format!("must be 1-{}", MAX_RECEIVE_BATCH),
            });
        }

        if self.visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(ValidationError::OutOfRange {
                field: "visibility_timeout".to_string(),
                message: format!("must not exceed {:?}", MAX_VISIBILITY_TIMEOUT),
            });
        }

        if self.wait_time > MAX_WAIT_TIME {
            return Err(ValidationError::OutOfRange {
                field: "wait_time".to_string(),
                message: format!("must not exceed {:?}", MAX_WAIT_TIME),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
