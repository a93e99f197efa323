//! Error types for queue operations and the polling consumer.

use crate::message::{MessageId, ReceiptHandle};
use std::time::Duration;
use thiserror::Error;

/// Broad classification of a [`QueueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Setup problem; retrying will not help
    Configuration,
    /// Caller input rejected before any backend call was made
    Validation,
    /// Network or service failure; the caller may retry
    Transport,
    /// The target of the operation does not exist (any more)
    NotFound,
}

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message not found or receipt expired: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Permission denied for operation: {operation}")]
    PermissionDenied { operation: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Classify the error into the coarse categories callers act upon
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::QueueNotFound { .. } | Self::MessageNotFound { .. } => ErrorCategory::NotFound,
            Self::Timeout { .. }
            | Self::ConnectionFailed { .. }
            | Self::AuthenticationFailed { .. }
            | Self::PermissionDenied { .. }
            | Self::ProviderError { .. } => ErrorCategory::Transport,
            Self::SerializationError(_) | Self::ValidationError(_) => ErrorCategory::Validation,
            Self::ConfigurationError(_) => ErrorCategory::Configuration,
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::PermissionDenied { .. } => false,
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message attribute '{key}' has invalid value")]
    InvalidAttribute { key: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(e: config::ConfigError) -> Self {
        Self::Parsing {
            message: e.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Failure reported by a message handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {message}")]
    Failed { message: String },

    #[error("Handler timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Handler panicked: {message}")]
    Panicked { message: String },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        // Alternate formatting keeps the whole context chain
        Self::Failed {
            message: format!("{:#}", e),
        }
    }
}

impl From<SerializationError> for HandlerError {
    fn from(e: SerializationError) -> Self {
        Self::Failed {
            message: e.to_string(),
        }
    }
}

/// Non-fatal errors raised while the consumer is polling.
///
/// These are delivered to the consumer's error handler; none of them stop the loop.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Failed to receive messages: {0}")]
    Receive(#[source] QueueError),

    #[error("Handler failed for message {message_id}: {error}")]
    Handler {
        message_id: MessageId,
        #[source]
        error: HandlerError,
    },

    #[error("Failed to delete message {message_id}: {error}")]
    Delete {
        message_id: MessageId,
        receipt_handle: ReceiptHandle,
        #[source]
        error: QueueError,
    },
}

impl ConsumerError {
    /// Id of the message the error relates to, if any
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Receive(_) => None,
            Self::Handler { message_id, .. } | Self::Delete { message_id, .. } => Some(message_id),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
