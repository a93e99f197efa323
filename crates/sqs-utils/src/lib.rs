//! # SQS Utils
//!
//! Client and long-polling consumer for AWS SQS queues, with an in-memory
//! backend for tests and local development.
//!
//! This library provides:
//! - A [`QueueClient`] for sending, receiving, deleting and purging messages
//! - A [`PollingConsumer`] that runs a background receive/handle/delete loop
//! - Provider-agnostic queue operations behind the [`QueueProvider`] trait
//! - Layered [`Settings`] loading from files and the environment
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue and consumer operations
//! - [`message`] - Message structures, receipt handles and receive options
//! - [`provider`] - Provider types and configuration
//! - [`providers`] - AWS SQS and in-memory backends
//! - [`client`] - Provider trait and the queue client
//! - [`consumer`] - Polling consumer and message handlers
//! - [`backoff`] - Backoff between failed receives
//! - [`settings`] - Settings loading
//!
//! ## Example
//!
//! ```rust
//! use sqs_utils::{DeleteOutcome, Message, QueueClientFactory, ReceiveOptions};
//!
//! # async fn example() -> Result<(), sqs_utils::QueueError> {
//! let client = QueueClientFactory::create_test_client("orders".parse()?);
//!
//! client.send(Message::new("hello")).await?;
//! let received = client.receive(&ReceiveOptions::new()).await?;
//! assert_eq!(received[0].body_str()?, "hello");
//!
//! let outcome = client.delete(&received[0].receipt_handle).await?;
//! assert_eq!(outcome, DeleteOutcome::Deleted);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod consumer;
mod duration_serde;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod settings;

// Re-export commonly used types at crate root for convenience
pub use backoff::BackoffPolicy;
pub use client::{QueueClient, QueueClientFactory, QueueEndpoint, QueueProvider};
pub use consumer::{
    handler_fn, ConsumerConfig, ConsumerState, ErrorHandler, HandlerFn, MessageHandler,
    PollingConsumer,
};
pub use error::{
    ConfigurationError, ConsumerError, ErrorCategory, HandlerError, QueueError,
    SerializationError, ValidationError,
};
pub use message::{
    DeleteOutcome, Message, MessageId, QueueUrl, ReceiptHandle, ReceiveOptions, ReceivedMessage,
    Timestamp,
};
pub use provider::{AwsSqsConfig, InMemoryConfig, ProviderConfig, ProviderType};
pub use providers::{AwsSqsProvider, InMemoryProvider};
pub use settings::Settings;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
