//! Client traits and implementations for queue operations.

use crate::error::QueueError;
use crate::message::{
    DeleteOutcome, Message, MessageId, QueueUrl, ReceiptHandle, ReceiveOptions, ReceivedMessage,
};
use crate::provider::{ProviderConfig, ProviderType};
use crate::providers::{AwsSqsProvider, InMemoryProvider};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Interface implemented by specific queue backends (AWS SQS, in-memory)
///
/// Implementations translate each call into exactly one backend request and
/// never retry on their own.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Send single message
    async fn send_message(&self, queue: &QueueUrl, message: &Message)
        -> Result<MessageId, QueueError>;

    /// Receive up to `options.max_messages`, waiting at most `options.wait_time`
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete one delivery of a message.
    ///
    /// Returns `QueueError::MessageNotFound` when the receipt is stale.
    async fn delete_message(&self, queue: &QueueUrl, receipt: &ReceiptHandle)
        -> Result<(), QueueError>;

    /// Delete every message in the queue
    async fn purge_queue(&self, queue: &QueueUrl) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Largest message (body plus attributes) the backend accepts
    fn max_message_size(&self) -> usize {
        self.provider_type().max_message_size()
    }
}

/// Immutable address of a queue together with the backend used to reach it
#[derive(Clone)]
pub struct QueueEndpoint {
    url: QueueUrl,
    provider: Arc<dyn QueueProvider>,
}

impl QueueEndpoint {
    pub fn new(url: QueueUrl, provider: Arc<dyn QueueProvider>) -> Self {
        Self { url, provider }
    }

    pub fn url(&self) -> &QueueUrl {
        &self.url
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }
}

impl std::fmt::Debug for QueueEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEndpoint")
            .field("url", &self.url)
            .field("provider", &self.provider.provider_type())
            .finish()
    }
}

/// Client bound to a single queue.
///
/// Cloning is cheap: clones share the same endpoint and backend.
#[derive(Debug, Clone)]
pub struct QueueClient {
    endpoint: QueueEndpoint,
}

impl QueueClient {
    /// Create a client for `url` on top of an existing provider
    pub fn new(url: QueueUrl, provider: Arc<dyn QueueProvider>) -> Self {
        Self {
            endpoint: QueueEndpoint::new(url, provider),
        }
    }

    pub fn endpoint(&self) -> &QueueEndpoint {
        &self.endpoint
    }

    pub fn queue_url(&self) -> &QueueUrl {
        &self.endpoint.url
    }

    /// Send a message, returning the id assigned by the backend.
    ///
    /// The message is validated against the backend limits first; an invalid
    /// message is rejected without contacting the backend.
    pub async fn send(&self, message: Message) -> Result<MessageId, QueueError> {
        message.validate(self.endpoint.provider.max_message_size())?;

        let message_id = self
            .endpoint
            .provider
            .send_message(&self.endpoint.url, &message)
            .await?;

        debug!(
            queue = %self.endpoint.url,
            message_id = %message_id,
            size = message.body.len(),
            "Message sent"
        );
        Ok(message_id)
    }

    /// Send the JSON encoding of `value`, optionally delayed
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        delay: Duration,
    ) -> Result<MessageId, QueueError> {
        let message = Message::json(value)?.with_delay(delay);
        self.send(message).await
    }

    /// Receive whatever is available, up to the long-poll window.
    ///
    /// An empty vector is a normal outcome.
    pub async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<ReceivedMessage>, QueueError> {
        options.validate()?;

        let messages = self
            .endpoint
            .provider
            .receive_messages(&self.endpoint.url, options)
            .await?;

        debug!(
            queue = %self.endpoint.url,
            count = messages.len(),
            "Messages received"
        );
        Ok(messages)
    }

    /// Delete a received message. Deleting twice, or after the receipt has
    /// expired, yields `DeleteOutcome::NotFound`.
    pub async fn delete(&self, receipt: &ReceiptHandle) -> Result<DeleteOutcome, QueueError> {
        match self
            .endpoint
            .provider
            .delete_message(&self.endpoint.url, receipt)
            .await
        {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(QueueError::MessageNotFound { .. }) => {
                debug!(
                    queue = %self.endpoint.url,
                    receipt = %receipt,
                    "Message already deleted or receipt expired"
                );
                Ok(DeleteOutcome::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// DANGER: deletes all messages in the queue. Irreversible.
    ///
    /// Intended for administrative use; the polling consumer never calls it.
    pub async fn purge(&self) -> Result<(), QueueError> {
        warn!(queue = %self.endpoint.url, "Purging all messages from queue");
        self.endpoint.provider.purge_queue(&self.endpoint.url).await
    }
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration
    pub async fn create_client(
        url: QueueUrl,
        config: &ProviderConfig,
    ) -> Result<QueueClient, QueueError> {
        let provider: Arc<dyn QueueProvider> = match config {
            ProviderConfig::InMemory(in_memory_config) => {
                Arc::new(InMemoryProvider::new(in_memory_config.clone()))
            }
            ProviderConfig::AwsSqs(aws_config) => {
                Arc::new(AwsSqsProvider::new(aws_config.clone()).await?)
            }
        };

        Ok(QueueClient::new(url, provider))
    }

    /// Create test client with in-memory provider
    pub fn create_test_client(url: QueueUrl) -> QueueClient {
        QueueClient::new(url, Arc::new(InMemoryProvider::default()))
    }
}
