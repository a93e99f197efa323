//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue implementation that:
//! - Implements visibility timeouts and delayed delivery
//! - Tracks receive counts across redeliveries
//! - Supports long polling, woken early by sends
//! - Provides thread-safe concurrent access
//!
//! Receipt handles are regenerated on every delivery, so a receipt from an
//! earlier delivery no longer deletes the message once it has been received
//! again.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{
    Message, MessageId, QueueUrl, ReceiptHandle, ReceiveOptions, ReceivedMessage, Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueUrl, InMemoryQueue>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
        }
    }

    /// Get or create a queue
    fn get_or_create_queue(&mut self, queue: &QueueUrl) -> &mut InMemoryQueue {
        self.queues.entry(queue.clone()).or_default()
    }
}

/// Internal state for a single queue; messages are kept in send order
#[derive(Default)]
struct InMemoryQueue {
    messages: Vec<StoredMessage>,
}

impl InMemoryQueue {
    /// Hand out up to `options.max_messages` visible messages, hiding each for
    /// the visibility timeout
    fn take_visible(&mut self, options: &ReceiveOptions, now: Instant) -> Vec<ReceivedMessage> {
        let limit = options.max_messages as usize;

        self.messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(limit)
            .map(|m| m.deliver(now, options))
            .collect()
    }

    /// Earliest instant at which a currently hidden message becomes visible
    fn next_visible_at(&self, now: Instant) -> Option<Instant> {
        self.messages
            .iter()
            .map(|m| m.visible_at)
            .filter(|at| *at > now)
            .min()
    }
}

/// A message stored in the queue with metadata
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, String>,
    sent_at: Timestamp,
    visible_at: Instant,
    receive_count: u32,
    /// Receipt of the most recent delivery
    receipt: Option<String>,
}

impl StoredMessage {
    fn from_message(message: &Message, message_id: MessageId, now: Instant) -> Self {
        Self {
            message_id,
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            sent_at: Timestamp::now(),
            visible_at: now + message.delay,
            receive_count: 0,
            receipt: None,
        }
    }

    fn deliver(&mut self, now: Instant, options: &ReceiveOptions) -> ReceivedMessage {
        let receipt = uuid::Uuid::new_v4().to_string();

        self.receive_count += 1;
        self.visible_at = now + options.visibility_timeout;
        self.receipt = Some(receipt.clone());

        ReceivedMessage {
            message_id: self.message_id.clone(),
            receipt_handle: ReceiptHandle::new(receipt, ProviderType::InMemory),
            body: self.body.clone(),
            attributes: self.attributes.clone(),
            receive_count: self.receive_count,
            sent_at: Some(self.sent_at.clone()),
        }
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
///
/// Queues are created on first use.
#[derive(Clone)]
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
    sent: Arc<Notify>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config))),
            sent: Arc::new(Notify::new()),
        }
    }

    /// Number of messages in the queue, including those currently hidden
    pub fn message_count(&self, queue: &QueueUrl) -> usize {
        self.read()
            .queues
            .get(queue)
            .map_or(0, |q| q.messages.len())
    }

    // A panic while holding the lock cannot leave the storage half-updated,
    // so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, QueueStorage> {
        self.storage.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueStorage> {
        self.storage.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueUrl,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let message_id = MessageId::new();
        {
            let mut storage = self.write();
            let max_queue_size = storage.config.max_queue_size;
            let target = storage.get_or_create_queue(queue);

            if target.messages.len() >= max_queue_size {
                return Err(QueueError::ProviderError {
                    provider: ProviderType::InMemory.to_string(),
                    code: "QueueFull".to_string(),
                    message: format!("queue holds the maximum of {} messages", max_queue_size),
                });
            }

            target.messages.push(StoredMessage::from_message(
                message,
                message_id.clone(),
                Instant::now(),
            ));
        }

        self.sent.notify_waiters();
        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + options.wait_time;

        loop {
            // Registered before inspecting the queue so a concurrent send is not missed
            let sent = self.sent.notified();

            let now = Instant::now();
            let (batch, next_visible_at) = {
                let mut storage = self.write();
                let target = storage.get_or_create_queue(queue);
                let batch = target.take_visible(options, now);
                let next = target.next_visible_at(now);
                (batch, next)
            };

            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }

            let wake_at = next_visible_at.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = sent => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut storage = self.write();
        let target = storage.get_or_create_queue(queue);

        let position = target
            .messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt.handle()));

        match position {
            Some(index) => {
                target.messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            }),
        }
    }

    async fn purge_queue(&self, queue: &QueueUrl) -> Result<(), QueueError> {
        let mut storage = self.write();
        storage.get_or_create_queue(queue).messages.clear();
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_message_size(&self) -> usize {
        self.read().config.max_message_size
    }
}
