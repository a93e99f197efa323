//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sqs_utils::{
    InMemoryProvider, Message, MessageId, ProviderType, QueueClient, QueueError, QueueProvider,
    QueueUrl, ReceiptHandle, ReceiveOptions, ReceivedMessage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory backend that records how many receives were issued
#[derive(Default)]
pub struct SpyProvider {
    pub inner: InMemoryProvider,
    pub receives: AtomicUsize,
}

impl SpyProvider {
    pub fn receives(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueProvider for SpyProvider {
    async fn send_message(
        &self,
        queue: &QueueUrl,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        self.inner.send_message(queue, message).await
    }

    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        self.inner.receive_messages(queue, options).await
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.inner.delete_message(queue, receipt).await
    }

    async fn purge_queue(&self, queue: &QueueUrl) -> Result<(), QueueError> {
        self.inner.purge_queue(queue).await
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

pub fn spy_client(queue: &str) -> (Arc<SpyProvider>, QueueClient) {
    let provider = Arc::new(SpyProvider::default());
    let client = QueueClient::new(queue.parse().unwrap(), provider.clone());
    (provider, client)
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
