//! Integration tests for the queue client
//!
//! These tests verify:
//! - Sent bodies are received unchanged
//! - Deleting twice reports `Deleted` then `NotFound`
//! - Purge empties the queue
//! - Unacknowledged messages are redelivered after their visibility timeout

mod common;

use sqs_utils::{DeleteOutcome, Message, QueueClientFactory, ReceiveOptions};
use std::time::Duration;

#[tokio::test]
async fn test_send_receive_round_trip_preserves_body_and_attributes() {
    // Arrange
    let client = QueueClientFactory::create_test_client("orders".parse().unwrap());
    let message = Message::new("{\"order\":1}").with_attribute("source", "integration");

    // Act
    let message_id = client.send(message).await.unwrap();
    let received = client.receive(&ReceiveOptions::new()).await.unwrap();

    // Assert
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message_id, message_id);
    assert_eq!(received[0].body_str().unwrap(), "{\"order\":1}");
    assert_eq!(received[0].attributes["source"], "integration");
}

#[tokio::test]
async fn test_delete_twice() {
    let client = QueueClientFactory::create_test_client("orders".parse().unwrap());
    client.send(Message::new("once")).await.unwrap();
    let received = client.receive(&ReceiveOptions::new()).await.unwrap();

    let receipt = &received[0].receipt_handle;
    assert_eq!(client.delete(receipt).await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(client.delete(receipt).await.unwrap(), DeleteOutcome::NotFound);
}

#[tokio::test]
async fn test_purge_then_receive_is_empty() {
    let client = QueueClientFactory::create_test_client("orders".parse().unwrap());
    for i in 0..5 {
        client.send(Message::new(format!("m{}", i))).await.unwrap();
    }

    client.purge().await.unwrap();

    let received = client
        .receive(&ReceiveOptions::new().with_max_messages(10))
        .await
        .unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_undeleted_message_redelivered_after_visibility_timeout() {
    let client = QueueClientFactory::create_test_client("orders".parse().unwrap());
    client.send(Message::new("retry me")).await.unwrap();
    let options = ReceiveOptions::new().with_visibility_timeout(Duration::from_millis(50));

    let first = client.receive(&options).await.unwrap();
    assert!(client.receive(&options).await.unwrap().is_empty());

    // A long poll picks the message up as soon as it becomes visible again
    let second = client
        .receive(&options.clone().with_wait_time(Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, first[0].message_id);
    assert_eq!(second[0].receive_count, 2);
    assert_eq!(
        client.delete(&first[0].receipt_handle).await.unwrap(),
        DeleteOutcome::NotFound
    );
    assert_eq!(
        client.delete(&second[0].receipt_handle).await.unwrap(),
        DeleteOutcome::Deleted
    );
}
