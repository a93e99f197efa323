//! Tests for the polling consumer.

use super::*;
use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueUrl, ReceiptHandle};
use crate::provider::ProviderType;
use crate::providers::InMemoryProvider;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// ============================================================================
// Test Helpers
// ============================================================================

/// In-memory provider that counts calls and can be told to fail
#[derive(Default)]
struct TestProvider {
    inner: InMemoryProvider,
    receives: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_receive: AtomicBool,
    fail_delete: AtomicBool,
}

#[async_trait]
impl QueueProvider for TestProvider {
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
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(QueueError::ConnectionFailed {
                message: "connection refused".to_string(),
            });
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        // The consumer drops this future when it stops mid-poll
        let _in_flight = InFlight(&self.in_flight);
        self.inner.receive_messages(queue, options).await
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(QueueError::Timeout {
                message: "delete timed out".to_string(),
            });
        }
        self.inner.delete_message(queue, receipt).await
    }

    async fn purge_queue(&self, queue: &QueueUrl) -> Result<(), QueueError> {
        self.inner.purge_queue(queue).await
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn setup() -> (Arc<TestProvider>, QueueClient) {
    let provider = Arc::new(TestProvider::default());
    let url: QueueUrl = "test-queue".parse().unwrap();
    let client = QueueClient::new(url, provider.clone());
    (provider, client)
}

fn fast_config() -> ConsumerConfig {
    ConsumerConfig::new()
        .with_wait_time(Duration::from_millis(20))
        .with_visibility_timeout(Duration::from_secs(30))
        .with_error_backoff(
            BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(20))
                .without_jitter(),
        )
}

/// Handler that counts invocations and always succeeds or always fails
fn counting_handler(calls: Arc<AtomicUsize>, succeed: bool) -> impl MessageHandler {
    handler_fn(move |_message| {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(if succeed {
            Ok(())
        } else {
            Err(HandlerError::failed("rejected"))
        })
    })
}

fn collect_errors() -> (Arc<Mutex<Vec<ConsumerError>>>, impl Fn(ConsumerError) + Send + Sync + 'static) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    (errors, move |error| sink.lock().unwrap().push(error))
}

/// Poll `condition` until it holds, failing the test after two seconds
async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Configuration Tests
// ============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConsumerConfig::default();

        assert_eq!(config.batch_size, 1);
        assert_eq!(config.visibility_timeout, Duration::from_secs(300));
        assert_eq!(config.wait_time, Duration::from_secs(20));
        assert_eq!(config.handler_timeout, None);
        assert_eq!(config.concurrency, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_receive_options_follow_config() {
        let options = ConsumerConfig::new()
            .with_batch_size(10)
            .with_visibility_timeout(Duration::from_secs(60))
            .receive_options();

        assert_eq!(options.max_messages, 10);
        assert_eq!(options.visibility_timeout, Duration::from_secs(60));
        assert_eq!(options.wait_time, Duration::from_secs(20));
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let cases = [
            ConsumerConfig::new().with_batch_size(0),
            ConsumerConfig::new().with_batch_size(11),
            ConsumerConfig::new().with_wait_time(Duration::from_secs(21)),
            ConsumerConfig::new().with_concurrency(0),
            ConsumerConfig::new().with_handler_timeout(Duration::ZERO),
            ConsumerConfig::new().with_error_backoff(BackoffPolicy::new(
                Duration::from_secs(5),
                Duration::from_secs(1),
            )),
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigurationError::Invalid { .. })),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_config_deserializes_with_unit_suffixes() {
        let json = r#"{
            "batch_size": 5,
            "visibility_timeout_seconds": 60,
            "wait_time_seconds": 10,
            "handler_timeout_ms": 1500,
            "error_backoff": { "initial_delay_ms": 200 }
        }"#;
        let config: ConsumerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.batch_size, 5);
        assert_eq!(config.visibility_timeout, Duration::from_secs(60));
        assert_eq!(config.wait_time, Duration::from_secs(10));
        assert_eq!(config.handler_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.error_backoff.initial_delay, Duration::from_millis(200));
        assert_eq!(config.error_backoff.max_delay, Duration::from_secs(30));
        assert_eq!(config.concurrency, 1);
    }
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_without_handler_fails_and_stays_idle() {
        let (_provider, client) = setup();
        let consumer = PollingConsumer::new(client, fast_config());

        match consumer.start() {
            Err(ConfigurationError::Missing { key }) => assert_eq!(key, "handle_message"),
            other => panic!("Expected missing handler error, got: {:?}", other),
        }
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[tokio::test]
    async fn test_start_with_invalid_config_fails_and_stays_idle() {
        let (provider, client) = setup();
        let consumer = PollingConsumer::new(client, fast_config().with_batch_size(0))
            .with_handler(counting_handler(Arc::new(AtomicUsize::new(0)), true));

        assert!(matches!(
            consumer.start(),
            Err(ConfigurationError::Invalid { .. })
        ));
        assert_eq!(consumer.state(), ConsumerState::Idle);
        assert_eq!(provider.receives.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let (_provider, client) = setup();
        let consumer = PollingConsumer::new(client, fast_config())
            .with_handler(counting_handler(Arc::new(AtomicUsize::new(0)), true));

        assert!(matches!(
            consumer.start(),
            Err(ConfigurationError::Invalid { .. })
        ));
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[tokio::test]
    async fn test_stop_on_idle_consumer_is_noop() {
        let (_provider, client) = setup();
        let consumer = PollingConsumer::new(client, fast_config());

        consumer.stop();
        consumer.stop_and_wait().await;

        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[tokio::test]
    async fn test_start_twice_runs_single_loop() {
        let (provider, client) = setup();
        let consumer = PollingConsumer::new(client, fast_config())
            .with_handler(counting_handler(Arc::new(AtomicUsize::new(0)), true));

        consumer.start().unwrap();
        consumer.start().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Polling);
        assert!(consumer.is_polling());

        wait_until(|| provider.receives.load(Ordering::SeqCst) >= 5).await;
        consumer.stop_and_wait().await;

        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_reaches_idle_without_further_receives() {
        let (provider, client) = setup();
        let consumer = PollingConsumer::new(
            client,
            fast_config().with_wait_time(Duration::from_secs(20)),
        )
        .with_handler(counting_handler(Arc::new(AtomicUsize::new(0)), true));

        consumer.start().unwrap();
        // The first receive is now parked in a 20 second long poll
        wait_until(|| provider.in_flight.load(Ordering::SeqCst) == 1).await;

        let stopped_at = tokio::time::Instant::now();
        consumer.stop();
        assert_eq!(consumer.state(), ConsumerState::Stopping);
        consumer.stop_and_wait().await;

        assert!(stopped_at.elapsed() < Duration::from_secs(1));
        assert_eq!(consumer.state(), ConsumerState::Idle);

        let receives = provider.receives.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.receives.load(Ordering::SeqCst), receives);
    }

    #[tokio::test]
    async fn test_restart_while_stopping_waits_for_previous_loop() {
        let (provider, client) = setup();
        let consumer = PollingConsumer::new(client, fast_config())
            .with_handler(counting_handler(Arc::new(AtomicUsize::new(0)), true));

        consumer.start().unwrap();
        wait_until(|| provider.receives.load(Ordering::SeqCst) >= 1).await;

        consumer.stop();
        consumer.start().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Polling);

        let receives = provider.receives.load(Ordering::SeqCst);
        wait_until(|| provider.receives.load(Ordering::SeqCst) > receives + 3).await;
        assert_eq!(consumer.state(), ConsumerState::Polling);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);

        consumer.stop_and_wait().await;
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[tokio::test]
    async fn test_consumer_can_restart_after_stop() {
        let (provider, client) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let consumer = PollingConsumer::new(client.clone(), fast_config())
            .with_handler(counting_handler(calls.clone(), true));

        consumer.start().unwrap();
        consumer.stop_and_wait().await;

        client.send(Message::new("after restart")).await.unwrap();
        consumer.start().unwrap();
        wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
        consumer.stop_and_wait().await;

        assert_eq!(provider.inner.message_count(client.queue_url()), 0);
    }
}

// ============================================================================
// Message Handling Tests
// ============================================================================

mod handling_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_handler_deletes_message() {
        let (provider, client) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let (errors, error_handler) = collect_errors();
        let consumer = PollingConsumer::new(client.clone(), fast_config())
            .with_handler(counting_handler(calls.clone(), true))
            .with_error_handler(error_handler);

        client.send(Message::new("work")).await.unwrap();
        consumer.start().unwrap();

        wait_until(|| provider.inner.message_count(client.queue_url()) == 0).await;
        consumer.stop_and_wait().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handler_receives_message_content() {
        let (_provider, client) = setup();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&bodies);
        let consumer = PollingConsumer::new(client.clone(), fast_config().with_batch_size(10))
            .with_handler(handler_fn(move |message: ReceivedMessage| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(message.body_str()?.to_string());
                    Ok::<(), HandlerError>(())
                }
            }));

        for body in ["one", "two", "three"] {
            client.send(Message::new(body)).await.unwrap();
        }
        consumer.start().unwrap();

        wait_until(|| bodies.lock().unwrap().len() == 3).await;
        consumer.stop_and_wait().await;

        assert_eq!(*bodies.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_failing_handler_keeps_message_and_reports_each_failure() {
        let (provider, client) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let (errors, error_handler) = collect_errors();
        let consumer = PollingConsumer::new(
            client.clone(),
            fast_config().with_visibility_timeout(Duration::ZERO),
        )
        .with_handler(counting_handler(calls.clone(), false))
        .with_error_handler(error_handler);

        client.send(Message::new("poison")).await.unwrap();
        consumer.start().unwrap();

        wait_until(|| calls.load(Ordering::SeqCst) >= 3).await;
        consumer.stop_and_wait().await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), calls.load(Ordering::SeqCst));
        assert!(errors.iter().all(|e| matches!(
            e,
            ConsumerError::Handler {
                error: HandlerError::Failed { .. },
                ..
            }
        )));
        assert_eq!(provider.inner.message_count(client.queue_url()), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_reported_and_loop_survives() {
        let (provider, client) = setup();
        let (errors, error_handler) = collect_errors();
        let consumer = PollingConsumer::new(client.clone(), fast_config())
            .with_handler(handler_fn(|message: ReceivedMessage| async move {
                if message.body_str()? == "boom" {
                    panic!("handler exploded");
                }
                Ok::<(), HandlerError>(())
            }))
            .with_error_handler(error_handler);

        client.send(Message::new("boom")).await.unwrap();
        client.send(Message::new("fine")).await.unwrap();
        consumer.start().unwrap();

        // The panicking message stays hidden; the other one is deleted
        wait_until(|| provider.inner.message_count(client.queue_url()) == 1).await;
        wait_until(|| !errors.lock().unwrap().is_empty()).await;
        consumer.stop_and_wait().await;

        let errors = errors.lock().unwrap();
        match &errors[0] {
            ConsumerError::Handler {
                error: HandlerError::Panicked { message },
                ..
            } => assert!(message.contains("handler exploded")),
            other => panic!("Expected panic report, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let (provider, client) = setup();
        let (errors, error_handler) = collect_errors();
        let consumer = PollingConsumer::new(
            client.clone(),
            fast_config().with_handler_timeout(Duration::from_millis(20)),
        )
        .with_handler(handler_fn(|_message| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<(), HandlerError>(())
        }))
        .with_error_handler(error_handler);

        client.send(Message::new("slow")).await.unwrap();
        consumer.start().unwrap();

        wait_until(|| !errors.lock().unwrap().is_empty()).await;
        consumer.stop_and_wait().await;

        assert!(matches!(
            errors.lock().unwrap()[0],
            ConsumerError::Handler {
                error: HandlerError::Timeout { .. },
                ..
            }
        ));
        assert_eq!(provider.inner.message_count(client.queue_url()), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_is_reported() {
        let (provider, client) = setup();
        provider.fail_delete.store(true, Ordering::SeqCst);
        let (errors, error_handler) = collect_errors();
        let consumer = PollingConsumer::new(client.clone(), fast_config())
            .with_handler(counting_handler(Arc::new(AtomicUsize::new(0)), true))
            .with_error_handler(error_handler);

        let message_id = client.send(Message::new("work")).await.unwrap();
        consumer.start().unwrap();

        wait_until(|| !errors.lock().unwrap().is_empty()).await;
        consumer.stop_and_wait().await;

        let errors = errors.lock().unwrap();
        match &errors[0] {
            ConsumerError::Delete {
                message_id: failed_id,
                error: QueueError::Timeout { .. },
                ..
            } => assert_eq!(failed_id, &message_id),
            other => panic!("Expected delete failure, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_failure_is_reported_and_retried() {
        let (provider, client) = setup();
        provider.fail_receive.store(true, Ordering::SeqCst);
        let calls = Arc::new(AtomicUsize::new(0));
        let (errors, error_handler) = collect_errors();
        let consumer = PollingConsumer::new(client.clone(), fast_config())
            .with_handler(counting_handler(calls.clone(), true))
            .with_error_handler(error_handler);

        client.send(Message::new("eventually")).await.unwrap();
        consumer.start().unwrap();

        wait_until(|| errors.lock().unwrap().len() >= 3).await;
        assert!(errors
            .lock()
            .unwrap()
            .iter()
            .all(|e| matches!(e, ConsumerError::Receive(QueueError::ConnectionFailed { .. }))));

        // The loop recovers once the backend does
        provider.fail_receive.store(false, Ordering::SeqCst);
        wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
        consumer.stop_and_wait().await;

        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff() {
        let (provider, client) = setup();
        provider.fail_receive.store(true, Ordering::SeqCst);
        let consumer = PollingConsumer::new(
            client,
            fast_config().with_error_backoff(
                BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(30))
                    .without_jitter(),
            ),
        )
        .with_handler(counting_handler(Arc::new(AtomicUsize::new(0)), true))
        .with_error_handler(|_| {});

        consumer.start().unwrap();
        wait_until(|| provider.receives.load(Ordering::SeqCst) == 1).await;

        let stopped_at = tokio::time::Instant::now();
        consumer.stop_and_wait().await;

        assert!(stopped_at.elapsed() < Duration::from_secs(1));
        assert_eq!(provider.receives.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_error_handler_keeps_loop_polling() {
        // Arrange
        let (provider, client) = setup();
        provider.fail_receive.store(true, Ordering::SeqCst);
        let calls = Arc::new(AtomicUsize::new(0));
        let consumer = PollingConsumer::new(client.clone(), fast_config())
            .with_handler(counting_handler(calls.clone(), true))
            .with_error_handler(|_| panic!("error sink exploded"));

        // Act
        consumer.start().unwrap();
        wait_until(|| provider.receives.load(Ordering::SeqCst) >= 3).await;

        // Assert
        assert!(consumer.is_polling());

        provider.fail_receive.store(false, Ordering::SeqCst);
        client.send(Message::new("after panics")).await.unwrap();
        wait_until(|| calls.load(Ordering::SeqCst) == 1).await;
        consumer.stop_and_wait().await;

        assert_eq!(provider.inner.message_count(client.queue_url()), 0);
    }

    #[tokio::test]
    async fn test_zero_wait_on_empty_queue_pauses_between_receives() {
        let (provider, client) = setup();
        let consumer = PollingConsumer::new(client, fast_config().with_wait_time(Duration::ZERO))
            .with_handler(counting_handler(Arc::new(AtomicUsize::new(0)), true));

        consumer.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        consumer.stop_and_wait().await;

        let receives = provider.receives.load(Ordering::SeqCst);
        assert!(receives >= 2, "loop stalled after {} receives", receives);
        assert!(receives < 50, "loop spun with {} receives", receives);
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_handlers_overlap_within_batch() {
        let (provider, client) = setup();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (handler_active, handler_peak) = (Arc::clone(&active), Arc::clone(&peak));

        let consumer = PollingConsumer::new(
            client.clone(),
            fast_config().with_batch_size(4).with_concurrency(4),
        )
        .with_handler(handler_fn(move |_message| {
            let active = Arc::clone(&handler_active);
            let peak = Arc::clone(&handler_peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        }));

        for i in 0..4 {
            client.send(Message::new(format!("job-{}", i))).await.unwrap();
        }
        consumer.start().unwrap();

        wait_until(|| provider.inner.message_count(client.queue_url()) == 0).await;
        consumer.stop_and_wait().await;

        assert!(peak.load(Ordering::SeqCst) > 1);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_sibling_deletes() {
        let (provider, client) = setup();
        let (errors, error_handler) = collect_errors();
        let consumer = PollingConsumer::new(
            client.clone(),
            fast_config().with_batch_size(3).with_concurrency(3),
        )
        .with_handler(handler_fn(|message: ReceivedMessage| async move {
            if message.body_str()? == "bad" {
                return Err(HandlerError::failed("bad payload"));
            }
            Ok::<(), HandlerError>(())
        }))
        .with_error_handler(error_handler);

        for body in ["good-1", "bad", "good-2"] {
            client.send(Message::new(body)).await.unwrap();
        }
        consumer.start().unwrap();

        wait_until(|| provider.inner.message_count(client.queue_url()) == 1).await;
        wait_until(|| errors.lock().unwrap().len() == 1).await;
        consumer.stop_and_wait().await;

        let failed = client.receive(&ReceiveOptions::new()).await.unwrap();
        // Still hidden by the consumer's 30s visibility timeout
        assert!(failed.is_empty());
        assert_eq!(provider.inner.message_count(client.queue_url()), 1);
    }
}
