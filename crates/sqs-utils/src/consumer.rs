//! Long-polling consumer that dispatches queue messages to a handler.
//!
//! A [`PollingConsumer`] owns at most one background poll loop. The loop
//! repeatedly receives a batch, runs the handler for each message, and deletes
//! the messages whose handler succeeded. Messages whose handler failed are left
//! on the queue and reappear once their visibility timeout expires.
//!
//! ```text
//!            start()                stop()
//!   Idle ─────────────▶ Polling ─────────────▶ Stopping ──▶ Idle
//!    ▲                                            │   (loop exits)
//!    └────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use sqs_utils::{handler_fn, ConsumerConfig, HandlerError, PollingConsumer, QueueClientFactory};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = QueueClientFactory::create_test_client("orders".parse()?);
//!
//! let consumer = PollingConsumer::new(client, ConsumerConfig::default())
//!     .with_handler(handler_fn(|message| async move {
//!         println!("got {}", message.body_str()?);
//!         Ok::<(), HandlerError>(())
//!     }))
//!     .with_error_handler(|error| eprintln!("consumer error: {}", error));
//!
//! consumer.start()?;
//! tokio::time::sleep(Duration::from_secs(60)).await;
//! consumer.stop_and_wait().await;
//! # Ok(())
//! # }
//! ```

use crate::backoff::{BackoffPolicy, BackoffState};
use crate::client::QueueClient;
use crate::error::{ConfigurationError, ConsumerError, HandlerError};
use crate::message::{DeleteOutcome, ReceiveOptions, ReceivedMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

// ============================================================================
// Handler Traits
// ============================================================================

/// Processes one received message.
///
/// Returning `Ok` deletes the message from the queue. Returning `Err`, timing
/// out, or panicking leaves it on the queue for redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, message: ReceivedMessage) -> Result<(), HandlerError>;
}

/// [`MessageHandler`] backed by an async closure, created by [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Adapt an async closure into a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle_message(&self, message: ReceivedMessage) -> Result<(), HandlerError> {
        (self.f)(message).await
    }
}

/// Callback receiving every non-fatal consumer error
pub type ErrorHandler = Arc<dyn Fn(ConsumerError) + Send + Sync>;

// ============================================================================
// Configuration
// ============================================================================

/// Polling consumer configuration
///
/// Durations are written in config files as `*_seconds` or `*_ms` integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Messages requested per receive (1-10)
    pub batch_size: u32,

    /// How long a received message stays hidden while being handled
    #[serde(
        rename = "visibility_timeout_seconds",
        with = "crate::duration_serde::seconds"
    )]
    pub visibility_timeout: Duration,

    /// Long-poll window for each receive (at most 20 seconds)
    #[serde(rename = "wait_time_seconds", with = "crate::duration_serde::seconds")]
    pub wait_time: Duration,

    /// Backoff between consecutive failed receives
    pub error_backoff: BackoffPolicy,

    /// Per-message handler time limit; unlimited when absent
    #[serde(
        rename = "handler_timeout_ms",
        with = "crate::duration_serde::option_millis"
    )]
    pub handler_timeout: Option<Duration>,

    /// Handlers running at once within a batch; 1 handles messages in order
    pub concurrency: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            visibility_timeout: Duration::from_secs(300),
            wait_time: Duration::from_secs(20),
            error_backoff: BackoffPolicy::default(),
            handler_timeout: None,
            concurrency: 1,
        }
    }
}

impl ConsumerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = wait;
        self
    }

    pub fn with_error_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Receive options used for every poll
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions::new()
            .with_max_messages(self.batch_size)
            .with_visibility_timeout(self.visibility_timeout)
            .with_wait_time(self.wait_time)
    }

    /// Check that every value is within the range the consumer supports
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |e: crate::error::ValidationError| ConfigurationError::Invalid {
            message: e.to_string(),
        };

        self.receive_options().validate().map_err(invalid)?;
        self.error_backoff.validate().map_err(invalid)?;

        if self.concurrency == 0 {
            return Err(ConfigurationError::Invalid {
                message: "concurrency must be at least 1".to_string(),
            });
        }

        if self.handler_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigurationError::Invalid {
                message: "handler_timeout_ms must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Consumer State
// ============================================================================

/// Lifecycle state of a [`PollingConsumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// No poll loop is running
    Idle,
    /// The poll loop is running
    Polling,
    /// Stop was requested; the loop is finishing its current batch
    Stopping,
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Polling => write!(f, "polling"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Shared between the consumer handle and its loop task. Never locked across an await.
struct LoopControl {
    state: ConsumerState,
    /// Incremented for every loop started
    generation: u64,
    stop_tx: Option<watch::Sender<bool>>,
    /// Becomes `true` once the most recent loop has exited
    done_rx: Option<watch::Receiver<bool>>,
}

fn lock(control: &Mutex<LoopControl>) -> MutexGuard<'_, LoopControl> {
    // State updates are single assignments; a poisoned lock is still consistent
    control.lock().unwrap_or_else(|e| e.into_inner())
}

/// Resets the state when a loop exits, including by panic
struct LoopGuard {
    control: Arc<Mutex<LoopControl>>,
    generation: u64,
    done_tx: watch::Sender<bool>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        {
            let mut control = lock(&self.control);
            // A newer loop owns the state once it has been started
            if control.generation == self.generation {
                control.state = ConsumerState::Idle;
                control.stop_tx = None;
            }
        }
        self.done_tx.send_replace(true);
    }
}

// ============================================================================
// PollingConsumer
// ============================================================================

/// Background long-polling consumer bound to one queue
pub struct PollingConsumer {
    client: QueueClient,
    config: ConsumerConfig,
    handler: Option<Arc<dyn MessageHandler>>,
    error_handler: Option<ErrorHandler>,
    control: Arc<Mutex<LoopControl>>,
}

impl PollingConsumer {
    /// Create an idle consumer. A handler must be set before [`start`](Self::start).
    pub fn new(client: QueueClient, config: ConsumerConfig) -> Self {
        Self {
            client,
            config,
            handler: None,
            error_handler: None,
            control: Arc::new(Mutex::new(LoopControl {
                state: ConsumerState::Idle,
                generation: 0,
                stop_tx: None,
                done_rx: None,
            })),
        }
    }

    pub fn with_handler(self, handler: impl MessageHandler + 'static) -> Self {
        self.with_shared_handler(Arc::new(handler))
    }

    pub fn with_shared_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Receive errors the loop recovers from. Without one they are logged.
    pub fn with_error_handler<F>(mut self, error_handler: F) -> Self
    where
        F: Fn(ConsumerError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(error_handler));
        self
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn state(&self) -> ConsumerState {
        lock(&self.control).state
    }

    pub fn is_polling(&self) -> bool {
        self.state() == ConsumerState::Polling
    }

    /// Start the background poll loop on the current tokio runtime.
    ///
    /// Calling `start` while already polling does nothing. Calling it while a
    /// previous loop is stopping starts a new loop that waits for the old
    /// one to exit before its first receive.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` and stays idle when no handler was set,
    /// the configuration is out of range, or no tokio runtime is running.
    pub fn start(&self) -> Result<(), ConfigurationError> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| ConfigurationError::Missing {
                key: "handle_message".to_string(),
            })?;
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigurationError::Invalid {
            message: "PollingConsumer::start must be called within a tokio runtime".to_string(),
        })?;

        let mut control = lock(&self.control);
        if control.state == ConsumerState::Polling {
            debug!(queue = %self.client.queue_url(), "Consumer already polling");
            return Ok(());
        }

        let previous = match control.state {
            ConsumerState::Stopping => control.done_rx.clone(),
            _ => None,
        };

        control.generation += 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let guard = LoopGuard {
            control: Arc::clone(&self.control),
            generation: control.generation,
            done_tx,
        };
        let poll_loop = PollLoop {
            client: self.client.clone(),
            config: self.config.clone(),
            handler,
            error_handler: self.error_handler.clone(),
        };

        runtime.spawn(async move {
            let _guard = guard;
            if let Some(mut previous) = previous {
                // Err means the old loop's guard is gone, so it has exited as well
                let _ = previous.wait_for(|done| *done).await;
            }
            poll_loop.run(stop_rx).await;
        });

        control.state = ConsumerState::Polling;
        control.stop_tx = Some(stop_tx);
        control.done_rx = Some(done_rx);

        info!(
            queue = %self.client.queue_url(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Consumer started"
        );
        Ok(())
    }

    /// Request the poll loop to stop. Does not wait.
    ///
    /// An in-flight receive is abandoned; a batch already being handled runs
    /// to completion. Stopping an idle consumer does nothing.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        if control.state != ConsumerState::Polling {
            debug!(queue = %self.client.queue_url(), state = %control.state, "Consumer not polling");
            return;
        }

        control.state = ConsumerState::Stopping;
        if let Some(stop_tx) = &control.stop_tx {
            stop_tx.send_replace(true);
        }
        info!(queue = %self.client.queue_url(), "Consumer stop requested");
    }

    /// Stop and wait until the poll loop has exited
    pub async fn stop_and_wait(&self) {
        self.stop();

        let done = lock(&self.control).done_rx.clone();
        if let Some(mut done) = done {
            let _ = done.wait_for(|done| *done).await;
        }
    }
}

impl Drop for PollingConsumer {
    fn drop(&mut self) {
        // The loop task would otherwise keep polling with no owner
        if let Some(stop_tx) = &lock(&self.control).stop_tx {
            stop_tx.send_replace(true);
        }
    }
}

impl std::fmt::Debug for PollingConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingConsumer")
            .field("queue", self.client.queue_url())
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Poll Loop
// ============================================================================

/// Pause after an empty receive when the wait window is zero
const EMPTY_POLL_DELAY: Duration = Duration::from_millis(10);

#[derive(Clone)]
struct PollLoop {
    client: QueueClient,
    config: ConsumerConfig,
    handler: Arc<dyn MessageHandler>,
    error_handler: Option<ErrorHandler>,
}

impl PollLoop {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let options = self.config.receive_options();
        let mut backoff = BackoffState::new();

        debug!(queue = %self.client.queue_url(), "Poll loop running");

        loop {
            let stopping = *stop.borrow();
            if stopping {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = stop.changed() => break,
                result = self.client.receive(&options) => result,
            };

            match received {
                Ok(messages) if messages.is_empty() => {
                    backoff.reset();
                    // A zero wait window returns immediately
                    if options.wait_time.is_zero() {
                        tokio::select! {
                            biased;
                            _ = stop.changed() => break,
                            _ = tokio::time::sleep(EMPTY_POLL_DELAY) => {}
                        }
                    }
                }
                Ok(messages) => {
                    backoff.reset();
                    debug!(
                        queue = %self.client.queue_url(),
                        count = messages.len(),
                        "Handling batch"
                    );
                    self.dispatch(messages).await;
                }
                Err(error) => {
                    let delay = backoff.next_delay(&self.config.error_backoff);
                    warn!(
                        queue = %self.client.queue_url(),
                        error = %error,
                        failures = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "Receive failed, backing off"
                    );
                    self.report(ConsumerError::Receive(error));

                    tokio::select! {
                        biased;
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(queue = %self.client.queue_url(), "Consumer stopped");
    }

    async fn dispatch(&self, messages: Vec<ReceivedMessage>) {
        if self.config.concurrency <= 1 {
            for message in messages {
                self.process(message).await;
            }
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        for message in messages {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let worker = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.process(message).await;
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(queue = %self.client.queue_url(), error = %e, "Message task failed");
            }
        }
    }

    /// Run the handler for one message and delete it on success
    async fn process(&self, message: ReceivedMessage) {
        let message_id = message.message_id.clone();
        let receipt_handle = message.receipt_handle.clone();
        let receive_count = message.receive_count;

        match self.invoke(message).await {
            Ok(()) => match self.client.delete(&receipt_handle).await {
                Ok(DeleteOutcome::Deleted) => {
                    debug!(
                        queue = %self.client.queue_url(),
                        message_id = %message_id,
                        "Message handled and deleted"
                    );
                }
                Ok(DeleteOutcome::NotFound) => {
                    warn!(
                        queue = %self.client.queue_url(),
                        message_id = %message_id,
                        "Receipt expired before delete, message may be delivered again"
                    );
                }
                Err(error) => self.report(ConsumerError::Delete {
                    message_id,
                    receipt_handle,
                    error,
                }),
            },
            Err(error) => {
                debug!(
                    queue = %self.client.queue_url(),
                    message_id = %message_id,
                    receive_count,
                    "Handler failed, message left for redelivery"
                );
                self.report(ConsumerError::Handler { message_id, error });
            }
        }
    }

    /// Run the handler on its own task so a panic is reported instead of
    /// unwinding through the loop
    async fn invoke(&self, message: ReceivedMessage) -> Result<(), HandlerError> {
        let handler = Arc::clone(&self.handler);
        let mut task = tokio::spawn(async move { handler.handle_message(message).await });

        let joined = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(HandlerError::Timeout { duration: limit });
                }
            },
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(HandlerError::Panicked {
                message: panic_message(e.into_panic()),
            }),
            Err(e) => Err(HandlerError::failed(e.to_string())),
        }
    }

    /// Hand an error to the error handler. A panicking error handler is
    /// logged and the loop carries on.
    fn report(&self, error: ConsumerError) {
        let Some(error_handler) = &self.error_handler else {
            error!(queue = %self.client.queue_url(), error = %error, "Consumer error");
            return;
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| error_handler(error))) {
            error!(
                queue = %self.client.queue_url(),
                panic = %panic_message(payload),
                "Error handler panicked"
            );
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
