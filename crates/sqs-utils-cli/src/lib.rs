//! # SQS Utils CLI
//!
//! Command-line interface for working with a single SQS queue.
//!
//! This module provides CLI commands for:
//! - Sending messages from arguments, files or stdin
//! - Receiving and optionally deleting messages
//! - Deleting a message by receipt handle
//! - Purging a queue
//! - Running a polling consumer that prints every message it handles

use clap::{Parser, Subcommand};
use serde::Serialize;
use sqs_utils::{
    handler_fn, AwsSqsProvider, ConfigurationError, ConsumerError, DeleteOutcome, HandlerError,
    Message, PollingConsumer, QueueClient, QueueError, ReceiveOptions, ReceivedMessage, Settings,
};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// SQS Utils CLI - send, receive and consume SQS messages
#[derive(Parser, Debug)]
#[command(name = "sqs-utils")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send, receive and consume messages on an SQS queue")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SQS_UTILS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue URL, overriding `queue_url` from the configuration
    #[arg(short, long, global = true, env = "SQS_UTILS_QUEUE_URL")]
    pub queue_url: Option<String>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message
    Send {
        /// Message body; read from --file or stdin when omitted
        body: Option<String>,

        /// Read the message body from a file
        #[arg(short, long, conflicts_with = "body")]
        file: Option<PathBuf>,

        /// Message attribute as KEY=VALUE (repeatable)
        #[arg(short, long = "attribute", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,

        /// Delivery delay in seconds (0-900)
        #[arg(short, long, default_value = "0")]
        delay_seconds: u64,
    },

    /// Receive messages once and print them
    Receive {
        /// Maximum messages to return (1-10)
        #[arg(short, long, default_value = "1")]
        max_messages: u32,

        /// Long-poll wait in seconds (0-20)
        #[arg(short, long, default_value = "0")]
        wait_seconds: u64,

        /// Seconds the messages stay hidden from other consumers
        #[arg(short, long, default_value = "30")]
        visibility_seconds: u64,

        /// Delete each message after printing it
        #[arg(long)]
        delete: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a message by its receipt handle
    Delete {
        /// Receipt handle printed by `receive`
        receipt_handle: String,
    },

    /// Delete every message in the queue
    Purge {
        /// Confirm the irreversible purge
        #[arg(short, long)]
        yes: bool,
    },

    /// Run a polling consumer, printing and deleting each message
    Listen {
        /// Messages per receive, overriding the configuration
        #[arg(short, long)]
        batch_size: Option<u32>,

        /// Concurrent handlers, overriding the configuration
        #[arg(long)]
        concurrency: Option<usize>,

        /// Stop after this many messages have been handled
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One tab-separated line per message
    Text,
    /// One JSON object per line
    Json,
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command aborted: {message}")]
    Aborted { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 2,
            Self::Aborted { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let settings = Settings::load(cli.config.as_deref())?;
    let client = connect(&settings, cli.queue_url.as_deref()).await?;

    let stdout = std::io::stdout();
    execute(cli.command, &client, &settings, &mut stdout.lock()).await
}

/// Initialize logging based on CLI arguments. Logs go to stderr; stdout is
/// reserved for message output.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "sqs_utils={level},sqs_utils_cli={level}",
            level = cli.log_level
        ))
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::InvalidArgument {
        arg: "log-level".to_string(),
        message: e.to_string(),
    })
}

/// Build an SQS client for the configured queue
pub async fn connect(
    settings: &Settings,
    queue_url_override: Option<&str>,
) -> Result<QueueClient, CliError> {
    let queue_url = settings.resolve_queue_url(queue_url_override)?;
    let provider = AwsSqsProvider::new(settings.aws.clone()).await?;

    debug!(queue = %queue_url, "Connected to queue");
    Ok(QueueClient::new(queue_url, Arc::new(provider)))
}

/// Run one command against `client`, writing results to `out`
pub async fn execute(
    command: Commands,
    client: &QueueClient,
    settings: &Settings,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Commands::Send {
            body,
            file,
            attributes,
            delay_seconds,
        } => execute_send_command(client, body, file, attributes, delay_seconds, out).await,
        Commands::Receive {
            max_messages,
            wait_seconds,
            visibility_seconds,
            delete,
            format,
        } => {
            let options = ReceiveOptions::new()
                .with_max_messages(max_messages)
                .with_wait_time(Duration::from_secs(wait_seconds))
                .with_visibility_timeout(Duration::from_secs(visibility_seconds));
            execute_receive_command(client, &options, delete, format, out).await
        }
        Commands::Delete { receipt_handle } => {
            execute_delete_command(client, receipt_handle, out).await
        }
        Commands::Purge { yes } => execute_purge_command(client, yes, out).await,
        Commands::Listen {
            batch_size,
            concurrency,
            limit,
            format,
        } => {
            let mut config = settings.consumer.clone();
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            execute_listen_command(client, config, limit, format, out).await
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_send_command(
    client: &QueueClient,
    body: Option<String>,
    file: Option<PathBuf>,
    attributes: Vec<(String, String)>,
    delay_seconds: u64,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let body = match (body, file) {
        (Some(body), _) => body.into_bytes(),
        (None, Some(path)) => std::fs::read(&path)?,
        (None, None) => {
            let mut buffer = Vec::new();
            std::io::stdin().read_to_end(&mut buffer)?;
            buffer
        }
    };

    let mut message = Message::new(body).with_delay(Duration::from_secs(delay_seconds));
    for (key, value) in attributes {
        message = message.with_attribute(key, value);
    }

    let message_id = client.send(message).await?;
    writeln!(out, "{}", message_id)?;
    Ok(())
}

async fn execute_receive_command(
    client: &QueueClient,
    options: &ReceiveOptions,
    delete: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let messages = client.receive(options).await?;
    info!(count = messages.len(), "Received messages");

    for message in &messages {
        write_message(out, &MessageView::from(message), format)?;

        if delete && client.delete(&message.receipt_handle).await? == DeleteOutcome::NotFound {
            warn!(message_id = %message.message_id, "Message was already deleted");
        }
    }
    Ok(())
}

async fn execute_delete_command(
    client: &QueueClient,
    receipt_handle: String,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let receipt = sqs_utils::ReceiptHandle::new(
        receipt_handle,
        client.endpoint().provider_type(),
    );

    match client.delete(&receipt).await? {
        DeleteOutcome::Deleted => writeln!(out, "deleted")?,
        DeleteOutcome::NotFound => writeln!(out, "not found")?,
    }
    Ok(())
}

async fn execute_purge_command(
    client: &QueueClient,
    yes: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::Aborted {
            message: format!(
                "purging {} deletes every message; pass --yes to confirm",
                client.queue_url()
            ),
        });
    }

    client.purge().await?;
    writeln!(out, "purged {}", client.queue_url())?;
    Ok(())
}

/// A message waiting to be printed. Its handler succeeds, and the message is
/// deleted, only once `printed` has fired.
struct PendingOutput {
    view: MessageView,
    printed: oneshot::Sender<()>,
}

/// Consume until `limit` messages were printed or Ctrl-C is pressed
async fn execute_listen_command(
    client: &QueueClient,
    config: sqs_utils::ConsumerConfig,
    limit: Option<usize>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::channel::<PendingOutput>(1);

    let consumer = PollingConsumer::new(client.clone(), config)
        .with_handler(handler_fn(move |message: ReceivedMessage| {
            let tx = tx.clone();
            async move {
                let (printed, confirmation) = oneshot::channel();
                let pending = PendingOutput {
                    view: MessageView::from(&message),
                    printed,
                };

                tx.send(pending)
                    .await
                    .map_err(|_| HandlerError::failed("listener finished before output"))?;
                confirmation
                    .await
                    .map_err(|_| HandlerError::failed("listener finished before output"))?;
                Ok::<(), HandlerError>(())
            }
        }))
        .with_error_handler(|error: ConsumerError| {
            warn!(error = %error, message_id = ?error.message_id(), "Listen error");
        });

    consumer.start()?;

    let mut handled = 0usize;
    let result = loop {
        if limit.is_some_and(|limit| handled >= limit) {
            break Ok(());
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping consumer");
                break Ok(());
            }
            pending = rx.recv() => match pending {
                Some(PendingOutput { view, printed }) => {
                    if let Err(e) = write_message(out, &view, format) {
                        break Err(e);
                    }
                    // The handler may already have timed out and given up
                    let _ = printed.send(());
                    handled += 1;
                }
                None => break Ok(()),
            },
        }
    };

    consumer.stop();
    // Handlers still waiting for output fail, so their messages stay queued
    drop(rx);
    consumer.stop_and_wait().await;

    info!(handled, "Listen finished");
    result
}

// ============================================================================
// Output
// ============================================================================

/// Printable form of a received message
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub message_id: String,
    pub receipt_handle: String,
    pub receive_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    pub attributes: HashMap<String, String>,
    pub body: String,
}

impl From<&ReceivedMessage> for MessageView {
    fn from(message: &ReceivedMessage) -> Self {
        Self {
            message_id: message.message_id.to_string(),
            receipt_handle: message.receipt_handle.handle().to_string(),
            receive_count: message.receive_count,
            sent_at: message.sent_at.as_ref().map(|t| t.to_string()),
            attributes: message.attributes.clone(),
            body: String::from_utf8_lossy(&message.body).into_owned(),
        }
    }
}

fn write_message(
    out: &mut dyn Write,
    view: &MessageView,
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => writeln!(
            out,
            "{}\t{}\t{}\t{}",
            view.message_id, view.receive_count, view.receipt_handle, view.body
        )?,
        OutputFormat::Json => {
            let line = serde_json::to_string(view).map_err(|e| CliError::InvalidArgument {
                arg: "format".to_string(),
                message: e.to_string(),
            })?;
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}
