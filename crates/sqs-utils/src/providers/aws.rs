//! AWS SQS provider implementation using the AWS SDK.
//!
//! Credentials, request signing, and per-request HTTP retries are left to the
//! SDK. The provider maps each queue operation to exactly one SQS API call and
//! translates SDK errors into [`QueueError`] by error code.
//!
//! ## Authentication
//!
//! - **Static keys**: `access_key_id` and `secret_access_key` in [`AwsSqsConfig`]
//! - **Default chain**: environment variables, shared profiles, SSO, container
//!   and instance metadata, used whenever no static keys are configured
//!
//! ## Example
//!
//! ```no_run
//! use sqs_utils::{AwsSqsConfig, QueueClient, QueueUrl};
//! use sqs_utils::providers::AwsSqsProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = AwsSqsProvider::new(AwsSqsConfig {
//!     region: Some("eu-west-1".to_string()),
//!     ..AwsSqsConfig::default()
//! })
//! .await?;
//!
//! let url: QueueUrl = "https://sqs.eu-west-1.amazonaws.com/123456789012/orders".parse()?;
//! let client = QueueClient::new(url, Arc::new(provider));
//! # Ok(())
//! # }
//! ```

use crate::client::QueueProvider;
use crate::error::{ConfigurationError, QueueError, SerializationError, ValidationError};
use crate::message::{
    Message, MessageId, QueueUrl, ReceiptHandle, ReceiveOptions, ReceivedMessage, Timestamp,
    MAX_WAIT_TIME,
};
use crate::provider::{AwsSqsConfig, ProviderType, DEFAULT_AWS_REGION};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sqs as sqs;
use bytes::Bytes;
use sqs::config::Credentials;
use sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use sqs::types::{MessageAttributeValue, MessageSystemAttributeName};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const PROVIDER_NAME: &str = "AwsSqs";

// ============================================================================
// AWS SQS Provider
// ============================================================================

/// AWS SQS queue provider implementation
///
/// The provider is cheap to clone and can be shared across tasks; the
/// underlying SDK client is reference counted.
#[derive(Clone, Debug)]
pub struct AwsSqsProvider {
    client: sqs::Client,
}

impl AwsSqsProvider {
    /// Create a provider, resolving region and credentials from `config` and
    /// then the AWS default chain.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConfigurationError` if only one half of a static
    /// key pair is configured or the operation timeout cannot cover a long poll.
    pub async fn new(config: AwsSqsConfig) -> Result<Self, QueueError> {
        let sdk_config = load_sdk_config(&config).await?;
        Ok(Self::from_sdk_config(&sdk_config))
    }

    /// Create a provider from a pre-built SDK configuration
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::from_client(sqs::Client::new(config))
    }

    /// Wrap an existing SDK client
    pub fn from_client(client: sqs::Client) -> Self {
        Self { client }
    }
}

/// Build the SDK configuration from provider settings
async fn load_sdk_config(config: &AwsSqsConfig) -> Result<SdkConfig, QueueError> {
    let operation_timeout = Duration::from_secs(config.operation_timeout_seconds);
    if operation_timeout <= MAX_WAIT_TIME {
        return Err(ConfigurationError::Invalid {
            message: format!(
                "operation_timeout_seconds must exceed the {}s long-poll window",
                MAX_WAIT_TIME.as_secs()
            ),
        }
        .into());
    }

    let credentials = match (&config.access_key_id, &config.secret_access_key) {
        (Some(key), Some(secret)) => Some(Credentials::new(key, secret, None, None, "sqs-utils")),
        (None, None) => None,
        _ => {
            return Err(ConfigurationError::Invalid {
                message: "access_key_id and secret_access_key must be set together".to_string(),
            }
            .into())
        }
    };

    let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
        .or_default_provider()
        .or_else(Region::from_static(DEFAULT_AWS_REGION));

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(operation_timeout)
                .build(),
        );

    if let Some(endpoint) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    if let Some(credentials) = credentials {
        loader = loader.credentials_provider(credentials);
    }

    Ok(loader.load().await)
}

#[async_trait]
impl QueueProvider for AwsSqsProvider {
    async fn send_message(
        &self,
        queue: &QueueUrl,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        // SQS bodies are XML-safe text
        let body = std::str::from_utf8(&message.body).map_err(|_| SerializationError::InvalidUtf8)?;

        let mut request = self
            .client
            .send_message()
            .queue_url(queue.as_str())
            .message_body(body)
            .delay_seconds(whole_seconds(message.delay));

        for (key, value) in &message.attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|_| SerializationError::InvalidAttribute { key: key.clone() })?;
            request = request.message_attributes(key, attribute);
        }

        let output = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, queue, "SendMessage"))?;

        let message_id = output
            .message_id()
            .ok_or_else(|| missing_field("MessageId"))?
            .parse()?;
        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue.as_str())
            .max_number_of_messages(i32::try_from(options.max_messages).unwrap_or(i32::MAX))
            .visibility_timeout(whole_seconds(options.visibility_timeout))
            .wait_time_seconds(whole_seconds(options.wait_time))
            .message_attribute_names("All")
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, queue, "ReceiveMessage"))?;

        // None means nothing was available within the wait window
        Ok(convert_batch(queue, output.messages.unwrap_or_default()))
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue.as_str())
            .receipt_handle(receipt.handle())
            .send()
            .await
            .map_err(|e| match map_sdk_error(e, queue, "DeleteMessage") {
                QueueError::MessageNotFound { .. } => QueueError::MessageNotFound {
                    receipt: receipt.handle().to_string(),
                },
                other => other,
            })?;
        Ok(())
    }

    async fn purge_queue(&self, queue: &QueueUrl) -> Result<(), QueueError> {
        self.client
            .purge_queue()
            .queue_url(queue.as_str())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, queue, "PurgeQueue"))?;
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// SQS works in whole seconds; sub-second parts are truncated
fn whole_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

fn missing_field(field: &str) -> QueueError {
    QueueError::ProviderError {
        provider: PROVIDER_NAME.to_string(),
        code: "MissingField".to_string(),
        message: format!("{} missing from SQS response", field),
    }
}

/// Convert a received batch, skipping entries that cannot be handled.
///
/// A skipped entry stays invisible until its visibility timeout expires; the
/// rest of the batch is still returned.
fn convert_batch(queue: &QueueUrl, messages: Vec<sqs::types::Message>) -> Vec<ReceivedMessage> {
    messages
        .into_iter()
        .filter_map(|message| {
            let message_id = message.message_id.clone();
            match convert_message(message) {
                Ok(received) => Some(received),
                Err(error) => {
                    warn!(
                        queue = %queue,
                        message_id = ?message_id,
                        error = %error,
                        "Skipping malformed SQS message"
                    );
                    None
                }
            }
        })
        .collect()
}

/// Convert an SDK message into a [`ReceivedMessage`]
fn convert_message(message: sqs::types::Message) -> Result<ReceivedMessage, QueueError> {
    let message_id: MessageId = message
        .message_id
        .ok_or_else(|| missing_field("MessageId"))?
        .parse()?;
    let receipt = message
        .receipt_handle
        .ok_or_else(|| missing_field("ReceiptHandle"))?;

    // Binary attributes have no string form and are dropped
    let attributes: HashMap<String, String> = message
        .message_attributes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.string_value.map(|v| (key, v)))
        .collect();

    let system = message.attributes.unwrap_or_default();
    let receive_count = system
        .get(&MessageSystemAttributeName::ApproximateReceiveCount)
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);
    let sent_at = system
        .get(&MessageSystemAttributeName::SentTimestamp)
        .and_then(|millis| millis.parse().ok())
        .and_then(Timestamp::from_epoch_millis);

    Ok(ReceivedMessage {
        message_id,
        receipt_handle: ReceiptHandle::new(receipt, ProviderType::AwsSqs),
        body: Bytes::from(message.body.unwrap_or_default()),
        attributes,
        receive_count,
        sent_at,
    })
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Map an SDK failure onto the queue error taxonomy
fn map_sdk_error<E, R>(error: SdkError<E, R>, queue: &QueueUrl, operation: &str) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let mapped = match &error {
        SdkError::ServiceError(context) => {
            let service_error = context.err();
            classify_service_error(
                operation,
                service_error.code().unwrap_or("Unknown"),
                service_error.message().unwrap_or("Unknown error"),
                queue,
            )
        }
        SdkError::TimeoutError(_) => QueueError::Timeout {
            message: format!("{} timed out: {}", operation, DisplayErrorContext(&error)),
        },
        SdkError::ConstructionFailure(_) => {
            QueueError::ConfigurationError(ConfigurationError::Invalid {
                message: format!(
                    "could not build {} request: {}",
                    operation,
                    DisplayErrorContext(&error)
                ),
            })
        }
        _ => QueueError::ConnectionFailed {
            message: format!("{} failed: {}", operation, DisplayErrorContext(&error)),
        },
    };

    debug!(queue = %queue, operation, error = %mapped, "SQS call failed");
    mapped
}

/// Map an SQS error code to a [`QueueError`]
fn classify_service_error(
    operation: &str,
    code: &str,
    message: &str,
    queue: &QueueUrl,
) -> QueueError {
    match code {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            }
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "ExpiredToken"
        | "MissingAuthenticationToken"
        | "InvalidSecurity" => QueueError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        "AccessDenied" | "AccessDeniedException" => QueueError::PermissionDenied {
            operation: operation.to_string(),
        },
        "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" | "InvalidIdFormat" => {
            QueueError::MessageNotFound {
                receipt: message.to_string(),
            }
        }
        "InvalidMessageContents"
        | "InvalidParameterValue"
        | "InvalidAttributeName"
        | "InvalidAttributeValue" => QueueError::ValidationError(ValidationError::InvalidFormat {
            field: operation.to_string(),
            message: format!("{}: {}", code, message),
        }),
        _ => QueueError::ProviderError {
            provider: PROVIDER_NAME.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}
