//! Layered settings for tools built on the client and consumer.
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. `config/sqs-utils.{yaml,toml,json}` relative to the working directory
//! 3. An explicit file, when one is given
//! 4. Environment variables prefixed `SQS_UTILS__` with `__` as the nesting
//!    separator, e.g. `SQS_UTILS__CONSUMER__BATCH_SIZE=5`
//!
//! A missing optional file is ignored. A missing explicit file, a malformed
//! file, or a value of the wrong type is an error.

use crate::consumer::ConsumerConfig;
use crate::error::ConfigurationError;
use crate::message::{QueueUrl, MAX_WAIT_TIME};
use crate::provider::AwsSqsConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;

/// Prefix of environment variables read by [`Settings::load`]
pub const ENV_PREFIX: &str = "SQS_UTILS";

/// Base name of the optional settings file in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "config/sqs-utils";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Queue used when a command does not name one
    pub queue_url: Option<String>,

    pub aws: AwsSqsConfig,

    pub consumer: ConsumerConfig,
}

impl Settings {
    /// Load settings from every source, then validate them
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigurationError> {
        Self::load_with_environment(
            explicit_path,
            config::Environment::with_prefix(ENV_PREFIX).separator("__"),
        )
    }

    pub(crate) fn load_with_environment(
        explicit_path: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_SETTINGS_FILE).required(false));

        if let Some(path) = explicit_path {
            debug!(path = %path.display(), "Loading settings from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints the types cannot express
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(url) = &self.queue_url {
            QueueUrl::new(url.clone()).map_err(|e| ConfigurationError::Invalid {
                message: format!("queue_url: {}", e),
            })?;
        }

        if self.aws.access_key_id.is_some() != self.aws.secret_access_key.is_some() {
            return Err(ConfigurationError::Invalid {
                message: "aws.access_key_id and aws.secret_access_key must be set together"
                    .to_string(),
            });
        }

        if self.aws.operation_timeout_seconds <= MAX_WAIT_TIME.as_secs() {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "aws.operation_timeout_seconds must exceed {}",
                    MAX_WAIT_TIME.as_secs()
                ),
            });
        }

        self.consumer.validate()
    }

    /// Resolve the queue to operate on, preferring `override_url`
    pub fn resolve_queue_url(&self, override_url: Option<&str>) -> Result<QueueUrl, ConfigurationError> {
        let url = override_url
            .map(str::to_string)
            .or_else(|| self.queue_url.clone())
            .ok_or_else(|| ConfigurationError::Missing {
                key: "queue_url".to_string(),
            })?;

        QueueUrl::new(url).map_err(|e| ConfigurationError::Invalid {
            message: format!("queue_url: {}", e),
        })
    }
}
