//! Provider types and configuration.

use serde::{Deserialize, Serialize};

/// Region used when neither the configuration nor the environment names one
pub const DEFAULT_AWS_REGION: &str = "eu-west-1";

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    AwsSqs,
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => 256 * 1024,         // 256KB
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwsSqs => write!(f, "AwsSqs"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    AwsSqs(AwsSqsConfig),
    InMemory(InMemoryConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::AwsSqs(AwsSqsConfig::default())
    }
}

/// AWS SQS configuration
///
/// Anything left unset falls through to the AWS SDK default chain
/// (`AWS_REGION`, `AWS_ACCESS_KEY_ID`, profiles, instance metadata, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSqsConfig {
    pub region: Option<String>,
    /// Endpoint override, e.g. `http://localhost:4566` for LocalStack
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Upper bound for a single SQS API call, including the long-poll window
    pub operation_timeout_seconds: u64,
}

impl Default for AwsSqsConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            operation_timeout_seconds: 30,
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Messages held per queue before sends are rejected
    pub max_queue_size: usize,
    pub max_message_size: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            max_message_size: ProviderType::InMemory.max_message_size(),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
