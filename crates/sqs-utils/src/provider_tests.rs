//! Tests for provider types.

use super::*;

#[test]
fn test_provider_message_sizes() {
    assert_eq!(ProviderType::AwsSqs.max_message_size(), 256 * 1024);
    assert_eq!(ProviderType::InMemory.max_message_size(), 10 * 1024 * 1024);
}

#[test]
fn test_aws_config_defaults_defer_to_sdk_chain() {
    let config = AwsSqsConfig::default();
    assert!(config.region.is_none());
    assert!(config.access_key_id.is_none());
    assert!(config.secret_access_key.is_none());
    assert_eq!(config.operation_timeout_seconds, 30);
}

#[test]
fn test_in_memory_config_defaults() {
    let config = InMemoryConfig::default();
    assert_eq!(config.max_queue_size, 10000);
    assert_eq!(config.max_message_size, 10 * 1024 * 1024);
}

#[test]
fn test_provider_config_is_tagged_by_type() {
    let json = r#"{"type": "in_memory", "max_queue_size": 5}"#;
    let config: ProviderConfig = serde_json::from_str(json).unwrap();

    match config {
        ProviderConfig::InMemory(memory) => {
            assert_eq!(memory.max_queue_size, 5);
            assert_eq!(memory.max_message_size, 10 * 1024 * 1024);
        }
        other => panic!("Expected InMemory config, got: {:?}", other),
    }

    let json = r#"{"type": "aws_sqs", "region": "us-east-1"}"#;
    let config: ProviderConfig = serde_json::from_str(json).unwrap();
    assert_eq!(
        config,
        ProviderConfig::AwsSqs(AwsSqsConfig {
            region: Some("us-east-1".to_string()),
            ..AwsSqsConfig::default()
        })
    );
}
