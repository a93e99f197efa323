//! Tests for message types and identifiers.

use super::*;

mod queue_url_tests {
    use super::*;

    #[test]
    fn test_accepts_sqs_url_and_bare_name() {
        let url = QueueUrl::new(
            "https://sqs.eu-west-1.amazonaws.com/123456789012/orders".to_string(),
        );
        assert!(url.is_ok());

        let name: Result<QueueUrl, _> = "orders".parse();
        assert_eq!(name.unwrap().as_str(), "orders");
    }

    #[test]
    fn test_rejects_empty() {
        let result = QueueUrl::new(String::new());
        assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));
    }

    #[test]
    fn test_rejects_whitespace() {
        let result = QueueUrl::new("my queue".to_string());
        assert!(matches!(result, Err(ValidationError::InvalidFormat { .. })));
    }
}

mod message_tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: u32,
        item: String,
    }

    #[test]
    fn test_json_message_round_trips_through_received_message() {
        let order = Order {
            id: 7,
            item: "widget".to_string(),
        };
        let message = Message::json(&order).unwrap();

        let received = ReceivedMessage {
            message_id: MessageId::new(),
            receipt_handle: ReceiptHandle::new("r-1".to_string(), ProviderType::InMemory),
            body: message.body.clone(),
            attributes: HashMap::new(),
            receive_count: 1,
            sent_at: None,
        };

        let decoded: Order = received.body_json().unwrap();
        assert_eq!(decoded, order);
        assert_eq!(received.body_str().unwrap(), r#"{"id":7,"item":"widget"}"#);
    }

    #[test]
    fn test_validate_rejects_empty_body() {
        let result = Message::new(Bytes::new()).validate(1024);
        assert!(matches!(result, Err(ValidationError::Required { .. })));
    }

    #[test]
    fn test_validate_counts_attributes_against_size_limit() {
        let message = Message::new("12345").with_attribute("key", "value");
        assert_eq!(message.size(), 13);
        assert!(message.validate(13).is_ok());
        assert!(matches!(
            message.validate(12),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_long_delay() {
        let message = Message::new("body").with_delay(Duration::from_secs(901));
        let result = message.validate(1024);
        match result {
            Err(ValidationError::OutOfRange { field, .. }) => assert_eq!(field, "delay"),
            other => panic!("Expected OutOfRange for delay, got: {:?}", other),
        }
    }

    #[test]
    fn test_body_str_rejects_invalid_utf8() {
        let received = ReceivedMessage {
            message_id: MessageId::new(),
            receipt_handle: ReceiptHandle::new("r".to_string(), ProviderType::InMemory),
            body: Bytes::from_static(&[0xff, 0xfe]),
            attributes: HashMap::new(),
            receive_count: 1,
            sent_at: None,
        };
        assert!(matches!(
            received.body_str(),
            Err(SerializationError::InvalidUtf8)
        ));
    }
}

mod receive_options_tests {
    use super::*;

    #[test]
    fn test_defaults_match_single_message_receive() {
        let options = ReceiveOptions::default();
        assert_eq!(options.max_messages, 1);
        assert_eq!(options.visibility_timeout, Duration::from_secs(300));
        assert_eq!(options.wait_time, Duration::ZERO);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_batch_size_bounds() {
        assert!(ReceiveOptions::new().with_max_messages(0).validate().is_err());
        assert!(ReceiveOptions::new().with_max_messages(10).validate().is_ok());
        assert!(ReceiveOptions::new().with_max_messages(11).validate().is_err());
    }

    #[test]
    fn test_wait_time_bound() {
        let options = ReceiveOptions::new().with_wait_time(Duration::from_secs(21));
        assert!(options.validate().is_err());
    }
}

#[test]
fn test_timestamp_from_epoch_millis() {
    let ts = Timestamp::from_epoch_millis(1_700_000_000_000).unwrap();
    assert_eq!(ts.to_string(), "2023-11-14 22:13:20 UTC");
}
