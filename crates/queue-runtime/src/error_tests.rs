//! Tests for error types.

use super::*;

#[test]
fn test_broker_and_network_faults_are_transient() {
    let transient = [
        QueueError::ConnectionFailed {
            message: "connection reset".to_string(),
        },
        QueueError::Timeout {
            duration: Duration::seconds(30),
        },
        QueueError::ProviderError {
            provider: "AzureServiceBus".to_string(),
            code: "503".to_string(),
            message: "server busy".to_string(),
        },
    ];
    for error in &transient {
        assert!(error.is_transient(), "{}", error);
    }
}

#[test]
fn test_caller_faults_are_not_transient() {
    let permanent = [
        QueueError::QueueNotFound {
            queue_name: "orders".to_string(),
        },
        QueueError::MessageNotFound {
            lock_token: "lock-1".to_string(),
        },
        QueueError::AuthenticationFailed {
            message: "signature mismatch".to_string(),
        },
        QueueError::MessageTooLarge {
            size: 1000,
            max_size: 500,
        },
        QueueError::ClientClosed {
            queue_name: "orders".to_string(),
        },
    ];
    for error in &permanent {
        assert!(!error.is_transient(), "{}", error);
        assert!(!error.is_configuration(), "{}", error);
    }
}

#[test]
fn test_nested_errors_convert_into_queue_error() {
    let error: QueueError = ConfigurationError::Missing {
        key: "queue_name".to_string(),
    }
    .into();

    assert!(error.is_configuration());
    assert_eq!(
        error.to_string(),
        "Configuration error: Missing required configuration: queue_name"
    );

    let error: QueueError = ValidationError::Required {
        field: "message_id".to_string(),
    }
    .into();
    assert!(error.is_configuration());
}
