//! Startup failures and consumer behaviour under load and errors.

mod common;

use async_trait::async_trait;
use common::*;
use queue_runtime::{
    CancellationSignal, ConfigurationError, ErrorContext, HandlerError, MessageHandler,
    QueueClient, QueueError, QueueName, ReceivedMessage, StandardQueueClient,
};
use servicebus_demo_core::{
    ClientFactory, ConsoleMessageHandler, ConsumerConfig, DemoConfig, DemoError, DemoRunner,
    ErrorCategory, KeyVaultConfiguration, KeyVaultError, QueueSettings, SecretResolver,
    SecretValue, ServiceBusClientFactory,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn run_against_vault(
    secrets: &[(&str, &str)],
) -> (Result<(), DemoError>, Arc<RecordingFactory>, Arc<RecordingSink>) {
    let vault = start_key_vault(secrets).await;
    let provider = RecordingProvider::new();
    let factory = RecordingFactory::new(provider.clone());
    let sink = RecordingSink::new();

    let resolver = SecretResolver::from_lookup(
        vault_name_lookup(Some("demo-vault")),
        vault_config(&vault),
        StaticCredential::new(),
    )
    .unwrap();
    let runner = DemoRunner::new(resolver, factory.clone(), sink.clone(), DemoConfig::default());

    let result = runner
        .run(&InjectingGate::new(provider, sink.clone(), Vec::new()))
        .await
        .map(|_| ());
    (result, factory, sink)
}

fn open_client(provider: Arc<RecordingProvider>) -> Arc<dyn QueueClient> {
    Arc::new(StandardQueueClient::new(
        provider,
        QueueName::new(QUEUE_NAME.to_string()).unwrap(),
    ))
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_missing_vault_name_fails_before_any_request() {
    let credential = StaticCredential::new();

    let error = SecretResolver::from_lookup(
        vault_name_lookup(None),
        KeyVaultConfiguration::default(),
        credential.clone(),
    )
    .err()
    .expect("resolver must not build without KEY_VAULT_NAME");

    assert!(matches!(error, KeyVaultError::Configuration { .. }));
    assert!(error.to_string().contains("KEY_VAULT_NAME"));
    assert_eq!(
        DemoError::from(error).error_category(),
        ErrorCategory::Configuration
    );
    assert_eq!(credential.resolved(), 0);
}

#[tokio::test]
async fn test_invalid_vault_name_is_configuration_error() {
    let result = SecretResolver::from_lookup(
        vault_name_lookup(Some("x")),
        KeyVaultConfiguration::default(),
        StaticCredential::new(),
    );

    assert!(matches!(result, Err(KeyVaultError::Configuration { .. })));
}

#[tokio::test]
async fn test_missing_secret_fails_before_client_creation() {
    let (result, factory, sink) = run_against_vault(&[("QueueName", QUEUE_NAME)]).await;

    let error = result.unwrap_err();
    assert_eq!(error.error_category(), ErrorCategory::Secrets);
    assert!(factory.requested().is_empty());
    assert!(sink.lines().is_empty());
}

#[tokio::test]
async fn test_vault_access_denied_is_authentication_error() {
    let vault = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": { "code": "Forbidden", "message": "Caller is not authorized" }
        })))
        .mount(&vault)
        .await;

    let resolver = SecretResolver::from_lookup(
        vault_name_lookup(Some("demo-vault")),
        vault_config(&vault),
        StaticCredential::new(),
    )
    .unwrap();

    let error = DemoError::from(resolver.resolve().await.unwrap_err());

    assert_eq!(error.error_category(), ErrorCategory::Authentication);
}

#[tokio::test]
async fn test_empty_queue_name_fails_without_client() {
    let (result, factory, sink) = run_against_vault(&[
        ("QueueName", "   "),
        ("ServiceBusConnectionString", CONNECTION_STRING),
    ])
    .await;

    assert_eq!(
        result.unwrap_err().error_category(),
        ErrorCategory::Configuration
    );
    assert_eq!(factory.created(), 0);
    assert!(sink.lines().is_empty());
}

#[tokio::test]
async fn test_empty_connection_string_fails_without_client() {
    let (result, factory, _sink) = run_against_vault(&[
        ("QueueName", QUEUE_NAME),
        ("ServiceBusConnectionString", ""),
    ])
    .await;

    assert_eq!(
        result.unwrap_err().error_category(),
        ErrorCategory::Configuration
    );
    assert_eq!(factory.requested(), vec![QUEUE_NAME.to_string()]);
    assert_eq!(factory.created(), 0);
}

#[test]
fn test_service_bus_factory_rejects_empty_values_offline() {
    let factory = ServiceBusClientFactory::default();

    let empty_queue = factory.create(&QueueSettings {
        queue_name: String::new(),
        connection_string: SecretValue::from_string(CONNECTION_STRING.to_string()),
    });
    let empty_connection = factory.create(&QueueSettings {
        queue_name: QUEUE_NAME.to_string(),
        connection_string: SecretValue::from_string(String::new()),
    });

    assert!(matches!(
        empty_queue,
        Err(QueueError::ConfigurationError(ConfigurationError::Missing { .. }))
    ));
    assert!(matches!(
        empty_connection,
        Err(QueueError::ConfigurationError(ConfigurationError::Missing { .. }))
    ));
}

// ============================================================================
// Consumer
// ============================================================================

/// Slow handler recording how many callbacks overlap
#[derive(Default)]
struct OverlapTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    handled: AtomicUsize,
}

#[async_trait]
impl MessageHandler for OverlapTracker {
    async fn on_message(
        &self,
        _message: &ReceivedMessage,
        _cancellation: CancellationSignal,
    ) -> Result<(), HandlerError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_error(&self, _context: ErrorContext) {}
}

#[tokio::test]
async fn test_default_consumer_never_overlaps_callbacks() {
    let provider = RecordingProvider::new();
    let client = open_client(provider.clone());
    let tracker = Arc::new(OverlapTracker::default());

    let options = ConsumerConfig {
        max_wait_seconds: 1,
        ..ConsumerConfig::default()
    }
    .to_handler_options();
    let registration = client
        .register_message_handler(tracker.clone(), options)
        .unwrap();

    for sequence_number in 1..=5 {
        provider.inject(sequence_number);
    }
    wait_until("five callbacks", || tracker.handled.load(Ordering::SeqCst) == 5).await;
    registration.close().await;
    client.close().await.unwrap();

    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_console_handler_prints_in_delivery_order() {
    let provider = RecordingProvider::new();
    let client = open_client(provider.clone());
    let sink = RecordingSink::new();
    let config = ConsumerConfig {
        max_wait_seconds: 1,
        ..ConsumerConfig::default()
    };

    let registration =
        ConsoleMessageHandler::register(client.clone(), sink.clone(), &config).unwrap();
    for sequence_number in [3, 1, 2] {
        provider.inject(sequence_number);
    }
    wait_until("three completions", || provider.completed().len() == 3).await;
    registration.close().await;
    client.close().await.unwrap();

    assert_eq!(
        sink.lines(),
        vec![
            "Received message: SequenceNumber: 3",
            "Received message: SequenceNumber: 1",
            "Received message: SequenceNumber: 2",
        ]
    );
    assert_eq!(provider.completed(), vec!["lock-3", "lock-1", "lock-2"]);
}

#[tokio::test]
async fn test_completion_failure_is_reported_and_consumer_continues() {
    let provider = RecordingProvider::new();
    let client = open_client(provider.clone());
    let sink = RecordingSink::new();
    let config = ConsumerConfig {
        max_wait_seconds: 1,
        ..ConsumerConfig::default()
    };

    provider.fail_next_completions(1);
    let registration =
        ConsoleMessageHandler::register(client.clone(), sink.clone(), &config).unwrap();
    provider.inject(7);
    provider.inject(8);

    wait_until("second delivery completed", || {
        provider.completed() == vec!["lock-8".to_string()]
    })
    .await;
    registration.close().await;
    client.close().await.unwrap();

    assert_eq!(provider.abandoned(), vec!["lock-7".to_string()]);
    assert_eq!(sink.lines_containing("Received message").len(), 2);
    assert_eq!(
        sink.lines_containing("Message handler encountered an exception")
            .len(),
        1
    );
    assert!(sink
        .lines()
        .contains(&"Exception context for troubleshooting:".to_string()));
    assert!(sink.lines().contains(&"- Endpoint: sb://x".to_string()));
    assert!(sink.lines().contains(&"- Entity Path: orders".to_string()));
    assert!(sink
        .lines()
        .contains(&"- Executing Action: UserCallback".to_string()));
}
