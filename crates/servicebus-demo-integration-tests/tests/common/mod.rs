//! Common test utilities for servicebus-demo integration tests
//!
//! This module provides:
//! - A recording queue provider that captures sends and settlements and lets
//!   tests inject broker deliveries
//! - A client factory, console sink and operator gate built on it
//! - A fixed credential and a mock Key Vault server

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use queue_runtime::{
    ConfigurationError, LockToken, Message, MessageId, ProviderType, QueueClient, QueueError,
    QueueName, QueueProvider, ReceivedMessage, ServiceBusConnectionString, StandardQueueClient,
    Timestamp,
};
use servicebus_demo_core::{
    Checkpoint, ClientFactory, ConsoleSink, Credential, CredentialError, CredentialProvider,
    DemoError, KeyVaultConfiguration, OperatorGate, QueueSettings,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const QUEUE_NAME: &str = "orders";
pub const CONNECTION_STRING: &str = "Endpoint=sb://x;SharedAccessKey=y";

// ============================================================================
// Recording Queue Provider
// ============================================================================

/// In-process broker double
///
/// Sends are recorded, not delivered. Deliveries come only from
/// [`RecordingProvider::inject`].
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingProvider {
    sent: Mutex<Vec<Message>>,
    pending: Mutex<VecDeque<ReceivedMessage>>,
    arrived: Notify,
    completed: Mutex<Vec<String>>,
    abandoned: Mutex<Vec<String>>,
    failing_completions: AtomicUsize,
    closed: AtomicUsize,
}

impl RecordingProvider {
    #[allow(dead_code)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a delivery with lock token `lock-{sequence_number}`
    #[allow(dead_code)]
    pub fn inject(&self, sequence_number: i64) {
        let message_id: MessageId = format!("msg-{}", sequence_number).parse().unwrap();
        let lock_token = LockToken::new(
            format!("lock-{}", sequence_number),
            message_id.clone(),
            Timestamp::from_datetime(Utc::now() + Duration::seconds(60)),
            ProviderType::InMemory,
        );

        let message = ReceivedMessage {
            message_id,
            sequence_number,
            body: Bytes::from_static(b"Message {i}"),
            attributes: HashMap::new(),
            correlation_id: None,
            lock_token,
            delivery_count: 1,
            enqueued_at: Timestamp::now(),
        };

        self.pending.lock().unwrap().push_back(message);
        self.arrived.notify_one();
    }

    /// Fail the next `count` completions with a transient connection error
    #[allow(dead_code)]
    pub fn fail_next_completions(&self, count: usize) {
        self.failing_completions.store(count, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn sent_bodies(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| String::from_utf8_lossy(&m.body).into_owned())
            .collect()
    }

    #[allow(dead_code)]
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn abandoned(&self) -> Vec<String> {
        self.abandoned.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn take_next(&self) -> Option<ReceivedMessage> {
        self.pending.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl QueueProvider for RecordingProvider {
    async fn send_message(
        &self,
        _queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(message.message_id.clone().unwrap_or_default())
    }

    async fn receive_message(
        &self,
        _queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        if let Some(message) = self.take_next() {
            return Ok(Some(message));
        }

        let wait = timeout.to_std().unwrap_or_default();
        let _ = tokio::time::timeout(wait, self.arrived.notified()).await;
        Ok(self.take_next())
    }

    async fn complete_message(
        &self,
        _queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(), QueueError> {
        let failing = self
            .failing_completions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::ConnectionFailed {
                message: format!("connection reset while completing {}", lock_token),
            });
        }

        self.completed
            .lock()
            .unwrap()
            .push(lock_token.as_str().to_string());
        Ok(())
    }

    async fn abandon_message(
        &self,
        _queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(), QueueError> {
        self.abandoned
            .lock()
            .unwrap()
            .push(lock_token.as_str().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn endpoint(&self) -> &str {
        "sb://x"
    }
}

// ============================================================================
// Client Factory
// ============================================================================

/// Builds clients over a shared [`RecordingProvider`]
///
/// Settings are validated the same way the production factory does before a
/// client is counted as created.
#[allow(dead_code)]
pub struct RecordingFactory {
    pub provider: Arc<RecordingProvider>,
    created: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl RecordingFactory {
    #[allow(dead_code)]
    pub fn new(provider: Arc<RecordingProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            created: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        })
    }

    #[allow(dead_code)]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Queue names the factory was asked for
    #[allow(dead_code)]
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl ClientFactory for RecordingFactory {
    fn create(&self, settings: &QueueSettings) -> Result<Arc<dyn QueueClient>, QueueError> {
        self.requested
            .lock()
            .unwrap()
            .push(settings.queue_name.clone());

        if settings.queue_name.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "queue_name".to_string(),
            }
            .into());
        }
        ServiceBusConnectionString::parse(settings.connection_string.expose_secret())?;
        let queue = QueueName::new(settings.queue_name.clone())?;

        self.created.fetch_add(1, Ordering::SeqCst);
        let provider: Arc<dyn QueueProvider> = self.provider.clone();
        Ok(Arc::new(StandardQueueClient::new(provider, queue)))
    }
}

// ============================================================================
// Console Sink
// ============================================================================

#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    #[allow(dead_code)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[allow(dead_code)]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }

    /// Wait until a line containing `needle` was written
    #[allow(dead_code)]
    pub async fn wait_for(&self, needle: &str) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while self.lines_containing(needle).is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no output line containing '{}'", needle));
    }
}

impl ConsoleSink for RecordingSink {
    fn write_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

// ============================================================================
// Operator Gate
// ============================================================================

/// Releases `MessagesSent` at once; at `HandlerRegistered` injects the given
/// deliveries and waits until each was printed
#[allow(dead_code)]
pub struct InjectingGate {
    provider: Arc<RecordingProvider>,
    sink: Arc<RecordingSink>,
    deliveries: Vec<i64>,
    seen: Mutex<Vec<Checkpoint>>,
}

impl InjectingGate {
    #[allow(dead_code)]
    pub fn new(
        provider: Arc<RecordingProvider>,
        sink: Arc<RecordingSink>,
        deliveries: Vec<i64>,
    ) -> Self {
        Self {
            provider,
            sink,
            deliveries,
            seen: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn seen(&self) -> Vec<Checkpoint> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorGate for InjectingGate {
    async fn wait(&self, checkpoint: Checkpoint) -> Result<(), DemoError> {
        self.seen.lock().unwrap().push(checkpoint);

        if checkpoint == Checkpoint::HandlerRegistered {
            for sequence_number in &self.deliveries {
                self.provider.inject(*sequence_number);
            }
            for sequence_number in &self.deliveries {
                self.sink
                    .wait_for(&format!("SequenceNumber: {}", sequence_number))
                    .await;
            }
        }

        Ok(())
    }
}

// ============================================================================
// Credentials and Key Vault
// ============================================================================

/// Always yields the same bearer token
#[allow(dead_code)]
pub struct StaticCredential {
    resolved: AtomicUsize,
}

impl StaticCredential {
    #[allow(dead_code)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            resolved: AtomicUsize::new(0),
        })
    }

    #[allow(dead_code)]
    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn resolve(&self) -> Result<Credential, CredentialError> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        Ok(Credential::new(
            "integration-token",
            Utc::now() + Duration::hours(1),
        ))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Start a vault that serves `secrets` and 404s everything else
#[allow(dead_code)]
pub async fn start_key_vault(secrets: &[(&str, &str)]) -> MockServer {
    let server = MockServer::start().await;

    for (name, value) in secrets {
        Mock::given(method("GET"))
            .and(path_regex(format!("^/secrets/{}/?$", name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": value,
                "id": format!("{}/secrets/{}/v1", server.uri(), name),
                "attributes": {
                    "enabled": true,
                    "created": 1_700_000_000,
                    "updated": 1_700_000_000,
                    "recoveryLevel": "Recoverable+Purgeable"
                }
            })))
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": { "code": "SecretNotFound", "message": "A secret with the given name was not found" }
        })))
        .mount(&server)
        .await;

    server
}

/// Key Vault settings pointing at `server`
#[allow(dead_code)]
pub fn vault_config(server: &MockServer) -> KeyVaultConfiguration {
    KeyVaultConfiguration {
        vault_url: server.uri(),
        ..KeyVaultConfiguration::default()
    }
}

/// Lookup that only knows `KEY_VAULT_NAME`
#[allow(dead_code)]
pub fn vault_name_lookup(vault: Option<&'static str>) -> impl Fn(&str) -> Option<String> {
    move |key| (key == "KEY_VAULT_NAME").then(|| vault.map(str::to_string)).flatten()
}
