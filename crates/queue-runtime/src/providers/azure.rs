//! Azure Service Bus provider implementation.
//!
//! Built on the `azure_messaging_servicebus` queue client, which authorizes
//! every call with a Shared Access Signature derived from the key in the
//! connection string.
//!
//! Messages are received in peek-lock mode. The SDK hands back a
//! [`PeekLockResponse`] that owns the lock; the provider keeps it, keyed by
//! lock token, until the message is completed (deleted) or abandoned
//! (unlocked). Deliveries still held when the provider closes are unlocked so
//! the broker can hand them out again straight away.
//!
//! ## Example
//!
//! ```no_run
//! use queue_runtime::{AzureServiceBusConfig, ServiceBusConnectionString};
//! use queue_runtime::providers::AzureServiceBusProvider;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = ServiceBusConnectionString::parse(
//!     "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=Send;SharedAccessKey=abc=",
//! )?;
//! let provider = AzureServiceBusProvider::new(connection, AzureServiceBusConfig::default())?;
//! # Ok(())
//! # }
//! ```

use crate::client::QueueProvider;
use crate::connection::ServiceBusConnectionString;
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{LockToken, Message, MessageId, QueueName, ReceivedMessage, Timestamp};
use crate::provider::{AzureServiceBusConfig, ProviderType};
use async_trait::async_trait;
use azure_core::error::ErrorKind;
use azure_core::{HttpClient, StatusCode};
use azure_messaging_servicebus::service_bus::{
    PeekLockResponse, QueueClient as ServiceBusQueueClient,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

const BROKER_PROPERTIES_HEADER: &str = "BrokerProperties";

// ============================================================================
// Error Types
// ============================================================================

/// Azure Service Bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0}")]
    Timeout(Duration),

    /// Throttling or a broker-side fault
    #[error("Service Bus is busy: {0}")]
    ServerBusy(String),

    #[error("Service Bus error ({code}): {message}")]
    ServiceBusError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message lock lost: {0}")]
    MessageLockLost(String),

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AzureError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::Timeout(_) | Self::ServerBusy(_)
        )
    }

    /// Classify an SDK error
    ///
    /// `lock_token` is set for settlement calls, where a 404 means the lock
    /// is gone rather than the queue.
    pub fn from_sdk(
        error: azure_core::Error,
        operation: &str,
        queue: &QueueName,
        lock_token: Option<&str>,
    ) -> Self {
        let detail = error.to_string();
        match error.kind() {
            ErrorKind::HttpResponse { status, .. } => {
                Self::from_status(status, detail, operation, queue, lock_token)
            }
            ErrorKind::Io => Self::NetworkError(detail),
            ErrorKind::Credential => Self::AuthenticationError(detail),
            ErrorKind::DataConversion => Self::SerializationError(detail),
            _ => Self::ServiceBusError {
                code: "Other".to_string(),
                message: detail,
            },
        }
    }

    /// Classify a non-success broker status
    pub fn from_status(
        status: &StatusCode,
        detail: String,
        operation: &str,
        queue: &QueueName,
        lock_token: Option<&str>,
    ) -> Self {
        match status {
            StatusCode::Unauthorized => Self::AuthenticationError(detail),
            StatusCode::Forbidden => Self::PermissionDenied(operation.to_string()),
            StatusCode::NotFound => match lock_token {
                Some(token) => Self::MessageLockLost(token.to_string()),
                None => Self::QueueNotFound(queue.to_string()),
            },
            StatusCode::TooManyRequests
            | StatusCode::InternalServerError
            | StatusCode::BadGateway
            | StatusCode::ServiceUnavailable
            | StatusCode::GatewayTimeout => Self::ServerBusy(detail),
            other => Self::ServiceBusError {
                code: format!("{:?}", other),
                message: detail,
            },
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::AuthenticationError(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::PermissionDenied(operation) => QueueError::PermissionDenied { operation },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::ServerBusy(message) => QueueError::ProviderError {
                provider: ProviderType::AzureServiceBus.to_string(),
                code: "ServerBusy".to_string(),
                message,
            },
            Self::ServiceBusError { code, message } => QueueError::ProviderError {
                provider: ProviderType::AzureServiceBus.to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::MessageLockLost(lock_token) => QueueError::MessageNotFound { lock_token },
            Self::MessageTooLarge { size, max_size } => {
                QueueError::MessageTooLarge { size, max_size }
            }
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::SerializationError(message) => {
                QueueError::SerializationError(SerializationError::InvalidHeader {
                    name: BROKER_PROPERTIES_HEADER.to_string(),
                    message,
                })
            }
        }
    }
}

/// Run `future`, failing with `AzureError::Timeout` once `limit` passes
async fn within<T, F>(limit: Duration, future: F) -> Result<T, AzureError>
where
    F: Future<Output = Result<T, AzureError>>,
{
    match tokio::time::timeout(limit.to_std().unwrap_or_default(), future).await {
        Ok(result) => result,
        Err(_) => Err(AzureError::Timeout(limit)),
    }
}

// ============================================================================
// Broker metadata
// ============================================================================

/// Broker properties of one peek-locked delivery
#[derive(Debug, Clone)]
struct Delivery {
    message_id: String,
    sequence_number: i64,
    lock_token: String,
    delivery_count: u32,
    enqueued_at: Option<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

impl Delivery {
    fn from_response(response: &PeekLockResponse) -> Option<Self> {
        let properties = response.broker_properties()?;

        Some(Self {
            message_id: properties.message_id.to_string(),
            sequence_number: i64::try_from(properties.sequence_number).unwrap_or_default(),
            lock_token: properties.lock_token.to_string(),
            delivery_count: u32::try_from(properties.delivery_count).unwrap_or_default(),
            enqueued_at: properties
                .enqueued_time_utc
                .and_then(|t| DateTime::from_timestamp(t.unix_timestamp(), 0)),
            locked_until: DateTime::from_timestamp(
                properties.locked_until_utc.unix_timestamp(),
                0,
            ),
        })
    }

    fn into_received(self, body: Bytes) -> ReceivedMessage {
        let message_id = self.message_id.parse::<MessageId>().unwrap_or_default();

        // Without a reported lock expiry the lock is treated as already lost
        let locked_until = self
            .locked_until
            .map(Timestamp::from_datetime)
            .unwrap_or_else(Timestamp::now);

        ReceivedMessage {
            lock_token: LockToken::new(
                self.lock_token,
                message_id.clone(),
                locked_until,
                ProviderType::AzureServiceBus,
            ),
            message_id,
            sequence_number: self.sequence_number,
            body,
            attributes: HashMap::new(),
            correlation_id: None,
            delivery_count: self.delivery_count,
            enqueued_at: self
                .enqueued_at
                .map(Timestamp::from_datetime)
                .unwrap_or_else(Timestamp::now),
        }
    }
}

// ============================================================================
// Azure Service Bus Provider
// ============================================================================

/// Azure Service Bus queue provider
pub struct AzureServiceBusProvider {
    http_client: Arc<dyn HttpClient>,
    namespace: String,
    policy_name: String,
    policy_key: Zeroizing<String>,
    endpoint: String,
    config: AzureServiceBusConfig,
    /// Peek-locked deliveries awaiting settlement, by lock token
    locked: Mutex<HashMap<String, PeekLockResponse>>,
}

impl AzureServiceBusProvider {
    /// Create new provider for the namespace named in `connection`
    ///
    /// No network traffic happens here.
    pub fn new(
        connection: ServiceBusConnectionString,
        config: AzureServiceBusConfig,
    ) -> Result<Self, AzureError> {
        if config.request_timeout_seconds == 0 {
            return Err(AzureError::ConfigurationError(
                "request_timeout_seconds must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            http_client: azure_core::new_http_client(),
            namespace: connection.namespace().to_string(),
            policy_name: connection.shared_access_key_name().to_string(),
            policy_key: Zeroizing::new(connection.expose_shared_access_key().to_string()),
            endpoint: connection.endpoint().to_string(),
            config,
            locked: Mutex::new(HashMap::new()),
        })
    }

    /// Namespace name, the first label of the endpoint host
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of deliveries still awaiting complete or abandon
    pub fn locked_count(&self) -> usize {
        self.deliveries().len()
    }

    fn deliveries(&self) -> MutexGuard<'_, HashMap<String, PeekLockResponse>> {
        self.locked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue_client(&self, queue: &QueueName) -> Result<ServiceBusQueueClient, AzureError> {
        ServiceBusQueueClient::new(
            Arc::clone(&self.http_client),
            self.namespace.clone(),
            queue.as_str().to_string(),
            self.policy_name.clone(),
            self.policy_key.as_str().to_string(),
        )
        .map_err(|e| AzureError::ConfigurationError(e.to_string()))
    }

    fn take_delivery(&self, lock_token: &LockToken) -> Result<PeekLockResponse, AzureError> {
        self.deliveries()
            .remove(lock_token.as_str())
            .ok_or_else(|| AzureError::MessageLockLost(lock_token.to_string()))
    }

    /// Put a delivery back after a settlement attempt that may be repeated
    fn restore_delivery(&self, lock_token: &LockToken, delivery: PeekLockResponse) {
        self.deliveries()
            .insert(lock_token.as_str().to_string(), delivery);
    }
}

impl fmt::Debug for AzureServiceBusProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureServiceBusProvider")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("policy_name", &self.policy_name)
            .field("policy_key", &"[REDACTED]")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl QueueProvider for AzureServiceBusProvider {
    #[instrument(skip(self, message), fields(queue = %queue, size = message.body.len()))]
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let max_size = ProviderType::AzureServiceBus.max_message_size();
        if message.body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size,
            });
        }

        let body = std::str::from_utf8(&message.body).map_err(|e| {
            QueueError::SerializationError(SerializationError::InvalidBody {
                message: e.to_string(),
            })
        })?;

        if !message.attributes.is_empty() || message.correlation_id.is_some() {
            debug!("Message attributes and correlation id are not forwarded to Service Bus");
        }

        let client = self.queue_client(queue).map_err(AzureError::to_queue_error)?;
        within(self.config.request_timeout(), async {
            client
                .send_message(body, None)
                .await
                .map_err(|e| AzureError::from_sdk(e, "send", queue, None))
        })
        .await
        .map_err(AzureError::to_queue_error)?;

        let message_id = message.message_id.clone().unwrap_or_default();
        debug!(message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let client = self.queue_client(queue).map_err(AzureError::to_queue_error)?;
        let wait = timeout.to_std().unwrap_or_default();

        // The broker holds the request open for the whole wait
        let response = within(timeout + self.config.request_timeout(), async {
            client
                .peek_lock_message2(Some(wait))
                .await
                .map_err(|e| AzureError::from_sdk(e, "receive", queue, None))
        })
        .await
        .map_err(AzureError::to_queue_error)?;

        match response.status() {
            StatusCode::Ok | StatusCode::Created => {}
            StatusCode::NoContent => return Ok(None),
            status => {
                return Err(
                    AzureError::from_status(status, response.body(), "receive", queue, None)
                        .to_queue_error(),
                )
            }
        }

        let delivery = Delivery::from_response(&response).ok_or_else(|| {
            AzureError::SerializationError(
                "peek-locked message carries no broker properties".to_string(),
            )
            .to_queue_error()
        })?;

        let message = delivery.into_received(Bytes::from(response.body()));
        debug!(
            queue = %queue,
            sequence_number = message.sequence_number,
            "Message received"
        );

        self.restore_delivery(&message.lock_token, response);
        Ok(Some(message))
    }

    async fn complete_message(
        &self,
        queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(), QueueError> {
        let delivery = self
            .take_delivery(lock_token)
            .map_err(AzureError::to_queue_error)?;

        let result = within(self.config.request_timeout(), async {
            delivery
                .delete_message()
                .await
                .map(|_| ())
                .map_err(|e| AzureError::from_sdk(e, "complete", queue, Some(lock_token.as_str())))
        })
        .await;

        if let Err(e) = &result {
            if !matches!(e, AzureError::MessageLockLost(_)) {
                self.restore_delivery(lock_token, delivery);
            }
        }
        result.map_err(AzureError::to_queue_error)
    }

    async fn abandon_message(
        &self,
        queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(), QueueError> {
        let delivery = self
            .take_delivery(lock_token)
            .map_err(AzureError::to_queue_error)?;

        within(self.config.request_timeout(), async {
            delivery
                .unlock_message()
                .await
                .map(|_| ())
                .map_err(|e| AzureError::from_sdk(e, "abandon", queue, Some(lock_token.as_str())))
        })
        .await
        .map_err(|e| {
            warn!(queue = %queue, error = %e, "Abandon failed");
            e.to_queue_error()
        })
    }

    async fn close(&self) -> Result<(), QueueError> {
        let outstanding: Vec<(String, PeekLockResponse)> = self.deliveries().drain().collect();

        for (lock_token, delivery) in outstanding {
            if let Err(e) = delivery.unlock_message().await {
                warn!(lock_token = %lock_token, error = %e, "Failed to unlock message on close");
            }
        }

        debug!(endpoint = %self.endpoint, "Azure Service Bus provider closed");
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
