//! Client traits and implementations for queue operations.

use crate::connection::ServiceBusConnectionString;
use crate::error::{ConfigurationError, QueueError};
use crate::handler::{spawn_dispatcher, HandlerRegistration, MessageHandler, MessageHandlerOptions};
use crate::message::{LockToken, Message, MessageId, QueueName, ReceivedMessage};
use crate::provider::{ProviderConfig, ProviderType};
use crate::providers::{AzureServiceBusProvider, InMemoryProvider};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Queue client bound to a single queue
///
/// One handle is used both to send and to register the receive handler. The
/// handle must be closed explicitly; after `close` every operation fails with
/// `QueueError::ClientClosed` and running handler registrations stop.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Queue this client is bound to
    fn queue_name(&self) -> &QueueName;

    /// Namespace endpoint, for diagnostics
    fn endpoint(&self) -> &str;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Send single message to the queue
    async fn send(&self, message: Message) -> Result<MessageId, QueueError>;

    /// Receive a single peek-locked message, waiting up to `timeout`
    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Mark message as successfully processed
    async fn complete(&self, lock_token: &LockToken) -> Result<(), QueueError>;

    /// Release the lock so the message can be redelivered
    async fn abandon(&self, lock_token: &LockToken) -> Result<(), QueueError>;

    /// Start dispatching received messages to `handler`
    ///
    /// Returns immediately; messages are delivered on a background task. At
    /// most `options.max_concurrent_calls` invocations of
    /// [`MessageHandler::on_message`] run at the same time.
    fn register_message_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: MessageHandlerOptions,
    ) -> Result<HandlerRegistration, QueueError>;

    /// Release the client; idempotent
    async fn close(&self) -> Result<(), QueueError>;

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

/// Interface implemented by specific queue providers (Azure, in-memory)
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Send single message
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError>;

    /// Receive single message in peek-lock mode
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Complete message processing
    async fn complete_message(
        &self,
        queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(), QueueError>;

    /// Abandon message for redelivery
    async fn abandon_message(
        &self,
        queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(), QueueError>;

    /// Release provider resources
    async fn close(&self) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Namespace endpoint
    fn endpoint(&self) -> &str;
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create a queue client from a connection string and queue name
    ///
    /// Both values are validated before any provider is built, so an empty
    /// value fails without touching the network.
    ///
    /// # Errors
    /// - `ConfigurationError::Missing` when either value is empty
    /// - `ConfigurationError::ConnectionString` when the connection string is malformed
    /// - `ConfigurationError::Invalid` when the connection string is scoped to another entity
    /// - `ValidationError` when the queue name breaks the naming rules
    pub fn create_client(
        connection_string: &str,
        queue_name: &str,
        provider_config: &ProviderConfig,
    ) -> Result<Arc<dyn QueueClient>, QueueError> {
        if queue_name.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "queue_name".to_string(),
            }
            .into());
        }

        let connection = ServiceBusConnectionString::parse(connection_string)?;
        let queue = QueueName::new(queue_name.to_string())?;

        if let Some(entity_path) = connection.entity_path() {
            if entity_path != queue.as_str() {
                return Err(ConfigurationError::Invalid {
                    message: format!(
                        "connection string is scoped to '{}' but queue '{}' was requested",
                        entity_path, queue
                    ),
                }
                .into());
            }
        }

        let provider: Arc<dyn QueueProvider> = match provider_config {
            ProviderConfig::AzureServiceBus(config) => Arc::new(
                AzureServiceBusProvider::new(connection, config.clone())
                    .map_err(|e| e.to_queue_error())?,
            ),
            ProviderConfig::InMemory(config) => Arc::new(InMemoryProvider::with_endpoint(
                config.clone(),
                connection.endpoint(),
            )),
        };

        info!(
            queue = %queue,
            provider = %provider.provider_type(),
            endpoint = %provider.endpoint(),
            "Created queue client"
        );

        Ok(Arc::new(StandardQueueClient::new(provider, queue)))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    provider: Arc<dyn QueueProvider>,
    queue: QueueName,
    closed: watch::Sender<bool>,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Arc<dyn QueueProvider>, queue: QueueName) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            provider,
            queue,
            closed,
        }
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::ClientClosed {
                queue_name: self.queue.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    fn queue_name(&self) -> &QueueName {
        &self.queue
    }

    fn endpoint(&self) -> &str {
        self.provider.endpoint()
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    #[instrument(skip(self, message), fields(queue = %self.queue))]
    async fn send(&self, message: Message) -> Result<MessageId, QueueError> {
        self.ensure_open()?;
        self.provider.send_message(&self.queue, &message).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        self.ensure_open()?;
        self.provider.receive_message(&self.queue, timeout).await
    }

    #[instrument(skip(self, lock_token), fields(queue = %self.queue, lock_token = %lock_token))]
    async fn complete(&self, lock_token: &LockToken) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.provider.complete_message(&self.queue, lock_token).await
    }

    async fn abandon(&self, lock_token: &LockToken) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.provider.abandon_message(&self.queue, lock_token).await
    }

    fn register_message_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: MessageHandlerOptions,
    ) -> Result<HandlerRegistration, QueueError> {
        self.ensure_open()?;
        options.validate()?;

        Ok(spawn_dispatcher(
            Arc::clone(&self.provider),
            self.queue.clone(),
            handler,
            options,
            self.closed.subscribe(),
        ))
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.send_replace(true) {
            debug!(queue = %self.queue, "Queue client already closed");
            return Ok(());
        }

        self.provider.close().await?;
        info!(queue = %self.queue, "Queue client closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
