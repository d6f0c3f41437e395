//! # Demo Runner
//!
//! Drives one run of the demo:
//!
//! 1. resolve [`QueueSettings`] from the vault
//! 2. build the queue client
//! 3. send the configured messages
//! 4. wait at [`Checkpoint::MessagesSent`]
//! 5. register the console handler
//! 6. wait at [`Checkpoint::HandlerRegistered`]
//! 7. close the registration, then the client
//!
//! The client is closed on every path once it exists. Secret resolution and
//! the send loop stop early when [`OperatorGate::interrupted`] fires.

use crate::consumer::{ConsoleMessageHandler, ConsoleSink, ConsumerConfig};
use crate::error::DemoError;
use crate::producer::{MessageProducer, ProducerConfig};
use crate::secrets::{QueueSettings, SecretResolver};
use async_trait::async_trait;
use queue_runtime::{
    MessageId, ProviderConfig, QueueClient, QueueClientFactory, QueueError, QueueName,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;

/// Banner printed before the producer loop starts
pub const SEND_PROMPT: &str = "Press ENTER to send messages...";

/// Points at which the run waits for the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// All messages were sent; the handler is not registered yet
    MessagesSent,
    /// The handler is receiving; returning from the wait shuts down
    HandlerRegistered,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessagesSent => f.write_str("messages-sent"),
            Self::HandlerRegistered => f.write_str("handler-registered"),
        }
    }
}

/// Blocks the run until the operator lets it continue
#[async_trait]
pub trait OperatorGate: Send + Sync {
    async fn wait(&self, checkpoint: Checkpoint) -> Result<(), DemoError>;

    /// Completes once the operator asked the run to stop
    ///
    /// The default never completes.
    async fn interrupted(&self) {
        std::future::pending::<()>().await
    }
}

/// Builds the queue client from resolved settings
pub trait ClientFactory: Send + Sync {
    fn create(&self, settings: &QueueSettings) -> Result<Arc<dyn QueueClient>, QueueError>;
}

/// Creates clients through [`QueueClientFactory`]
#[derive(Debug, Clone, Default)]
pub struct ServiceBusClientFactory {
    provider: ProviderConfig,
}

impl ServiceBusClientFactory {
    pub fn new(provider: ProviderConfig) -> Self {
        Self { provider }
    }
}

impl ClientFactory for ServiceBusClientFactory {
    fn create(&self, settings: &QueueSettings) -> Result<Arc<dyn QueueClient>, QueueError> {
        QueueClientFactory::create_client(
            settings.connection_string.expose_secret(),
            &settings.queue_name,
            &self.provider,
        )
    }
}

/// Producer and consumer settings for a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub queue_name: QueueName,
    pub sent: Vec<MessageId>,
}

pub struct DemoRunner {
    resolver: SecretResolver,
    factory: Arc<dyn ClientFactory>,
    sink: Arc<dyn ConsoleSink>,
    config: DemoConfig,
}

impl DemoRunner {
    pub fn new(
        resolver: SecretResolver,
        factory: Arc<dyn ClientFactory>,
        sink: Arc<dyn ConsoleSink>,
        config: DemoConfig,
    ) -> Self {
        Self {
            resolver,
            factory,
            sink,
            config,
        }
    }

    /// Execute the full run
    ///
    /// # Errors
    /// Secret, client construction and send failures end the run. Errors
    /// raised while handling received messages never do; they are printed
    /// by the console handler. An interrupt before the first checkpoint
    /// ends the run with `DemoError::Interrupted`.
    #[instrument(skip_all)]
    pub async fn run(&self, gate: &dyn OperatorGate) -> Result<RunSummary, DemoError> {
        let settings = tokio::select! {
            settings = self.resolver.resolve() => settings?,
            _ = gate.interrupted() => {
                warn!("Interrupted while resolving secrets");
                return Err(DemoError::Interrupted { phase: "secret resolution" });
            }
        };
        let client = self.factory.create(&settings)?;
        info!(
            queue = %client.queue_name(),
            endpoint = %client.endpoint(),
            provider = ?client.provider_type(),
            "Queue client created"
        );

        let outcome = self.drive(&client, gate).await;

        let closed = client.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "Failed to close queue client");
        }

        let summary = outcome?;
        closed?;
        info!(queue = %summary.queue_name, sent = summary.sent.len(), "Run finished");
        Ok(summary)
    }

    async fn drive(
        &self,
        client: &Arc<dyn QueueClient>,
        gate: &dyn OperatorGate,
    ) -> Result<RunSummary, DemoError> {
        self.sink.write_line(SEND_PROMPT);

        let producer = MessageProducer::new(self.config.producer.clone());
        let sent = tokio::select! {
            sent = producer.send_all(client.as_ref()) => sent?,
            _ = gate.interrupted() => {
                warn!("Interrupted while sending messages");
                return Err(DemoError::Interrupted { phase: "sending" });
            }
        };

        gate.wait(Checkpoint::MessagesSent).await?;

        let registration =
            ConsoleMessageHandler::register(client.clone(), self.sink.clone(), &self.config.consumer)?;
        info!(
            max_concurrent_calls = self.config.consumer.max_concurrent_calls,
            auto_complete = self.config.consumer.auto_complete,
            "Message handler registered"
        );

        let waited = gate.wait(Checkpoint::HandlerRegistered).await;
        registration.close().await;
        waited?;

        Ok(RunSummary {
            queue_name: client.queue_name().clone(),
            sent,
        })
    }
}
