//! Console consumer: prints each received message and completes it.

use async_trait::async_trait;
use chrono::Duration;
use queue_runtime::{
    CancellationSignal, ErrorContext, HandlerError, HandlerRegistration, MessageHandler,
    MessageHandlerOptions, QueueClient, QueueError, ReceivedMessage,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Line-oriented console output
pub trait ConsoleSink: Send + Sync {
    /// Write one line; failures are swallowed
    fn write_line(&self, line: &str);
}

/// Writes to the process's standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ConsoleSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }
}

/// Handler registration settings for the consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub max_concurrent_calls: usize,
    /// The console handler completes explicitly, so this stays off
    pub auto_complete: bool,
    /// Receive poll timeout; shutdown waits for an outstanding receive
    pub max_wait_seconds: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            auto_complete: false,
            max_wait_seconds: 5,
        }
    }
}

impl ConsumerConfig {
    pub fn to_handler_options(&self) -> MessageHandlerOptions {
        MessageHandlerOptions::new()
            .with_max_concurrent_calls(self.max_concurrent_calls)
            .with_auto_complete(self.auto_complete)
            .with_max_wait_time(Duration::seconds(self.max_wait_seconds as i64))
    }
}

/// Prints `Received message: SequenceNumber: {n}` and completes the lock token
pub struct ConsoleMessageHandler {
    client: Arc<dyn QueueClient>,
    sink: Arc<dyn ConsoleSink>,
}

impl ConsoleMessageHandler {
    pub fn new(client: Arc<dyn QueueClient>, sink: Arc<dyn ConsoleSink>) -> Self {
        Self { client, sink }
    }

    /// Register a console handler on `client`
    ///
    /// # Errors
    /// `QueueError::ValidationError` for invalid options and
    /// `QueueError::ClientClosed` if the client was already closed.
    pub fn register(
        client: Arc<dyn QueueClient>,
        sink: Arc<dyn ConsoleSink>,
        config: &ConsumerConfig,
    ) -> Result<HandlerRegistration, QueueError> {
        let handler = Arc::new(Self::new(client.clone(), sink));
        client.register_message_handler(handler, config.to_handler_options())
    }
}

#[async_trait]
impl MessageHandler for ConsoleMessageHandler {
    #[instrument(skip_all, fields(sequence_number = message.sequence_number))]
    async fn on_message(
        &self,
        message: &ReceivedMessage,
        _cancellation: CancellationSignal,
    ) -> Result<(), HandlerError> {
        self.sink.write_line(&format!(
            "Received message: SequenceNumber: {}",
            message.sequence_number
        ));

        self.client.complete(&message.lock_token).await?;
        debug!(message_id = %message.message_id, "Completed message");
        Ok(())
    }

    async fn on_error(&self, context: ErrorContext) {
        warn!(
            endpoint = %context.endpoint,
            entity_path = %context.entity_path,
            action = %context.action,
            error = %context.error,
            "Message handler encountered an exception"
        );

        self.sink.write_line(&format!(
            "Message handler encountered an exception {}",
            context.error
        ));
        self.sink.write_line("Exception context for troubleshooting:");
        self.sink
            .write_line(&format!("- Endpoint: {}", context.endpoint));
        self.sink
            .write_line(&format!("- Entity Path: {}", context.entity_path));
        self.sink
            .write_line(&format!("- Executing Action: {}", context.action));
    }
}
