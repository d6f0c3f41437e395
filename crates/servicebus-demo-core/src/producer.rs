//! Producer loop sending the demo messages.

use queue_runtime::{Message, MessageId, QueueClient, QueueError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Body sent in [`MessageBodyMode::Literal`]; the braces are not a placeholder
pub const LITERAL_BODY: &str = "Message {i}";

/// How message bodies are built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageBodyMode {
    /// Every body is the literal text `Message {i}`
    #[default]
    Literal,
    /// Bodies are `Message 0`, `Message 1`, ...
    Indexed,
}

impl MessageBodyMode {
    pub fn body(&self, index: usize) -> String {
        match self {
            Self::Literal => LITERAL_BODY.to_string(),
            Self::Indexed => format!("Message {}", index),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub message_count: usize,
    pub body_mode: MessageBodyMode,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            message_count: 5,
            body_mode: MessageBodyMode::Literal,
        }
    }
}

pub struct MessageProducer {
    config: ProducerConfig,
}

impl MessageProducer {
    pub fn new(config: ProducerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Send `message_count` messages one after another
    ///
    /// # Errors
    /// The first send failure ends the loop and is returned; messages sent
    /// before it stay on the queue.
    #[instrument(skip(self, client), fields(queue = %client.queue_name()))]
    pub async fn send_all(&self, client: &dyn QueueClient) -> Result<Vec<MessageId>, QueueError> {
        let mut sent = Vec::with_capacity(self.config.message_count);

        for index in 0..self.config.message_count {
            let body = self.config.body_mode.body(index);
            let message_id = client.send(Message::from_text(&body)).await?;
            debug!(index, message_id = %message_id, "Sent message");
            sent.push(message_id);
        }

        info!(count = sent.len(), "Sent all messages");
        Ok(sent)
    }
}
