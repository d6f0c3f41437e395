//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue that:
//! - Assigns per-queue sequence numbers starting at 1
//! - Delivers messages in peek-lock mode with a configurable lock duration
//! - Returns messages whose lock expired or was abandoned to the queue
//! - Moves messages past the maximum delivery count to a dead-letter list
//! - Drops messages whose time-to-live has elapsed
//!
//! Receivers waiting on an empty queue are woken as soon as a message is sent
//! or abandoned.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{LockToken, Message, MessageId, QueueName, ReceivedMessage, Timestamp};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Endpoint reported when none is supplied
pub const IN_MEMORY_ENDPOINT: &str = "memory://localhost";

/// Upper bound on how long a waiting receiver sleeps between lock-expiry checks
const LOCK_EXPIRY_POLL: std::time::Duration = std::time::Duration::from_millis(50);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
        }
    }

    /// Get or create a queue
    fn get_or_create_queue(&mut self, queue_name: &QueueName) -> &mut InMemoryQueue {
        self.queues
            .entry(queue_name.clone())
            .or_insert_with(InMemoryQueue::new)
    }
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    /// Available messages ordered by sequence number
    messages: VecDeque<StoredMessage>,
    /// Messages that exceeded the delivery limit
    dead_letter: Vec<StoredMessage>,
    /// Peek-locked messages keyed by lock token
    in_flight: HashMap<String, InFlightMessage>,
    next_sequence_number: i64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            dead_letter: Vec::new(),
            in_flight: HashMap::new(),
            next_sequence_number: 1,
        }
    }

    /// Put a message back in sequence order, or dead-letter it
    fn requeue(&mut self, message: StoredMessage, max_delivery_count: u32) {
        if message.delivery_count >= max_delivery_count {
            debug!(
                sequence_number = message.sequence_number,
                delivery_count = message.delivery_count,
                "Message moved to dead letter"
            );
            self.dead_letter.push(message);
            return;
        }

        let position = self
            .messages
            .partition_point(|m| m.sequence_number < message.sequence_number);
        self.messages.insert(position, message);
    }

    /// Return messages with expired locks to the queue
    fn reclaim_expired_locks(&mut self, max_delivery_count: u32) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.is_expired())
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(in_flight) = self.in_flight.remove(&token) {
                self.requeue(in_flight.message, max_delivery_count);
            }
        }
    }

    fn next_available(&mut self) -> Option<StoredMessage> {
        while let Some(message) = self.messages.pop_front() {
            if message.is_expired() {
                debug!(sequence_number = message.sequence_number, "Dropping expired message");
                continue;
            }
            return Some(message);
        }
        None
    }
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    sequence_number: i64,
    body: Bytes,
    attributes: HashMap<String, String>,
    correlation_id: Option<String>,
    enqueued_at: Timestamp,
    delivery_count: u32,
    expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn from_message(message: &Message, message_id: MessageId, sequence_number: i64) -> Self {
        let now = Timestamp::now();
        let expires_at = message.time_to_live.map(|ttl| now.add_duration(ttl));

        Self {
            message_id,
            sequence_number,
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            correlation_id: message.correlation_id.clone(),
            enqueued_at: now,
            delivery_count: 0,
            expires_at,
        }
    }

    /// Check if message is expired based on TTL
    fn is_expired(&self) -> bool {
        if let Some(ref expires_at) = self.expires_at {
            Timestamp::now() >= *expires_at
        } else {
            false
        }
    }
}

/// A message currently being processed
struct InFlightMessage {
    message: StoredMessage,
    lock_expires_at: Timestamp,
}

impl InFlightMessage {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.lock_expires_at
    }
}

fn storage_poisoned() -> QueueError {
    QueueError::ProviderError {
        provider: ProviderType::InMemory.to_string(),
        code: "StoragePoisoned".to_string(),
        message: "in-memory queue storage lock was poisoned".to_string(),
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
    available: Arc<Notify>,
    endpoint: String,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_endpoint(config, IN_MEMORY_ENDPOINT)
    }

    /// Create a provider that reports `endpoint` in diagnostics
    pub fn with_endpoint(config: InMemoryConfig, endpoint: impl Into<String>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config))),
            available: Arc::new(Notify::new()),
            endpoint: endpoint.into(),
        }
    }

    /// Number of messages waiting to be received
    pub fn message_count(&self, queue: &QueueName) -> usize {
        self.read_queue(queue, |q| q.messages.len())
    }

    /// Number of messages currently peek-locked
    pub fn in_flight_count(&self, queue: &QueueName) -> usize {
        self.read_queue(queue, |q| q.in_flight.len())
    }

    /// Number of dead-lettered messages
    pub fn dead_letter_count(&self, queue: &QueueName) -> usize {
        self.read_queue(queue, |q| q.dead_letter.len())
    }

    fn read_queue(&self, queue: &QueueName, f: impl Fn(&InMemoryQueue) -> usize) -> usize {
        self.storage
            .read()
            .ok()
            .and_then(|storage| storage.queues.get(queue).map(&f))
            .unwrap_or(0)
    }

    /// Lock the next available message, if any
    fn try_receive(&self, queue: &QueueName) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut storage = self.storage.write().map_err(|_| storage_poisoned())?;
        let max_delivery_count = storage.config.max_delivery_count;
        let lock_duration = storage.config.lock_duration();

        let queue_state = storage.get_or_create_queue(queue);
        queue_state.reclaim_expired_locks(max_delivery_count);

        let Some(mut message) = queue_state.next_available() else {
            return Ok(None);
        };

        message.delivery_count += 1;
        let token = uuid::Uuid::new_v4().to_string();
        let locked_until = Timestamp::now().add_duration(lock_duration);

        let received = ReceivedMessage {
            message_id: message.message_id.clone(),
            sequence_number: message.sequence_number,
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            correlation_id: message.correlation_id.clone(),
            lock_token: LockToken::new(
                token.clone(),
                message.message_id.clone(),
                locked_until.clone(),
                ProviderType::InMemory,
            ),
            delivery_count: message.delivery_count,
            enqueued_at: message.enqueued_at.clone(),
        };

        queue_state.in_flight.insert(
            token,
            InFlightMessage {
                message,
                lock_expires_at: locked_until,
            },
        );

        Ok(Some(received))
    }

    /// Remove a live lock, failing when it is unknown or expired
    fn take_lock(
        &self,
        queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(InFlightMessage, u32), QueueError> {
        let mut storage = self.storage.write().map_err(|_| storage_poisoned())?;
        let max_delivery_count = storage.config.max_delivery_count;

        let not_found = || QueueError::MessageNotFound {
            lock_token: lock_token.to_string(),
        };

        let queue_state = storage.queues.get_mut(queue).ok_or_else(not_found)?;
        match queue_state.in_flight.get(lock_token.as_str()) {
            Some(in_flight) if !in_flight.is_expired() => {}
            _ => return Err(not_found()),
        }

        let in_flight = queue_state
            .in_flight
            .remove(lock_token.as_str())
            .ok_or_else(not_found)?;
        Ok((in_flight, max_delivery_count))
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let max_size = ProviderType::InMemory.max_message_size();
        if message.body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size,
            });
        }

        let message_id = {
            let mut storage = self.storage.write().map_err(|_| storage_poisoned())?;
            let max_queue_size = storage.config.max_queue_size;
            let queue_state = storage.get_or_create_queue(queue);

            if queue_state.messages.len() >= max_queue_size {
                return Err(QueueError::ProviderError {
                    provider: ProviderType::InMemory.to_string(),
                    code: "QueueFull".to_string(),
                    message: format!("queue '{}' holds {} messages", queue, max_queue_size),
                });
            }

            let message_id = message.message_id.clone().unwrap_or_default();
            let sequence_number = queue_state.next_sequence_number;
            queue_state.next_sequence_number += 1;
            queue_state.messages.push_back(StoredMessage::from_message(
                message,
                message_id.clone(),
                sequence_number,
            ));

            debug!(queue = %queue, sequence_number, "Message stored");
            message_id
        };

        self.available.notify_waiters();
        Ok(message_id)
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let deadline =
            tokio::time::Instant::now() + timeout.to_std().unwrap_or(std::time::Duration::ZERO);

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_receive(queue)? {
                return Ok(Some(message));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wake_at = deadline.min(now + LOCK_EXPIRY_POLL);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn complete_message(
        &self,
        queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(), QueueError> {
        let (in_flight, _) = self.take_lock(queue, lock_token)?;
        debug!(
            queue = %queue,
            sequence_number = in_flight.message.sequence_number,
            "Message completed"
        );
        Ok(())
    }

    async fn abandon_message(
        &self,
        queue: &QueueName,
        lock_token: &LockToken,
    ) -> Result<(), QueueError> {
        let (in_flight, max_delivery_count) = self.take_lock(queue, lock_token)?;

        {
            let mut storage = self.storage.write().map_err(|_| storage_poisoned())?;
            storage
                .get_or_create_queue(queue)
                .requeue(in_flight.message, max_delivery_count);
        }

        self.available.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        debug!(endpoint = %self.endpoint, "In-memory provider closed");
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
