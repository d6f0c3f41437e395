//! # Queue Runtime
//!
//! Queue client runtime for Azure Service Bus, with an in-memory provider for
//! tests and local development.
//!
//! This library provides:
//! - A queue client bound to a single queue, built from a connection string
//! - Peek-lock receive with explicit complete and abandon
//! - Callback-style message handlers with bounded concurrency and error
//!   reporting
//! - An Azure Service Bus provider on `azure_messaging_servicebus`
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Message structures and lock tokens
//! - [`connection`] - Connection string parsing
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Client traits and implementations
//! - [`handler`] - Message handler registration and dispatch
//! - [`providers`] - Concrete provider implementations
//!
//! ## Example
//!
//! ```no_run
//! use queue_runtime::{Message, ProviderConfig, QueueClientFactory};
//!
//! # async fn example() -> Result<(), queue_runtime::QueueError> {
//! let client = QueueClientFactory::create_client(
//!     "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=Send;SharedAccessKey=abc=",
//!     "orders",
//!     &ProviderConfig::default(),
//! )?;
//!
//! client.send(Message::from_text("hello")).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod handler;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, QueueClientFactory, QueueProvider, StandardQueueClient};
pub use connection::{ServiceBusConnectionString, DEFAULT_SHARED_ACCESS_KEY_NAME};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use handler::{
    CancellationSignal, ErrorContext, ExceptionAction, HandlerError, HandlerRegistration,
    MessageHandler, MessageHandlerOptions,
};
pub use message::{LockToken, Message, MessageId, QueueName, ReceivedMessage, Timestamp};
pub use provider::{AzureServiceBusConfig, InMemoryConfig, ProviderConfig, ProviderType};
pub use providers::InMemoryProvider;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
