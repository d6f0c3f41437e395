//! # Service Bus Demo Core
//!
//! Building blocks of the Service Bus producer/consumer demo:
//!
//! - [`key_vault`] and [`adapters`]: secret names, values and vault providers
//! - [`credential`]: Azure AD tokens, via the `azure_identity` default chain
//! - [`secrets`]: resolution of the queue name and connection string
//! - [`producer`]: the sequential send loop
//! - [`consumer`]: the console message handler
//! - [`app`]: the end-to-end run with operator checkpoints
//!
//! # Example
//!
//! ```no_run
//! use servicebus_demo_core::{
//!     adapters::InMemoryKeyVaultProvider, DemoConfig, DemoRunner, SecretResolver,
//!     ServiceBusClientFactory, StdoutSink,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(gate: &dyn servicebus_demo_core::OperatorGate) -> Result<(), servicebus_demo_core::DemoError> {
//! let vault = InMemoryKeyVaultProvider::with_secrets([
//!     ("QueueName", "orders"),
//!     ("ServiceBusConnectionString", "Endpoint=sb://x;SharedAccessKey=y"),
//! ])?;
//! let runner = DemoRunner::new(
//!     SecretResolver::new(Arc::new(vault)),
//!     Arc::new(ServiceBusClientFactory::default()),
//!     Arc::new(StdoutSink),
//!     DemoConfig::default(),
//! );
//! runner.run(gate).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod app;
pub mod consumer;
pub mod credential;
pub mod error;
pub mod key_vault;
pub mod producer;
pub mod secrets;

pub use app::{
    Checkpoint, ClientFactory, DemoConfig, DemoRunner, OperatorGate, RunSummary,
    ServiceBusClientFactory, SEND_PROMPT,
};
pub use consumer::{ConsoleMessageHandler, ConsoleSink, ConsumerConfig, StdoutSink};
pub use credential::{
    AzureIdentityCredential, Credential, CredentialError, CredentialProvider,
    ProviderTokenCredential,
};
pub use error::{DemoError, ErrorCategory};
pub use key_vault::{
    KeyVaultConfiguration, KeyVaultError, KeyVaultProvider, SecretName, SecretValue,
    StandardSecrets, VaultName, KEY_VAULT_NAME_VAR,
};
pub use producer::{MessageBodyMode, MessageProducer, ProducerConfig, LITERAL_BODY};
pub use secrets::{QueueSettings, SecretResolver};
