//! # Adapters
//!
//! Concrete [`KeyVaultProvider`](crate::key_vault::KeyVaultProvider)
//! implementations.

pub mod azure_key_vault;
pub mod memory_key_vault;

pub use azure_key_vault::AzureKeyVaultProvider;
pub use memory_key_vault::InMemoryKeyVaultProvider;
