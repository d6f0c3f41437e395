//! # In-Memory Key Vault Implementation
//!
//! Thread-safe in-memory vault for tests and local runs.

use crate::key_vault::{KeyVaultError, KeyVaultProvider, SecretName, SecretValue};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

#[cfg(test)]
#[path = "memory_key_vault_tests.rs"]
mod tests;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory Key Vault provider
///
/// Every read is served from the map and counted, so tests can observe how
/// many lookups a caller made.
#[derive(Default)]
pub struct InMemoryKeyVaultProvider {
    secrets: RwLock<HashMap<SecretName, SecretValue>>,
    fetches: AtomicUsize,
}

impl InMemoryKeyVaultProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider pre-populated with `(name, value)` pairs
    ///
    /// # Errors
    /// `KeyVaultError::InvalidSecretName` for any invalid name
    pub fn with_secrets<'a>(
        secrets: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, KeyVaultError> {
        let provider = Self::new();
        for (name, value) in secrets {
            provider.set_secret(
                SecretName::new(name)?,
                SecretValue::from_string(value.to_string()),
            );
        }
        Ok(provider)
    }

    /// Add or replace a secret
    pub fn set_secret(&self, name: SecretName, value: SecretValue) {
        write(&self.secrets).insert(name, value);
    }

    pub fn remove_secret(&self, name: &SecretName) {
        write(&self.secrets).remove(name);
    }

    /// Number of `get_secret` calls so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyVaultProvider for InMemoryKeyVaultProvider {
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, KeyVaultError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        read(&self.secrets)
            .get(name)
            .cloned()
            .ok_or_else(|| KeyVaultError::SecretNotFound { name: name.clone() })
    }
}
