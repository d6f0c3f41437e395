//! # Key Vault Module
//!
//! Secret management abstractions: validated secret and vault names, a
//! redacting secret container, the provider trait, and the error taxonomy
//! shared by every vault backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "key_vault_tests.rs"]
mod tests;

/// Environment variable holding the vault name
pub const KEY_VAULT_NAME_VAR: &str = "KEY_VAULT_NAME";

/// DNS suffix of Azure Key Vault endpoints
pub const VAULT_DNS_SUFFIX: &str = "vault.azure.net";

// ============================================================================
// Core Types
// ============================================================================

/// Secret identifier with naming validation
///
/// Key Vault secret names are 1-127 characters of ASCII letters, digits and
/// hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretName(String);

impl SecretName {
    pub fn new(name: impl Into<String>) -> Result<Self, KeyVaultError> {
        let name = name.into();

        if name.is_empty() {
            return Err(KeyVaultError::InvalidSecretName {
                name: name.clone(),
                reason: "must not be empty".to_string(),
            });
        }

        if name.len() > 127 {
            return Err(KeyVaultError::InvalidSecretName {
                name: name.clone(),
                reason: "longer than 127 characters".to_string(),
            });
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(KeyVaultError::InvalidSecretName {
                name: name.clone(),
                reason: "only letters, digits and hyphens are allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SecretName {
    type Err = KeyVaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Secret text, zeroed on drop and redacted from `Debug`
#[derive(Clone)]
pub struct SecretValue {
    inner: Zeroizing<String>,
}

impl SecretValue {
    pub fn from_string(value: String) -> Self {
        Self {
            inner: Zeroizing::new(value),
        }
    }

    /// Borrow the plaintext; do not log or store the result
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue([REDACTED], {} bytes)", self.len())
    }
}

/// Validated Key Vault name
///
/// Vault names are 3-24 characters, start with a letter, end with a letter or
/// digit, and contain only letters, digits and non-consecutive hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultName(String);

impl VaultName {
    pub fn new(name: impl Into<String>) -> Result<Self, KeyVaultError> {
        let name = name.into();
        let invalid = |reason: &str| KeyVaultError::Configuration {
            message: format!("invalid key vault name '{}': {}", name, reason),
        };

        if !(3..=24).contains(&name.len()) {
            return Err(invalid("must be 3-24 characters"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("only letters, digits and hyphens are allowed"));
        }
        if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(invalid("must start with a letter"));
        }
        if name.ends_with('-') {
            return Err(invalid("must end with a letter or digit"));
        }
        if name.contains("--") {
            return Err(invalid("consecutive hyphens are not allowed"));
        }

        Ok(Self(name))
    }

    /// Read the vault name from `KEY_VAULT_NAME`
    pub fn from_env() -> Result<Self, KeyVaultError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the vault name through an arbitrary variable lookup
    ///
    /// # Errors
    /// `KeyVaultError::Configuration` when the variable is unset, blank or
    /// not a valid vault name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, KeyVaultError> {
        let value = lookup(KEY_VAULT_NAME_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| KeyVaultError::Configuration {
                message: format!("environment variable {} is not set", KEY_VAULT_NAME_VAR),
            })?;

        Self::new(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Vault endpoint, `https://{name}.vault.azure.net`
    pub fn uri(&self) -> String {
        format!("https://{}.{}", self.0, VAULT_DNS_SUFFIX)
    }
}

impl fmt::Display for VaultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key Vault client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyVaultConfiguration {
    /// Key Vault URL; filled from the vault name when empty
    pub vault_url: String,

    /// Upper bound on one secret read, SDK retries included
    pub request_timeout_seconds: u64,
}

impl KeyVaultConfiguration {
    /// Configuration targeting `vault`
    pub fn for_vault(vault: &VaultName) -> Self {
        Self {
            vault_url: vault.uri(),
            ..Self::default()
        }
    }
}

impl Default for KeyVaultConfiguration {
    fn default() -> Self {
        Self {
            vault_url: String::new(),
            request_timeout_seconds: 30,
        }
    }
}

// ============================================================================
// Interface Traits
// ============================================================================

/// Read access to a secret store
#[async_trait]
pub trait KeyVaultProvider: Send + Sync {
    /// Get the current value of a secret
    ///
    /// # Errors
    /// `SecretNotFound` when the vault has no such secret, `AccessDenied`
    /// when the identity lacks `get` permission, `AuthenticationFailed` when
    /// no usable token could be obtained, and `ServiceUnavailable` or
    /// `Timeout` when the vault cannot be reached.
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, KeyVaultError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Failure to read a secret
#[derive(Debug, thiserror::Error)]
pub enum KeyVaultError {
    #[error("Secret '{name}' does not exist in the vault")]
    SecretNotFound { name: SecretName },

    #[error("Access to secret '{name}' was denied: {reason}")]
    AccessDenied { name: SecretName, reason: String },

    #[error("Key Vault is unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Key Vault rejected the credential: {message}")]
    AuthenticationFailed { message: String },

    #[error("Invalid secret name '{name}': {reason}")]
    InvalidSecretName { name: String, reason: String },

    #[error("Key Vault did not answer within {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("Key Vault is throttling requests; retry in {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Key Vault is not configured: {message}")]
    Configuration { message: String },

    #[error("Unexpected Key Vault response: {message}")]
    Internal { message: String },
}

impl KeyVaultError {
    /// Whether the same request may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KeyVaultError::ServiceUnavailable { .. }
                | KeyVaultError::Timeout { .. }
                | KeyVaultError::RateLimitExceeded { .. }
                | KeyVaultError::Internal { .. }
        )
    }

    /// Suggested wait before retrying, for transient errors
    pub fn retry_delay(&self) -> Option<std::time::Duration> {
        match self {
            KeyVaultError::RateLimitExceeded {
                retry_after_seconds,
            } => Some(std::time::Duration::from_secs(*retry_after_seconds)),
            KeyVaultError::ServiceUnavailable { .. } => Some(std::time::Duration::from_secs(30)),
            KeyVaultError::Timeout { .. } => Some(std::time::Duration::from_secs(5)),
            _ => None,
        }
    }

    /// Whether the identity, not the request, is at fault
    pub fn is_permission_error(&self) -> bool {
        matches!(
            self,
            KeyVaultError::AccessDenied { .. } | KeyVaultError::AuthenticationFailed { .. }
        )
    }
}

// ============================================================================
// Standard Secret Names
// ============================================================================

/// Secret names read by the demo
pub struct StandardSecrets;

impl StandardSecrets {
    /// Secret holding the queue name
    pub const QUEUE_NAME: &'static str = "QueueName";

    /// Secret holding the Service Bus connection string
    pub const SERVICE_BUS_CONNECTION_STRING: &'static str = "ServiceBusConnectionString";

    pub fn queue_name() -> SecretName {
        SecretName(Self::QUEUE_NAME.to_string())
    }

    pub fn service_bus_connection_string() -> SecretName {
        SecretName(Self::SERVICE_BUS_CONNECTION_STRING.to_string())
    }
}
