//! # Credential Module
//!
//! Azure AD token acquisition for Key Vault access.
//!
//! A [`CredentialProvider`] turns some ambient identity into a bearer token.
//! The production provider, [`AzureIdentityCredential`], delegates to the
//! `azure_identity` default credential chain (environment, managed identity,
//! Azure CLI). Tests substitute their own provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use zeroize::Zeroizing;

pub mod identity;

pub use identity::{AzureIdentityCredential, ProviderTokenCredential};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

/// Token scope for Azure Key Vault
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// Bearer token together with its expiry
#[derive(Clone)]
pub struct Credential {
    token: Zeroizing<String>,
    expires_on: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            expires_on,
        }
    }

    /// Raw access token (only for immediate use)
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a token valid for Key Vault
    ///
    /// # Errors
    /// - `CredentialError::Unavailable` when no identity applies in the
    ///   current environment
    /// - `CredentialError::AuthenticationFailed` when an identity applies but
    ///   the identity platform rejected it
    async fn resolve(&self) -> Result<Credential, CredentialError>;

    /// Short name used in diagnostics
    fn name(&self) -> &'static str;
}

/// Errors raised while obtaining a credential
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("{credential} is unavailable: {message}")]
    Unavailable {
        credential: &'static str,
        message: String,
    },

    #[error("{credential} authentication failed: {message}")]
    AuthenticationFailed {
        credential: &'static str,
        message: String,
    },

    #[error("Invalid token from {credential}: {message}")]
    InvalidResponse {
        credential: &'static str,
        message: String,
    },
}
