//! Bridges between [`CredentialProvider`] and the Azure SDK's
//! [`TokenCredential`].
//!
//! [`AzureIdentityCredential`] exposes any SDK credential (by default the
//! `azure_identity` default chain) as a [`CredentialProvider`].
//! [`ProviderTokenCredential`] goes the other way so the Key Vault client can
//! authenticate with whatever provider the application was given.

use super::{Credential, CredentialError, CredentialProvider, KEY_VAULT_SCOPE};
use async_trait::async_trait;
use azure_core::auth::{AccessToken, Secret, TokenCredential};
use azure_core::error::ErrorKind;
use chrono::DateTime;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;

const AZURE_IDENTITY: &str = "azure_identity";

/// Key Vault tokens from an Azure SDK credential
pub struct AzureIdentityCredential {
    inner: Arc<dyn TokenCredential>,
    scope: String,
}

impl AzureIdentityCredential {
    /// Wrap an SDK credential, requesting tokens for Key Vault
    pub fn new(inner: Arc<dyn TokenCredential>) -> Self {
        Self {
            inner,
            scope: KEY_VAULT_SCOPE.to_string(),
        }
    }

    /// The `azure_identity` default chain: environment service principal,
    /// managed identity, then the Azure CLI
    ///
    /// # Errors
    /// `CredentialError::Unavailable` when the chain cannot be assembled.
    pub fn default_chain() -> Result<Self, CredentialError> {
        let inner = azure_identity::create_default_credential().map_err(|e| {
            CredentialError::Unavailable {
                credential: AZURE_IDENTITY,
                message: e.to_string(),
            }
        })?;

        Ok(Self::new(inner))
    }
}

impl fmt::Debug for AzureIdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureIdentityCredential")
            .field("scope", &self.scope)
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for AzureIdentityCredential {
    async fn resolve(&self) -> Result<Credential, CredentialError> {
        let token = self
            .inner
            .get_token(&[self.scope.as_str()])
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::Io => CredentialError::Unavailable {
                    credential: AZURE_IDENTITY,
                    message: e.to_string(),
                },
                _ => CredentialError::AuthenticationFailed {
                    credential: AZURE_IDENTITY,
                    message: e.to_string(),
                },
            })?;

        let epoch = token.expires_on.unix_timestamp();
        let expires_on =
            DateTime::from_timestamp(epoch, 0).ok_or_else(|| CredentialError::InvalidResponse {
                credential: AZURE_IDENTITY,
                message: format!("expiry {} is out of range", epoch),
            })?;

        debug!(expires_on = %expires_on, "Acquired Key Vault token");
        Ok(Credential::new(token.token.secret(), expires_on))
    }

    fn name(&self) -> &'static str {
        AZURE_IDENTITY
    }
}

/// A [`CredentialProvider`] presented as an SDK [`TokenCredential`]
///
/// Requested scopes are ignored; the provider always yields Key Vault tokens.
pub struct ProviderTokenCredential {
    provider: Arc<dyn CredentialProvider>,
}

impl ProviderTokenCredential {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }
}

impl fmt::Debug for ProviderTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTokenCredential")
            .field("provider", &self.provider.name())
            .finish()
    }
}

#[async_trait]
impl TokenCredential for ProviderTokenCredential {
    async fn get_token(&self, _scopes: &[&str]) -> azure_core::Result<AccessToken> {
        let credential = self
            .provider
            .resolve()
            .await
            .map_err(|e| azure_core::Error::new(ErrorKind::Credential, e))?;

        let epoch = credential.expires_on().timestamp();
        let expires_on = OffsetDateTime::from_unix_timestamp(epoch).map_err(|_| {
            azure_core::Error::new(
                ErrorKind::Credential,
                CredentialError::InvalidResponse {
                    credential: self.provider.name(),
                    message: format!("expiry {} is out of range", epoch),
                },
            )
        })?;

        Ok(AccessToken::new(
            Secret::new(credential.token().to_string()),
            expires_on,
        ))
    }

    async fn clear_cache(&self) -> azure_core::Result<()> {
        Ok(())
    }
}
