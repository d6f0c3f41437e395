//! # Azure Key Vault Implementation
//!
//! Reads secrets with the `azure_security_keyvault` [`SecretClient`].
//!
//! Tokens come from an injected [`CredentialProvider`], handed to the SDK
//! through [`ProviderTokenCredential`]. Every read goes to the vault; nothing
//! is cached between calls.

use crate::credential::{CredentialProvider, ProviderTokenCredential};
use crate::key_vault::{
    KeyVaultConfiguration, KeyVaultError, KeyVaultProvider, SecretName, SecretValue,
};
use async_trait::async_trait;
use azure_core::error::ErrorKind;
use azure_core::StatusCode;
use azure_security_keyvault::SecretClient;
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

#[cfg(test)]
#[path = "azure_key_vault_tests.rs"]
mod tests;

/// Wait suggested after throttling; the SDK does not surface `Retry-After`
const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

/// Azure Key Vault provider
pub struct AzureKeyVaultProvider {
    client: SecretClient,
    config: KeyVaultConfiguration,
    credential_name: &'static str,
}

impl AzureKeyVaultProvider {
    /// Create new Azure Key Vault provider
    ///
    /// No network traffic happens here; the first token is requested on the
    /// first read.
    ///
    /// # Errors
    /// `KeyVaultError::Configuration` if the vault URL is missing or not a
    /// URL, or the timeout is zero.
    #[instrument(skip(credential))]
    pub fn new(
        config: KeyVaultConfiguration,
        credential: Arc<dyn CredentialProvider>,
    ) -> Result<Self, KeyVaultError> {
        if config.vault_url.is_empty() {
            return Err(KeyVaultError::Configuration {
                message: "vault_url is required".to_string(),
            });
        }

        url::Url::parse(&config.vault_url).map_err(|e| KeyVaultError::Configuration {
            message: format!("invalid vault_url '{}': {}", config.vault_url, e),
        })?;

        if config.request_timeout_seconds == 0 {
            return Err(KeyVaultError::Configuration {
                message: "request_timeout_seconds must be greater than zero".to_string(),
            });
        }

        let credential_name = credential.name();
        let client = SecretClient::new(
            &config.vault_url,
            Arc::new(ProviderTokenCredential::new(credential)),
        )
        .map_err(|e| KeyVaultError::Configuration {
            message: format!("Failed to create Key Vault client: {}", e),
        })?;

        info!(
            vault_url = %config.vault_url,
            credential = credential_name,
            "Initializing Azure Key Vault provider"
        );

        Ok(Self {
            client,
            config,
            credential_name,
        })
    }

    pub fn vault_url(&self) -> &str {
        &self.config.vault_url
    }
}

/// Classify an SDK failure for the secret `name`
pub(crate) fn map_azure_error(name: &SecretName, error: azure_core::Error) -> KeyVaultError {
    let message = error.to_string();

    match error.kind() {
        ErrorKind::HttpResponse { status, .. } => match status {
            StatusCode::NotFound => KeyVaultError::SecretNotFound { name: name.clone() },
            StatusCode::Forbidden => KeyVaultError::AccessDenied {
                name: name.clone(),
                reason: message,
            },
            StatusCode::Unauthorized => KeyVaultError::AuthenticationFailed { message },
            StatusCode::TooManyRequests => KeyVaultError::RateLimitExceeded {
                retry_after_seconds: DEFAULT_RETRY_AFTER_SECONDS,
            },
            StatusCode::InternalServerError
            | StatusCode::BadGateway
            | StatusCode::ServiceUnavailable
            | StatusCode::GatewayTimeout => KeyVaultError::ServiceUnavailable { message },
            other => KeyVaultError::Internal {
                message: format!("unexpected status {:?}: {}", other, message),
            },
        },
        ErrorKind::Credential => KeyVaultError::AuthenticationFailed { message },
        ErrorKind::Io => KeyVaultError::ServiceUnavailable { message },
        _ => KeyVaultError::Internal { message },
    }
}

#[async_trait]
impl KeyVaultProvider for AzureKeyVaultProvider {
    #[instrument(skip(self), fields(secret_name = %name))]
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, KeyVaultError> {
        debug!("Fetching secret from Azure Key Vault");

        let limit = std::time::Duration::from_secs(self.config.request_timeout_seconds);
        let secret = tokio::time::timeout(limit, self.client.get(name.as_str()).into_future())
            .await
            .map_err(|_| KeyVaultError::Timeout {
                timeout_seconds: self.config.request_timeout_seconds,
            })?
            .map_err(|e| {
                let err = map_azure_error(name, e);
                error!(error = %err, "Failed to retrieve secret from Key Vault");
                err
            })?;

        info!("Retrieved secret from Key Vault");
        Ok(SecretValue::from_string(secret.value))
    }
}

impl std::fmt::Debug for AzureKeyVaultProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureKeyVaultProvider")
            .field("vault_url", &self.config.vault_url)
            .field("credential", &self.credential_name)
            .finish()
    }
}
