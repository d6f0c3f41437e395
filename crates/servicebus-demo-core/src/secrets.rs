//! Resolution of the queue settings stored in Key Vault.

use crate::adapters::AzureKeyVaultProvider;
use crate::credential::CredentialProvider;
use crate::key_vault::{
    KeyVaultConfiguration, KeyVaultError, KeyVaultProvider, SecretName, SecretValue,
    StandardSecrets, VaultName,
};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;

/// Queue name and connection string for one run
#[derive(Clone)]
pub struct QueueSettings {
    pub queue_name: String,
    pub connection_string: SecretValue,
}

impl fmt::Debug for QueueSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSettings")
            .field("queue_name", &self.queue_name)
            .field("connection_string", &self.connection_string)
            .finish()
    }
}

/// Fetches `QueueName` and `ServiceBusConnectionString`, in that order
pub struct SecretResolver {
    vault: Arc<dyn KeyVaultProvider>,
}

impl SecretResolver {
    pub fn new(vault: Arc<dyn KeyVaultProvider>) -> Self {
        Self { vault }
    }

    /// Resolver reading from the Azure vault named `vault`
    ///
    /// # Errors
    /// `KeyVaultError::Configuration` if the provider cannot be built.
    pub fn for_vault(
        vault: &VaultName,
        mut config: KeyVaultConfiguration,
        credential: Arc<dyn CredentialProvider>,
    ) -> Result<Self, KeyVaultError> {
        if config.vault_url.is_empty() {
            config.vault_url = vault.uri();
        }

        let provider = AzureKeyVaultProvider::new(config, credential)?;
        Ok(Self::new(Arc::new(provider)))
    }

    /// Resolver for the vault named by `KEY_VAULT_NAME` in `lookup`
    ///
    /// # Errors
    /// `KeyVaultError::Configuration` if the variable is missing, blank or
    /// not a valid vault name.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        config: KeyVaultConfiguration,
        credential: Arc<dyn CredentialProvider>,
    ) -> Result<Self, KeyVaultError> {
        let vault = VaultName::from_lookup(lookup)?;
        info!(vault = %vault, "Using key vault");
        Self::for_vault(&vault, config, credential)
    }

    /// Fetch both secrets
    ///
    /// No retry is attempted; the first failure is returned.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> Result<QueueSettings, KeyVaultError> {
        let queue_name = self.fetch(&StandardSecrets::queue_name()).await?;
        let connection_string = self
            .fetch(&StandardSecrets::service_bus_connection_string())
            .await?;

        let queue_name = queue_name.expose_secret().trim().to_string();
        info!(queue = %queue_name, "Resolved queue settings");

        Ok(QueueSettings {
            queue_name,
            connection_string,
        })
    }

    async fn fetch(&self, name: &SecretName) -> Result<SecretValue, KeyVaultError> {
        self.vault.get_secret(name).await.map_err(|e| {
            warn!(
                secret = %name,
                error = %e,
                transient = e.is_transient(),
                retry_after = ?e.retry_delay(),
                "Secret lookup failed"
            );
            e
        })
    }
}
