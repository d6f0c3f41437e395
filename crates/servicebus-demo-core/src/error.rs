//! Top-level error type for the demo.

use crate::credential::CredentialError;
use crate::key_vault::KeyVaultError;
use queue_runtime::QueueError;
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

/// Broad failure classes, used for exit codes and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Missing or malformed settings
    Configuration,
    /// Secrets could not be read from the vault
    Secrets,
    /// No usable identity, or the identity was rejected
    Authentication,
    /// Queue operations failed
    Queue,
    /// Console or process I/O failed
    Io,
    /// The operator stopped the run before it finished
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Secret retrieval failed: {0}")]
    Secrets(#[from] KeyVaultError),

    #[error("Authentication failed: {0}")]
    Credential(#[from] CredentialError),

    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interrupted during {phase}")]
    Interrupted { phase: &'static str },
}

impl DemoError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Configuration { .. } => false,
            Self::Secrets(e) => e.is_transient(),
            Self::Credential(_) => false,
            Self::Queue(e) => e.is_transient(),
            Self::Io(_) | Self::Interrupted { .. } => false,
        }
    }

    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Secrets(KeyVaultError::Configuration { .. })
            | Self::Secrets(KeyVaultError::InvalidSecretName { .. }) => {
                ErrorCategory::Configuration
            }
            Self::Secrets(e) if e.is_permission_error() => ErrorCategory::Authentication,
            Self::Secrets(_) => ErrorCategory::Secrets,
            Self::Credential(_) => ErrorCategory::Authentication,
            Self::Queue(e) if e.is_configuration() => ErrorCategory::Configuration,
            Self::Queue(QueueError::AuthenticationFailed { .. })
            | Self::Queue(QueueError::PermissionDenied { .. }) => ErrorCategory::Authentication,
            Self::Queue(_) => ErrorCategory::Queue,
            Self::Io(_) => ErrorCategory::Io,
            Self::Interrupted { .. } => ErrorCategory::Interrupted,
        }
    }
}
