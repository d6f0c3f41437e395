//! Error types for queue operations.

use chrono::Duration;
use thiserror::Error;

/// Failure of a queue client operation
#[derive(Debug, Error)]
pub enum QueueError {
    /// The namespace has no entity with this name
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    /// The peek-lock is gone; the broker will redeliver the message
    #[error("Message not found or lock expired: {lock_token}")]
    MessageNotFound { lock_token: String },

    #[error("Operation timed out after {duration}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The Shared Access Signature was rejected
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The key lacks the claim (Send, Listen) the operation needs
    #[error("Permission denied for operation: {operation}")]
    PermissionDenied { operation: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    /// Any other broker status, with the provider's own code
    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Queue client for '{queue_name}' has been closed")]
    ClientClosed { queue_name: String },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Whether repeating the same call may succeed
    ///
    /// Broker faults (throttling, 5xx) and network failures are transient;
    /// rejected credentials, bad input and lost locks are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionFailed { .. } | Self::ProviderError { .. }
        )
    }

    /// Whether the caller must fix configuration before retrying
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_) | Self::ValidationError(_)
        )
    }
}

/// Broker payloads that could not be decoded
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Header '{name}' is missing or malformed: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("Message body is not valid UTF-8: {message}")]
    InvalidBody { message: String },
}

/// Problems with the connection string or client settings
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    /// Key material is never included in `message`
    #[error("Connection string parsing failed: {message}")]
    ConnectionString { message: String },
}

/// Rejected argument values
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
