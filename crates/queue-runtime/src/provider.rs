//! Provider types and configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AzureServiceBus,
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AzureServiceBus => 256 * 1024, // Standard tier
            Self::InMemory => 10 * 1024 * 1024,  // 10MB
        }
    }

    /// Provider name used in error reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureServiceBus => "AzureServiceBus",
            Self::InMemory => "InMemory",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    AzureServiceBus(AzureServiceBusConfig),
    InMemory(InMemoryConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::AzureServiceBus(AzureServiceBusConfig::default())
    }
}

/// Azure Service Bus configuration
///
/// Credentials come from the connection string handed to the client factory;
/// these settings only bound how long each broker call may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureServiceBusConfig {
    /// Per-request timeout for send/complete/abandon calls
    ///
    /// Receives may take this long on top of their own wait time.
    pub request_timeout_seconds: u64,
}

impl AzureServiceBusConfig {
    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::seconds(self.request_timeout_seconds as i64)
    }
}

impl Default for AzureServiceBusConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
    pub max_delivery_count: u32,
    pub lock_duration_seconds: u64,
}

impl InMemoryConfig {
    /// Peek-lock duration as a duration
    pub fn lock_duration(&self) -> Duration {
        Duration::seconds(self.lock_duration_seconds as i64)
    }
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            max_delivery_count: 10,
            lock_duration_seconds: 60,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
