//! Service Bus connection string parsing.
//!
//! A connection string is a `;`-separated list of `Key=Value` pairs:
//!
//! ```text
//! Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=<base64>
//! ```
//!
//! Keys are matched case-insensitively. Values may themselves contain `=`
//! (base64 padding), so each pair is split on its first `=` only.

use crate::error::ConfigurationError;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Key name assumed when the connection string does not carry one
pub const DEFAULT_SHARED_ACCESS_KEY_NAME: &str = "RootManageSharedAccessKey";

/// Parsed Service Bus connection string
///
/// The shared access key is never included in `Debug` output.
#[derive(Clone)]
pub struct ServiceBusConnectionString {
    endpoint: String,
    host: String,
    shared_access_key_name: String,
    shared_access_key: Zeroizing<String>,
    entity_path: Option<String>,
}

impl ServiceBusConnectionString {
    /// Parse a connection string
    ///
    /// # Errors
    /// - `ConfigurationError::Missing` when the string is empty or lacks
    ///   `Endpoint` or `SharedAccessKey`
    /// - `ConfigurationError::ConnectionString` when a segment is not a
    ///   `Key=Value` pair or the endpoint is not a URI with a host
    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        if value.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "connection_string".to_string(),
            });
        }

        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        let segments = value.split(';').map(str::trim).filter(|s| !s.is_empty());
        for (index, segment) in segments.enumerate() {
            // Segment text may hold key material, so only its position is reported
            let (name, val) =
                segment
                    .split_once('=')
                    .ok_or_else(|| ConfigurationError::ConnectionString {
                        message: format!("segment {} is not a Key=Value pair", index + 1),
                    })?;

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(val.trim().to_string()),
                "sharedaccesskeyname" => key_name = Some(val.trim().to_string()),
                "sharedaccesskey" => key = Some(Zeroizing::new(val.trim().to_string())),
                "entitypath" => entity_path = Some(val.trim().to_string()),
                other => {
                    tracing::debug!(key = %other, "Ignoring unrecognised connection string key");
                }
            }
        }

        let endpoint = endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ConfigurationError::Missing {
                key: "Endpoint".to_string(),
            })?;

        let shared_access_key =
            key.filter(|k| !k.is_empty())
                .ok_or_else(|| ConfigurationError::Missing {
                    key: "SharedAccessKey".to_string(),
                })?;

        let host = url::Url::parse(&endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigurationError::ConnectionString {
                message: format!("endpoint '{}' does not contain a host", endpoint),
            })?;

        Ok(Self {
            endpoint,
            host,
            shared_access_key_name: key_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_SHARED_ACCESS_KEY_NAME.to_string()),
            shared_access_key,
            entity_path: entity_path.filter(|p| !p.is_empty()),
        })
    }

    /// Endpoint exactly as given, e.g. `sb://contoso.servicebus.windows.net/`
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Namespace host, e.g. `contoso.servicebus.windows.net`
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Namespace name, the first label of the host
    pub fn namespace(&self) -> &str {
        self.host.split('.').next().unwrap_or(&self.host)
    }

    pub fn shared_access_key_name(&self) -> &str {
        &self.shared_access_key_name
    }

    /// The signing key (only for immediate use)
    pub fn expose_shared_access_key(&self) -> &str {
        &self.shared_access_key
    }

    /// Entity the connection string is scoped to, if any
    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }
}

impl FromStr for ServiceBusConnectionString {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ServiceBusConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusConnectionString")
            .field("endpoint", &self.endpoint)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &"[REDACTED]")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
