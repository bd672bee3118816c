//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{DiscoveryConfig, LoggingConfig, ServerConfig};

/// Trait for bridge configuration types.
///
/// Implement this trait for a bridge's configuration struct to get loading,
/// validation, and access to the blocks the runner needs.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use nerves_bridge_framework::{BridgeConfig, DiscoveryConfig, LoggingConfig, ServerConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     #[serde(default)]
///     pub server: ServerConfig,
///     #[serde(default)]
///     pub discovery: DiscoveryConfig,
///     #[serde(default)]
///     pub logging: LoggingConfig,
///     pub devices: Vec<MyDevice>,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn server(&self) -> &ServerConfig { &self.server }
///     fn discovery(&self) -> &DiscoveryConfig { &self.discovery }
///     fn logging(&self) -> &LoggingConfig { &self.logging }
///
///     fn validate(&self) -> Result<()> {
///         if self.devices.is_empty() {
///             return Err(BridgeError::validation("At least one device required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// gRPC listener settings.
    fn server(&self) -> &ServerConfig;

    /// SSDP settings.
    fn discovery(&self) -> &DiscoveryConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    fn from_json5(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}
