use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::ssdp;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// gRPC server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the BridgeService/PingService listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Host announced in the SSDP `LOCATION` header. Derived from the
    /// listen address or the outbound interface when unset.
    #[serde(default)]
    pub advertise_host: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:50051".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            advertise_host: None,
        }
    }
}

/// SSDP discovery settings shared by advertisers and monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Advertise (bridges) and listen (hubs) at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Destination of NOTIFY packets.
    #[serde(default = "default_multicast")]
    pub multicast: String,

    /// Address the monitor listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Seconds between two `ssdp:alive` notifications.
    #[serde(default = "default_notify_interval")]
    pub notify_interval_secs: u64,

    /// `CACHE-CONTROL: max-age` value in seconds.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    /// `SERVER` header value.
    #[serde(default = "default_server")]
    pub server: String,

    /// Notification types accepted by a monitor.
    #[serde(default = "default_types")]
    pub types: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_multicast() -> String {
    ssdp::MULTICAST_ADDR.to_string()
}

fn default_bind() -> String {
    format!("0.0.0.0:{}", ssdp::SSDP_PORT)
}

fn default_notify_interval() -> u64 {
    10
}

fn default_max_age() -> u64 {
    1800
}

fn default_server() -> String {
    format!("nerves/{} UPnP/1.1", env!("CARGO_PKG_VERSION"))
}

fn default_types() -> Vec<String> {
    vec![ssdp::BRIDGE_NOTIFICATION_TYPE.to_string()]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            multicast: default_multicast(),
            bind: default_bind(),
            notify_interval_secs: default_notify_interval(),
            max_age_secs: default_max_age(),
            server: default_server(),
            types: default_types(),
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}
