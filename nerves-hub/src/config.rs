//! Hub configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use nerves_bridge_framework::{BridgeConfig, BridgeError, Result};
use nerves_common::proto::{BridgeConfig as BridgeSettings, BridgeState, ModelInfo, VersionInfo};
use nerves_common::{Bridge, DiscoveryConfig, LoggingConfig, ServerConfig, ssdp};

/// Top-level configuration for the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub identity and discovery policy
    pub hub: HubSettings,

    /// gRPC listener
    #[serde(default)]
    pub server: ServerConfig,

    /// SSDP settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hub-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Bridge id the hub presents and advertises
    pub id: String,

    /// Human-readable name
    #[serde(default = "default_name")]
    pub name: String,

    /// SSDP type of the bridges this hub attaches
    #[serde(default = "default_managed_type")]
    pub managed_type: String,

    /// Dial and probe timeout in milliseconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_ms: u64,
}

fn default_name() -> String {
    "Nerves Hub".to_string()
}

fn default_managed_type() -> String {
    ssdp::BRIDGE_NOTIFICATION_TYPE.to_string()
}

fn default_dial_timeout() -> u64 {
    3000
}

impl HubSettings {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// The hub's identity when presented as a bridge.
    pub fn info(&self) -> Bridge {
        Bridge {
            id: self.id.clone(),
            model_info: Some(ModelInfo {
                id: "nerves-hub".to_string(),
                name: "Nerves Hub".to_string(),
                description: "Aggregates Nerves bridges into one".to_string(),
                manufacturer: "Falnet".to_string(),
            }),
            config: Some(BridgeSettings {
                name: self.name.clone(),
                ..Default::default()
            }),
            state: Some(BridgeState {
                is_paired: true,
                version: Some(VersionInfo {
                    sw_version: env!("CARGO_PKG_VERSION").to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            devices: Vec::new(),
        }
    }
}

impl BridgeConfig for HubConfig {
    fn server(&self) -> &ServerConfig {
        &self.server
    }

    fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        if self.hub.id.trim().is_empty() {
            return Err(BridgeError::validation("hub.id must not be empty"));
        }
        if self.hub.dial_timeout_ms == 0 {
            return Err(BridgeError::validation("hub.dial_timeout_ms must be positive"));
        }
        if self.discovery.enabled && !self.discovery.types.contains(&self.hub.managed_type) {
            return Err(BridgeError::validation(format!(
                "hub.managed_type '{}' is not in discovery.types",
                self.hub.managed_type
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config = HubConfig::from_json5(r#"{ hub: { id: "hub-1" } }"#).unwrap();

        assert_eq!(config.hub.id, "hub-1");
        assert_eq!(config.hub.name, "Nerves Hub");
        assert_eq!(config.hub.managed_type, "falnet_nerves:bridge");
        assert_eq!(config.hub.dial_timeout(), Duration::from_secs(3));
        assert_eq!(config.server.listen, "0.0.0.0:50051");
        assert!(config.discovery.enabled);
    }

    #[test]
    fn test_info_identity() {
        let config = HubConfig::from_json5(r#"{ hub: { id: "hub-1", name: "Attic" } }"#).unwrap();
        let info = config.hub.info();

        assert_eq!(info.id, "hub-1");
        assert_eq!(info.config.unwrap().name, "Attic");
        assert!(info.devices.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ hub: {{ id: "cellar", dial_timeout_ms: 500 }} }}"#).unwrap();

        let config = HubConfig::load(file.path()).unwrap();
        assert_eq!(config.hub.id, "cellar");
        assert_eq!(config.hub.dial_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_sample_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/nerves-hub.json5");
        assert!(HubConfig::load(path).is_ok());
    }

    #[test]
    fn test_rejects_empty_id() {
        let result = HubConfig::from_json5(r#"{ hub: { id: " " } }"#);
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_managed_type_must_be_monitored() {
        let json5 = r#"{
            hub: { id: "hub-1", managed_type: "nanoleaf_aurora:light" },
            discovery: { types: ["falnet_nerves:bridge"] },
        }"#;
        assert!(matches!(
            HubConfig::from_json5(json5),
            Err(BridgeError::ConfigValidation(_))
        ));

        let json5 = r#"{
            hub: { id: "hub-1", managed_type: "nanoleaf_aurora:light" },
            discovery: { enabled: false },
        }"#;
        assert!(HubConfig::from_json5(json5).is_ok());
    }
}
