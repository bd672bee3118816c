//! Configuration for the virtual bridge.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use nerves_bridge_framework::{BridgeConfig, BridgeError, Result};
use nerves_common::proto::{
    BinaryState, BridgeConfig as BridgeSettings, BridgeState, ColorTemperatureCapability,
    ColorTemperatureState, DeviceCapabilities, InputCapability, InputState, ModelInfo,
    RangeCapability, RangeState, VersionInfo,
};
use nerves_common::{
    Bridge, Device, DeviceConfig, DeviceState, DeviceType, DiscoveryConfig, LoggingConfig,
    ServerConfig,
};

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualBridgeConfig {
    /// Bridge identity
    pub bridge: BridgeIdentity,

    /// Device inventory
    #[serde(default)]
    pub devices: Vec<VirtualDevice>,

    /// Addresses whose writes are refused
    #[serde(default)]
    pub read_only: Vec<String>,

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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeIdentity {
    pub id: String,

    #[serde(default = "default_bridge_name")]
    pub name: String,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub timezone: String,
}

fn default_bridge_name() -> String {
    "Virtual Bridge".to_string()
}

fn default_manufacturer() -> String {
    "Falnet".to_string()
}

fn default_model() -> String {
    "nerves-bridge-virtual".to_string()
}

/// Device kind as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Switch,
    Outlet,
    Sensor,
    AvReceiver,
}

impl From<DeviceKind> for DeviceType {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Light => DeviceType::Light,
            DeviceKind::Switch => DeviceType::Switch,
            DeviceKind::Outlet => DeviceType::Outlet,
            DeviceKind::Sensor => DeviceType::Sensor,
            DeviceKind::AvReceiver => DeviceType::AvReceiver,
        }
    }
}

/// Inclusive `[min, max]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: i32,
    pub max: i32,
}

/// One entry of the device inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualDevice {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: DeviceKind,

    /// Protocol address, unique per bridge
    pub address: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Dimmer or volume range
    #[serde(default)]
    pub range: Option<Bounds>,

    /// Selectable inputs of an AV receiver
    #[serde(default)]
    pub inputs: Option<Vec<String>>,

    /// Color temperature range in kelvin
    #[serde(default)]
    pub color_temperature: Option<Bounds>,
}

impl VirtualDevice {
    /// The device as exposed over the API, in its initial state.
    ///
    /// Switchable kinds start off; each advertised capability starts at its
    /// lowest value (or first input).
    pub fn to_device(&self) -> Device {
        let kind = DeviceType::from(self.kind);
        let switchable = matches!(
            self.kind,
            DeviceKind::Light | DeviceKind::Switch | DeviceKind::Outlet | DeviceKind::AvReceiver
        );

        let state = DeviceState {
            is_reachable: true,
            binary: switchable.then_some(BinaryState { is_on: false }),
            range: self.range.map(|r| RangeState { value: r.min }),
            input: self
                .inputs
                .as_ref()
                .and_then(|inputs| inputs.first())
                .map(|first| InputState {
                    selected: first.clone(),
                }),
            color_temperature: self
                .color_temperature
                .map(|ct| ColorTemperatureState { kelvin: ct.min }),
            ..Default::default()
        };

        let capabilities = DeviceCapabilities {
            range: self.range.map(|r| RangeCapability {
                min: r.min,
                max: r.max,
            }),
            input: self.inputs.clone().map(|inputs| InputCapability { inputs }),
            color_temperature: self
                .color_temperature
                .map(|ct| ColorTemperatureCapability {
                    min_kelvin: ct.min,
                    max_kelvin: ct.max,
                }),
        };

        Device {
            id: self.id.clone(),
            r#type: kind as i32,
            address: self.address.clone(),
            is_active: true,
            model_info: None,
            capabilities: Some(capabilities),
            config: Some(DeviceConfig {
                name: self.name.clone(),
                description: self.description.clone(),
            }),
            state: Some(state),
        }
    }
}

impl VirtualBridgeConfig {
    /// Bridge identity without devices.
    pub fn bridge_info(&self) -> Bridge {
        Bridge {
            id: self.bridge.id.clone(),
            model_info: Some(ModelInfo {
                id: self.bridge.model.clone(),
                name: self.bridge.name.clone(),
                description: "Virtual devices backed by a loopback driver".to_string(),
                manufacturer: self.bridge.manufacturer.clone(),
            }),
            config: Some(BridgeSettings {
                name: self.bridge.name.clone(),
                address: None,
                timezone: self.bridge.timezone.clone(),
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

    pub fn inventory(&self) -> Vec<Device> {
        self.devices.iter().map(VirtualDevice::to_device).collect()
    }
}

impl BridgeConfig for VirtualBridgeConfig {
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
        if self.bridge.id.trim().is_empty() {
            return Err(BridgeError::validation("bridge.id must not be empty"));
        }

        let mut ids = HashSet::new();
        let mut addresses = HashSet::new();
        for device in &self.devices {
            if device.id.is_empty() {
                return Err(BridgeError::validation("device id must not be empty"));
            }
            if !ids.insert(device.id.as_str()) {
                return Err(BridgeError::validation(format!(
                    "duplicate device id '{}'",
                    device.id
                )));
            }
            if !addresses.insert(device.address.as_str()) {
                return Err(BridgeError::validation(format!(
                    "duplicate device address '{}'",
                    device.address
                )));
            }
            for bounds in [device.range, device.color_temperature].into_iter().flatten() {
                if bounds.min > bounds.max {
                    return Err(BridgeError::validation(format!(
                        "device '{}': min {} exceeds max {}",
                        device.id, bounds.min, bounds.max
                    )));
                }
            }
        }

        Ok(())
    }
}
