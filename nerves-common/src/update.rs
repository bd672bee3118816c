//! Constructors and accessors for the generated wire types.

use std::fmt;

use crate::proto::{
    Action, Bridge, BridgeUpdate, Device, DeviceState, DeviceUpdate, Update, update::Payload,
};

impl Update {
    /// Device event carrying a full snapshot.
    pub fn device(action: Action, bridge_id: impl Into<String>, device: Device) -> Self {
        Self {
            action: action as i32,
            payload: Some(Payload::DeviceUpdate(DeviceUpdate {
                bridge_id: bridge_id.into(),
                device_id: device.id.clone(),
                device: Some(device),
            })),
        }
    }

    pub fn device_added(bridge_id: impl Into<String>, device: Device) -> Self {
        Self::device(Action::Added, bridge_id, device)
    }

    pub fn device_changed(bridge_id: impl Into<String>, device: Device) -> Self {
        Self::device(Action::Changed, bridge_id, device)
    }

    pub fn device_removed(bridge_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            action: Action::Removed as i32,
            payload: Some(Payload::DeviceUpdate(DeviceUpdate {
                bridge_id: bridge_id.into(),
                device_id: device_id.into(),
                device: None,
            })),
        }
    }

    /// Bridge event; `bridge` is omitted for removals.
    pub fn bridge(action: Action, bridge_id: impl Into<String>, bridge: Option<Bridge>) -> Self {
        Self {
            action: action as i32,
            payload: Some(Payload::BridgeUpdate(BridgeUpdate {
                bridge_id: bridge_id.into(),
                bridge,
            })),
        }
    }

    pub fn device_update(&self) -> Option<&DeviceUpdate> {
        match &self.payload {
            Some(Payload::DeviceUpdate(u)) => Some(u),
            _ => None,
        }
    }

    pub fn bridge_update(&self) -> Option<&BridgeUpdate> {
        match &self.payload {
            Some(Payload::BridgeUpdate(u)) => Some(u),
            _ => None,
        }
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = self.action().as_str_name();
        match &self.payload {
            Some(Payload::DeviceUpdate(u)) => write!(
                f,
                "{} device {}@{}",
                action,
                u.resolved_device_id().unwrap_or("?"),
                u.bridge_id
            ),
            Some(Payload::BridgeUpdate(u)) => write!(f, "{} bridge {}", action, u.bridge_id),
            None => write!(f, "{} (empty)", action),
        }
    }
}

impl DeviceUpdate {
    /// The device id named by the message, either directly or through the
    /// embedded snapshot.
    pub fn resolved_device_id(&self) -> Option<&str> {
        if !self.device_id.is_empty() {
            return Some(&self.device_id);
        }
        self.device
            .as_ref()
            .map(|d| d.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

impl Device {
    pub fn is_reachable(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_reachable)
    }

    pub fn set_reachable(&mut self, reachable: bool) {
        self.state
            .get_or_insert_with(DeviceState::default)
            .is_reachable = reachable;
    }
}
