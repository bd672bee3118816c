//! Bridge service over a fixed device inventory and a single driver.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use nerves_common::{
    Bridge, Device, DeviceConfig, DeviceState, Error, Result, Sink, Source, Update,
};

use crate::driver::DriverAdapter;
use crate::service::BridgeBackend;

/// A complete bridge built from a static `{bridge, devices, driver}` triple.
///
/// Reads are served from cached snapshots. Writes go through the driver one
/// at a time and, once accepted, replace the cached state and emit a CHANGED
/// update to every subscriber.
pub struct SyncBridgeService<D> {
    info: Bridge,
    devices: RwLock<HashMap<String, Device>>,
    driver: D,
    write_lock: Mutex<()>,
    updates: Source<Update>,
}

impl<D: DriverAdapter> SyncBridgeService<D> {
    /// Every device starts reachable. Devices embedded in `info` are merged
    /// with `devices`.
    pub fn new(mut info: Bridge, devices: impl IntoIterator<Item = Device>, driver: D) -> Self {
        let mut map = HashMap::new();
        for mut device in info.devices.drain(..).chain(devices) {
            device.set_reachable(true);
            map.insert(device.id.clone(), device);
        }

        tracing::info!(bridge = %info.id, devices = map.len(), "Bridge inventory loaded");

        Self {
            info,
            devices: RwLock::new(map),
            driver,
            write_lock: Mutex::new(()),
            updates: Source::new(),
        }
    }

    pub fn bridge_id(&self) -> &str {
        &self.info.id
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Number of open update subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.updates.sink_count()
    }

    fn sorted_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }
}

#[async_trait]
impl<D: DriverAdapter> BridgeBackend for SyncBridgeService<D> {
    fn bridge(&self) -> Bridge {
        let mut bridge = self.info.clone();
        bridge.devices = self.sorted_devices();
        bridge
    }

    fn list_devices(&self, bridge_id: Option<&str>) -> Vec<Device> {
        match bridge_id {
            Some(id) if id != self.info.id => Vec::new(),
            _ => self.sorted_devices(),
        }
    }

    fn get_device(&self, id: &str) -> Result<Device> {
        self.devices
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))
    }

    async fn update_device_config(
        &self,
        _id: &str,
        _config: Option<DeviceConfig>,
    ) -> Result<Device> {
        Err(Error::not_supported("UpdateDeviceConfig"))
    }

    async fn update_device_state(&self, id: &str, desired: Option<DeviceState>) -> Result<Device> {
        if id.is_empty() {
            return Err(Error::MissingParam("id"));
        }
        let desired = desired.ok_or(Error::MissingParam("state"))?;
        if !desired.is_reachable {
            return Err(Error::not_supported("setting is_reachable to false"));
        }

        let current = self.get_device(id)?;
        if current.state.as_ref() == Some(&desired) {
            tracing::debug!(bridge = %self.info.id, device = %id, "State unchanged, skipping write");
            return Ok(current);
        }

        let _guard = self.write_lock.lock().await;

        // Re-read under the write lock so back-to-back writes see each other.
        let current = self.get_device(id)?;
        if current.state.as_ref() == Some(&desired) {
            return Ok(current);
        }

        self.driver
            .set_device_state(&current, &desired)
            .await
            .map_err(|e| {
                tracing::warn!(bridge = %self.info.id, device = %id, error = %e, "Driver write failed");
                Error::internal(e.to_string())
            })?;

        let snapshot = {
            let mut devices = self.devices.write();
            let device = devices
                .get_mut(id)
                .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
            device.state = Some(desired);
            device.clone()
        };

        tracing::debug!(bridge = %self.info.id, device = %id, "Device state written");
        self.updates
            .send_message(Update::device_changed(self.info.id.clone(), snapshot.clone()));

        Ok(snapshot)
    }

    fn subscribe(&self) -> Sink<Update> {
        self.updates.new_sink()
    }

    fn seed(&self) -> Vec<Update> {
        self.sorted_devices()
            .into_iter()
            .map(|d| Update::device_added(self.info.id.clone(), d))
            .collect()
    }
}
