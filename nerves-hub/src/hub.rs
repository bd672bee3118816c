//! The aggregating hub.
//!
//! A [`Hub`] attaches any number of bridges, keeps one device index across
//! all of them and re-broadcasts every upstream update. It is itself a
//! [`BridgeBackend`], so it can be served (and aggregated) like any bridge.
//!
//! Locking: `bridges` then `devices`, never the other way round. No lock is
//! held across an await; remote calls run with both released.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use nerves_bridge_framework::BridgeBackend;
use nerves_common::proto::update::Payload;
use nerves_common::{
    Action, Bridge, Device, DeviceConfig, DeviceState, Error, Result, Sink, Source, Update,
};

use crate::client::BridgeClient;

/// Handle to a hub. Clones share state.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    info: Bridge,
    bridges: Mutex<HashMap<String, Arc<HubBridge>>>,
    devices: Mutex<HashMap<String, HubDevice>>,
    updates: Source<Update>,
}

/// An attached bridge instance.
struct HubBridge {
    id: String,
    snapshot: Mutex<Bridge>,
    client: Arc<dyn BridgeClient>,
    cancel: watch::Sender<bool>,
}

struct HubDevice {
    snapshot: Device,
    /// Bridge instance that last ADDED the device. Dangling once that
    /// instance is removed.
    owner: Weak<HubBridge>,
    owner_id: String,
}

impl HubDevice {
    fn is_owned_by(&self, hb: &Arc<HubBridge>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(hb))
    }
}

/// Why a bridge watcher stopped.
enum StreamEnd {
    Cancelled,
    Lost(String),
}

impl Hub {
    /// `info` is the hub's own identity when presented as a bridge.
    pub fn new(info: Bridge) -> Self {
        Self {
            inner: Arc::new(HubInner {
                info,
                bridges: Mutex::new(HashMap::new()),
                devices: Mutex::new(HashMap::new()),
                updates: Source::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.info.id
    }

    /// Attach a bridge: fetch its snapshot, index its devices and start
    /// following its update stream.
    ///
    /// Fails with the bridge's own status if `GetBridge` fails, or
    /// `BridgeAlreadyAdded` if a bridge with the same id is attached.
    pub async fn add_bridge(&self, client: Arc<dyn BridgeClient>) -> Result<Bridge> {
        let mut bridge = client.get_bridge().await?;
        if bridge.id.is_empty() {
            return Err(Error::MissingParam("bridge.id"));
        }
        let id = bridge.id.clone();
        let devices = std::mem::take(&mut bridge.devices);

        let (cancel, cancel_rx) = watch::channel(false);
        let hb = Arc::new(HubBridge {
            id: id.clone(),
            snapshot: Mutex::new(bridge.clone()),
            client,
            cancel,
        });

        {
            let mut bridges = self.inner.bridges.lock();
            if bridges.contains_key(&id) {
                return Err(Error::BridgeAlreadyAdded(id));
            }
            bridges.insert(id.clone(), hb.clone());
            self.inner.updates.send_message(Update::bridge(
                Action::Added,
                id.clone(),
                Some(bridge.clone()),
            ));
        }

        info!(bridge = %id, devices = devices.len(), "Bridge added");

        for device in devices.iter().cloned() {
            self.process_update(&hb, Update::device_added(id.clone(), device));
        }

        tokio::spawn(self.clone().watch_bridge(hb, cancel_rx));

        bridge.devices = devices;
        Ok(bridge)
    }

    /// Detach a bridge. Its devices stay indexed, marked unreachable.
    pub fn remove_bridge(&self, id: &str) -> Result<()> {
        let bridges = self.inner.bridges.lock();
        let hb = bridges
            .get(id)
            .cloned()
            .ok_or_else(|| Error::BridgeNotFound(id.to_string()))?;
        self.remove_locked(bridges, &hb);
        Ok(())
    }

    /// Remove `hb` only if it is still the attached instance for its id.
    fn remove_instance(&self, hb: &Arc<HubBridge>) {
        let bridges = self.inner.bridges.lock();
        match bridges.get(&hb.id) {
            Some(current) if Arc::ptr_eq(current, hb) => self.remove_locked(bridges, hb),
            _ => debug!(bridge = %hb.id, "Bridge instance already detached"),
        }
    }

    fn remove_locked(
        &self,
        mut bridges: MutexGuard<'_, HashMap<String, Arc<HubBridge>>>,
        hb: &Arc<HubBridge>,
    ) {
        // Cancel before touching devices so an in-flight update sees it.
        hb.cancel.send_replace(true);

        let orphaned: Vec<Device> = {
            let mut devices = self.inner.devices.lock();
            devices
                .values_mut()
                .filter(|d| d.is_owned_by(hb))
                .map(|d| {
                    d.snapshot.set_reachable(false);
                    d.snapshot.clone()
                })
                .collect()
        };

        for device in &orphaned {
            self.inner
                .updates
                .send_message(Update::device_changed(hb.id.clone(), device.clone()));
        }

        bridges.remove(&hb.id);
        self.inner
            .updates
            .send_message(Update::bridge(Action::Removed, hb.id.clone(), None));
        drop(bridges);

        info!(bridge = %hb.id, unreachable = orphaned.len(), "Bridge removed");
    }

    /// Follow one bridge's update stream until it fails or is cancelled.
    async fn watch_bridge(self, hb: Arc<HubBridge>, mut cancel: watch::Receiver<bool>) {
        match self.follow(&hb, &mut cancel).await {
            StreamEnd::Cancelled => debug!(bridge = %hb.id, "Update stream cancelled"),
            StreamEnd::Lost(reason) => {
                warn!(bridge = %hb.id, reason = %reason, "Lost bridge update stream, removing bridge");
                self.remove_instance(&hb);
            }
        }
    }

    async fn follow(&self, hb: &Arc<HubBridge>, cancel: &mut watch::Receiver<bool>) -> StreamEnd {
        if *cancel.borrow() {
            return StreamEnd::Cancelled;
        }

        let opened = tokio::select! {
            opened = hb.client.stream_bridge_updates() => opened,
            _ = cancel.changed() => return StreamEnd::Cancelled,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(status) => return StreamEnd::Lost(format!("open failed: {}", status)),
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.changed() => return StreamEnd::Cancelled,
                item = stream.next() => match item {
                    Some(Ok(update)) => self.process_update(hb, update),
                    Some(Err(status)) => return StreamEnd::Lost(status.to_string()),
                    None => return StreamEnd::Lost("end of stream".to_string()),
                },
            }
        }
    }

    /// Apply an update from `hb` to the index and re-broadcast it.
    fn process_update(&self, hb: &Arc<HubBridge>, update: Update) {
        match &update.payload {
            Some(Payload::BridgeUpdate(bu)) => {
                if *hb.cancel.borrow() {
                    return;
                }
                if bu.bridge_id == hb.id {
                    if let Some(ref bridge) = bu.bridge {
                        let mut snapshot = bridge.clone();
                        snapshot.devices.clear();
                        *hb.snapshot.lock() = snapshot;
                    }
                }
                debug!(bridge = %hb.id, update = %update, "Bridge update");
                self.inner.updates.send_message(update);
            }
            Some(Payload::DeviceUpdate(du)) => {
                let Some(device_id) = du.resolved_device_id().map(str::to_owned) else {
                    warn!(bridge = %hb.id, "Device update without device id, ignored");
                    return;
                };

                let mut devices = self.inner.devices.lock();
                if *hb.cancel.borrow() {
                    debug!(bridge = %hb.id, device = %device_id, "Update from a detached bridge, ignored");
                    return;
                }
                match update.action() {
                    Action::Added => {
                        let Some(ref device) = du.device else {
                            warn!(bridge = %hb.id, device = %device_id, "ADDED without snapshot, ignored");
                            return;
                        };
                        if let Some(existing) = devices.get(&device_id) {
                            if !existing.is_owned_by(hb) && existing.owner_id != hb.id {
                                warn!(
                                    device = %device_id,
                                    previous = %existing.owner_id,
                                    bridge = %hb.id,
                                    "Device id already owned by another bridge, replacing"
                                );
                            }
                        }
                        devices.insert(
                            device_id.clone(),
                            HubDevice {
                                snapshot: device.clone(),
                                owner: Arc::downgrade(hb),
                                owner_id: hb.id.clone(),
                            },
                        );
                    }
                    Action::Changed => {
                        let Some(ref device) = du.device else {
                            warn!(bridge = %hb.id, device = %device_id, "CHANGED without snapshot, ignored");
                            return;
                        };
                        match devices.get_mut(&device_id) {
                            Some(existing) if existing.is_owned_by(hb) => {
                                existing.snapshot.state = device.state.clone();
                                existing.snapshot.config = device.config.clone();
                            }
                            Some(existing) => {
                                warn!(
                                    device = %device_id,
                                    owner = %existing.owner_id,
                                    bridge = %hb.id,
                                    "CHANGED from a bridge that does not own the device, ignored"
                                );
                                return;
                            }
                            None => {
                                debug!(bridge = %hb.id, device = %device_id, "CHANGED for unknown device, indexing it");
                                devices.insert(
                                    device_id.clone(),
                                    HubDevice {
                                        snapshot: device.clone(),
                                        owner: Arc::downgrade(hb),
                                        owner_id: hb.id.clone(),
                                    },
                                );
                            }
                        }
                    }
                    Action::Removed => match devices.get(&device_id) {
                        Some(existing) if existing.is_owned_by(hb) => {
                            devices.remove(&device_id);
                        }
                        Some(existing) => {
                            warn!(
                                device = %device_id,
                                owner = %existing.owner_id,
                                bridge = %hb.id,
                                "REMOVED from a bridge that does not own the device, ignored"
                            );
                            return;
                        }
                        None => debug!(bridge = %hb.id, device = %device_id, "REMOVED for unknown device"),
                    },
                }

                debug!(update = %update, "Device update");
                self.inner.updates.send_message(update);
            }
            None => warn!(bridge = %hb.id, "Update without payload, ignored"),
        }
    }

    /// Snapshot of one device.
    pub fn get_device(&self, id: &str) -> Result<Device> {
        self.inner
            .devices
            .lock()
            .get(id)
            .map(|d| d.snapshot.clone())
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))
    }

    /// Snapshots of all devices, or of the devices owned by `bridge_id`.
    pub fn list_devices(&self, bridge_id: Option<&str>) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .inner
            .devices
            .lock()
            .values()
            .filter(|d| bridge_id.is_none_or(|id| d.owner_id == id))
            .map(|d| d.snapshot.clone())
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Route a config write to the owning bridge.
    ///
    /// Unchanged config returns the cached snapshot without a remote call.
    /// The index is not touched; the owner's CHANGED echo updates it.
    pub async fn update_device_config(&self, id: &str, config: Option<DeviceConfig>) -> Result<Device> {
        if id.is_empty() {
            return Err(Error::MissingParam("id"));
        }
        let config = config.ok_or(Error::MissingParam("config"))?;

        let client = {
            let devices = self.inner.devices.lock();
            let device = devices
                .get(id)
                .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
            if device.snapshot.config.as_ref() == Some(&config) {
                return Ok(device.snapshot.clone());
            }
            owner_client(device)?
        };

        Ok(client.update_device_config(id, config).await?)
    }

    /// Route a state write to the owning bridge.
    ///
    /// Unchanged state returns the cached snapshot without a remote call.
    /// Remote failures come back with the bridge's own status.
    pub async fn update_device_state(&self, id: &str, state: Option<DeviceState>) -> Result<Device> {
        if id.is_empty() {
            return Err(Error::MissingParam("id"));
        }
        let state = state.ok_or(Error::MissingParam("state"))?;

        let client = {
            let devices = self.inner.devices.lock();
            let device = devices
                .get(id)
                .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
            if device.snapshot.state.as_ref() == Some(&state) {
                debug!(device = %id, "State unchanged, not routing write");
                return Ok(device.snapshot.clone());
            }
            owner_client(device)?
        };

        Ok(client.update_device_state(id, state).await?)
    }

    /// Independent subscription to every update the hub broadcasts.
    pub fn updates(&self) -> Sink<Update> {
        self.inner.updates.new_sink()
    }

    /// Snapshots of the attached bridges.
    pub fn bridges(&self) -> Vec<Bridge> {
        let mut bridges: Vec<Bridge> = self
            .inner
            .bridges
            .lock()
            .values()
            .map(|hb| hb.snapshot.lock().clone())
            .collect();
        bridges.sort_by(|a, b| a.id.cmp(&b.id));
        bridges
    }

    pub fn has_bridge(&self, id: &str) -> bool {
        self.inner.bridges.lock().contains_key(id)
    }

    /// Number of open update subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.updates.sink_count()
    }
}

/// Client of the device's owner, if that instance is still attached.
fn owner_client(device: &HubDevice) -> Result<Arc<dyn BridgeClient>> {
    device
        .owner
        .upgrade()
        .filter(|hb| !*hb.cancel.borrow())
        .map(|hb| hb.client.clone())
        .ok_or_else(|| Error::BridgeNotFound(device.owner_id.clone()))
}

#[async_trait]
impl BridgeBackend for Hub {
    fn bridge(&self) -> Bridge {
        let mut bridge = self.inner.info.clone();
        bridge.devices = self.list_devices(None);
        bridge
    }

    fn list_devices(&self, bridge_id: Option<&str>) -> Vec<Device> {
        Hub::list_devices(self, bridge_id)
    }

    fn get_device(&self, id: &str) -> Result<Device> {
        Hub::get_device(self, id)
    }

    async fn update_device_config(&self, id: &str, config: Option<DeviceConfig>) -> Result<Device> {
        Hub::update_device_config(self, id, config).await
    }

    async fn update_device_state(&self, id: &str, state: Option<DeviceState>) -> Result<Device> {
        Hub::update_device_state(self, id, state).await
    }

    fn subscribe(&self) -> Sink<Update> {
        self.updates()
    }

    fn seed(&self) -> Vec<Update> {
        let devices = self.inner.devices.lock();
        let mut seed: Vec<Update> = devices
            .values()
            .map(|d| Update::device_added(d.owner_id.clone(), d.snapshot.clone()))
            .collect();
        seed.sort_by(|a, b| {
            let id = |u: &Update| u.device_update().map(|du| du.device_id.clone());
            id(a).cmp(&id(b))
        });
        seed
    }
}
