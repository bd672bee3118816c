//! Test doubles for the hub's client seams.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{Code, Status};

use nerves_common::proto::BinaryState;
use nerves_common::{Bridge, Device, DeviceConfig, DeviceState, DeviceType, Sink, Update};
use nerves_hub::{BridgeClient, BridgeConnection, Connector, UpdateStream};

type StreamItem = Result<Update, Status>;

/// In-memory bridge whose update stream is driven by the test.
pub struct FakeBridge {
    bridge: Mutex<Bridge>,
    tx: Mutex<Option<mpsc::UnboundedSender<StreamItem>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<StreamItem>>>,
    pub state_writes: AtomicUsize,
    pub config_writes: AtomicUsize,
    write_failure: Mutex<Option<(Code, String)>>,
}

impl FakeBridge {
    pub fn new(id: &str, devices: Vec<Device>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            bridge: Mutex::new(Bridge {
                id: id.to_string(),
                devices,
                ..Default::default()
            }),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            state_writes: AtomicUsize::new(0),
            config_writes: AtomicUsize::new(0),
            write_failure: Mutex::new(None),
        })
    }

    /// Deliver `update` on the bridge's stream.
    pub fn push(&self, update: Update) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Ok(update));
        }
    }

    /// Terminate the stream with a clean EOF.
    pub fn end_stream(&self) {
        self.tx.lock().take();
    }

    /// Terminate the stream with a transport error.
    pub fn fail_stream(&self, status: Status) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Err(status));
        }
    }

    pub fn fail_writes(&self, code: Code, message: &str) {
        *self.write_failure.lock() = Some((code, message.to_string()));
    }

    pub fn writes(&self) -> usize {
        self.state_writes.load(Ordering::SeqCst)
    }

    pub fn config_writes(&self) -> usize {
        self.config_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeClient for FakeBridge {
    async fn get_bridge(&self) -> Result<Bridge, Status> {
        Ok(self.bridge.lock().clone())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, Status> {
        Ok(self.bridge.lock().devices.clone())
    }

    async fn update_device_config(&self, id: &str, config: DeviceConfig) -> Result<Device, Status> {
        self.config_writes.fetch_add(1, Ordering::SeqCst);
        if let Some((code, ref message)) = *self.write_failure.lock() {
            return Err(Status::new(code, message.clone()));
        }
        let bridge = self.bridge.lock();
        let mut device = bridge
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| Status::not_found(id.to_string()))?;
        device.config = Some(config);
        Ok(device)
    }

    async fn update_device_state(&self, id: &str, state: DeviceState) -> Result<Device, Status> {
        self.state_writes.fetch_add(1, Ordering::SeqCst);
        if let Some((code, ref message)) = *self.write_failure.lock() {
            return Err(Status::new(code, message.clone()));
        }
        let bridge = self.bridge.lock();
        let mut device = bridge
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| Status::not_found(id.to_string()))?;
        device.state = Some(state);
        Ok(device)
    }

    /// Each open after the first starts a new stream, replacing the old one.
    async fn stream_bridge_updates(&self) -> Result<UpdateStream, Status> {
        let rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                *self.tx.lock() = Some(tx);
                rx
            }
        };
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Connection whose probe result the test controls.
pub struct FakeConnection {
    pub addr: String,
    pub bridge: Arc<FakeBridge>,
    pub ping_ok: AtomicBool,
    pub pings: AtomicUsize,
}

#[async_trait]
impl BridgeConnection for FakeConnection {
    async fn ping(&self) -> Result<(), Status> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Status::unavailable("connection reset"))
        }
    }

    fn client(&self) -> Arc<dyn BridgeClient> {
        self.bridge.clone()
    }
}

/// Connector that builds a fresh [`FakeBridge`] per dial from a template
/// keyed by address.
#[derive(Clone, Default)]
pub struct FakeConnector {
    templates: Arc<Mutex<HashMap<String, (String, Vec<Device>)>>>,
    pub dials: Arc<Mutex<Vec<Arc<FakeConnection>>>>,
}

impl FakeConnector {
    pub fn register(&self, addr: &str, bridge_id: &str, devices: Vec<Device>) {
        self.templates
            .lock()
            .insert(addr.to_string(), (bridge_id.to_string(), devices));
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().len()
    }

    pub fn last(&self) -> Option<Arc<FakeConnection>> {
        self.dials.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, addr: &str) -> nerves_common::Result<Arc<dyn BridgeConnection>> {
        let Some((id, devices)) = self.templates.lock().get(addr).cloned() else {
            return Err(nerves_common::Error::internal(format!("connection refused: {}", addr)));
        };
        let conn = Arc::new(FakeConnection {
            addr: addr.to_string(),
            bridge: FakeBridge::new(&id, devices),
            ping_ok: AtomicBool::new(true),
            pings: AtomicUsize::new(0),
        });
        self.dials.lock().push(conn.clone());
        Ok(conn)
    }
}

pub fn light(id: &str, on: bool) -> Device {
    Device {
        id: id.to_string(),
        r#type: DeviceType::Light as i32,
        address: format!("addr-{}", id),
        is_active: true,
        state: Some(light_state(on)),
        ..Default::default()
    }
}

pub fn named(mut device: Device, name: &str) -> Device {
    device.config = Some(device_config(name));
    device
}

pub fn device_config(name: &str) -> DeviceConfig {
    DeviceConfig {
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn light_state(on: bool) -> DeviceState {
    DeviceState {
        is_reachable: true,
        binary: Some(BinaryState { is_on: on }),
        ..Default::default()
    }
}

/// Next update on `sink`, failing the test after two seconds.
pub async fn next_update(sink: &mut Sink<Update>) -> Update {
    tokio::time::timeout(Duration::from_secs(2), sink.recv())
        .await
        .expect("update within timeout")
        .expect("sink open")
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached");
}
