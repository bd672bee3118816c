//! Discovery-driven bridge attachment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use nerves_common::Error;

use crate::client::{BridgeConnection, Connector};
use crate::hub::Hub;
use crate::monitor::MonitorHandler;

/// Attaches announced bridges to a [`Hub`] and detaches them when they say
/// goodbye.
///
/// Owns one connection per announced bridge id. A repeated `ssdp:alive` for
/// a known bridge probes the existing connection instead of dialing again.
pub struct HubMonitor<C> {
    hub: Hub,
    connector: C,
    managed_type: String,
    probe_timeout: Duration,
    connections: Mutex<HashMap<String, Arc<dyn BridgeConnection>>>,
}

impl<C: Connector> HubMonitor<C> {
    pub fn new(hub: Hub, connector: C, managed_type: impl Into<String>) -> Self {
        Self {
            hub,
            connector,
            managed_type: managed_type.into(),
            probe_timeout: Duration::from_secs(3),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Bound on a single Ping probe.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn has_connection(&self, usn: &str) -> bool {
        self.connections.lock().contains_key(usn)
    }

    async fn probe(&self, conn: &Arc<dyn BridgeConnection>) -> bool {
        matches!(
            tokio::time::timeout(self.probe_timeout, conn.ping()).await,
            Ok(Ok(()))
        )
    }

    /// Drop `conn` for `usn` if it is still the registered one.
    fn forget(&self, usn: &str, conn: &Arc<dyn BridgeConnection>) {
        let mut connections = self.connections.lock();
        if connections
            .get(usn)
            .is_some_and(|current| Arc::ptr_eq(current, conn))
        {
            connections.remove(usn);
        }
    }

    async fn attach(&self, usn: &str, conn: &Arc<dyn BridgeConnection>) {
        match self.hub.add_bridge(conn.client()).await {
            Ok(bridge) => {
                if bridge.id != usn {
                    warn!(usn = %usn, bridge = %bridge.id, "Bridge id differs from announced USN");
                }
                info!(bridge = %bridge.id, devices = bridge.devices.len(), "Attached announced bridge");
            }
            Err(Error::BridgeAlreadyAdded(id)) => {
                debug!(bridge = %id, "Bridge already attached");
            }
            Err(e) => {
                warn!(usn = %usn, error = %e, "Failed to attach bridge, dropping connection");
                self.forget(usn, conn);
            }
        }
    }

    async fn dial(&self, usn: &str, location: &str) {
        let conn = match self.connector.connect(location).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(usn = %usn, location = %location, error = %e, "Failed to dial bridge");
                return;
            }
        };

        self.connections
            .lock()
            .insert(usn.to_string(), conn.clone());
        self.attach(usn, &conn).await;
    }
}

#[async_trait]
impl<C: Connector> MonitorHandler for HubMonitor<C> {
    async fn alive(&self, notification_type: &str, usn: &str, location: &str) {
        if notification_type != self.managed_type {
            trace!(nt = %notification_type, "Not a managed type");
            return;
        }
        if usn == self.hub.id() {
            trace!("Ignoring own advertisement");
            return;
        }

        let existing = self.connections.lock().get(usn).cloned();
        if let Some(conn) = existing {
            if self.probe(&conn).await {
                if !self.hub.has_bridge(usn) {
                    info!(usn = %usn, "Known bridge not attached, re-registering");
                    self.attach(usn, &conn).await;
                }
                return;
            }

            warn!(usn = %usn, location = %location, "Stale bridge connection, redialing");
            self.forget(usn, &conn);
            if let Err(e) = self.hub.remove_bridge(usn) {
                debug!(usn = %usn, error = %e, "Stale bridge was not attached");
            }
        }

        self.dial(usn, location).await;
    }

    async fn going_away(&self, usn: &str) {
        let Some(conn) = self.connections.lock().remove(usn) else {
            trace!(usn = %usn, "ssdp:byebye for unknown bridge");
            return;
        };

        match self.hub.remove_bridge(usn) {
            Ok(()) => info!(usn = %usn, "Bridge said goodbye"),
            Err(e) => debug!(usn = %usn, error = %e, "Departing bridge was not attached"),
        }
        drop(conn);
    }
}
