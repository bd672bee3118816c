//! SSDP listener.
//!
//! A [`Monitor`] receives `NOTIFY` packets (and `M-SEARCH` replies), keeps
//! those whose type is in its allow-list and hands them to a
//! [`MonitorHandler`] with the USN reduced to the bridge id and the
//! `grpc://` scheme removed from the location.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use nerves_bridge_framework::{BridgeError, DiscoveryConfig, Result};
use nerves_common::ssdp::{self, Notify, NotifyKind};

/// Receiver of presence events.
///
/// Called inline from the receive loop, one event at a time.
#[async_trait]
pub trait MonitorHandler: Send + Sync + 'static {
    /// `usn` is the announced bridge id, `location` is `host:port`.
    async fn alive(&self, notification_type: &str, usn: &str, location: &str);

    async fn going_away(&self, usn: &str);
}

pub struct Monitor {
    socket: UdpSocket,
    types: Vec<String>,
}

impl Monitor {
    /// Bind `discovery.bind` and join the multicast group of
    /// `discovery.multicast` when it is one.
    pub async fn bind(discovery: &DiscoveryConfig) -> Result<Self> {
        let bind: SocketAddr = discovery
            .bind
            .parse()
            .map_err(|e| BridgeError::address(&discovery.bind, e))?;
        let group: SocketAddr = discovery
            .multicast
            .parse()
            .map_err(|e| BridgeError::address(&discovery.multicast, e))?;

        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| BridgeError::discovery(format!("Failed to bind {}: {}", bind, e)))?;

        if let SocketAddr::V4(v4) = group {
            if v4.ip().is_multicast() {
                socket
                    .join_multicast_v4(*v4.ip(), Ipv4Addr::UNSPECIFIED)
                    .map_err(|e| {
                        BridgeError::discovery(format!("Failed to join {}: {}", v4.ip(), e))
                    })?;
            }
        }

        info!(bind = %bind, group = %group, types = ?discovery.types, "SSDP monitor listening");
        Ok(Self::from_socket(socket, discovery.types.clone()))
    }

    /// Wrap an already bound socket.
    pub fn from_socket(socket: UdpSocket, types: Vec<String>) -> Self {
        Self { socket, types }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until `shutdown` flips to true.
    pub async fn run<H: MonitorHandler + ?Sized>(
        self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut buf = vec![0u8; 4096];

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        let packet = String::from_utf8_lossy(&buf[..len]);
                        self.dispatch(handler.as_ref(), &packet, from).await;
                    }
                    Err(e) => warn!(error = %e, "SSDP receive failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("SSDP monitor stopped");
        Ok(())
    }

    async fn dispatch<H: MonitorHandler + ?Sized>(
        &self,
        handler: &H,
        packet: &str,
        from: SocketAddr,
    ) {
        let Some(notify) = Notify::parse(packet) else {
            trace!(from = %from, "Ignoring non-notify SSDP packet");
            return;
        };

        if !self.types.iter().any(|t| *t == notify.notification_type) {
            trace!(from = %from, nt = %notify.notification_type, "Ignoring SSDP type");
            return;
        }

        let usn = ssdp::bridge_id_from_usn(&notify.usn);
        match notify.kind {
            NotifyKind::Alive => {
                let Some(ref location) = notify.location else {
                    debug!(from = %from, usn = %usn, "ssdp:alive without LOCATION");
                    return;
                };
                let location = ssdp::strip_grpc_scheme(location);
                trace!(usn = %usn, location = %location, "ssdp:alive");
                handler
                    .alive(&notify.notification_type, usn, location)
                    .await;
            }
            NotifyKind::ByeBye => {
                trace!(usn = %usn, "ssdp:byebye");
                handler.going_away(usn).await;
            }
        }
    }
}
