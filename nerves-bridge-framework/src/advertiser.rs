//! SSDP presence announcements for a bridge.
//!
//! An [`Advertiser`] multicasts `ssdp:alive` when it starts and again on every
//! tick of its interval, then a single `ssdp:byebye` once the shutdown signal
//! fires. [`PingApi`] is the matching connectivity probe monitors use to check
//! that an announced endpoint still answers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tonic::{Request, Response, Status};

use nerves_common::proto::ping_service_server::{PingService, PingServiceServer};
use nerves_common::proto::{PingRequest, PingResponse};
use nerves_common::ssdp::{self, Notify};
use nerves_common::{DiscoveryConfig, ServerConfig};

use crate::error::{BridgeError, Result};

/// Periodic SSDP announcer.
#[derive(Debug)]
pub struct Advertiser {
    socket: UdpSocket,
    target: SocketAddr,
    alive: Notify,
    byebye: Notify,
    interval: Duration,
}

impl Advertiser {
    /// Bind an ephemeral socket for announcing `bridge_id` at `location`
    /// (`grpc://host:port`).
    pub async fn new(
        bridge_id: &str,
        location: impl Into<String>,
        discovery: &DiscoveryConfig,
    ) -> Result<Self> {
        let target: SocketAddr = discovery
            .multicast
            .parse()
            .map_err(|e| BridgeError::address(&discovery.multicast, e))?;

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| BridgeError::discovery(format!("Failed to bind SSDP socket: {}", e)))?;
        if target.ip().is_multicast() {
            socket.set_multicast_ttl_v4(4)?;
        }

        let usn = ssdp::usn_for(bridge_id);
        let nt = ssdp::BRIDGE_NOTIFICATION_TYPE;

        Ok(Self {
            socket,
            target,
            alive: Notify::alive(
                nt,
                usn.clone(),
                location,
                discovery.server.clone(),
                discovery.max_age_secs,
            ),
            byebye: Notify::byebye(nt, usn),
            interval: Duration::from_secs(discovery.notify_interval_secs.max(1)),
        })
    }

    /// Override the re-announce interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The `ssdp:alive` notification this advertiser sends.
    pub fn alive(&self) -> &Notify {
        &self.alive
    }

    /// Announce until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);

        tracing::info!(
            usn = %self.alive.usn,
            location = ?self.alive.location,
            target = %self.target,
            "Advertising bridge"
        );

        // The first tick completes immediately and carries the initial alive.
        ticker.tick().await;
        if let Err(e) = self.send(&self.alive).await {
            tracing::warn!(error = %e, "Failed to send ssdp:alive");
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.send(&self.alive).await {
                        tracing::warn!(error = %e, "Failed to send ssdp:alive");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.send(&self.byebye).await?;
        tracing::info!(usn = %self.byebye.usn, "Sent ssdp:byebye");
        Ok(())
    }

    async fn send(&self, notify: &Notify) -> std::io::Result<()> {
        let packet = notify.to_packet(&self.target.to_string());
        self.socket.send_to(packet.as_bytes(), self.target).await?;
        tracing::trace!(nts = notify.kind.as_str(), "SSDP notify sent");
        Ok(())
    }
}

/// Host to put in the `LOCATION` header.
///
/// Uses `advertise_host` when configured, then a concrete listen address, and
/// otherwise the local address of the interface that routes to `target`.
pub fn advertise_host(server: &ServerConfig, listen: SocketAddr, target: SocketAddr) -> String {
    if let Some(ref host) = server.advertise_host {
        return host.clone();
    }
    if !listen.ip().is_unspecified() {
        return listen.ip().to_string();
    }
    outbound_ip(target)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .to_string()
}

fn outbound_ip(target: SocketAddr) -> Option<IpAddr> {
    // Connecting a UDP socket only selects a route; nothing is sent.
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Liveness probe service.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingApi;

impl PingApi {
    pub fn into_server(self) -> PingServiceServer<Self> {
        PingServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl PingService for PingApi {
    async fn ping(
        &self,
        _request: Request<PingRequest>,
    ) -> std::result::Result<Response<PingResponse>, Status> {
        Ok(Response::new(PingResponse {}))
    }
}
