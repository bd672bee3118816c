//! Outbound side of the hub: clients for attached bridges.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::Stream;
use tonic::Status;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use nerves_common::proto::bridge_service_client::BridgeServiceClient;
use nerves_common::proto::ping_service_client::PingServiceClient;
use nerves_common::proto::{
    GetBridgeRequest, ListDevicesRequest, PingRequest, StreamBridgeUpdatesRequest,
    UpdateDeviceConfigRequest, UpdateDeviceStateRequest,
};
use nerves_common::{Bridge, Device, DeviceConfig, DeviceState, Error, Result, Update};

/// Live update stream from a bridge.
pub type UpdateStream = Pin<Box<dyn Stream<Item = std::result::Result<Update, Status>> + Send>>;

/// The operations the hub needs from one attached bridge.
///
/// Errors are the bridge's own statuses so they can be handed back to hub
/// callers unchanged.
#[async_trait]
pub trait BridgeClient: Send + Sync + 'static {
    async fn get_bridge(&self) -> std::result::Result<Bridge, Status>;

    async fn list_devices(&self) -> std::result::Result<Vec<Device>, Status>;

    async fn update_device_config(
        &self,
        id: &str,
        config: DeviceConfig,
    ) -> std::result::Result<Device, Status>;

    async fn update_device_state(
        &self,
        id: &str,
        state: DeviceState,
    ) -> std::result::Result<Device, Status>;

    /// Seed followed by live updates. Ends on EOF or a transport error.
    async fn stream_bridge_updates(&self) -> std::result::Result<UpdateStream, Status>;
}

/// [`BridgeClient`] over a tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcBridgeClient {
    inner: BridgeServiceClient<Channel>,
}

impl GrpcBridgeClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: BridgeServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl BridgeClient for GrpcBridgeClient {
    async fn get_bridge(&self) -> std::result::Result<Bridge, Status> {
        let mut client = self.inner.clone();
        Ok(client.get_bridge(GetBridgeRequest {}).await?.into_inner())
    }

    async fn list_devices(&self) -> std::result::Result<Vec<Device>, Status> {
        let mut client = self.inner.clone();
        let resp = client
            .list_devices(ListDevicesRequest::default())
            .await?
            .into_inner();
        Ok(resp.devices)
    }

    async fn update_device_config(
        &self,
        id: &str,
        config: DeviceConfig,
    ) -> std::result::Result<Device, Status> {
        let mut client = self.inner.clone();
        let req = UpdateDeviceConfigRequest {
            id: id.to_string(),
            config: Some(config),
        };
        Ok(client.update_device_config(req).await?.into_inner())
    }

    async fn update_device_state(
        &self,
        id: &str,
        state: DeviceState,
    ) -> std::result::Result<Device, Status> {
        let mut client = self.inner.clone();
        let req = UpdateDeviceStateRequest {
            id: id.to_string(),
            state: Some(state),
        };
        Ok(client.update_device_state(req).await?.into_inner())
    }

    async fn stream_bridge_updates(&self) -> std::result::Result<UpdateStream, Status> {
        let mut client = self.inner.clone();
        let stream = client
            .stream_bridge_updates(StreamBridgeUpdatesRequest {})
            .await?
            .into_inner();
        Ok(Box::pin(stream))
    }
}

/// An open connection to an announced bridge.
///
/// Dropping the last handle closes it.
#[async_trait]
pub trait BridgeConnection: Send + Sync + 'static {
    /// Connectivity probe.
    async fn ping(&self) -> std::result::Result<(), Status>;

    fn client(&self) -> Arc<dyn BridgeClient>;
}

/// Dials bridges by `host:port`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn BridgeConnection>>;
}

/// Plaintext HTTP/2 connection to a bridge.
#[derive(Debug, Clone)]
pub struct GrpcConnection {
    ping: PingServiceClient<Channel>,
    client: Arc<GrpcBridgeClient>,
}

impl GrpcConnection {
    pub fn new(channel: Channel) -> Self {
        Self {
            ping: PingServiceClient::new(channel.clone()),
            client: Arc::new(GrpcBridgeClient::new(channel)),
        }
    }
}

#[async_trait]
impl BridgeConnection for GrpcConnection {
    async fn ping(&self) -> std::result::Result<(), Status> {
        let mut ping = self.ping.clone();
        ping.ping(PingRequest {}).await?;
        Ok(())
    }

    fn client(&self) -> Arc<dyn BridgeClient> {
        self.client.clone()
    }
}

/// [`Connector`] opening insecure tonic channels.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    timeout: Duration,
}

impl GrpcConnector {
    /// `timeout` bounds connection setup.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn BridgeConnection>> {
        let uri = format!("http://{}", addr);
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| Error::internal(format!("invalid bridge address '{}': {}", addr, e)))?
            .connect_timeout(self.timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::internal(format!("failed to dial {}: {}", addr, e)))?;

        debug!(addr = %addr, "Connected to bridge");
        Ok(Arc::new(GrpcConnection::new(channel)))
    }
}
