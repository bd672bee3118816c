//! Outward gRPC `BridgeService`.
//!
//! [`BridgeApi`] exposes any [`BridgeBackend`] over tonic. Both a single
//! bridge ([`SyncBridgeService`](crate::SyncBridgeService)) and an aggregating
//! hub implement the backend, so they share one wire surface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use nerves_common::proto::bridge_service_server::{BridgeService, BridgeServiceServer};
use nerves_common::proto::{
    GetBridgeRequest, GetDeviceRequest, ListDevicesRequest, ListDevicesResponse,
    StreamBridgeUpdatesRequest, UpdateDeviceConfigRequest, UpdateDeviceStateRequest,
};
use nerves_common::{
    Bridge, Device, DeviceConfig, DeviceState, Result, SINK_CAPACITY, Sink, Update,
};

/// State and operations behind a `BridgeService` endpoint.
#[async_trait]
pub trait BridgeBackend: Send + Sync + 'static {
    /// Bridge snapshot with `devices` filled in.
    fn bridge(&self) -> Bridge;

    /// Devices, optionally restricted to one owning bridge.
    fn list_devices(&self, bridge_id: Option<&str>) -> Vec<Device>;

    fn get_device(&self, id: &str) -> Result<Device>;

    async fn update_device_config(&self, id: &str, config: Option<DeviceConfig>)
    -> Result<Device>;

    async fn update_device_state(&self, id: &str, state: Option<DeviceState>) -> Result<Device>;

    /// Fresh subscription to live updates.
    fn subscribe(&self) -> Sink<Update>;

    /// Replay of the current inventory sent ahead of live updates.
    fn seed(&self) -> Vec<Update>;
}

/// tonic service adapter for a [`BridgeBackend`].
pub struct BridgeApi<B> {
    backend: Arc<B>,
}

impl<B> Clone for BridgeApi<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: BridgeBackend> BridgeApi<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn into_server(self) -> BridgeServiceServer<Self> {
        BridgeServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl<B: BridgeBackend> BridgeService for BridgeApi<B> {
    async fn get_bridge(
        &self,
        _request: Request<GetBridgeRequest>,
    ) -> std::result::Result<Response<Bridge>, Status> {
        Ok(Response::new(self.backend.bridge()))
    }

    async fn list_devices(
        &self,
        request: Request<ListDevicesRequest>,
    ) -> std::result::Result<Response<ListDevicesResponse>, Status> {
        let req = request.into_inner();
        let filter = Some(req.bridge_id.as_str()).filter(|id| !id.is_empty());
        Ok(Response::new(ListDevicesResponse {
            devices: self.backend.list_devices(filter),
        }))
    }

    async fn get_device(
        &self,
        request: Request<GetDeviceRequest>,
    ) -> std::result::Result<Response<Device>, Status> {
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(nerves_common::Error::MissingParam("id").into());
        }
        Ok(Response::new(self.backend.get_device(&req.id)?))
    }

    async fn update_device_config(
        &self,
        request: Request<UpdateDeviceConfigRequest>,
    ) -> std::result::Result<Response<Device>, Status> {
        let req = request.into_inner();
        let device = self.backend.update_device_config(&req.id, req.config).await?;
        Ok(Response::new(device))
    }

    async fn update_device_state(
        &self,
        request: Request<UpdateDeviceStateRequest>,
    ) -> std::result::Result<Response<Device>, Status> {
        let req = request.into_inner();
        let device = self.backend.update_device_state(&req.id, req.state).await?;
        Ok(Response::new(device))
    }

    type StreamBridgeUpdatesStream = ReceiverStream<std::result::Result<Update, Status>>;

    async fn stream_bridge_updates(
        &self,
        request: Request<StreamBridgeUpdatesRequest>,
    ) -> std::result::Result<Response<Self::StreamBridgeUpdatesStream>, Status> {
        let peer = request.remote_addr();

        // Subscribe before taking the seed so nothing falls between the two.
        // A change racing the seed may be delivered twice.
        let sink = self.backend.subscribe();
        let seed = self.backend.seed();

        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        tokio::spawn(forward_updates(seed, sink, tx));

        tracing::debug!(peer = ?peer, "Update stream opened");
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Send the seed, then live updates, until the peer goes away or the sink
/// ends. The sink is released on every exit path.
async fn forward_updates(
    seed: Vec<Update>,
    mut sink: Sink<Update>,
    tx: mpsc::Sender<std::result::Result<Update, Status>>,
) {
    for update in seed {
        if tx.send(Ok(update)).await.is_err() {
            tracing::debug!(sink = sink.id(), "Peer left during seed");
            return;
        }
    }

    loop {
        tokio::select! {
            msg = sink.recv() => match msg {
                Some(update) => {
                    if tx.send(Ok(update)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = tx.closed() => break,
        }
    }

    tracing::debug!(sink = sink.id(), "Update stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverAdapter;
    use crate::sync_bridge::SyncBridgeService;
    use nerves_common::proto::BinaryState;
    use nerves_common::{Action, DeviceType};
    use std::time::Duration;
    use tokio_stream::StreamExt;

    struct AcceptAll;

    #[async_trait]
    impl DriverAdapter for AcceptAll {
        async fn set_device_state(&self, _: &Device, _: &DeviceState) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn api() -> (Arc<SyncBridgeService<AcceptAll>>, BridgeApi<SyncBridgeService<AcceptAll>>) {
        let devices = ["fan", "lamp"].into_iter().map(|id| Device {
            id: id.to_string(),
            r#type: DeviceType::Outlet as i32,
            state: Some(DeviceState {
                binary: Some(BinaryState { is_on: false }),
                ..Default::default()
            }),
            ..Default::default()
        });
        let bridge = Bridge {
            id: "outlets".into(),
            ..Default::default()
        };
        let svc = Arc::new(SyncBridgeService::new(bridge, devices, AcceptAll));
        (svc.clone(), BridgeApi::new(svc))
    }

    #[tokio::test]
    async fn test_get_device_maps_errors() {
        let (_, api) = api();

        let status = api
            .get_device(Request::new(GetDeviceRequest { id: "attic".into() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status = api
            .get_device(Request::new(GetDeviceRequest { id: String::new() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_list_devices_empty_filter_means_all() {
        let (_, api) = api();
        let resp = api
            .list_devices(Request::new(ListDevicesRequest::default()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.devices.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_seeds_then_forwards() {
        let (svc, api) = api();

        let mut stream = api
            .stream_bridge_updates(Request::new(StreamBridgeUpdatesRequest {}))
            .await
            .unwrap()
            .into_inner();

        for expected in ["fan", "lamp"] {
            let update = stream.next().await.unwrap().unwrap();
            assert_eq!(update.action(), Action::Added);
            assert_eq!(update.device_update().unwrap().device_id, expected);
        }

        let desired = DeviceState {
            is_reachable: true,
            binary: Some(BinaryState { is_on: true }),
            ..Default::default()
        };
        svc.update_device_state("lamp", Some(desired)).await.unwrap();

        let update = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.action(), Action::Changed);
        assert_eq!(update.device_update().unwrap().device_id, "lamp");
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_sink() {
        let (svc, api) = api();
        let stream = api
            .stream_bridge_updates(Request::new(StreamBridgeUpdatesRequest {}))
            .await
            .unwrap()
            .into_inner();
        drop(stream);

        // The forwarding task notices the closed channel and drops its sink.
        tokio::time::timeout(Duration::from_secs(1), async {
            while svc.subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink released");
    }
}
