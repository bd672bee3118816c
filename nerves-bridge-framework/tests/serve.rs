//! Serves a bridge over real gRPC and talks to it with the generated client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_stream::StreamExt;

use nerves_bridge_framework::{BridgeConfig, BridgeRunner, DriverAdapter, SyncBridgeService};
use nerves_common::proto::bridge_service_client::BridgeServiceClient;
use nerves_common::proto::ping_service_client::PingServiceClient;
use nerves_common::proto::{
    BinaryState, GetBridgeRequest, GetDeviceRequest, PingRequest, StreamBridgeUpdatesRequest,
    UpdateDeviceStateRequest,
};
use nerves_common::{
    Action, Bridge, Device, DeviceState, DeviceType, DiscoveryConfig, LoggingConfig, ServerConfig,
};

#[derive(Debug, Deserialize)]
struct Config {
    server: ServerConfig,
    discovery: DiscoveryConfig,
    logging: LoggingConfig,
}

impl BridgeConfig for Config {
    fn server(&self) -> &ServerConfig {
        &self.server
    }

    fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }
}

struct Relay;

#[async_trait]
impl DriverAdapter for Relay {
    async fn set_device_state(&self, device: &Device, _: &DeviceState) -> anyhow::Result<()> {
        if device.address == "stuck" {
            anyhow::bail!("relay {} did not respond", device.address);
        }
        Ok(())
    }
}

fn relay(id: &str, address: &str) -> Device {
    Device {
        id: id.to_string(),
        r#type: DeviceType::Switch as i32,
        address: address.to_string(),
        is_active: true,
        state: Some(DeviceState {
            binary: Some(BinaryState { is_on: false }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn on() -> DeviceState {
    DeviceState {
        is_reachable: true,
        binary: Some(BinaryState { is_on: true }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_bridge_over_grpc() {
    let config = Config::from_json5(
        r#"{
            server: { listen: "127.0.0.1:0" },
            discovery: { enabled: false },
            logging: {},
        }"#,
    )
    .unwrap();

    let service = Arc::new(SyncBridgeService::new(
        Bridge {
            id: "relays".into(),
            ..Default::default()
        },
        vec![relay("pump", "R1"), relay("gate", "stuck")],
        Relay,
    ));

    let mut runner = BridgeRunner::without_tracing("relays", config);
    let addr = runner.serve(service.clone()).await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(runner.run_until(async {
        let _ = stop_rx.await;
    }));

    let endpoint = format!("http://{}", addr);
    let mut client = BridgeServiceClient::connect(endpoint.clone()).await.unwrap();
    let mut ping = PingServiceClient::connect(endpoint).await.unwrap();
    ping.ping(PingRequest {}).await.unwrap();

    let bridge = client.get_bridge(GetBridgeRequest {}).await.unwrap().into_inner();
    assert_eq!(bridge.id, "relays");
    assert_eq!(bridge.devices.len(), 2);
    assert!(bridge.devices.iter().all(|d| d.is_reachable()));

    let mut stream = client
        .stream_bridge_updates(StreamBridgeUpdatesRequest {})
        .await
        .unwrap()
        .into_inner();
    for _ in 0..2 {
        let seed = stream.next().await.unwrap().unwrap();
        assert_eq!(seed.action(), Action::Added);
    }

    let device = client
        .update_device_state(UpdateDeviceStateRequest {
            id: "pump".into(),
            state: Some(on()),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(device.state, Some(on()));

    let changed = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(changed.action(), Action::Changed);
    assert_eq!(changed.device_update().unwrap().device_id, "pump");

    let status = client
        .update_device_state(UpdateDeviceStateRequest {
            id: "gate".into(),
            state: Some(on()),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert!(status.message().contains("did not respond"));

    let status = client
        .get_device(GetDeviceRequest { id: "attic".into() })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::NotFound);

    drop(stream);
    drop(client);
    drop(ping);
    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
}
