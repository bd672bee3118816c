//! Nerves hub
//!
//! Serves the aggregated BridgeService and attaches bridges found over SSDP.

use std::sync::Arc;

use tracing::info;

use nerves_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use nerves_hub::{GrpcConnector, Hub, HubConfig, HubMonitor, Monitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = BridgeArgs::parse_with_default("nerves-hub.json5");

    // Load configuration
    let config = HubConfig::load(&args.config)?;
    let settings = config.hub.clone();
    let discovery = config.discovery.clone();

    let mut runner = BridgeRunner::new_with_args("nerves-hub", config, Some(&args))?;

    let hub = Hub::new(settings.info());
    runner.serve(Arc::new(hub.clone())).await?;
    runner.advertise(hub.id()).await?;

    if discovery.enabled {
        let monitor = Monitor::bind(&discovery).await?;
        let handler = Arc::new(
            HubMonitor::new(
                hub.clone(),
                GrpcConnector::new(settings.dial_timeout()),
                settings.managed_type.clone(),
            )
            .with_probe_timeout(settings.dial_timeout()),
        );
        let shutdown = runner.shutdown_signal();
        runner.spawn_with_error("ssdp-monitor".to_string(), monitor.run(handler, shutdown));
    } else {
        info!("SSDP discovery disabled, no bridges will be attached");
    }

    runner.run().await?;

    Ok(())
}
