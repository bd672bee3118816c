//! Virtual bridge
//!
//! Serves the configured devices over gRPC and advertises them over SSDP.

use std::sync::Arc;

use nerves_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use nerves_bridge_virtual::{VirtualBridgeConfig, build_service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = BridgeArgs::parse_with_default("virtual.json5");

    let config = VirtualBridgeConfig::load(&args.config)?;
    let service = Arc::new(build_service(&config));

    let mut runner = BridgeRunner::new_with_args("nerves-bridge-virtual", config, Some(&args))?;

    runner.serve(service.clone()).await?;
    runner.advertise(service.bridge_id()).await?;

    // Run until Ctrl+C
    runner.run().await?;

    Ok(())
}
