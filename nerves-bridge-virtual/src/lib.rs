//! Virtual Nerves bridge
//!
//! Serves a configured inventory of devices through
//! [`SyncBridgeService`](nerves_bridge_framework::SyncBridgeService) with a
//! driver that only logs writes. Useful for exercising a hub without
//! hardware.

pub mod config;
pub mod driver;

pub use config::VirtualBridgeConfig;
pub use driver::LoopbackDriver;

use nerves_bridge_framework::SyncBridgeService;

/// Build the bridge service described by `config`.
pub fn build_service(config: &VirtualBridgeConfig) -> SyncBridgeService<LoopbackDriver> {
    SyncBridgeService::new(
        config.bridge_info(),
        config.inventory(),
        LoopbackDriver::new(config.read_only.iter().cloned()),
    )
}
