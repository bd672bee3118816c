//! Nerves Bridge Framework
//!
//! Common pieces for building bridges that expose devices over the Nerves
//! `BridgeService` gRPC API.
//!
//! # Overview
//!
//! This framework provides:
//! - [`DriverAdapter`] trait implemented once per vendor protocol
//! - [`SyncBridgeService`] turning a device inventory and a driver into a bridge
//! - [`BridgeBackend`] and [`BridgeApi`] for serving any backend over tonic
//! - [`Advertiser`] and [`PingApi`] for SSDP presence
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing lifecycle (serve, advertise, shutdown)
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use nerves_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, SyncBridgeService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!     let service = Arc::new(SyncBridgeService::new(info, devices, driver));
//!
//!     runner.serve(service.clone()).await?;
//!     runner.advertise(service.bridge_id()).await?;
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod advertiser;
mod args;
mod config;
mod driver;
mod error;
mod runner;
mod service;
mod sync_bridge;

pub use advertiser::{Advertiser, PingApi, advertise_host};
pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use driver::DriverAdapter;
pub use error::{BridgeError, Result};
pub use runner::BridgeRunner;
pub use service::{BridgeApi, BridgeBackend};
pub use sync_bridge::SyncBridgeService;

// Re-export commonly used types from nerves-common
pub use nerves_common::{
    Bridge, Device, DeviceConfig, DeviceState, DiscoveryConfig, LoggingConfig, ServerConfig,
    Update,
};
