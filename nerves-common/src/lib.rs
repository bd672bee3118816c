//! Nerves Common Library
//!
//! Shared types and utilities for Nerves bridges and hubs:
//!
//! - [`proto`] - Generated wire types and gRPC stubs (`BridgeService`, `PingService`)
//! - [`broadcast`] - Non-blocking fan-out of updates to subscribers
//! - [`ssdp`] - SSDP `NOTIFY` formatting and parsing
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`error`] - Error types and their gRPC status mapping

pub mod proto {
    tonic::include_proto!("nerves");
}

pub mod broadcast;
pub mod config;
pub mod error;
pub mod ssdp;
mod update;

// Re-export commonly used types at the crate root
pub use broadcast::{DeliveryStats, SINK_CAPACITY, Sink, SinkId, Source};
pub use config::{
    DiscoveryConfig, LogFormat, LoggingConfig, ServerConfig, load_config, parse_config,
};
pub use error::{Error, Result};
pub use proto::{
    Action, Bridge, Device, DeviceConfig, DeviceState, DeviceType, DeviceUpdate, Update,
};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over `config.level` when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
