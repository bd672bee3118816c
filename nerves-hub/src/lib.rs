//! Nerves hub
//!
//! Aggregates many bridges into one logical bridge: bridges are attached
//! when they announce themselves over SSDP, their devices are indexed in one
//! place and every update they emit is re-broadcast to hub subscribers.

pub mod client;
pub mod config;
pub mod hub;
pub mod hub_monitor;
pub mod monitor;

pub use client::{
    BridgeClient, BridgeConnection, Connector, GrpcBridgeClient, GrpcConnection, GrpcConnector,
    UpdateStream,
};
pub use config::{HubConfig, HubSettings};
pub use hub::Hub;
pub use hub_monitor::HubMonitor;
pub use monitor::{Monitor, MonitorHandler};
