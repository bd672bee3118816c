//! Vendor driver seam.

use async_trait::async_trait;

use nerves_common::{Device, DeviceState};

/// Per-vendor implementation that pushes a desired state to hardware.
///
/// [`SyncBridgeService`](crate::SyncBridgeService) serialises calls, so an
/// adapter wrapping a serial port or a non thread-safe SDK needs no locking of
/// its own when used through it.
#[async_trait]
pub trait DriverAdapter: Send + Sync + 'static {
    /// Apply `desired` to `device`. Returning `Ok` means the hardware accepted
    /// the write; the cached snapshot is then replaced with `desired`.
    async fn set_device_state(&self, device: &Device, desired: &DeviceState)
    -> anyhow::Result<()>;
}
