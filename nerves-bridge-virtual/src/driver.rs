//! Loopback driver: accepts every write unless the address is read-only.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::info;

use nerves_bridge_framework::DriverAdapter;
use nerves_common::{Device, DeviceState};

#[derive(Debug, Default)]
pub struct LoopbackDriver {
    read_only: HashSet<String>,
}

impl LoopbackDriver {
    pub fn new(read_only: impl IntoIterator<Item = String>) -> Self {
        Self {
            read_only: read_only.into_iter().collect(),
        }
    }

    pub fn is_read_only(&self, address: &str) -> bool {
        self.read_only.contains(address)
    }
}

#[async_trait]
impl DriverAdapter for LoopbackDriver {
    async fn set_device_state(&self, device: &Device, desired: &DeviceState) -> anyhow::Result<()> {
        if self.is_read_only(&device.address) {
            anyhow::bail!("address {} is read-only", device.address);
        }

        info!(
            device = %device.id,
            address = %device.address,
            state = ?desired,
            "Loopback write accepted"
        );
        Ok(())
    }
}
