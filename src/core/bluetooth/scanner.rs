//! Finds the target peripheral with the platform adapter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluest::{Adapter, AdvertisingDevice, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};

use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::types::{Advertisement, DeviceHandle, ScanFilter};
use crate::utils::extract_mac_address;

pub struct BluetoothScanner {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    show_advertisements: bool,
}

impl BluetoothScanner {
    pub fn new(adapter: Adapter, devices: Arc<Mutex<HashMap<String, Device>>>, show_advertisements: bool) -> Self {
        Self {
            adapter,
            devices,
            show_advertisements,
        }
    }

    /// Returns the first device matching `filter`, or `None` when `timeout`
    /// passes without one. Already-connected devices are checked first.
    pub async fn scan_for_target(&self, filter: &ScanFilter, timeout: Duration) -> Result<Option<DeviceHandle>, LinkError> {
        // A peripheral still bonded to the OS from a previous run does not advertise.
        info!("Checking for connected devices");
        for device in self.adapter.connected_devices().await? {
            let adv = Self::advertisement_of(&device, None);
            if filter.matches(&adv) {
                info!("Target already connected: {:?}", adv.name);
                return Ok(Some(self.remember(device, adv)));
            }
        }

        info!("Scanning ({} ms)...", timeout.as_millis());
        let scan = async {
            let mut scan_stream = self.adapter.scan(&[]).await?;
            while let Some(discovered) = scan_stream.next().await {
                let adv = Self::advertisement_of(&discovered.device, Some(&discovered));
                if self.show_advertisements {
                    debug!("ADV: {:?} RSSI: {:?} NAME: {:?}", adv.address, adv.rssi, adv.name);
                }
                if filter.matches(&adv) {
                    return Ok(Some(self.remember(discovered.device, adv)));
                }
            }
            warn!("Bluetooth scan stream has ended.");
            Ok::<_, LinkError>(None)
        };

        match tokio::time::timeout(timeout, scan).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    fn advertisement_of(device: &Device, discovered: Option<&AdvertisingDevice>) -> Advertisement {
        let id = device.id().to_string();
        let name = discovered
            .and_then(|d| d.adv_data.local_name.clone())
            .or_else(|| device.name().ok());
        Advertisement {
            name,
            address: extract_mac_address(&id),
            services: discovered
                .map(|d| d.adv_data.services.clone())
                .unwrap_or_default(),
            rssi: discovered.and_then(|d| d.rssi),
        }
    }

    fn remember(&self, device: Device, adv: Advertisement) -> DeviceHandle {
        let handle = DeviceHandle {
            id: device.id().to_string(),
            name: adv.name,
            address: adv.address,
            rssi: adv.rssi,
        };
        info!("Found target: {}", handle.label());
        if let Ok(mut devices) = self.devices.lock() {
            // One peer at a time; handles from earlier scans are never reused.
            devices.clear();
            devices.insert(handle.id.clone(), device);
        }
        handle
    }
}
