//! Bluetooth manager for the bridge
//! Brings up the platform adapter and exposes it as a [`Central`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bluest::{Adapter, Device};
use log::info;

use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::transport::{Central, Connection};
use crate::core::bluetooth::types::{DeviceHandle, ScanFilter};

/// Manages Bluetooth operations
pub struct BluetoothManager {
    /// Bluetooth scanner
    scanner: BluetoothScanner,
    /// Connection manager
    connection_manager: ConnectionManager,
}

impl BluetoothManager {
    /// Creates a new BluetoothManager on the default adapter
    pub async fn new(show_advertisements: bool) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!(LinkError::AdapterUnavailable))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        let devices: Arc<Mutex<HashMap<String, Device>>> = Arc::new(Mutex::new(HashMap::new()));
        let scanner = BluetoothScanner::new(adapter.clone(), devices.clone(), show_advertisements);
        let connection_manager = ConnectionManager::new(adapter, devices);

        Ok(Self {
            scanner,
            connection_manager,
        })
    }
}

#[async_trait]
impl Central for BluetoothManager {
    async fn scan(&self, filter: &ScanFilter, timeout: Duration) -> Result<Option<DeviceHandle>, LinkError> {
        self.scanner.scan_for_target(filter, timeout).await
    }

    async fn connect(&self, peer: DeviceHandle, timeout: Duration) -> Result<Box<dyn Connection>, LinkError> {
        let connection = self.connection_manager.connect(peer, timeout).await?;
        Ok(Box::new(connection))
    }
}
