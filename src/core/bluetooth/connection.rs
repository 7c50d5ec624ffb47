//! Bluetooth connection handling for the peripheral
//! This module connects to the target and implements [`Connection`] on
//! top of the platform GATT client.
//!
//! The platform API does not expose ATT handles, so handles are assigned
//! here: the service range starts at `SERVICE_START` and each discovered
//! characteristic gets a value handle with one spare slot after it for
//! its descriptor, mirroring a typical GATT table.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Service};
use log::{info, warn};
use uuid::Uuid;

use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::transport::Connection;
use crate::core::bluetooth::types::{
    AttrHandle, CharacteristicRefs, DeviceHandle, ServiceRange, SubscribeMode,
};

const SERVICE_START: u16 = 0x0010;
const SERVICE_END: u16 = 0x00ff;

/// Connection manager for the peripheral
#[derive(Clone)]
pub struct ConnectionManager {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl ConnectionManager {
    pub fn new(adapter: Adapter, devices: Arc<Mutex<HashMap<String, Device>>>) -> Self {
        Self { adapter, devices }
    }

    /// Connects once. Retrying is the supervisor's job, not ours.
    pub async fn connect(&self, peer: DeviceHandle, timeout: Duration) -> Result<BluestConnection, LinkError> {
        let device = self
            .devices
            .lock()
            .ok()
            .and_then(|devices| devices.get(&peer.id).cloned())
            .ok_or_else(|| LinkError::ConnectRefused(format!("device {} is not from the last scan", peer.id)))?;

        info!("Connecting to {} ...", peer.label());
        if !device.is_connected().await {
            match tokio::time::timeout(timeout, self.adapter.connect_device(&device)).await {
                Err(_) => return Err(LinkError::ConnectTimeout(timeout.as_millis() as u64)),
                Ok(Err(e)) => return Err(LinkError::ConnectRefused(e.to_string())),
                Ok(Ok(())) => {}
            }
        }
        info!("Connected to {}", peer.label());

        Ok(BluestConnection {
            adapter: self.adapter.clone(),
            device,
            peer,
            service: None,
            characteristics: BTreeMap::new(),
            notifications: None,
        })
    }
}

pub struct BluestConnection {
    adapter: Adapter,
    device: Device,
    peer: DeviceHandle,
    service: Option<Service>,
    characteristics: BTreeMap<AttrHandle, Characteristic>,
    notifications: Option<NotificationHandler>,
}

impl BluestConnection {
    fn characteristic(&self, handle: AttrHandle) -> Result<&Characteristic, LinkError> {
        self.characteristics
            .get(&handle)
            .ok_or_else(|| LinkError::transport(format!("no characteristic at {}", handle)))
    }
}

#[async_trait]
impl Connection for BluestConnection {
    fn peer(&self) -> &DeviceHandle {
        &self.peer
    }

    async fn discover_service(&mut self, uuid: Uuid, timeout: Duration) -> Result<ServiceRange, LinkError> {
        let services = tokio::time::timeout(timeout, self.device.discover_services_with_uuid(uuid))
            .await
            .map_err(|_| LinkError::DiscoveryFailed(format!("service discovery timed out after {} ms", timeout.as_millis())))??;

        let service = services
            .into_iter()
            .find(|s| s.uuid() == uuid)
            .ok_or_else(|| LinkError::DiscoveryFailed(format!("service not found: {}", uuid)))?;
        info!("Found service: {}", service.uuid());
        self.service = Some(service);

        Ok(ServiceRange {
            uuid,
            start: AttrHandle(SERVICE_START),
            end: AttrHandle(SERVICE_END),
        })
    }

    async fn discover_characteristics(
        &mut self,
        range: &ServiceRange,
        notify_uuid: Uuid,
        write_uuid: Uuid,
        timeout: Duration,
    ) -> Result<CharacteristicRefs, LinkError> {
        let service = self
            .service
            .clone()
            .filter(|s| s.uuid() == range.uuid)
            .ok_or_else(|| LinkError::DiscoveryFailed(format!("service {} was not discovered", range.uuid)))?;

        let chars = tokio::time::timeout(timeout, service.characteristics())
            .await
            .map_err(|_| LinkError::DiscoveryFailed(format!("characteristic discovery timed out after {} ms", timeout.as_millis())))??;

        self.characteristics.clear();
        let mut notify_handle = None;
        let mut write_handle = None;
        for (i, characteristic) in chars.into_iter().enumerate() {
            let Some(handle) = u16::try_from(i * 2 + 1)
                .ok()
                .and_then(|off| range.start.offset(off))
                .filter(|h| range.contains(*h))
            else {
                warn!("Characteristic {} does not fit the service range", characteristic.uuid());
                continue;
            };
            let uuid = characteristic.uuid();
            if uuid == notify_uuid {
                info!("Found notification characteristic: {} at {}", uuid, handle);
                notify_handle = Some(handle);
            } else if uuid == write_uuid {
                info!("Found write characteristic: {} at {}", uuid, handle);
                write_handle = Some(handle);
            }
            self.characteristics.insert(handle, characteristic);
        }

        let notify_handle = notify_handle
            .ok_or_else(|| LinkError::DiscoveryFailed(format!("notification characteristic not found: {}", notify_uuid)))?;
        let write_handle = write_handle
            .ok_or_else(|| LinkError::DiscoveryFailed(format!("write characteristic not found: {}", write_uuid)))?;
        Ok(CharacteristicRefs {
            notify_handle,
            write_handle,
        })
    }

    async fn subscribe(&mut self, handle: AttrHandle, mode: SubscribeMode, timeout: Duration) -> Result<(), LinkError> {
        let characteristic = self
            .characteristic(handle)
            .map_err(|e| LinkError::SubscribeFailed(e.to_string()))?
            .clone();
        // The platform picks indicate or notify from the characteristic's properties.
        info!("Subscribing to {} ({:?} requested)", handle, mode);
        if let Some(old) = self.notifications.take() {
            old.stop();
        }
        self.notifications = Some(NotificationHandler::start(characteristic, timeout).await?);
        Ok(())
    }

    async fn read(&self, handle: AttrHandle, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let characteristic = self.characteristic(handle)?;
        match tokio::time::timeout(timeout, characteristic.read()).await {
            Err(_) => Err(LinkError::transport(format!("read of {} timed out", handle))),
            Ok(result) => Ok(result?),
        }
    }

    async fn write(&self, handle: AttrHandle, bytes: &[u8], need_ack: bool, timeout: Duration) -> Result<(), LinkError> {
        let characteristic = self.characteristic(handle)?;
        let write = async {
            if need_ack {
                characteristic.write(bytes).await
            } else {
                characteristic.write_without_response(bytes).await
            }
        };
        match tokio::time::timeout(timeout, write).await {
            Err(_) => Err(LinkError::WriteFailed(format!("write to {} timed out", handle))),
            Ok(Err(e)) => {
                let e = LinkError::from(e);
                if e.is_link_loss() { Err(e) } else { Err(LinkError::WriteFailed(e.to_string())) }
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    async fn wait_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let Some(notifications) = self.notifications.as_mut() else {
            return Err(LinkError::SubscribeFailed("not subscribed".into()));
        };
        match tokio::time::timeout(timeout, notifications.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(value))) => Ok(Some(value)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(LinkError::LinkLost("notification stream ended".into())),
        }
    }

    async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        if let Some(notifications) = self.notifications.take() {
            notifications.stop();
        }
        self.characteristics.clear();
        self.service = None;
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter.disconnect_device(&self.device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", self.device.id());
        }
        Ok(())
    }
}
