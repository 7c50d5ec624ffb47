//! Radio transport seams.
//!
//! [`Central`] scans and connects; each successful connect hands back one
//! [`Connection`] that owns the peer until it is disconnected or dropped.
//! Every suspending call takes an explicit timeout.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::types::{
    AttrHandle, CharacteristicRefs, DeviceHandle, ScanFilter, ServiceRange, SubscribeMode,
};

/// BLE central role: find a peripheral and connect to it.
#[async_trait]
pub trait Central: Send + Sync {
    /// Returns the first qualifying peripheral, or `None` when the window closes.
    async fn scan(&self, filter: &ScanFilter, timeout: Duration) -> Result<Option<DeviceHandle>, LinkError>;

    /// Connects to `peer`. Fails with `ConnectTimeout` when the handshake
    /// does not finish in time.
    async fn connect(&self, peer: DeviceHandle, timeout: Duration) -> Result<Box<dyn Connection>, LinkError>;
}

/// One live connection to one peripheral.
#[async_trait]
pub trait Connection: Send + Sync {
    fn peer(&self) -> &DeviceHandle;

    async fn discover_service(&mut self, uuid: Uuid, timeout: Duration) -> Result<ServiceRange, LinkError>;

    async fn discover_characteristics(
        &mut self,
        range: &ServiceRange,
        notify_uuid: Uuid,
        write_uuid: Uuid,
        timeout: Duration,
    ) -> Result<CharacteristicRefs, LinkError>;

    /// Opens delivery of peer-initiated values through the stack's own API.
    /// Fails with `SubscribeFailed` when the peer has not acknowledged
    /// within `timeout`.
    async fn subscribe(&mut self, handle: AttrHandle, mode: SubscribeMode, timeout: Duration) -> Result<(), LinkError>;

    /// Whether `write` may target raw attribute handles such as descriptors.
    fn supports_raw_attribute_writes(&self) -> bool {
        false
    }

    /// Writes `bytes` to `handle`; `need_ack` selects write-with-response.
    async fn write(&self, handle: AttrHandle, bytes: &[u8], need_ack: bool, timeout: Duration) -> Result<(), LinkError>;

    /// Reads the current value of `handle`.
    async fn read(&self, handle: AttrHandle, timeout: Duration) -> Result<Vec<u8>, LinkError>;

    /// Waits for the next inbound value. `Ok(None)` means the wait timed out.
    async fn wait_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), LinkError>;
}
