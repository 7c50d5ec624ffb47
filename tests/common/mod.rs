//! Scripted in-memory peripheral for driving the link end to end.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use microbit_uart_bridge_lib::config::link_config::LinkConfig;
use microbit_uart_bridge_lib::core::bluetooth::{
    Advertisement, AttrHandle, Central, CharacteristicRefs, Connection, DeviceHandle, LinkError, LinkState,
    ScanFilter, ServiceRange, SubscribeMode,
};
use microbit_uart_bridge_lib::core::controller::Role;

pub const SERVICE_START: AttrHandle = AttrHandle(0x0010);
pub const SERVICE_END: AttrHandle = AttrHandle(0x0020);
pub const NOTIFY_HANDLE: AttrHandle = AttrHandle(0x0012);
pub const WRITE_HANDLE: AttrHandle = AttrHandle(0x0015);

pub type Inbound = Result<Vec<u8>, LinkError>;

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub handle: AttrHandle,
    pub bytes: Vec<u8>,
    pub need_ack: bool,
}

/// What the fake peripheral does. Shared by the central and every
/// connection it hands out.
pub struct Peripheral {
    pub advertised_name: String,
    /// Cleared: nothing in range, scans run out their window.
    pub present: AtomicBool,
    /// The stack's own subscribe call fails.
    pub subscribe_fails: bool,
    /// The stack's own subscribe call never completes.
    pub subscribe_hangs: bool,
    /// The connect handshake never completes.
    pub connect_hangs: bool,
    /// The write characteristic is absent from the service.
    pub missing_write_char: bool,
    /// The peer drops the link when the central reaches this step.
    pub lose_link_in: Option<LinkState>,
    pub disconnect_hangs: bool,
    /// Value returned by reads of the notify characteristic.
    pub readable: Mutex<Vec<u8>>,
    pub reads: AtomicUsize,
    pub raw_writes: bool,
    /// Offset of the CCCD from the notify value handle.
    pub cccd_offset: Option<u16>,
    pub fail_uart_writes: AtomicBool,
    pub connected: AtomicBool,
    pub connect_error: Mutex<Option<LinkError>>,
    pub scans: Mutex<Vec<Instant>>,
    pub connects: AtomicUsize,
    pub writes: Mutex<Vec<Write>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl Peripheral {
    pub fn microbit() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            advertised_name: "BBC micro:bit [tevog]".into(),
            present: AtomicBool::new(true),
            subscribe_fails: false,
            subscribe_hangs: false,
            connect_hangs: false,
            missing_write_char: false,
            lose_link_in: None,
            disconnect_hangs: false,
            readable: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            raw_writes: false,
            cccd_offset: None,
            fail_uart_writes: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            connect_error: Mutex::new(None),
            scans: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            inbound: tokio::sync::Mutex::new(inbound_rx),
            inbound_tx,
        }
    }

    /// Queues a notification (or a receive error) for the central.
    pub fn notify(&self, item: Inbound) {
        self.inbound_tx.send(item).unwrap();
    }

    fn drop_link_in(&self, step: LinkState) -> Result<(), LinkError> {
        if self.lose_link_in == Some(step) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(LinkError::LinkLost(format!("peer dropped during {}", step)));
        }
        Ok(())
    }

    pub fn scan_count(&self) -> usize {
        self.scans.lock().unwrap().len()
    }

    /// Tokens written to the UART write characteristic, in order.
    pub fn uart_tokens(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.handle == WRITE_HANDLE)
            .map(|w| String::from_utf8_lossy(&w.bytes).trim_end().to_string())
            .collect()
    }

    pub fn state_reports(&self) -> Vec<String> {
        self.uart_tokens()
            .into_iter()
            .filter(|t| t.starts_with("STATE:"))
            .collect()
    }
}

pub struct FakeCentral {
    pub peripheral: Arc<Peripheral>,
}

#[async_trait]
impl Central for FakeCentral {
    async fn scan(&self, filter: &ScanFilter, timeout: Duration) -> Result<Option<DeviceHandle>, LinkError> {
        self.peripheral.scans.lock().unwrap().push(Instant::now());
        let adv = Advertisement {
            name: Some(self.peripheral.advertised_name.clone()),
            address: Some("C8:9C:3A:28:77:AB".into()),
            services: Vec::new(),
            rssi: Some(-60),
        };
        if self.peripheral.present.load(Ordering::SeqCst) && filter.matches(&adv) {
            return Ok(Some(DeviceHandle {
                id: "fake0".into(),
                name: adv.name,
                address: adv.address,
                rssi: adv.rssi,
            }));
        }
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn connect(&self, peer: DeviceHandle, timeout: Duration) -> Result<Box<dyn Connection>, LinkError> {
        self.peripheral.connects.fetch_add(1, Ordering::SeqCst);
        if self.peripheral.connect_hangs {
            tokio::time::sleep(timeout).await;
            return Err(LinkError::ConnectTimeout(timeout.as_millis() as u64));
        }
        if let Some(e) = self.peripheral.connect_error.lock().unwrap().take() {
            return Err(e);
        }
        self.peripheral.connected.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            peer,
            peripheral: self.peripheral.clone(),
        }))
    }
}

pub struct FakeConnection {
    peer: DeviceHandle,
    peripheral: Arc<Peripheral>,
}

#[async_trait]
impl Connection for FakeConnection {
    fn peer(&self) -> &DeviceHandle {
        &self.peer
    }

    async fn discover_service(&mut self, uuid: Uuid, _timeout: Duration) -> Result<ServiceRange, LinkError> {
        self.peripheral.drop_link_in(LinkState::DiscoveringServices)?;
        Ok(ServiceRange {
            uuid,
            start: SERVICE_START,
            end: SERVICE_END,
        })
    }

    async fn discover_characteristics(
        &mut self,
        _range: &ServiceRange,
        _notify_uuid: Uuid,
        write_uuid: Uuid,
        _timeout: Duration,
    ) -> Result<CharacteristicRefs, LinkError> {
        self.peripheral.drop_link_in(LinkState::DiscoveringCharacteristics)?;
        if self.peripheral.missing_write_char {
            return Err(LinkError::DiscoveryFailed(format!("write characteristic not found: {}", write_uuid)));
        }
        Ok(CharacteristicRefs {
            notify_handle: NOTIFY_HANDLE,
            write_handle: WRITE_HANDLE,
        })
    }

    async fn subscribe(&mut self, _handle: AttrHandle, _mode: SubscribeMode, _timeout: Duration) -> Result<(), LinkError> {
        self.peripheral.drop_link_in(LinkState::SubscribingRx)?;
        if self.peripheral.subscribe_hangs {
            std::future::pending::<()>().await;
        }
        if self.peripheral.subscribe_fails {
            Err(LinkError::SubscribeFailed("stack refused".into()))
        } else {
            Ok(())
        }
    }

    fn supports_raw_attribute_writes(&self) -> bool {
        self.peripheral.raw_writes
    }

    async fn write(&self, handle: AttrHandle, bytes: &[u8], need_ack: bool, _timeout: Duration) -> Result<(), LinkError> {
        self.peripheral.writes.lock().unwrap().push(Write {
            handle,
            bytes: bytes.to_vec(),
            need_ack,
        });
        if handle == WRITE_HANDLE {
            if self.peripheral.fail_uart_writes.load(Ordering::SeqCst) {
                return Err(LinkError::WriteFailed("ATT write rejected".into()));
            }
            return Ok(());
        }
        let cccd = self.peripheral.cccd_offset.and_then(|off| NOTIFY_HANDLE.offset(off));
        if Some(handle) == cccd {
            Ok(())
        } else {
            Err(LinkError::transport(format!("invalid handle {}", handle)))
        }
    }

    async fn read(&self, handle: AttrHandle, _timeout: Duration) -> Result<Vec<u8>, LinkError> {
        self.peripheral.reads.fetch_add(1, Ordering::SeqCst);
        if handle != NOTIFY_HANDLE {
            return Err(LinkError::transport(format!("read not permitted on {}", handle)));
        }
        Ok(self.peripheral.readable.lock().unwrap().clone())
    }

    async fn wait_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let mut inbound = self.peripheral.inbound.lock().await;
        match tokio::time::timeout(timeout, inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(item)) => item.map(Some),
            Ok(None) => Err(LinkError::LinkLost("peripheral gone".into())),
        }
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        if self.peripheral.disconnect_hangs {
            std::future::pending::<()>().await;
        }
        self.peripheral.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub fn config(role: Role) -> LinkConfig {
    LinkConfig {
        role,
        ..LinkConfig::default()
    }
}

/// Polls `cond` every 10 ms of (paused) time, up to a minute.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..6000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}
