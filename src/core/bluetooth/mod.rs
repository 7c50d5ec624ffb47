//! Bluetooth functionality for the bridge
//! This module handles the central side of the link: scanning, connecting,
//! discovering the UART service, subscribing, and serving the link.

pub mod commands;
pub mod connection;
pub mod constants;
pub mod error;
pub mod keepalive;
pub mod manager;
pub mod notification;
pub mod scanner;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-export types that should be publicly accessible
pub use commands::{CommandSender, CommandWriter};
pub use error::LinkError;
pub use keepalive::KeepaliveScheduler;
pub use manager::BluetoothManager;
pub use session::{LinkSession, SessionContext, SessionOutcome, SessionSettings};
pub use supervisor::SessionSupervisor;
pub use transport::{Central, Connection};
pub use types::{
    Advertisement, AttrHandle, CharacteristicRefs, DeviceHandle, LinkState, ScanFilter, ServiceRange,
    SubscribeMode,
};
