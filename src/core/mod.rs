//! Core functionality for the bridge
//! The BLE link, the command codec and the local LED/button state.

pub mod bluetooth;
pub mod button;
pub mod clock;
pub mod controller;
pub mod gpio;
pub mod protocol;

// Re-export commonly used types
pub use bluetooth::{BluetoothManager, LinkError, LinkState};
pub use controller::{LedController, Role};
pub use protocol::Command;
