//! micro:bit UART bridge library
//! Keeps a BLE link to a micro:bit running the Nordic UART service and
//! exchanges LED commands with it.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use commands::LinkHandle;
pub use state::AppState;
