//! Digital I/O seams.
//! The desktop build has no GPIO header, so the implementations here are a
//! shared level that the CLI drives and an output that only logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

/// A digital input pin.
pub trait DigitalInput: Send {
    /// Raw electrical level, `true` = high.
    fn read_level(&self) -> bool;
}

/// A digital output pin.
pub trait DigitalOutput: Send {
    fn set_output(&mut self, on: bool);
}

/// Input whose level is set from elsewhere (CLI, tests).
/// Clones share the same level.
#[derive(Debug, Clone)]
pub struct SharedLevel {
    level: Arc<AtomicBool>,
}

impl SharedLevel {
    pub fn new(initial: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn set(&self, level: bool) {
        self.level.store(level, Ordering::Release);
    }
}

impl DigitalInput for SharedLevel {
    fn read_level(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

/// Output that reports level changes to the log.
#[derive(Debug, Default)]
pub struct LogOutput {
    pin: u8,
}

impl LogOutput {
    pub fn new(pin: u8) -> Self {
        Self { pin }
    }
}

impl DigitalOutput for LogOutput {
    fn set_output(&mut self, on: bool) {
        info!("LED (pin {}) {}", self.pin, if on { "ON" } else { "OFF" });
    }
}

/// Output that drops every level. Mirror peers have no LED of their own.
#[derive(Debug, Default, Clone)]
pub struct NullOutput;

impl DigitalOutput for NullOutput {
    fn set_output(&mut self, _on: bool) {}
}
