//! Debounced push button.
//!
//! [`Debouncer`] turns raw level samples into clean press/release edges.
//! An edge interrupt, where one exists, only stores a provisional level and
//! timestamp in an [`EdgeSlot`]; all debounce logic and side effects run on
//! the polling path in [`button_task`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::clock::{Clock, Millis, ticks_diff};
use crate::core::controller::LedController;
use crate::core::gpio::DigitalInput;

/// A committed edge on the button input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed,
    Released,
}

/// Level-stability filter.
///
/// A level change is committed only once the raw level has not moved for
/// longer than the debounce window. Bounces shorter than the window never
/// reach the stable level and produce no event.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: Millis,
    active_low: bool,
    last_raw: bool,
    stable_level: bool,
    last_change_ms: Millis,
}

impl Debouncer {
    /// `active_low`: pressed pulls the line low (pull-up wiring), so a
    /// falling edge is a press.
    pub fn new(window_ms: Millis, active_low: bool, initial_level: bool, now_ms: Millis) -> Self {
        Self {
            window_ms,
            active_low,
            last_raw: initial_level,
            stable_level: initial_level,
            last_change_ms: now_ms,
        }
    }

    /// Feeds one raw sample. Returns an event when a new level is committed.
    pub fn sample(&mut self, raw_level: bool, now_ms: Millis) -> Option<ButtonEvent> {
        if raw_level != self.last_raw {
            self.last_raw = raw_level;
            self.last_change_ms = now_ms;
        }
        if ticks_diff(now_ms, self.last_change_ms) > self.window_ms as i64
            && raw_level != self.stable_level
        {
            self.stable_level = raw_level;
            let pressed = raw_level != self.active_low;
            return Some(if pressed {
                ButtonEvent::Pressed
            } else {
                ButtonEvent::Released
            });
        }
        None
    }

    /// Consumes a pending edge from an interrupt slot, then samples the
    /// current level.
    pub fn poll(&mut self, slot: &EdgeSlot, raw_level: bool, now_ms: Millis) -> Option<ButtonEvent> {
        if let Some((level, at_ms)) = slot.take() {
            if level != self.last_raw {
                self.last_raw = level;
                self.last_change_ms = at_ms;
            }
        }
        self.sample(raw_level, now_ms)
    }

    pub fn is_pressed(&self) -> bool {
        self.stable_level != self.active_low
    }
}

/// Single-writer slot an edge interrupt handler records into.
/// `record` is one atomic store, so it is safe from any context.
#[derive(Debug, Default)]
pub struct EdgeSlot {
    word: AtomicU64,
}

const SLOT_PENDING: u64 = 1 << 63;
const SLOT_LEVEL: u64 = 1 << 32;

impl EdgeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a provisional edge. Overwrites any edge not yet consumed.
    pub fn record(&self, level: bool, now_ms: Millis) {
        let level_bit = if level { SLOT_LEVEL } else { 0 };
        self.word
            .store(SLOT_PENDING | level_bit | now_ms as u64, Ordering::Release);
    }

    /// Takes the pending edge, if any.
    pub fn take(&self) -> Option<(bool, Millis)> {
        let word = self.word.swap(0, Ordering::AcqRel);
        if word & SLOT_PENDING == 0 {
            return None;
        }
        Some((word & SLOT_LEVEL != 0, word as u32))
    }
}

/// Turns committed edges into toggle actions: one per press-release cycle.
#[derive(Debug, Default)]
pub struct PressTracker {
    held: bool,
}

impl PressTracker {
    /// Returns true exactly once per physical press.
    pub fn on_event(&mut self, event: ButtonEvent) -> bool {
        match event {
            ButtonEvent::Pressed if !self.held => {
                self.held = true;
                true
            }
            ButtonEvent::Pressed => false,
            ButtonEvent::Released => {
                self.held = false;
                false
            }
        }
    }
}

/// Polls the button and toggles the LED once per confirmed press.
/// Runs until `cancel` fires.
pub async fn button_task<I, C>(
    input: I,
    slot: Arc<EdgeSlot>,
    mut debouncer: Debouncer,
    led: Arc<Mutex<LedController>>,
    clock: C,
    poll_interval: Duration,
    cancel: CancellationToken,
) where
    I: DigitalInput,
    C: Clock,
{
    let mut tracker = PressTracker::default();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Button task started ({} ms poll)", poll_interval.as_millis());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        let Some(event) = debouncer.poll(&slot, input.read_level(), clock.now_ms()) else {
            continue;
        };
        debug!("Button {:?}", event);
        if tracker.on_event(event) {
            led.lock().await.apply_button_toggle();
        }
    }
    info!("Button task stopped");
}
