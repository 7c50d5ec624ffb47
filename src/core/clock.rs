//! Monotonic millisecond ticks.
//! Ticks are `u32` and wrap after ~49 days; always compare them with
//! [`ticks_diff`], never with plain subtraction.

use tokio::time::Instant;

/// A millisecond tick count. Wraps around.
pub type Millis = u32;

/// Longest span [`ticks_diff`] can measure. Intervals must not exceed it.
pub const MAX_TICK_SPAN: Millis = i32::MAX as Millis;

/// Source of monotonic millisecond ticks.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Signed difference `now - earlier`, correct across a single wraparound.
pub fn ticks_diff(now: Millis, earlier: Millis) -> i64 {
    now.wrapping_sub(earlier) as i32 as i64
}

/// Clock backed by `tokio::time::Instant`, so paused test time drives it too.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Millis {
        // Truncation is the wraparound.
        self.origin.elapsed().as_millis() as Millis
    }
}
