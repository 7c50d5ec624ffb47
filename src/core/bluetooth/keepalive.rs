//! Periodic `ESP?` probe while a session is up.
//! A failed probe is only logged: a dead link shows up on the next
//! notification wait, which is what ends the session.

use log::{debug, warn};

use crate::core::bluetooth::commands::CommandSender;
use crate::core::clock::{MAX_TICK_SPAN, Millis, ticks_diff};
use crate::core::protocol::Command;

/// Token sent as the probe. The peripheral answers it with `MBOK`.
pub const KEEPALIVE_PROBE: Command = Command::StateRequest;

#[derive(Debug, Clone, Copy)]
pub struct KeepaliveScheduler {
    interval_ms: Millis,
}

impl KeepaliveScheduler {
    /// Intervals longer than [`MAX_TICK_SPAN`] are clamped to it.
    pub fn new(interval_ms: Millis) -> Self {
        Self {
            interval_ms: interval_ms.min(MAX_TICK_SPAN),
        }
    }

    /// A `last_probe_ms` that makes the next call probe immediately.
    pub fn overdue(&self, now_ms: Millis) -> Millis {
        now_ms.wrapping_sub(self.interval_ms)
    }

    /// Sends a probe if the interval has elapsed and a write channel exists.
    /// Returns the new last-probe tick.
    pub async fn maybe_probe(
        &self,
        sender: Option<&dyn CommandSender>,
        now_ms: Millis,
        last_probe_ms: Millis,
    ) -> Millis {
        let Some(sender) = sender else {
            return now_ms;
        };
        if ticks_diff(now_ms, last_probe_ms) < self.interval_ms as i64 {
            return last_probe_ms;
        }
        match sender.send_command(KEEPALIVE_PROBE).await {
            Ok(()) => debug!("KA -> peer"),
            Err(e) => warn!("Keepalive write failed: {}", e),
        }
        now_ms
    }
}
