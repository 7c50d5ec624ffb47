//! LED state shared between the link and the local button.
//! Every change of the LED level queues exactly one `STATE:ON`/`STATE:OFF`
//! report; re-applying the current level queues nothing.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::gpio::DigitalOutput;
use crate::core::protocol::Command;

/// Outbound queue read by the active link session.
pub type ReportSender = mpsc::UnboundedSender<Command>;
pub type ReportReceiver = mpsc::UnboundedReceiver<Command>;

/// Which side of the pair this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the LED, obeys commands and reports its state.
    #[default]
    Controller,
    /// No local LED; forwards button presses and mirrors the peer's state.
    Mirror,
}

/// Application state: the LED level plus the last state the peer reported.
pub struct LedController {
    role: Role,
    led_on: bool,
    last_known_peer_state: Option<bool>,
    output: Box<dyn DigitalOutput>,
    reports: ReportSender,
}

impl LedController {
    pub fn new(role: Role, mut output: Box<dyn DigitalOutput>, reports: ReportSender) -> Self {
        output.set_output(false);
        Self {
            role,
            led_on: false,
            last_known_peer_state: None,
            output,
            reports,
        }
    }

    pub fn is_on(&self) -> bool {
        self.led_on
    }

    pub fn last_known_peer_state(&self) -> Option<bool> {
        self.last_known_peer_state
    }

    /// Applies a command received from the peer.
    /// Returns whether local state changed.
    pub fn apply_command(&mut self, command: Command) -> bool {
        match (self.role, command) {
            (_, Command::StateOn) => self.record_peer_state(true),
            (_, Command::StateOff) => self.record_peer_state(false),
            (Role::Controller, Command::On) => self.set_led(true, "remote"),
            (Role::Controller, Command::Off) => self.set_led(false, "remote"),
            (Role::Controller, Command::Toggle) => self.set_led(!self.led_on, "remote"),
            (Role::Controller, Command::StateRequest) => {
                self.queue(Command::state_report(self.led_on));
                false
            }
            (Role::Mirror, other) => {
                debug!("Mirror ignores {}", other);
                false
            }
        }
    }

    /// Applies one confirmed press of the local button.
    /// A mirror has nothing to flip; it asks the peer to toggle instead.
    pub fn apply_button_toggle(&mut self) -> bool {
        match self.role {
            Role::Controller => self.set_led(!self.led_on, "button"),
            Role::Mirror => {
                info!("BTN: TOGGLE -> peer");
                self.queue(Command::Toggle);
                false
            }
        }
    }

    /// First message to send once a link becomes active.
    pub fn link_up_announcement(&self) -> Command {
        match self.role {
            Role::Controller => Command::state_report(self.led_on),
            Role::Mirror => Command::StateRequest,
        }
    }

    fn set_led(&mut self, on: bool, source: &str) -> bool {
        if self.led_on == on {
            return false;
        }
        self.led_on = on;
        self.output.set_output(on);
        info!("LED {} (by {})", if on { "ON" } else { "OFF" }, source);
        self.queue(Command::state_report(on));
        true
    }

    fn record_peer_state(&mut self, on: bool) -> bool {
        if self.last_known_peer_state == Some(on) {
            return false;
        }
        self.last_known_peer_state = Some(on);
        info!("SYNC -> peer LED {}", if on { "ON" } else { "OFF" });
        self.role == Role::Mirror
    }

    fn queue(&self, command: Command) {
        if let Err(e) = self.reports.send(command) {
            warn!("Dropping {}: report queue closed ({})", command, e);
        }
    }
}
