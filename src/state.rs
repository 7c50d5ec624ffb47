//! Application state management
//! Wires the LED state, the report queue, the link supervisor and the
//! public handle together.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commands::LinkHandle;
use crate::config::link_config::LinkConfig;
use crate::core::bluetooth::session::SessionSettings;
use crate::core::bluetooth::supervisor::SessionSupervisor;
use crate::core::bluetooth::transport::Central;
use crate::core::button::{Debouncer, EdgeSlot, button_task};
use crate::core::clock::{Clock, MonotonicClock};
use crate::core::controller::{LedController, Role};
use crate::core::gpio::{DigitalInput, DigitalOutput, LogOutput, NullOutput};

/// Global application state
pub struct AppState {
    pub config: LinkConfig,
    pub led: Arc<Mutex<LedController>>,
    pub link: LinkHandle,
    edge_slot: Arc<EdgeSlot>,
    clock: MonotonicClock,
    supervisor: Option<SessionSupervisor>,
}

impl AppState {
    /// Builds the state around `central`. Nothing runs until
    /// [`spawn_link`](Self::spawn_link) is called.
    pub fn new(config: LinkConfig, central: Arc<dyn Central>) -> Self {
        let output: Box<dyn DigitalOutput> = match config.role {
            Role::Controller => Box::new(LogOutput::new(config.led_pin)),
            Role::Mirror => Box::new(NullOutput),
        };
        Self::with_output(config, central, output)
    }

    pub fn with_output(config: LinkConfig, central: Arc<dyn Central>, output: Box<dyn DigitalOutput>) -> Self {
        info!("Initializing link state as {:?}", config.role);
        let clock = MonotonicClock::new();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let led = Arc::new(Mutex::new(LedController::new(config.role, output, reports_tx.clone())));

        let supervisor = SessionSupervisor::new(
            central,
            SessionSettings::from(&config),
            led.clone(),
            reports_rx,
            Arc::new(clock.clone()),
        )
        .with_retry_delays(
            Duration::from_millis(config.retry_after_session_ms),
            Duration::from_millis(config.retry_after_failure_ms),
        );
        let link = LinkHandle::new(supervisor.state_receiver(), supervisor.inbound_sender(), reports_tx);

        Self {
            config,
            led,
            link,
            edge_slot: Arc::new(EdgeSlot::new()),
            clock,
            supervisor: Some(supervisor),
        }
    }

    /// Starts the link supervisor. Only the first call spawns anything.
    pub fn spawn_link(&mut self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let supervisor = self.supervisor.take()?;
        Some(tokio::spawn(supervisor.run_until_cancelled(cancel)))
    }

    /// Starts polling `input` as the button.
    pub fn spawn_button<I>(&self, input: I, cancel: CancellationToken) -> JoinHandle<()>
    where
        I: DigitalInput + 'static,
    {
        let debouncer = Debouncer::new(
            self.config.debounce_ms,
            self.config.button_active_low,
            input.read_level(),
            self.clock.now_ms(),
        );
        tokio::spawn(button_task(
            input,
            self.edge_slot.clone(),
            debouncer,
            self.led.clone(),
            self.clock.clone(),
            Duration::from_millis(self.config.button_poll_ms),
            cancel,
        ))
    }

    pub fn button_edges(&self) -> ButtonEdges {
        ButtonEdges {
            slot: self.edge_slot.clone(),
            clock: self.clock.clone(),
            active_low: self.config.button_active_low,
        }
    }
}

/// Records raw button edges from outside the poll loop, the way a pin
/// interrupt would.
#[derive(Clone)]
pub struct ButtonEdges {
    slot: Arc<EdgeSlot>,
    clock: MonotonicClock,
    pub active_low: bool,
}

impl ButtonEdges {
    pub fn record(&self, level: bool) {
        self.slot.record(level, self.clock.now_ms());
    }
}
