//! Keeps a link up for the life of the process.
//!
//! Each attempt is a fresh [`LinkSession`]. Whatever way it ends, the
//! supervisor waits a short delay and starts over; there is no retry
//! limit and no error escapes.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{RETRY_AFTER_FAILURE_MS, RETRY_AFTER_SESSION_MS};
use crate::core::bluetooth::session::{LinkSession, SessionContext, SessionOutcome, SessionSettings};
use crate::core::bluetooth::transport::Central;
use crate::core::bluetooth::types::LinkState;
use crate::core::clock::Clock;
use crate::core::controller::{LedController, ReportReceiver};
use crate::core::protocol::Command;

const INBOUND_CAPACITY: usize = 32;

pub struct SessionSupervisor {
    ctx: SessionContext,
    retry_after_session: Duration,
    retry_after_failure: Duration,
    attempts: u64,
}

impl SessionSupervisor {
    pub fn new(
        central: Arc<dyn Central>,
        settings: SessionSettings,
        led: Arc<Mutex<LedController>>,
        reports: ReportReceiver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Idle);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            ctx: SessionContext {
                central,
                settings,
                led,
                reports,
                state,
                inbound,
                clock,
            },
            retry_after_session: Duration::from_millis(RETRY_AFTER_SESSION_MS),
            retry_after_failure: Duration::from_millis(RETRY_AFTER_FAILURE_MS),
            attempts: 0,
        }
    }

    /// Overrides the delays between attempts.
    pub fn with_retry_delays(mut self, after_session: Duration, after_failure: Duration) -> Self {
        self.retry_after_session = after_session;
        self.retry_after_failure = after_failure;
        self
    }

    pub fn state_receiver(&self) -> watch::Receiver<LinkState> {
        self.ctx.state.subscribe()
    }

    pub fn inbound_sender(&self) -> broadcast::Sender<Command> {
        self.ctx.inbound.clone()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Runs one attempt, then waits the delay that fits how it ended.
    pub async fn run_once(&mut self) -> SessionOutcome {
        self.attempts += 1;
        info!("Link attempt #{}", self.attempts);
        let outcome = LinkSession::new(&mut self.ctx).run().await;

        let delay = if outcome.reached_active {
            info!("Session ended: {}", outcome.error);
            self.retry_after_session
        } else {
            warn!("Attempt failed: {}", outcome.error);
            self.retry_after_failure
        };
        info!("Retrying in {} ms", delay.as_millis());
        tokio::time::sleep(delay).await;
        outcome
    }

    pub async fn run(mut self) -> Infallible {
        loop {
            self.run_once().await;
        }
    }

    /// Like [`run`](Self::run), but stops at the next await point once
    /// `token` is cancelled. The state is left at `Idle`.
    pub async fn run_until_cancelled(mut self, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = async { loop { self.run_once().await; } } => {}
        }
        self.ctx.state.send_replace(LinkState::Idle);
        info!("Link supervisor stopped after {} attempt(s)", self.attempts);
    }
}
