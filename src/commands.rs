//! Public entry points of the link
//! What the rest of the application uses to talk to the peer: observe
//! inbound commands, queue outbound ones and read the link state.

use std::future::Future;

use log::debug;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::types::LinkState;
use crate::core::controller::ReportSender;
use crate::core::protocol::Command;

#[derive(Clone)]
pub struct LinkHandle {
    state: watch::Receiver<LinkState>,
    inbound: broadcast::Sender<Command>,
    outbound: ReportSender,
}

impl LinkHandle {
    pub fn new(state: watch::Receiver<LinkState>, inbound: broadcast::Sender<Command>, outbound: ReportSender) -> Self {
        Self {
            state,
            inbound,
            outbound,
        }
    }

    /// Calls `handler` for every command decoded from the peer, in arrival
    /// order, until the link side shuts down. Commands that arrive while
    /// the handler is busy are buffered; if it falls too far behind the
    /// oldest are skipped.
    pub fn on_command_received<F, Fut>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Command) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.inbound.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(command) => handler(command).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Command handler skipped {} command(s)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<Command> {
        self.inbound.subscribe()
    }

    /// Queues `command` for the peer. Fails with `NotConnected` unless the
    /// link is `Active`; nothing is queued in that case.
    pub fn send_command(&self, command: Command) -> Result<(), LinkError> {
        if !self.current_link_state().is_active() {
            return Err(LinkError::NotConnected);
        }
        self.outbound
            .send(command)
            .map_err(|_| LinkError::NotConnected)
    }

    pub fn current_link_state(&self) -> LinkState {
        *self.state.borrow()
    }
}
