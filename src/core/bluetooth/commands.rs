//! Sending protocol commands to the peripheral
//! Commands go out through the write characteristic of the active connection.

use std::time::Duration;

use log::{debug, info};

use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::transport::Connection;
use crate::core::bluetooth::types::AttrHandle;
use crate::core::protocol::Command;

/// Command sender trait
#[async_trait::async_trait]
pub trait CommandSender: Send + Sync {
    /// Send a command to the peripheral
    async fn send_command(&self, command: Command) -> Result<(), LinkError>;
}

/// Writes commands to one connection's write characteristic.
/// Lives no longer than the session that owns the connection.
pub struct CommandWriter<'a> {
    connection: &'a dyn Connection,
    write_handle: AttrHandle,
    timeout: Duration,
}

impl<'a> CommandWriter<'a> {
    pub fn new(connection: &'a dyn Connection, write_handle: AttrHandle, timeout: Duration) -> Self {
        Self {
            connection,
            write_handle,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl CommandSender for CommandWriter<'_> {
    async fn send_command(&self, command: Command) -> Result<(), LinkError> {
        let data = command.encode();
        // Write without response: the peripheral never acks UART data.
        self.connection
            .write(self.write_handle, &data, false, self.timeout)
            .await
            .map_err(|e| match e {
                LinkError::WriteFailed(_) => e,
                e if e.is_link_loss() => e,
                other => LinkError::WriteFailed(other.to_string()),
            })?;
        if command == Command::StateRequest {
            debug!("TX: {}", command);
        } else {
            info!("TX: {}", command);
        }
        Ok(())
    }
}
