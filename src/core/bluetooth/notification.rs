//! Notification handling for the peripheral
//! Pumps the platform notification stream of one characteristic into a
//! channel so the session can wait on it with a timeout.

use std::time::Duration;

use bluest::Characteristic;
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::bluetooth::error::LinkError;

const NOTIFICATION_QUEUE: usize = 32;

type Inbound = Result<Vec<u8>, LinkError>;

/// Owns the pump task for one subscription. Dropping it stops the pump.
pub struct NotificationHandler {
    rx: mpsc::Receiver<Inbound>,
    task: JoinHandle<()>,
}

impl NotificationHandler {
    /// Subscribes to `notify_char` and starts forwarding values.
    /// Resolves once the platform has accepted the subscription, or fails
    /// with `SubscribeFailed` if that takes longer than `timeout`.
    pub async fn start(notify_char: Characteristic, timeout: Duration) -> Result<Self, LinkError> {
        info!("Subscribing to notifications on {}", notify_char.uuid());
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            Self::process_notifications(notify_char, tx, ready_tx).await;
        });

        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(Self { rx, task }),
            Ok(Ok(Err(e))) => {
                task.abort();
                Err(e)
            }
            Ok(Err(_)) => Err(LinkError::SubscribeFailed("notification task ended early".into())),
            Err(_) => {
                task.abort();
                Err(LinkError::SubscribeFailed(format!(
                    "not acknowledged within {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Next value, a stream error, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    async fn process_notifications(
        notify_char: Characteristic,
        tx: mpsc::Sender<Inbound>,
        ready: oneshot::Sender<Result<(), LinkError>>,
    ) {
        let stream = match notify_char.notify().await {
            Ok(stream) => {
                let _ = ready.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = ready.send(Err(LinkError::SubscribeFailed(e.to_string())));
                return;
            }
        };

        forward(stream.map(|result| result.map_err(LinkError::from)), &tx).await;
        info!("Notification stream ended");
    }
}

/// Forwards `stream` into `tx`. Errors are passed on and reading goes on;
/// only a link-loss error, the end of the stream or a closed receiver
/// stops it.
async fn forward<S>(mut stream: S, tx: &mpsc::Sender<Inbound>)
where
    S: Stream<Item = Inbound> + Unpin,
{
    while let Some(item) = stream.next().await {
        let lost = match &item {
            Ok(value) => {
                debug!("Received {} byte(s)", value.len());
                false
            }
            Err(e) => {
                warn!("Error in notification stream: {}", e);
                e.is_link_loss()
            }
        };
        if tx.send(item).await.is_err() || lost {
            break;
        }
    }
}

impl Drop for NotificationHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
