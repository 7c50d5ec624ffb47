//! One link attempt: scan, connect, discover, subscribe, serve.
//!
//! A session owns at most one connection. Any failing step ends the
//! attempt; the connection and its characteristic handles are torn down
//! with the session and never reused. Retrying is left to
//! [`SessionSupervisor`](crate::core::bluetooth::supervisor::SessionSupervisor).

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{Mutex, broadcast, watch};
use uuid::Uuid;

use crate::config::link_config::LinkConfig;
use crate::core::bluetooth::commands::{CommandSender, CommandWriter};
use crate::core::bluetooth::constants::{CCCD_ENABLE_INDICATE, CCCD_HANDLE_OFFSETS};
use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::keepalive::{KEEPALIVE_PROBE, KeepaliveScheduler};
use crate::core::bluetooth::transport::{Central, Connection};
use crate::core::bluetooth::types::{
    CharacteristicRefs, DeviceHandle, LinkState, ScanFilter, SubscribeMode,
};
use crate::core::clock::{Clock, MAX_TICK_SPAN, Millis, ticks_diff};
use crate::core::controller::{LedController, ReportReceiver};
use crate::core::protocol::{Command, decode_lines, is_keepalive_ack};

/// Per-attempt parameters, fixed for the lifetime of the supervisor.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub filter: ScanFilter,
    pub service_uuid: Uuid,
    pub notify_uuid: Uuid,
    pub write_uuid: Uuid,
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub notification_wait: Duration,
    pub write_timeout: Duration,
    pub keepalive_interval_ms: Millis,
    pub transient_error_pause: Duration,
    pub disconnect_timeout: Duration,
    /// Read-poll period for stacks that never deliver notifications.
    pub poll_read: Option<Duration>,
}

impl From<&LinkConfig> for SessionSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            filter: config.scan_filter(),
            service_uuid: config.service_uuid,
            notify_uuid: config.notify_uuid,
            write_uuid: config.write_uuid,
            scan_timeout: Duration::from_millis(config.scan_ms),
            connect_timeout: Duration::from_millis(config.connect_ms),
            discovery_timeout: Duration::from_millis(config.discovery_ms),
            notification_wait: Duration::from_millis(config.notification_wait_ms),
            write_timeout: Duration::from_millis(config.write_ms),
            keepalive_interval_ms: config.keepalive_ms.min(MAX_TICK_SPAN as u64) as Millis,
            transient_error_pause: Duration::from_millis(config.transient_error_pause_ms),
            disconnect_timeout: Duration::from_millis(config.disconnect_ms),
            poll_read: config.poll_read_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
        }
    }
}

/// Everything a session borrows from the supervisor that outlives it.
pub struct SessionContext {
    pub central: Arc<dyn Central>,
    pub settings: SessionSettings,
    pub led: Arc<Mutex<LedController>>,
    pub reports: ReportReceiver,
    pub state: watch::Sender<LinkState>,
    pub inbound: broadcast::Sender<Command>,
    pub clock: Arc<dyn Clock>,
}

impl SessionContext {
    fn set_state(&self, next: LinkState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!("Link state: {} -> {}", prev, next);
        }
    }
}

/// How an attempt ended. Attempts always end with an error: serving only
/// stops when the link is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reached_active: bool,
    pub error: LinkError,
}

pub struct LinkSession<'a> {
    ctx: &'a mut SessionContext,
    connection: Option<Box<dyn Connection>>,
    refs: Option<CharacteristicRefs>,
    reached_active: bool,
}

impl<'a> LinkSession<'a> {
    pub fn new(ctx: &'a mut SessionContext) -> Self {
        Self {
            ctx,
            connection: None,
            refs: None,
            reached_active: false,
        }
    }

    /// Runs the attempt to its end and tears everything down.
    pub async fn run(mut self) -> SessionOutcome {
        let error = match self.establish().await {
            Ok(refs) => self.serve(refs).await,
            Err(e) => e,
        };
        self.teardown().await;
        SessionOutcome {
            reached_active: self.reached_active,
            error,
        }
    }

    async fn establish(&mut self) -> Result<CharacteristicRefs, LinkError> {
        let peer = self.scan().await?;
        self.connect(peer).await?;
        let refs = self.discover().await?;
        self.subscribe(refs).await?;
        Ok(refs)
    }

    /// First qualifying advertiser within the scan window.
    pub async fn scan(&mut self) -> Result<DeviceHandle, LinkError> {
        self.ctx.set_state(LinkState::Scanning);
        let settings = &self.ctx.settings;
        match self.ctx.central.scan(&settings.filter, settings.scan_timeout).await? {
            Some(peer) => Ok(peer),
            None => Err(LinkError::ScanTimeout(settings.scan_timeout.as_millis() as u64)),
        }
    }

    pub async fn connect(&mut self, peer: DeviceHandle) -> Result<(), LinkError> {
        self.ctx.set_state(LinkState::Connecting);
        let timeout = self.ctx.settings.connect_timeout;
        let connection = self.ctx.central.connect(peer, timeout).await?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Explicit-range discovery: the service first, then its two
    /// characteristics inside the returned range.
    pub async fn discover(&mut self) -> Result<CharacteristicRefs, LinkError> {
        let settings = self.ctx.settings.clone();
        let connection = self.connection.as_mut().ok_or(LinkError::NotConnected)?;

        self.ctx.set_state(LinkState::DiscoveringServices);
        let range = connection
            .discover_service(settings.service_uuid, settings.discovery_timeout)
            .await
            .map_err(as_discovery_error)?;
        debug!("Service {} spans {}..{}", range.uuid, range.start, range.end);

        self.ctx.set_state(LinkState::DiscoveringCharacteristics);
        let refs = connection
            .discover_characteristics(&range, settings.notify_uuid, settings.write_uuid, settings.discovery_timeout)
            .await
            .map_err(as_discovery_error)?;
        info!("notify: {} write: {}", refs.notify_handle, refs.write_handle);
        self.refs = Some(refs);
        Ok(refs)
    }

    /// Subscribes to the notify characteristic with Indicate. When the
    /// stack's subscribe fails or is not acknowledged in time and raw
    /// attribute writes are available, the CCCD is written directly at each
    /// candidate offset; the first acknowledged write wins.
    pub async fn subscribe(&mut self, refs: CharacteristicRefs) -> Result<(), LinkError> {
        self.ctx.set_state(LinkState::SubscribingRx);
        let write_timeout = self.ctx.settings.write_timeout;
        let connection = self.connection.as_mut().ok_or(LinkError::NotConnected)?;

        let subscribe = connection.subscribe(refs.notify_handle, SubscribeMode::Indicate, write_timeout);
        let first = match tokio::time::timeout(write_timeout, subscribe).await {
            Err(_) => LinkError::SubscribeFailed(format!(
                "not acknowledged within {} ms",
                write_timeout.as_millis()
            )),
            Ok(Ok(())) => {
                info!("Subscribed RX via INDICATE");
                return Ok(());
            }
            Ok(Err(e)) if e.is_link_loss() => return Err(e),
            Ok(Err(e)) => e,
        };
        if !connection.supports_raw_attribute_writes() {
            return Err(as_subscribe_error(first));
        }

        warn!("Subscribe failed ({}), writing CCCD directly", first);
        for offset in CCCD_HANDLE_OFFSETS {
            let Some(cccd) = refs.notify_handle.offset(offset) else {
                break;
            };
            match connection.write(cccd, &CCCD_ENABLE_INDICATE, true, write_timeout).await {
                Ok(()) => {
                    info!("CCCD opened @ {} (+{})", cccd, offset);
                    return Ok(());
                }
                Err(e) if e.is_link_loss() => return Err(e),
                Err(e) => debug!("CCCD write @ {} rejected: {}", cccd, e),
            }
        }
        Err(LinkError::SubscribeFailed(format!(
            "no CCCD accepted {:02x?} near {}",
            CCCD_ENABLE_INDICATE, refs.notify_handle
        )))
    }

    /// Serves an active link until it is lost. Returns the reason.
    async fn serve(&mut self, refs: CharacteristicRefs) -> LinkError {
        let Some(connection) = self.connection.as_mut() else {
            return LinkError::NotConnected;
        };
        self.reached_active = true;
        serve_link(connection.as_mut(), refs, &mut *self.ctx).await
    }

    async fn teardown(&mut self) {
        self.refs = None;
        if let Some(mut connection) = self.connection.take() {
            self.ctx.set_state(LinkState::Disconnecting);
            let timeout = self.ctx.settings.disconnect_timeout;
            match tokio::time::timeout(timeout, connection.disconnect()).await {
                Err(_) => warn!("Disconnect did not finish within {} ms, dropping the connection", timeout.as_millis()),
                Ok(Err(e)) => debug!("Disconnect after session: {}", e),
                Ok(Ok(())) => {}
            }
            info!("Disconnected from {}", connection.peer().label());
        }
        self.ctx.set_state(LinkState::Idle);
    }
}

fn as_discovery_error(e: LinkError) -> LinkError {
    match e {
        LinkError::DiscoveryFailed(_) => e,
        e if e.is_link_loss() => e,
        other => LinkError::DiscoveryFailed(other.to_string()),
    }
}

fn as_subscribe_error(e: LinkError) -> LinkError {
    match e {
        LinkError::SubscribeFailed(_) => e,
        other => LinkError::SubscribeFailed(other.to_string()),
    }
}

enum Next {
    Inbound(Result<Option<Vec<u8>>, LinkError>),
    Outbound(Option<Command>),
}

async fn serve_link(
    connection: &mut dyn Connection,
    refs: CharacteristicRefs,
    ctx: &mut SessionContext,
) -> LinkError {
    let settings = ctx.settings.clone();
    let keepalive = KeepaliveScheduler::new(settings.keepalive_interval_ms);

    // Reports queued while the link was down are superseded by the announcement.
    let mut stale = 0;
    while ctx.reports.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        debug!("Dropped {} report(s) queued while offline", stale);
    }

    ctx.set_state(LinkState::Active);
    let mut last_probe = {
        let writer = CommandWriter::new(&*connection, refs.write_handle, settings.write_timeout);
        let now = ctx.clock.now_ms();
        let last = keepalive.maybe_probe(Some(&writer), now, keepalive.overdue(now)).await;
        // A mirror's announcement is the probe itself; it just went out.
        let announcement = ctx.led.lock().await.link_up_announcement();
        if announcement != KEEPALIVE_PROBE {
            send_logged(&writer, announcement).await;
        }
        last
    };

    let mut poll = settings.poll_read.map(|period| ReadPoll::new(period, ctx.clock.now_ms()));
    let wait = match settings.poll_read {
        Some(period) => period.min(settings.notification_wait),
        None => settings.notification_wait,
    };

    info!("Waiting notifications...");
    let mut reports_open = true;
    loop {
        let next = tokio::select! {
            inbound = connection.wait_notification(wait) => Next::Inbound(inbound),
            outbound = ctx.reports.recv(), if reports_open => Next::Outbound(outbound),
        };

        match next {
            Next::Inbound(Ok(Some(payload))) => {
                dispatch(&payload, ctx).await;
                if let Some(poll) = poll.as_mut() {
                    poll.delivered(payload);
                }
            }
            Next::Inbound(Ok(None)) => {}
            Next::Inbound(Err(e)) => {
                if e.is_link_loss() {
                    warn!("Link error -> reconnect: {}", e);
                    return e;
                }
                if !connection.is_connected().await {
                    warn!("Link lost. Reconnect...");
                    return LinkError::LinkLost(e.to_string());
                }
                debug!("Transient receive error: {}", e);
                tokio::time::sleep(settings.transient_error_pause).await;
            }
            Next::Outbound(Some(command)) => {
                let writer = CommandWriter::new(&*connection, refs.write_handle, settings.write_timeout);
                send_logged(&writer, command).await;
            }
            Next::Outbound(None) => {
                debug!("Report queue closed");
                reports_open = false;
            }
        }

        if let Some(poll) = poll.as_mut() {
            if let Err(e) = poll.maybe_read(&*connection, refs, settings.write_timeout, ctx).await {
                warn!("Link error on poll read -> reconnect: {}", e);
                return e;
            }
        }

        let writer = CommandWriter::new(&*connection, refs.write_handle, settings.write_timeout);
        last_probe = keepalive
            .maybe_probe(Some(&writer), ctx.clock.now_ms(), last_probe)
            .await;
    }
}

/// Fallback for stacks that accept the subscription but never deliver:
/// reads the notify characteristic periodically and dispatches the value
/// when it differs from the last one seen by either path.
struct ReadPoll {
    period_ms: Millis,
    last_read_ms: Millis,
    last_seen: Vec<u8>,
}

impl ReadPoll {
    fn new(period: Duration, now_ms: Millis) -> Self {
        Self {
            period_ms: period.as_millis().min(MAX_TICK_SPAN as u128) as Millis,
            last_read_ms: now_ms,
            last_seen: Vec::new(),
        }
    }

    fn delivered(&mut self, payload: Vec<u8>) {
        self.last_seen = payload;
    }

    /// Only a link loss is returned; other read errors are logged.
    async fn maybe_read(
        &mut self,
        connection: &dyn Connection,
        refs: CharacteristicRefs,
        timeout: Duration,
        ctx: &SessionContext,
    ) -> Result<(), LinkError> {
        let now = ctx.clock.now_ms();
        if ticks_diff(now, self.last_read_ms) < self.period_ms as i64 {
            return Ok(());
        }
        self.last_read_ms = now;
        match connection.read(refs.notify_handle, timeout).await {
            Ok(value) if value.is_empty() || value == self.last_seen => Ok(()),
            Ok(value) => {
                debug!("Poll read changed value");
                dispatch(&value, ctx).await;
                self.last_seen = value;
                Ok(())
            }
            Err(e) if e.is_link_loss() => Err(e),
            Err(e) => {
                debug!("Poll read of {} failed: {}", refs.notify_handle, e);
                Ok(())
            }
        }
    }
}

async fn dispatch(payload: &[u8], ctx: &SessionContext) {
    if is_keepalive_ack(payload) {
        debug!("KA ack <- peer");
        return;
    }
    info!("RX: {}", String::from_utf8_lossy(payload).trim_end());
    for command in decode_lines(payload) {
        ctx.led.lock().await.apply_command(command);
        // No subscribers is fine.
        let _ = ctx.inbound.send(command);
    }
}

async fn send_logged(writer: &dyn CommandSender, command: Command) {
    if let Err(e) = writer.send_command(command).await {
        warn!("TX {} failed: {}", command, e);
    }
}
