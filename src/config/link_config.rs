use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::*;
use crate::core::bluetooth::types::ScanFilter;
use crate::core::controller::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Advertised name to look for. Matched as a case-insensitive substring.
    pub target_name: String,

    /// MAC address of the peer. When set it matches on its own.
    pub target_address: Option<String>,

    /// Also accept any advertiser carrying `service_uuid`.
    pub match_service_uuid: bool,

    /// Ignore advertisers weaker than this (dBm).
    pub min_rssi: Option<i16>,

    /// Log every advertisement seen while scanning.
    pub show_advertisements: bool,

    pub service_uuid: Uuid,
    pub notify_uuid: Uuid,
    pub write_uuid: Uuid,

    pub scan_ms: u64,
    pub connect_ms: u64,
    pub discovery_ms: u64,
    pub notification_wait_ms: u64,
    pub write_ms: u64,
    pub keepalive_ms: u64,
    pub retry_after_session_ms: u64,
    pub retry_after_failure_ms: u64,
    pub transient_error_pause_ms: u64,
    /// Upper bound on the disconnect at the end of a session.
    pub disconnect_ms: u64,
    /// Also read the notify characteristic this often while serving, for
    /// stacks that accept the subscription but never deliver. Off when unset.
    pub poll_read_ms: Option<u64>,

    pub role: Role,

    /// Button debounce window
    pub debounce_ms: u32,
    pub button_poll_ms: u64,
    /// Pressed reads low (pull-up wiring).
    pub button_active_low: bool,
    /// Output pin driving the LED. Only used for log output.
    pub led_pin: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            target_name: TARGET_NAME.to_string(),
            target_address: None,
            match_service_uuid: true,
            min_rssi: None,
            show_advertisements: false,
            service_uuid: UUID_NUS_SERVICE,
            notify_uuid: UUID_NUS_NOTIFY_CHAR,
            write_uuid: UUID_NUS_WRITE_CHAR,
            scan_ms: DEFAULT_SCAN_MS,
            connect_ms: DEFAULT_CONNECT_MS,
            discovery_ms: DEFAULT_DISCOVERY_MS,
            notification_wait_ms: DEFAULT_NOTIFICATION_WAIT_MS,
            write_ms: DEFAULT_WRITE_MS,
            keepalive_ms: DEFAULT_KEEPALIVE_MS,
            retry_after_session_ms: RETRY_AFTER_SESSION_MS,
            retry_after_failure_ms: RETRY_AFTER_FAILURE_MS,
            transient_error_pause_ms: TRANSIENT_ERROR_PAUSE_MS,
            disconnect_ms: DEFAULT_DISCONNECT_MS,
            poll_read_ms: None,
            role: Role::Controller,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            button_poll_ms: DEFAULT_BUTTON_POLL_MS,
            button_active_low: true,
            led_pin: 19,
        }
    }
}

impl LinkConfig {
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            name: Some(self.target_name.clone()).filter(|n| !n.is_empty()),
            address: self.target_address.clone().filter(|a| !a.is_empty()),
            service: self.match_service_uuid.then_some(self.service_uuid),
            min_rssi: self.min_rssi,
        }
    }
}
