//! Constants used throughout the application
//! UUIDs of the Nordic UART Service and the timing defaults the link runs
//! with. Most of these seed `LinkConfig` and can be overridden there.

use uuid::Uuid;

/// Advertised name of the peripheral (micro:bit MakeCode default)
pub const TARGET_NAME: &str = "BBC MICRO:BIT";

/// Nordic UART Service
pub const UUID_NUS_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Peripheral -> central characteristic, subscribed with Indicate
pub const UUID_NUS_NOTIFY_CHAR: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Central -> peripheral characteristic
pub const UUID_NUS_WRITE_CHAR: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Scan window in milliseconds
pub const DEFAULT_SCAN_MS: u64 = 20_000;

/// Connect handshake timeout in milliseconds
pub const DEFAULT_CONNECT_MS: u64 = 6_000;

/// Timeout for each discovery step in milliseconds
pub const DEFAULT_DISCOVERY_MS: u64 = 5_000;

/// Bounded wait for one inbound notification. Expiry is the quiet path.
pub const DEFAULT_NOTIFICATION_WAIT_MS: u64 = 5_000;

/// Timeout for a single characteristic write
pub const DEFAULT_WRITE_MS: u64 = 2_000;

/// Upper bound on the disconnect that ends a session
pub const DEFAULT_DISCONNECT_MS: u64 = 3_000;

/// Keepalive probe interval in milliseconds
pub const DEFAULT_KEEPALIVE_MS: u64 = 10_000;

/// Delay before the next attempt after a session that reached Active
pub const RETRY_AFTER_SESSION_MS: u64 = 800;

/// Delay before the next attempt after a failed attempt
pub const RETRY_AFTER_FAILURE_MS: u64 = 1_500;

/// Pause after a notification-wait error that is not a link loss
pub const TRANSIENT_ERROR_PAUSE_MS: u64 = 50;

/// Button debounce window in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u32 = 30;

/// Button poll period in milliseconds
pub const DEFAULT_BUTTON_POLL_MS: u64 = 5;

/// Client Characteristic Configuration value enabling indications
pub const CCCD_ENABLE_INDICATE: [u8; 2] = [0x02, 0x00];

/// Client Characteristic Configuration value enabling notifications
pub const CCCD_ENABLE_NOTIFY: [u8; 2] = [0x01, 0x00];

/// Offsets from a characteristic's value handle where its CCCD may sit.
/// The layout varies between stacks, so each is tried in order.
pub const CCCD_HANDLE_OFFSETS: [u16; 3] = [1, 2, 3];
