use std::sync::OnceLock;

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::broadcast;

static LOGGER: OnceLock<TelemetryLogger> = OnceLock::new();

const LOG_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Writes records to stderr and republishes them on a broadcast channel so
/// other parts of the process can follow the log.
pub struct TelemetryLogger {
    sender: broadcast::Sender<LogMessage>,
    level: Level,
}

impl TelemetryLogger {
    pub fn new(level: Level) -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { sender, level }
    }

    /// Installs the logger. Returns the telemetry sender to subscribe to.
    pub fn init(level: Level) -> Result<broadcast::Sender<LogMessage>, SetLoggerError> {
        let logger = LOGGER.get_or_init(|| TelemetryLogger::new(level));
        log::set_logger(logger)?;
        log::set_max_level(level.to_level_filter());
        Ok(logger.sender.clone())
    }

    /// Installs the telemetry logger, or env_logger if a logger is already
    /// set up elsewhere.
    pub fn init_or_fallback(level: Level) {
        if TelemetryLogger::init(level).is_err() {
            let _ = env_logger::builder()
                .filter_level(level.to_level_filter())
                .try_init();
        }
    }

    fn emit_log(&self, record: &Record) {
        let log_message = LogMessage {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };
        // Nobody listening is the normal case.
        let _ = self.sender.send(log_message);
    }
}

impl log::Log for TelemetryLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}

/// Parses a config/CLI level name, defaulting to `Info`.
pub fn parse_level(name: &str) -> Level {
    match name.parse::<LevelFilter>() {
        Ok(filter) => filter.to_level().unwrap_or(Level::Error),
        Err(_) => Level::Info,
    }
}
