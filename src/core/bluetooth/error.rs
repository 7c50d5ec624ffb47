//! Link error taxonomy.

use thiserror::Error;

/// OS error codes that mean the connection is gone rather than busy:
/// ENODEV, EHOSTUNREACH, ESTALE and the stack's own "not connected".
pub const LINK_LOSS_OS_CODES: [i32; 4] = [19, 113, 116, 128];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// No qualifying peripheral advertised within the scan window.
    #[error("no matching peripheral found within {0} ms")]
    ScanTimeout(u64),

    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),

    #[error("connect refused: {0}")]
    ConnectRefused(String),

    /// Expected service or characteristic missing, or discovery timed out.
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// A single write failed. Never fatal to a session on its own.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The link went down mid-session.
    #[error("link lost: {0}")]
    LinkLost(String),

    /// Raw stack error, with the OS code when the stack exposes one.
    #[error("transport error{}: {}", .code.map(|c| format!(" ({c})")).unwrap_or_default(), .message)]
    Transport { code: Option<i32>, message: String },

    #[error("no Bluetooth adapter available")]
    AdapterUnavailable,

    /// `send_command` was called while no session is active.
    #[error("link is not active")]
    NotConnected,
}

impl LinkError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            code: None,
            message: message.into(),
        }
    }

    /// Whether this error means the peer is gone.
    pub fn is_link_loss(&self) -> bool {
        match self {
            Self::LinkLost(_) => true,
            Self::Transport { code: Some(code), .. } => LINK_LOSS_OS_CODES.contains(code),
            _ => false,
        }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport {
            code: e.raw_os_error(),
            message: e.to_string(),
        }
    }
}

impl From<bluest::Error> for LinkError {
    fn from(e: bluest::Error) -> Self {
        match e.kind() {
            bluest::error::ErrorKind::NotConnected => Self::LinkLost(e.to_string()),
            bluest::error::ErrorKind::AdapterUnavailable => Self::AdapterUnavailable,
            bluest::error::ErrorKind::Timeout => Self::transport(format!("timed out: {}", e)),
            _ => Self::transport(e.to_string()),
        }
    }
}
