//! Text command protocol spoken over the UART link.
//! Tokens are ASCII, case-insensitive on decode and newline-terminated on
//! encode: `ON`, `OFF`, `TOGGLE`, `ESP?`, `STATE:ON`, `STATE:OFF`.

use serde::{Deserialize, Serialize};

/// Reply the peripheral sends to a keepalive probe. Not a command.
pub const KEEPALIVE_ACK: &str = "MBOK";

/// Commands exchanged with the peer. Carry no payload beyond the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    On,
    Off,
    Toggle,
    /// `ESP?`, asks the other side for its state. Also the keepalive probe.
    StateRequest,
    StateOn,
    StateOff,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::On,
        Command::Off,
        Command::Toggle,
        Command::StateRequest,
        Command::StateOn,
        Command::StateOff,
    ];

    /// Canonical token, without the line terminator.
    pub fn token(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Toggle => "TOGGLE",
            Self::StateRequest => "ESP?",
            Self::StateOn => "STATE:ON",
            Self::StateOff => "STATE:OFF",
        }
    }

    /// The state report matching an output level.
    pub fn state_report(on: bool) -> Self {
        if on { Self::StateOn } else { Self::StateOff }
    }

    /// Wire bytes: token plus trailing newline.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.token().len() + 1);
        bytes.extend_from_slice(self.token().as_bytes());
        bytes.push(b'\n');
        bytes
    }

    /// Decodes one token. Unknown or non-UTF-8 input yields `None`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        Self::parse_token(text)
    }

    fn parse_token(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" => Some(Self::On),
            "OFF" | "0" => Some(Self::Off),
            "TOGGLE" => Some(Self::Toggle),
            "ESP?" => Some(Self::StateRequest),
            "STATE:ON" => Some(Self::StateOn),
            "STATE:OFF" => Some(Self::StateOff),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Decodes every newline-separated token in a payload, in order.
/// Blank and unknown lines are skipped.
pub fn decode_lines(bytes: &[u8]) -> Vec<Command> {
    bytes
        .split(|b| *b == b'\n')
        .filter_map(Command::decode)
        .collect()
}

/// Returns true when the payload is the peripheral's keepalive reply.
pub fn is_keepalive_ack(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes)
        .map(|text| text.trim().eq_ignore_ascii_case(KEEPALIVE_ACK))
        .unwrap_or(false)
}
