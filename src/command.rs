//! Command codec and the fixed protocol command sequences
//!
//! Commands are written to the machine as raw byte frames. They are stored
//! here in their textual hex form and decoded just before transmission.
//!
//! The byte values are reverse-engineered and opaque. The only structure
//! that has been verified is the framing that both sequences share:
//!
//! - header frame: `FE 02 <payload length> <frame count>`
//! - body frames: `<index> <chunk length> <chunk bytes...>`, padded with zeros
//!   to 20 bytes. The last body frame uses index `FF`.
//!
//! The chunk contents are not interpreted. The firmware validates the whole
//! handshake and stays silent when anything is reordered or altered, so the
//! frames must be sent exactly as listed.

use crate::types::{Result, TreadmillError};

/// A named protocol frame in hex form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub name: &'static str,
    pub hex: &'static str,
}

impl CommandFrame {
    const fn new(name: &'static str, hex: &'static str) -> Self {
        Self { name, hex }
    }

    /// Decode this frame into the bytes sent over the air
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self.hex)
    }
}

/// Handshake sent once after subscribing, before any telemetry is emitted
pub const INITIALIZATION_SEQUENCE: [CommandFrame; 4] = [
    CommandFrame::new("init-header", "fe022c04"),
    CommandFrame::new("init-body-0", "0012020402280428900701cec4b0aaa2a8949696"),
    CommandFrame::new("init-body-1", "0112aca8a2bad0dccefe14003a52786486a6fc18"),
    CommandFrame::new("init-body-last", "ff08324aa0880200004400000000000000000000"),
];

/// Request sent on every poll tick; the machine answers with notifications
pub const POLL_SEQUENCE: [CommandFrame; 3] = [
    CommandFrame::new("poll-header", "fe021403"),
    CommandFrame::new("poll-body-0", "001202040210041002000a1b9430000040500080"),
    CommandFrame::new("poll-body-last", "ff02182700000000000000000000000000000000"),
];

/// Convert a hex string into bytes, two digits per byte, high nibble first
pub fn encode(digits: &str) -> Result<Vec<u8>> {
    hex::decode(digits).map_err(|e| malformed(digits, e.to_string()))
}

/// Render bytes as lower-case hex, the inverse of [`encode`]
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Encode a whole sequence in order, failing on the first malformed frame
pub fn encode_sequence(frames: &[CommandFrame]) -> Result<Vec<Vec<u8>>> {
    frames.iter().map(CommandFrame::encode).collect()
}

fn malformed(digits: &str, reason: String) -> TreadmillError {
    TreadmillError::MalformedCommand {
        hex: digits.to_string(),
        reason,
    }
}
