//! Decoder for notification frames pushed by the machine
//!
//! Telemetry frame layout (marker `0x00`), all fields little-endian:
//!
//! | Offset | Size | Field                       |
//! |--------|------|-----------------------------|
//! | 0      | 1    | marker (`0x00`)             |
//! | 10     | 2    | speed, 1/100 km/h           |
//! | 12     | 2    | incline, 1/100 degree       |
//! | 16     | 2    | distance, metres            |
//!
//! Bytes not listed above are unused by this decoder.

use crate::types::{MetricSample, TreadmillError};
use std::fmt;
use std::time::Instant;

/// Frames shorter than this are partial transport artifacts
pub const MIN_FRAME_LEN: usize = 12;

/// Marker byte of a speed/incline/distance frame
pub const TELEMETRY_MARKER: u8 = 0x00;

/// Markers the machine sends that carry data outside our scope
pub const KNOWN_FOREIGN_MARKERS: [u8; 3] = [0x01, 0xFE, 0xFF];

const SPEED_OFFSET: usize = 10;
const INCLINE_OFFSET: usize = 12;
const DISTANCE_OFFSET: usize = 16;
const TELEMETRY_LEN: usize = DISTANCE_OFFSET + 2;

/// Outcome of decoding one notification
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Telemetry(MetricSample),
    Ignored(IgnoreReason),
}

impl Decoded {
    pub fn sample(&self) -> Option<&MetricSample> {
        match self {
            Decoded::Telemetry(sample) => Some(sample),
            Decoded::Ignored(_) => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Decoded::Ignored(_))
    }
}

/// Why a frame produced no sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Shorter than [`MIN_FRAME_LEN`]
    TooShort(usize),
    /// Telemetry marker, but the distance field is cut off
    Truncated(usize),
    /// A protocol frame we do not interpret
    ForeignMarker(u8),
    /// Marker not seen in the protocol so far
    UnknownMarker(u8),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::TooShort(len) => write!(f, "frame too short: {} bytes", len),
            IgnoreReason::Truncated(len) => {
                write!(f, "telemetry frame truncated: {} bytes", len)
            }
            IgnoreReason::ForeignMarker(marker) => {
                write!(f, "non-telemetry frame 0x{:02X}", marker)
            }
            IgnoreReason::UnknownMarker(marker) => {
                write!(f, "unknown frame marker 0x{:02X}", marker)
            }
        }
    }
}

impl From<IgnoreReason> for TreadmillError {
    fn from(reason: IgnoreReason) -> Self {
        TreadmillError::MalformedFrame(reason.to_string())
    }
}

/// Decode a raw notification received at `received_at`
///
/// Pure: the same bytes always yield the same outcome.
pub fn decode(data: &[u8], received_at: Instant) -> Decoded {
    if data.len() < MIN_FRAME_LEN {
        return Decoded::Ignored(IgnoreReason::TooShort(data.len()));
    }

    match data[0] {
        TELEMETRY_MARKER => {
            if data.len() < TELEMETRY_LEN {
                return Decoded::Ignored(IgnoreReason::Truncated(data.len()));
            }
            Decoded::Telemetry(MetricSample::new(
                read_u16_le(data, SPEED_OFFSET) as f64 / 100.0,
                read_u16_le(data, INCLINE_OFFSET) as f64 / 100.0,
                read_u16_le(data, DISTANCE_OFFSET) as f64 / 1000.0,
                received_at,
            ))
        }
        marker if KNOWN_FOREIGN_MARKERS.contains(&marker) => {
            Decoded::Ignored(IgnoreReason::ForeignMarker(marker))
        }
        marker => Decoded::Ignored(IgnoreReason::UnknownMarker(marker)),
    }
}

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}
