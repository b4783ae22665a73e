//! Common types, enums, and error definitions for the treadmill link

use serde::Serialize;
use std::fmt;
use std::time::Instant;
use thiserror::Error;

/// Result type alias for treadmill operations
pub type Result<T> = std::result::Result<T, TreadmillError>;

/// Error types for treadmill communication and tracking
#[derive(Error, Debug)]
pub enum TreadmillError {
    #[error("Malformed command {hex:?}: {reason}")]
    MalformedCommand { hex: String, reason: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Bluetooth error: {0}")]
    Transport(String),

    #[error("Device discovery timed out after {0} s")]
    DiscoveryTimeout(u64),

    #[error("Connection timed out after {0} s")]
    ConnectTimeout(u64),

    #[error("Service {0} not found")]
    ServiceNotFound(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(String),

    #[error("Poll write failed: {0}")]
    PollFailed(String),

    #[error("A session is already active")]
    SessionActive,

    #[error("Profile lookup failed: {0}")]
    Profile(String),

    #[error("Activity upload failed: {0}")]
    ActivityLog(String),
}

impl TreadmillError {
    /// Whether this error ends the current session with a visible status change
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TreadmillError::Transport(_)
                | TreadmillError::DiscoveryTimeout(_)
                | TreadmillError::ConnectTimeout(_)
                | TreadmillError::ServiceNotFound(_)
                | TreadmillError::CharacteristicNotFound(_)
        )
    }
}

/// Lifecycle state of the link to the machine
///
/// Exactly one value is authoritative at any time; it is owned by the link
/// session (or the demo source) and published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "message")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Discovering,
    Connecting,
    ResolvingServices,
    Initializing,
    Running,
    /// Synthetic samples, no transport involved
    Demo,
    Error(String),
}

impl ConnectionStatus {
    /// Whether a session currently owns the aggregator
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Error(_)
        )
    }

    /// Whether samples are flowing into the aggregator
    pub fn is_streaming(&self) -> bool {
        matches!(self, ConnectionStatus::Running | ConnectionStatus::Demo)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Discovering => write!(f, "Discovering"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::ResolvingServices => write!(f, "Resolving services"),
            ConnectionStatus::Initializing => write!(f, "Initializing"),
            ConnectionStatus::Running => write!(f, "Running"),
            ConnectionStatus::Demo => write!(f, "Demo"),
            ConnectionStatus::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// One telemetry reading, either decoded from the machine or synthesised
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub speed_kph: f64,
    pub incline_deg: f64,
    pub distance_km: f64,
    pub timestamp: Instant,
}

impl MetricSample {
    pub fn new(speed_kph: f64, incline_deg: f64, distance_km: f64, timestamp: Instant) -> Self {
        Self {
            speed_kph,
            incline_deg,
            distance_km,
            timestamp,
        }
    }
}

/// Upper-case, space separated hex of at most `max_len` bytes, for logs
pub fn hex_dump(data: &[u8], max_len: usize) -> String {
    let shown = &data[..data.len().min(max_len)];
    let hex = shown
        .chunks(1)
        .map(hex::encode_upper)
        .collect::<Vec<_>>()
        .join(" ");
    match data.len() - shown.len() {
        0 => format!("{} ({} bytes)", hex, data.len()),
        hidden => format!("{} +{} more ({} bytes)", hex, hidden, data.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_activity() {
        assert!(!ConnectionStatus::Disconnected.is_active());
        assert!(!ConnectionStatus::Error("boom".into()).is_active());
        assert!(ConnectionStatus::Discovering.is_active());
        assert!(ConnectionStatus::Demo.is_active());
        assert!(ConnectionStatus::Running.is_streaming());
        assert!(!ConnectionStatus::Initializing.is_streaming());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::ResolvingServices.to_string(), "Resolving services");
        assert_eq!(
            ConnectionStatus::Error("no device".into()).to_string(),
            "Error: no device"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(TreadmillError::DiscoveryTimeout(30).is_transport());
        assert!(TreadmillError::CharacteristicNotFound("x".into()).is_transport());
        assert!(!TreadmillError::PollFailed("x".into()).is_transport());
        assert!(!TreadmillError::MalformedFrame("x".into()).is_transport());
        assert!(!TreadmillError::SessionActive.is_transport());
        assert!(TreadmillError::ServiceNotFound("x".into()).is_transport());
        let malformed = TreadmillError::MalformedCommand {
            hex: "0".into(),
            reason: "odd length".into(),
        };
        assert!(!malformed.is_transport());
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0xFE, 0x02], 8), "FE 02 (2 bytes)");
        assert_eq!(hex_dump(&[1, 2, 3], 2), "01 02 +1 more (3 bytes)");
    }
}
