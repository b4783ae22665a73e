//! Treadmill link: live workout tracking over Bluetooth LE
//!
//! Talks to a treadmill console that speaks a small vendor protocol over two
//! GATT characteristics, turns its telemetry into running totals (distance,
//! elapsed time, calories) and publishes a snapshot a display can poll.
//!
//! # Modules
//!
//! - `command`: fixed command frames and the hex codec
//! - `notification`: telemetry frame decoder
//! - `calories`: ACSM-based calorie model
//! - `aggregator`: per-session totals and the display snapshot
//! - `link`: transport trait and the connection state machine
//! - `demo`: synthetic telemetry source
//! - `profile`: body weight and activity log boundaries
//! - `tracker`: start, stop and observe sessions
//! - `types`: common types and errors

pub mod aggregator;
pub mod calories;
pub mod command;
pub mod demo;
pub mod feed;
pub mod link;
pub mod notification;
pub mod profile;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod mock;

pub use aggregator::{
    format_elapsed, MetricsSnapshot, SessionAggregator, SessionSummary, DEFAULT_BODY_WEIGHT_KG,
};
pub use calories::{calculate_calories, CalorieModel, Gait};
pub use command::{CommandFrame, INITIALIZATION_SEQUENCE, POLL_SEQUENCE};
pub use demo::{DemoConfig, DemoSource};
pub use feed::SampleFeed;
pub use link::{
    BleTransport, CharacteristicHandle, DeviceHandle, LinkConfig, LinkOutcome, LinkSession,
    DEVICE_NAME,
};
pub use notification::{decode, Decoded, IgnoreReason};
pub use profile::{
    ActivityLogger, ActivityRecord, FixedProfile, JsonActivityLogger, ProfileProvider,
};
pub use tracker::{FinishedSession, SessionKind, Tracker};
pub use types::{hex_dump, ConnectionStatus, MetricSample, Result, TreadmillError};
