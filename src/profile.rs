//! Profile and activity-log boundaries
//!
//! The body weight comes from a remote profile service and finished sessions
//! are handed to an activity log. Both live outside this crate; only the
//! traits and simple local implementations are provided here. Credential
//! refresh and retry policies belong to the implementations.

use crate::aggregator::SessionSummary;
use crate::types::{Result, TreadmillError};
use chrono::{DateTime, Local, NaiveDate};
use log::info;
use serde::Serialize;

/// Activity id of "Treadmill" in the upstream activity catalogue
pub const TREADMILL_ACTIVITY_ID: u32 = 90013;

/// Sessions this short are not worth logging
pub const MIN_LOGGED_DISTANCE_KM: f64 = 0.01;

/// Source of the user's body weight
#[async_trait::async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn body_weight_kg(&self) -> Result<f64>;
}

/// Sink for finished sessions
#[async_trait::async_trait]
pub trait ActivityLogger: Send + Sync {
    async fn log_activity(&self, record: &ActivityRecord) -> Result<()>;
}

/// Profile with a weight known up front
#[derive(Debug, Clone, Copy)]
pub struct FixedProfile {
    weight_kg: Option<f64>,
}

impl FixedProfile {
    pub fn new(weight_kg: Option<f64>) -> Self {
        Self { weight_kg }
    }
}

#[async_trait::async_trait]
impl ProfileProvider for FixedProfile {
    async fn body_weight_kg(&self) -> Result<f64> {
        self.weight_kg
            .ok_or_else(|| TreadmillError::Profile("no weight configured".to_string()))
    }
}

/// Logger that writes the record as JSON to the log output
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonActivityLogger;

#[async_trait::async_trait]
impl ActivityLogger for JsonActivityLogger {
    async fn log_activity(&self, record: &ActivityRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| TreadmillError::ActivityLog(e.to_string()))?;
        info!("Activity: {}", json);
        Ok(())
    }
}

/// One finished session in the shape the activity log expects
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub activity_id: u32,
    pub calories: u64,
    /// Local start time, `HH:MM`
    pub start_time: String,
    pub duration_millis: u64,
    pub date: NaiveDate,
    pub distance_km: f64,
    pub average_speed_kph: f64,
    pub elevation_gain_m: f64,
}

impl ActivityRecord {
    /// Build a record, or `None` when the session covered too little distance
    pub fn from_summary(summary: &SessionSummary, started_at: DateTime<Local>) -> Option<Self> {
        if summary.distance_km <= MIN_LOGGED_DISTANCE_KM {
            return None;
        }

        Some(Self {
            activity_id: TREADMILL_ACTIVITY_ID,
            calories: summary.calories.max(0.0).floor() as u64,
            start_time: started_at.format("%H:%M").to_string(),
            duration_millis: summary.duration.as_millis() as u64,
            date: started_at.date_naive(),
            distance_km: summary.distance_km,
            average_speed_kph: summary.average_speed_kph(),
            elevation_gain_m: summary.elevation_gain_m,
        })
    }
}
