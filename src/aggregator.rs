//! Session aggregator
//!
//! Reduces a stream of [`MetricSample`]s into the values shown to the user:
//! latest speed/incline/distance, elapsed clock, accumulated calories and
//! the current burn rate. It also keeps the running totals needed to
//! summarise the session once it ends.

use crate::calories::CalorieModel;
use crate::types::{ConnectionStatus, MetricSample};
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Weight used until (or unless) the profile service provides one
pub const DEFAULT_BODY_WEIGHT_KG: f64 = 86.0;

/// Belt speeds at or below this are treated as standing still
pub const MOVING_SPEED_THRESHOLD_KPH: f64 = 0.1;

/// A distance drop larger than this means the console was reset
const DISTANCE_RESET_KM: f64 = 0.1;

/// Cumulative state of one session, created by its first sample
#[derive(Debug, Clone)]
struct SessionState {
    start_time: Instant,
    last_sample_time: Instant,
    /// Latest instant known to the session, from samples or refreshes
    clock: Instant,
    accumulated_calories: f64,
    latest: MetricSample,
    distance_travelled_km: f64,
    elevation_gain_m: f64,
}

impl SessionState {
    fn new(sample: MetricSample) -> Self {
        Self {
            start_time: sample.timestamp,
            last_sample_time: sample.timestamp,
            clock: sample.timestamp,
            accumulated_calories: 0.0,
            latest: sample,
            distance_travelled_km: 0.0,
            elevation_gain_m: 0.0,
        }
    }

    fn elapsed(&self) -> Duration {
        self.clock.saturating_duration_since(self.start_time)
    }

    fn advance_clock(&mut self, now: Instant) {
        self.clock = self.clock.max(now);
    }
}

/// Display-ready view of the session
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub speed_kph: f64,
    pub incline_deg: f64,
    pub distance_km: f64,
    /// Whole kilocalories; the fraction is kept by the aggregator
    pub calories: u64,
    pub calories_per_hour: u64,
    pub time_str: String,
    pub elapsed_secs: u64,
    pub connection_status: ConnectionStatus,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Speed: {:4.1} KPH | Incline: {:4.1}° | Distance: {:.3} KM | Time: {} | Calories: {} kcal ({} kcal/h) | {}",
            self.speed_kph,
            self.incline_deg,
            self.distance_km,
            self.time_str,
            self.calories,
            self.calories_per_hour,
            self.connection_status
        )
    }
}

/// Totals of a finished (or running) session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub duration: Duration,
    pub distance_km: f64,
    pub elevation_gain_m: f64,
    pub calories: f64,
}

impl SessionSummary {
    pub fn average_speed_kph(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.distance_km / secs * 3600.0
        } else {
            0.0
        }
    }
}

/// Owner of the per-session state
///
/// Not thread-safe by itself; callers serialise access (see `feed`).
#[derive(Debug)]
pub struct SessionAggregator {
    model: CalorieModel,
    body_weight_kg: f64,
    session: Option<SessionState>,
}

impl Default for SessionAggregator {
    fn default() -> Self {
        Self::new(CalorieModel::default())
    }
}

impl SessionAggregator {
    pub fn new(model: CalorieModel) -> Self {
        Self {
            model,
            body_weight_kg: DEFAULT_BODY_WEIGHT_KG,
            session: None,
        }
    }

    pub fn body_weight_kg(&self) -> f64 {
        self.body_weight_kg
    }

    /// Set body weight; missing or nonsensical values fall back to the default
    pub fn set_body_weight(&mut self, weight_kg: Option<f64>) {
        self.body_weight_kg = match weight_kg {
            Some(w) if w.is_finite() && w > 0.0 => w,
            Some(w) => {
                warn!(
                    "Ignoring invalid body weight {} kg, using {} kg",
                    w, DEFAULT_BODY_WEIGHT_KG
                );
                DEFAULT_BODY_WEIGHT_KG
            }
            None => DEFAULT_BODY_WEIGHT_KG,
        };
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn accumulated_calories(&self) -> f64 {
        self.session
            .as_ref()
            .map_or(0.0, |s| s.accumulated_calories)
    }

    pub fn elapsed(&self) -> Duration {
        self.session
            .as_ref()
            .map_or(Duration::ZERO, SessionState::elapsed)
    }

    /// Fold one sample into the session, returning the kcal it added
    pub fn ingest(&mut self, sample: MetricSample) -> f64 {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => {
                debug!("First sample of session at {:?}", sample.timestamp);
                self.session = Some(SessionState::new(sample));
                return 0.0;
            }
        };

        let previous = session.latest;
        let dt = sample
            .timestamp
            .checked_duration_since(session.last_sample_time)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();

        let mut added = 0.0;
        if dt > 0.0 {
            session.last_sample_time = sample.timestamp;
            session.advance_clock(sample.timestamp);
            if sample.speed_kph > MOVING_SPEED_THRESHOLD_KPH {
                added = self.model.kcal(
                    self.body_weight_kg,
                    sample.speed_kph,
                    sample.incline_deg,
                    dt,
                );
                session.accumulated_calories += added;
            }
        } else {
            debug!("Sample not after previous one, no calories accrued");
        }

        let distance_delta = sample.distance_km - previous.distance_km;
        if distance_delta < -DISTANCE_RESET_KM {
            debug!(
                "Distance dropped from {:.3} to {:.3} km, treating as console reset",
                previous.distance_km, sample.distance_km
            );
        } else if distance_delta > 0.0 {
            session.distance_travelled_km += distance_delta;
            session.elevation_gain_m +=
                distance_delta * 1000.0 * previous.incline_deg.to_radians().sin();
        }

        session.latest = sample;
        added
    }

    /// Move the elapsed clock forward to `now` without accruing calories
    ///
    /// Keeps the clock running while the machine is quiet. Ignored before the
    /// first sample and for instants in the past.
    pub fn refresh(&mut self, now: Instant) {
        if let Some(session) = self.session.as_mut() {
            session.advance_clock(now);
        }
    }

    /// Current values for the presentation layer
    pub fn snapshot(&self, connection_status: ConnectionStatus) -> MetricsSnapshot {
        let Some(session) = self.session.as_ref() else {
            return MetricsSnapshot {
                time_str: format_elapsed(0),
                connection_status,
                ..MetricsSnapshot::default()
            };
        };

        let latest = &session.latest;
        let elapsed_secs = session.elapsed().as_secs();
        let rate = if latest.speed_kph > MOVING_SPEED_THRESHOLD_KPH {
            self.model
                .kcal_per_hour(self.body_weight_kg, latest.speed_kph, latest.incline_deg)
        } else {
            0.0
        };

        MetricsSnapshot {
            speed_kph: latest.speed_kph,
            incline_deg: latest.incline_deg,
            distance_km: latest.distance_km,
            calories: session.accumulated_calories.floor() as u64,
            calories_per_hour: rate.max(0.0).floor() as u64,
            time_str: format_elapsed(elapsed_secs),
            elapsed_secs,
            connection_status,
        }
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.session.as_ref().map(|session| SessionSummary {
            duration: session.elapsed(),
            distance_km: session.distance_travelled_km,
            elevation_gain_m: session.elevation_gain_m,
            calories: session.accumulated_calories,
        })
    }

    /// Discard the session entirely, returning its totals
    pub fn teardown(&mut self) -> Option<SessionSummary> {
        let summary = self.summary();
        self.session = None;
        summary
    }
}

/// Render whole seconds as `M:SS`, or `H:MM:SS` from one hour on
pub fn format_elapsed(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
