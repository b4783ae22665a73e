//! Demo source: synthetic telemetry for running without a machine
//!
//! Speed and incline follow slow sine waves around a base value; distance
//! integrates speed over the time between samples, as the console would.

use crate::feed::SampleFeed;
use crate::types::{ConnectionStatus, MetricSample};
use log::{debug, info};
use std::f64::consts::TAU;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Shape of the generated workout
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub sample_period: Duration,
    pub base_speed_kph: f64,
    pub speed_amplitude_kph: f64,
    pub speed_cycle: Duration,
    pub base_incline_deg: f64,
    pub incline_amplitude_deg: f64,
    pub incline_cycle: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_secs(1),
            base_speed_kph: 8.0,
            speed_amplitude_kph: 1.0,
            speed_cycle: Duration::from_secs(90),
            base_incline_deg: 2.0,
            incline_amplitude_deg: 0.5,
            incline_cycle: Duration::from_secs(240),
        }
    }
}

/// Generator of plausible samples
#[derive(Debug)]
pub struct DemoSource {
    config: DemoConfig,
    started: Option<Instant>,
    last: Option<Instant>,
    distance_km: f64,
}

impl DemoSource {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config,
            started: None,
            last: None,
            distance_km: 0.0,
        }
    }

    /// Produce the sample for time `now`
    ///
    /// Distance only grows; a `now` not after the previous call adds nothing.
    pub fn sample_at(&mut self, now: Instant) -> MetricSample {
        let started = *self.started.get_or_insert(now);
        let t = now.saturating_duration_since(started).as_secs_f64();

        let speed_kph = wave(
            self.config.base_speed_kph,
            self.config.speed_amplitude_kph,
            self.config.speed_cycle,
            t,
        )
        .max(0.0);
        let incline_deg = wave(
            self.config.base_incline_deg,
            self.config.incline_amplitude_deg,
            self.config.incline_cycle,
            t,
        );

        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            self.distance_km += speed_kph * dt / 3600.0;
        }
        if self.last.map_or(true, |last| now > last) {
            self.last = Some(now);
        }

        MetricSample::new(
            round_to(speed_kph, 100.0),
            round_to(incline_deg, 100.0),
            round_to(self.distance_km, 1000.0),
            now,
        )
    }

    /// Emit one sample per period into `feed` until `shutdown` fires
    pub async fn run(mut self, feed: SampleFeed, mut shutdown: mpsc::Receiver<()>) {
        info!("Demo source started");
        feed.set_status(ConnectionStatus::Demo).await;

        let mut ticker = tokio::time::interval(self.config.sample_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Demo source shutdown requested");
                    break;
                }
                tick = ticker.tick() => {
                    let sample = self.sample_at(tick.into_std());
                    debug!(
                        "Demo sample: {:.2} km/h, {:.2}°, {:.3} km",
                        sample.speed_kph, sample.incline_deg, sample.distance_km
                    );
                    feed.push(sample).await;
                }
            }
        }
    }
}

fn wave(base: f64, amplitude: f64, cycle: Duration, t: f64) -> f64 {
    let period = cycle.as_secs_f64();
    if period <= 0.0 {
        return base;
    }
    base + amplitude * (TAU * t / period).sin()
}

/// Quantise like the console does (1/100 km/h, 1/100 degree, metres)
fn round_to(value: f64, scale: f64) -> f64 {
    (value * scale).round() / scale
}
