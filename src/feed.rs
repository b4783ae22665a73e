//! Sample feed shared by the link session and the demo source
//!
//! Holds the aggregator behind an async mutex and publishes the connection
//! status and the latest snapshot through `watch` channels, so readers never
//! wait on a writer.

use crate::aggregator::{MetricsSnapshot, SessionAggregator, SessionSummary};
use crate::types::{ConnectionStatus, MetricSample};
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

/// Handle through which a session publishes samples and status
#[derive(Clone)]
pub struct SampleFeed {
    aggregator: Arc<Mutex<SessionAggregator>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    snapshot: Arc<watch::Sender<MetricsSnapshot>>,
}

impl SampleFeed {
    pub fn new(aggregator: SessionAggregator) -> Self {
        let initial = aggregator.snapshot(ConnectionStatus::Disconnected);
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (snapshot, _) = watch::channel(initial);
        Self {
            aggregator: Arc::new(Mutex::new(aggregator)),
            status: Arc::new(status),
            snapshot: Arc::new(snapshot),
        }
    }

    /// Feed one sample into the aggregator and publish the new snapshot
    pub async fn push(&self, sample: MetricSample) {
        let mut aggregator = self.aggregator.lock().await;
        aggregator.ingest(sample);
        let snapshot = aggregator.snapshot(self.status());
        drop(aggregator);
        self.snapshot.send_replace(snapshot);
    }

    /// Move to a new connection status and republish the snapshot with it
    pub async fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status.clone());
        if previous != status {
            info!("Connection status: {} -> {}", previous, status);
        }
        let aggregator = self.aggregator.lock().await;
        self.snapshot.send_replace(aggregator.snapshot(status));
    }

    /// Republish the snapshot with the clock advanced to `now`
    pub async fn refresh(&self, now: Instant) {
        let mut aggregator = self.aggregator.lock().await;
        aggregator.refresh(now);
        let snapshot = aggregator.snapshot(self.status());
        drop(aggregator);
        self.snapshot.send_replace(snapshot);
    }

    /// After `hold`, turn the current `Error` status into `Disconnected`
    ///
    /// Does nothing if another status was published in the meantime.
    pub async fn clear_error_after(&self, hold: Duration) {
        let ConnectionStatus::Error(message) = self.status() else {
            return;
        };
        tokio::time::sleep(hold).await;

        let cleared = self.status.send_if_modified(|status| {
            if matches!(status, ConnectionStatus::Error(current) if *current == message) {
                *status = ConnectionStatus::Disconnected;
                true
            } else {
                false
            }
        });
        if cleared {
            info!("Connection status: Error -> {}", ConnectionStatus::Disconnected);
            let aggregator = self.aggregator.lock().await;
            self.snapshot.send_replace(aggregator.snapshot(ConnectionStatus::Disconnected));
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Latest committed snapshot; never blocks
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<MetricsSnapshot> {
        self.snapshot.subscribe()
    }

    pub async fn set_body_weight(&self, weight_kg: Option<f64>) {
        self.aggregator.lock().await.set_body_weight(weight_kg);
    }

    pub async fn body_weight_kg(&self) -> f64 {
        self.aggregator.lock().await.body_weight_kg()
    }

    pub async fn accumulated_calories(&self) -> f64 {
        self.aggregator.lock().await.accumulated_calories()
    }

    /// Discard session state and return its totals
    pub async fn teardown(&self) -> Option<SessionSummary> {
        let mut aggregator = self.aggregator.lock().await;
        let summary = aggregator.teardown();
        self.snapshot.send_replace(aggregator.snapshot(self.status()));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_publishes_snapshot() {
        let feed = SampleFeed::new(SessionAggregator::default());
        let mut rx = feed.subscribe_snapshot();
        feed.set_status(ConnectionStatus::Running).await;

        let start = Instant::now();
        feed.push(MetricSample::new(8.0, 2.0, 0.0, start)).await;
        feed.push(MetricSample::new(8.0, 2.0, 0.133, start + Duration::from_secs(60)))
            .await;

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.calories, 11);
        assert_eq!(snapshot.time_str, "1:00");
        assert_eq!(snapshot.connection_status, ConnectionStatus::Running);
        assert_eq!(feed.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_status_reflected_in_snapshot() {
        let feed = SampleFeed::new(SessionAggregator::default());
        assert_eq!(feed.status(), ConnectionStatus::Disconnected);
        feed.set_status(ConnectionStatus::Connecting).await;
        assert_eq!(feed.status(), ConnectionStatus::Connecting);
        assert_eq!(
            feed.snapshot().connection_status,
            ConnectionStatus::Connecting
        );
    }

    #[tokio::test]
    async fn test_teardown_resets_snapshot() {
        let feed = SampleFeed::new(SessionAggregator::default());
        let start = Instant::now();
        feed.push(MetricSample::new(8.0, 2.0, 0.0, start)).await;
        feed.push(MetricSample::new(8.0, 2.0, 0.5, start + Duration::from_secs(120)))
            .await;

        let summary = feed.teardown().await.unwrap();
        assert!((summary.distance_km - 0.5).abs() < 1e-9);
        assert_eq!(feed.accumulated_calories().await, 0.0);
        assert_eq!(feed.snapshot().calories, 0);
        assert_eq!(feed.snapshot().time_str, "0:00");
    }

    #[tokio::test]
    async fn test_refresh_advances_clock_only() {
        let feed = SampleFeed::new(SessionAggregator::default());
        let start = Instant::now();
        feed.refresh(start + Duration::from_secs(10)).await;
        assert_eq!(feed.snapshot().time_str, "0:00");

        feed.push(MetricSample::new(8.0, 2.0, 0.0, start)).await;
        feed.refresh(start + Duration::from_secs(75)).await;

        let snapshot = feed.snapshot();
        assert_eq!(snapshot.time_str, "1:15");
        assert_eq!(snapshot.calories, 0);
        assert_eq!(feed.accumulated_calories().await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_cleared_after_hold() {
        let feed = SampleFeed::new(SessionAggregator::default());
        feed.set_status(ConnectionStatus::Error("gone".into())).await;
        feed.clear_error_after(Duration::from_secs(3)).await;
        assert_eq!(feed.status(), ConnectionStatus::Disconnected);
        assert_eq!(
            feed.snapshot().connection_status,
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_clear_skipped_after_new_status() {
        let feed = SampleFeed::new(SessionAggregator::default());
        feed.set_status(ConnectionStatus::Error("gone".into())).await;

        let pending = feed.clone();
        let clear = tokio::spawn(async move {
            pending.clear_error_after(Duration::from_secs(3)).await
        });
        tokio::task::yield_now().await;
        feed.set_status(ConnectionStatus::Demo).await;
        clear.await.unwrap();

        assert_eq!(feed.status(), ConnectionStatus::Demo);
    }
}
