//! Tracker: the surface a presentation layer drives
//!
//! Owns at most one active session (real or demo). Starting a second one
//! while the first still runs is rejected with `SessionActive`.
//! `disconnect` stops the session task, waits for it to finish so no late
//! tick can touch the torn-down state, and hands back what was recorded.
//! A transport failure is shown as `Error` for `LinkConfig::error_hold`,
//! then the status falls back to `Disconnected`.

use crate::aggregator::{MetricsSnapshot, SessionAggregator, SessionSummary};
use crate::calories::CalorieModel;
use crate::demo::{DemoConfig, DemoSource};
use crate::feed::SampleFeed;
use crate::link::{BleTransport, LinkConfig, LinkSession};
use crate::profile::{ActivityRecord, ProfileProvider};
use crate::types::{ConnectionStatus, Result, TreadmillError};
use chrono::{DateTime, Local};
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Device,
    Demo,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Device => write!(f, "device"),
            SessionKind::Demo => write!(f, "demo"),
        }
    }
}

struct ActiveSession {
    kind: SessionKind,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<Option<SessionSummary>>,
    started_at: DateTime<Local>,
}

/// A session after it has been stopped
#[derive(Debug, Clone)]
pub struct FinishedSession {
    pub kind: SessionKind,
    pub started_at: DateTime<Local>,
    /// `None` when no sample ever arrived
    pub summary: Option<SessionSummary>,
}

impl FinishedSession {
    /// Record for the activity log, if the session is worth logging
    pub fn activity_record(&self) -> Option<ActivityRecord> {
        self.summary
            .as_ref()
            .and_then(|summary| ActivityRecord::from_summary(summary, self.started_at))
    }
}

pub struct Tracker {
    feed: SampleFeed,
    link_config: LinkConfig,
    demo_config: DemoConfig,
    profile: Arc<dyn ProfileProvider>,
    active: Mutex<Option<ActiveSession>>,
}

impl Tracker {
    pub fn new(
        model: CalorieModel,
        link_config: LinkConfig,
        demo_config: DemoConfig,
        profile: Arc<dyn ProfileProvider>,
    ) -> Self {
        Self {
            feed: SampleFeed::new(SessionAggregator::new(model)),
            link_config,
            demo_config,
            profile,
            active: Mutex::new(None),
        }
    }

    /// Connect to the treadmill over `transport` and start streaming
    pub async fn start_real(&self, transport: Arc<dyn BleTransport>) -> Result<()> {
        let mut active = self.active.lock().await;
        self.reap(&mut active).await?;

        self.feed.set_status(ConnectionStatus::Discovering).await;
        self.fetch_body_weight();

        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let feed = self.feed.clone();
        let error_hold = self.link_config.error_hold;
        let session = LinkSession::new(transport, self.link_config.clone(), feed.clone());
        let task = tokio::spawn(async move {
            let outcome = session.run(shutdown_rx).await;
            let summary = feed.teardown().await;
            match outcome {
                Ok(outcome) => {
                    info!("Link session ended: {}", outcome);
                    feed.set_status(ConnectionStatus::Disconnected).await;
                }
                Err(e) if e.is_transport() => {
                    error!("Link session failed: {}", e);
                    feed.set_status(ConnectionStatus::Error(e.to_string())).await;
                    let feed = feed.clone();
                    tokio::spawn(async move { feed.clear_error_after(error_hold).await });
                }
                Err(e) => {
                    warn!("Link session stopped: {}", e);
                    feed.set_status(ConnectionStatus::Disconnected).await;
                }
            }
            summary
        });

        *active = Some(ActiveSession {
            kind: SessionKind::Device,
            shutdown,
            task,
            started_at: Local::now(),
        });
        Ok(())
    }

    /// Start feeding synthetic samples
    pub async fn start_demo(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        self.reap(&mut active).await?;

        self.feed.set_status(ConnectionStatus::Demo).await;
        self.fetch_body_weight();

        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let feed = self.feed.clone();
        let source = DemoSource::new(self.demo_config.clone());
        let task = tokio::spawn(async move {
            source.run(feed.clone(), shutdown_rx).await;
            let summary = feed.teardown().await;
            feed.set_status(ConnectionStatus::Disconnected).await;
            summary
        });

        *active = Some(ActiveSession {
            kind: SessionKind::Demo,
            shutdown,
            task,
            started_at: Local::now(),
        });
        Ok(())
    }

    /// Stop the active session; a no-op when there is none
    pub async fn disconnect(&self) -> Option<FinishedSession> {
        let mut active = self.active.lock().await;
        let finished = match active.take() {
            Some(session) => {
                // Full or closed means the task is already on its way out
                let _ = session.shutdown.try_send(());
                let summary = match session.task.await {
                    Ok(summary) => summary,
                    Err(e) => {
                        error!("Session task failed: {}", e);
                        self.feed.teardown().await
                    }
                };
                info!("Stopped {} session", session.kind);
                Some(FinishedSession {
                    kind: session.kind,
                    started_at: session.started_at,
                    summary,
                })
            }
            None => None,
        };

        if !matches!(self.feed.status(), ConnectionStatus::Disconnected) {
            self.feed.set_status(ConnectionStatus::Disconnected).await;
        }
        finished
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.feed.snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.feed.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<MetricsSnapshot> {
        self.feed.subscribe_snapshot()
    }

    /// Resolve once no session is feeding the aggregator
    pub async fn wait_until_idle(&self) -> ConnectionStatus {
        let mut status = self.feed.subscribe_status();
        let idle = match status.wait_for(|s| !s.is_active()).await {
            Ok(current) => current.clone(),
            Err(_) => ConnectionStatus::Disconnected,
        };
        idle
    }

    /// Clear out a session that has ended, or refuse if it still runs
    ///
    /// An idle status is the last thing a session task publishes, so a task
    /// seen in that state is only finishing up and can be awaited.
    async fn reap(&self, active: &mut Option<ActiveSession>) -> Result<()> {
        let Some(session) = active.take() else {
            return Ok(());
        };
        if !session.task.is_finished() && self.feed.status().is_active() {
            *active = Some(session);
            return Err(TreadmillError::SessionActive);
        }

        let kind = session.kind;
        if let Err(e) = session.task.await {
            error!("Session task failed: {}", e);
        }
        info!("Discarding finished {} session", kind);
        Ok(())
    }

    fn fetch_body_weight(&self) {
        let profile = self.profile.clone();
        let feed = self.feed.clone();
        tokio::spawn(async move {
            match profile.body_weight_kg().await {
                Ok(weight) => {
                    info!("Body weight from profile: {} kg", weight);
                    feed.set_body_weight(Some(weight)).await;
                }
                Err(e) => {
                    warn!("Could not fetch body weight, using default: {}", e);
                    feed.set_body_weight(None).await;
                }
            }
        });
    }
}
