//! Link session to the treadmill
//!
//! Drives the connection through its states:
//!
//! ```text
//! Disconnected -> Discovering -> Connecting -> ResolvingServices
//!              -> Initializing -> Running -> Disconnected
//! ```
//!
//! Any failure while getting to `Running` ends the session with an error. A
//! shutdown request or a closed notification stream ends it cleanly from any
//! state. While running, one task multiplexes the poll timer, incoming
//! notifications and the shutdown signal, so session state has one writer.

use crate::command::{encode_sequence, CommandFrame, INITIALIZATION_SEQUENCE, POLL_SEQUENCE};
use crate::feed::SampleFeed;
use crate::notification::{decode, Decoded, IgnoreReason};
use crate::types::{hex_dump, ConnectionStatus, Result, TreadmillError};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, MissedTickBehavior};

/// Advertised name of the treadmill console
pub const DEVICE_NAME: &str = "I_TL";

/// Primary vendor service
pub const SERVICE_UUID: &str = "00001533-1412-efde-1523-785feabcd123";

/// Characteristic commands are written to
pub const WRITE_CHARACTERISTIC_UUID: &str = "00001534-1412-efde-1523-785feabcd123";

/// Characteristic telemetry is notified on
pub const NOTIFY_CHARACTERISTIC_UUID: &str = "00001535-1412-efde-1523-785feabcd123";

/// Timing and identifiers for a link session
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub device_name: String,
    pub service_uuid: String,
    pub write_uuid: String,
    pub notify_uuid: String,

    /// Upper bound on device discovery
    pub scan_timeout: Duration,

    /// Upper bound on establishing the connection
    pub connect_timeout: Duration,

    /// Upper bound on locating service and characteristics
    pub resolve_timeout: Duration,

    /// Pause after connecting before touching GATT
    pub settle_delay: Duration,

    /// Pause after each handshake frame
    pub inter_frame_delay: Duration,

    pub poll_period: Duration,

    /// How long a failure stays visible before the status reads `Disconnected`
    pub error_hold: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            service_uuid: SERVICE_UUID.to_string(),
            write_uuid: WRITE_CHARACTERISTIC_UUID.to_string(),
            notify_uuid: NOTIFY_CHARACTERISTIC_UUID.to_string(),
            scan_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(20),
            resolve_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(100),
            inter_frame_delay: Duration::from_millis(100),
            poll_period: Duration::from_secs(1),
            error_hold: Duration::from_secs(3),
        }
    }
}

/// A device found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub name: String,
    pub address: String,
}

/// Handle to a BLE characteristic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub uuid: String,
}

impl CharacteristicHandle {
    pub fn new(uuid: String) -> Self {
        Self { uuid }
    }
}

/// BLE operations the link needs from the platform
#[async_trait::async_trait]
pub trait BleTransport: Send + Sync {
    /// Scan until a device with this name shows up; `None` if the scan ended without one
    async fn discover(&self, name: &str) -> Result<Option<DeviceHandle>>;

    async fn connect(&self, device: &DeviceHandle) -> Result<()>;

    /// Whether the connected device exposes this service
    async fn has_service(&self, service_uuid: &str) -> Result<bool>;

    /// Look up a characteristic within a service
    async fn get_characteristic(
        &self,
        service_uuid: &str,
        uuid: &str,
    ) -> Result<Option<CharacteristicHandle>>;

    /// Start notifications; the channel closes when the device goes away
    async fn subscribe(&self, handle: &CharacteristicHandle) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Write with response
    async fn write_characteristic(&self, handle: &CharacteristicHandle, data: &[u8]) -> Result<()>;

    /// Drop the connection; must be harmless when not connected
    async fn disconnect(&self) -> Result<()>;
}

/// How a link session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Discovery finished without finding the device
    NotFound,
    /// Shutdown requested by the user
    Shutdown,
    /// Device or transport dropped the connection
    DeviceDisconnected,
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkOutcome::NotFound => write!(f, "device not found"),
            LinkOutcome::Shutdown => write!(f, "shutdown requested"),
            LinkOutcome::DeviceDisconnected => write!(f, "device disconnected"),
        }
    }
}

/// Connection that finished the handshake
struct Established {
    write: CharacteristicHandle,
    notifications: mpsc::Receiver<Vec<u8>>,
}

/// One connection attempt and its telemetry stream
pub struct LinkSession {
    transport: Arc<dyn BleTransport>,
    config: LinkConfig,
    feed: SampleFeed,
}

impl LinkSession {
    pub fn new(transport: Arc<dyn BleTransport>, config: LinkConfig, feed: SampleFeed) -> Self {
        Self {
            transport,
            config,
            feed,
        }
    }

    /// Run the session until shutdown, disconnect or failure
    ///
    /// The transport is always disconnected before this returns. Status
    /// updates along the way go to the feed; the final status is left to
    /// the caller.
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> Result<LinkOutcome> {
        let established = tokio::select! {
            _ = shutdown.recv() => None,
            result = self.establish() => Some(result),
        };

        let result = match established {
            None => {
                info!("Shutdown requested during {}", self.feed.status());
                Ok(LinkOutcome::Shutdown)
            }
            Some(Ok(None)) => {
                info!("Device '{}' not found", self.config.device_name);
                Ok(LinkOutcome::NotFound)
            }
            Some(Ok(Some(link))) => self.stream(link, &mut shutdown).await,
            Some(Err(e)) => {
                error!("Link setup failed: {}", e);
                Err(e)
            }
        };

        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect after session failed: {}", e);
        }
        result
    }

    async fn establish(&self) -> Result<Option<Established>> {
        self.feed.set_status(ConnectionStatus::Discovering).await;
        info!("Scanning for '{}'...", self.config.device_name);
        let device = match timeout(
            self.config.scan_timeout,
            self.transport.discover(&self.config.device_name),
        )
        .await
        {
            Err(_) => {
                return Err(TreadmillError::DiscoveryTimeout(
                    self.config.scan_timeout.as_secs(),
                ))
            }
            Ok(Ok(None)) => return Ok(None),
            Ok(Ok(Some(device))) => device,
            Ok(Err(e)) => return Err(e),
        };

        self.feed.set_status(ConnectionStatus::Connecting).await;
        info!("Found {} ({}), connecting...", device.name, device.address);
        timeout(self.config.connect_timeout, self.transport.connect(&device))
            .await
            .map_err(|_| TreadmillError::ConnectTimeout(self.config.connect_timeout.as_secs()))??;
        sleep(self.config.settle_delay).await;

        self.feed.set_status(ConnectionStatus::ResolvingServices).await;
        let (write, notify) = timeout(self.config.resolve_timeout, self.resolve())
            .await
            .map_err(|_| {
                TreadmillError::Transport(format!(
                    "Timed out resolving service {}",
                    self.config.service_uuid
                ))
            })??;

        self.feed.set_status(ConnectionStatus::Initializing).await;
        let notifications = self.transport.subscribe(&notify).await?;
        debug!("Subscribed to {}", notify.uuid);

        self.send_sequence(&write, &INITIALIZATION_SEQUENCE, Some(self.config.inter_frame_delay))
            .await?;
        info!("Handshake sent");

        Ok(Some(Established {
            write,
            notifications,
        }))
    }

    async fn resolve(&self) -> Result<(CharacteristicHandle, CharacteristicHandle)> {
        let service = &self.config.service_uuid;
        if !self.transport.has_service(service).await? {
            return Err(TreadmillError::ServiceNotFound(service.clone()));
        }

        let write = self
            .transport
            .get_characteristic(service, &self.config.write_uuid)
            .await?
            .ok_or_else(|| TreadmillError::CharacteristicNotFound(self.config.write_uuid.clone()))?;
        let notify = self
            .transport
            .get_characteristic(service, &self.config.notify_uuid)
            .await?
            .ok_or_else(|| {
                TreadmillError::CharacteristicNotFound(self.config.notify_uuid.clone())
            })?;

        debug!("Using characteristics write/notify = {}/{}", write.uuid, notify.uuid);
        Ok((write, notify))
    }

    /// Write frames in order, optionally pausing after each one
    async fn send_sequence(
        &self,
        handle: &CharacteristicHandle,
        frames: &[CommandFrame],
        pause: Option<Duration>,
    ) -> Result<()> {
        for frame in frames {
            let bytes = frame.encode()?;
            debug!("Writing {}: {}", frame.name, hex_dump(&bytes, 20));
            self.transport.write_characteristic(handle, &bytes).await?;
            if let Some(pause) = pause {
                sleep(pause).await;
            }
        }
        Ok(())
    }

    async fn stream(
        &self,
        mut link: Established,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> Result<LinkOutcome> {
        let poll_frames = encode_sequence(&POLL_SEQUENCE)?;
        self.feed.set_status(ConnectionStatus::Running).await;

        let mut ticker = tokio::time::interval(self.config.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown requested while running");
                    return Ok(LinkOutcome::Shutdown);
                }
                notification = link.notifications.recv() => match notification {
                    Some(data) => self.on_notification(&data).await,
                    None => {
                        warn!("Notification stream closed by device");
                        return Ok(LinkOutcome::DeviceDisconnected);
                    }
                },
                tick = ticker.tick() => {
                    self.feed.refresh(tick.into_std()).await;
                    if let Err(e) = self.poll(&link.write, &poll_frames).await {
                        warn!("{}, skipping this tick", e);
                    }
                }
            }
        }
    }

    async fn poll(&self, handle: &CharacteristicHandle, frames: &[Vec<u8>]) -> Result<()> {
        for frame in frames {
            self.transport
                .write_characteristic(handle, frame)
                .await
                .map_err(|e| TreadmillError::PollFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn on_notification(&self, data: &[u8]) {
        let received_at = tokio::time::Instant::now().into_std();
        match decode(data, received_at) {
            Decoded::Telemetry(sample) => {
                debug!(
                    "Telemetry: {:.2} km/h, {:.2}°, {:.3} km",
                    sample.speed_kph, sample.incline_deg, sample.distance_km
                );
                self.feed.push(sample).await;
            }
            Decoded::Ignored(reason @ IgnoreReason::UnknownMarker(_)) => {
                debug!("{}: {}", TreadmillError::from(reason), hex_dump(data, 20));
            }
            Decoded::Ignored(reason) => {
                debug!("Ignoring frame ({})", reason);
            }
        }
    }
}
