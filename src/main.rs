use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Device, DeviceEvent, DeviceProperty, Session};
use clap::Parser;
use futures::stream::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use treadmill_link::{
    hex_dump, ActivityLogger, BleTransport, CalorieModel, CharacteristicHandle, ConnectionStatus,
    DemoConfig, DeviceHandle, FixedProfile, JsonActivityLogger, LinkConfig, MetricsSnapshot,
    Result, Tracker, TreadmillError, DEVICE_NAME,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "treadmill-link")]
#[command(about = "Track a treadmill workout over Bluetooth LE")]
struct Args {
    /// Generate synthetic telemetry instead of connecting to a machine
    #[arg(long)]
    demo: bool,

    /// Advertised name of the treadmill console
    #[arg(long, default_value = DEVICE_NAME)]
    device_name: String,

    /// Body weight in kg (default 86 when not given)
    #[arg(long)]
    weight_kg: Option<f64>,

    /// Seconds to scan for the device before giving up
    #[arg(long, default_value = "30")]
    scan_timeout: u64,

    /// Seconds to wait for the connection to come up
    #[arg(long, default_value = "20")]
    connect_timeout: u64,

    /// Empirical factor applied to the calorie estimate
    #[arg(long, default_value = "0.8")]
    calorie_correction: f64,

    /// Print snapshots as JSON lines
    #[arg(long)]
    json: bool,

    /// Hand the finished session to the activity log on exit
    #[arg(long)]
    log_activity: bool,

    /// Display refresh period in milliseconds
    #[arg(long, default_value = "1000")]
    refresh_ms: u64,
}

// ============================================================================
// Real Bluetooth transport using BlueR
// ============================================================================

fn bt(e: bluer::Error) -> TreadmillError {
    TreadmillError::Transport(e.to_string())
}

struct BlueRTransport {
    adapter: Adapter,
    device: Mutex<Option<Device>>,
    /// Characteristic UUID (upper case) to its service UUID and proxy
    characteristics: Mutex<HashMap<String, (String, Characteristic)>>,
    listener_shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl BlueRTransport {
    async fn new() -> Result<Self> {
        let session = Session::new().await.map_err(bt)?;
        let adapter = session.default_adapter().await.map_err(bt)?;
        adapter.set_powered(true).await.map_err(bt)?;
        info!("Using Bluetooth adapter {}", adapter.name());

        Ok(Self {
            adapter,
            device: Mutex::new(None),
            characteristics: Mutex::new(HashMap::new()),
            listener_shutdown: Mutex::new(None),
        })
    }

    async fn connected_device(&self) -> Result<Device> {
        self.device
            .lock()
            .await
            .clone()
            .ok_or_else(|| TreadmillError::Transport("No device connected".to_string()))
    }

    async fn characteristic(&self, uuid: &str) -> Result<Characteristic> {
        self.characteristics
            .lock()
            .await
            .get(&uuid.to_uppercase())
            .map(|(_, characteristic)| characteristic.clone())
            .ok_or_else(|| TreadmillError::CharacteristicNotFound(uuid.to_string()))
    }
}

#[async_trait::async_trait]
impl BleTransport for BlueRTransport {
    async fn discover(&self, name: &str) -> Result<Option<DeviceHandle>> {
        let events = self.adapter.discover_devices().await.map_err(bt)?;
        let mut events = Box::pin(events);

        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(address) = event {
                let device = self.adapter.device(address).map_err(bt)?;
                let device_name = device.name().await.map_err(bt)?;
                debug!("Saw {} ({:?})", address, device_name);
                if device_name.as_deref() == Some(name) {
                    *self.device.lock().await = Some(device);
                    return Ok(Some(DeviceHandle {
                        name: name.to_string(),
                        address: address.to_string(),
                    }));
                }
            }
        }
        Ok(None)
    }

    async fn connect(&self, _device: &DeviceHandle) -> Result<()> {
        let device = self.connected_device().await?;
        if device.is_connected().await.map_err(bt)? {
            info!("Already connected");
        } else {
            device.connect().await.map_err(bt)?;
            info!("Connected");
        }
        Ok(())
    }

    async fn has_service(&self, service_uuid: &str) -> Result<bool> {
        let device = self.connected_device().await?;
        while !device.is_services_resolved().await.map_err(bt)? {
            sleep(Duration::from_millis(250)).await;
        }

        let wanted = service_uuid.to_uppercase();
        let mut characteristics = self.characteristics.lock().await;
        characteristics.clear();
        let mut found = false;

        for service in device.services().await.map_err(bt)? {
            let uuid = service.uuid().await.map_err(bt)?.to_string().to_uppercase();
            if uuid != wanted {
                continue;
            }
            found = true;
            for characteristic in service.characteristics().await.map_err(bt)? {
                let char_uuid = characteristic
                    .uuid()
                    .await
                    .map_err(bt)?
                    .to_string()
                    .to_uppercase();
                characteristics.insert(char_uuid, (uuid.clone(), characteristic));
            }
        }

        debug!("Service {} has {} characteristics", wanted, characteristics.len());
        Ok(found)
    }

    async fn get_characteristic(
        &self,
        service_uuid: &str,
        uuid: &str,
    ) -> Result<Option<CharacteristicHandle>> {
        let service_upper = service_uuid.to_uppercase();
        Ok(self
            .characteristics
            .lock()
            .await
            .get(&uuid.to_uppercase())
            .filter(|(service, _)| *service == service_upper)
            .map(|_| CharacteristicHandle::new(uuid.to_string())))
    }

    async fn subscribe(&self, handle: &CharacteristicHandle) -> Result<mpsc::Receiver<Vec<u8>>> {
        let characteristic = self.characteristic(&handle.uuid).await?;
        let device = self.connected_device().await?;
        let notifications = characteristic.notify().await.map_err(bt)?;
        let device_events = device.events().await.map_err(bt)?;

        let (tx, rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.listener_shutdown.lock().await = Some(shutdown_tx);

        tokio::spawn(async move {
            let mut notifications = Box::pin(notifications);
            let mut device_events = Box::pin(device_events);

            loop {
                tokio::select! {
                    value = notifications.next() => match value {
                        Some(value) => {
                            debug!("RX {}", hex_dump(&value, 20));
                            if tx.send(value).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            info!("Notification stream ended");
                            break;
                        }
                    },
                    Some(event) = device_events.next() => {
                        if matches!(
                            event,
                            DeviceEvent::PropertyChanged(DeviceProperty::Connected(false))
                        ) {
                            warn!("Device reported disconnect");
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            // Dropping `tx` closes the channel and ends the link session
        });

        Ok(rx)
    }

    async fn write_characteristic(&self, handle: &CharacteristicHandle, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(&handle.uuid).await?;
        characteristic.write(data).await.map_err(bt)
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(tx) = self.listener_shutdown.lock().await.take() {
            let _ = tx.try_send(());
        }
        self.characteristics.lock().await.clear();

        if let Some(device) = self.device.lock().await.take() {
            if device.is_connected().await.map_err(bt)? {
                device.disconnect().await.map_err(bt)?;
                info!("Disconnected from {}", device.address());
            }
        }
        Ok(())
    }
}

fn print_snapshot(snapshot: &MetricsSnapshot, json: bool) -> serde_json::Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
    } else {
        println!("{}", snapshot);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("bluer", log::LevelFilter::Warn)
        .init();

    let args = Args::parse();

    let link_config = LinkConfig {
        device_name: args.device_name.clone(),
        scan_timeout: Duration::from_secs(args.scan_timeout),
        connect_timeout: Duration::from_secs(args.connect_timeout),
        ..LinkConfig::default()
    };
    let model = CalorieModel::with_correction_factor(args.calorie_correction);
    let tracker = Tracker::new(
        model,
        link_config,
        DemoConfig::default(),
        Arc::new(FixedProfile::new(args.weight_kg)),
    );

    if args.demo {
        info!("Starting demo session");
        tracker.start_demo().await?;
    } else {
        let transport = BlueRTransport::new().await?;
        tracker.start_real(Arc::new(transport)).await?;
    }

    let mut refresh = tokio::time::interval(Duration::from_millis(args.refresh_ms.max(100)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let idle = tracker.wait_until_idle();
    tokio::pin!(idle);

    let final_status = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, disconnecting");
                break tracker.status();
            }
            status = &mut idle => {
                info!("Session ended ({})", status);
                break status;
            }
            _ = refresh.tick() => print_snapshot(&tracker.snapshot(), args.json)?,
        }
    };

    print_snapshot(&tracker.snapshot(), args.json)?;
    if let Some(finished) = tracker.disconnect().await {
        if args.log_activity {
            match finished.activity_record() {
                Some(record) => {
                    if let Err(e) = JsonActivityLogger.log_activity(&record).await {
                        error!("Failed to log activity: {}", e);
                    }
                }
                None => info!("Session too short to log"),
            }
        }
    }

    if let ConnectionStatus::Error(message) = final_status {
        return Err(message.into());
    }
    Ok(())
}
