//! In-memory transport for exercising the link and tracker without BlueZ

use crate::command::INITIALIZATION_SEQUENCE;
use crate::link::{
    BleTransport, CharacteristicHandle, DeviceHandle, DEVICE_NAME, NOTIFY_CHARACTERISTIC_UUID,
    SERVICE_UUID, WRITE_CHARACTERISTIC_UUID,
};
use crate::notification::TELEMETRY_MARKER;
use crate::types::{Result, TreadmillError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Telemetry notification with the given raw field values
pub fn telemetry_frame(speed: u16, incline: u16, distance: u16) -> Vec<u8> {
    let mut frame = vec![0u8; 20];
    frame[0] = TELEMETRY_MARKER;
    frame[10..12].copy_from_slice(&speed.to_le_bytes());
    frame[12..14].copy_from_slice(&incline.to_le_bytes());
    frame[16..18].copy_from_slice(&distance.to_le_bytes());
    frame
}

pub struct MockTransport {
    device: Option<DeviceHandle>,
    service: bool,
    characteristics: HashMap<String, CharacteristicHandle>,
    endless_scan: bool,
    fail_connect: bool,
    fail_handshake: bool,
    failing_polls: AtomicUsize,
    written_data: Mutex<Vec<Vec<u8>>>,
    notify_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    disconnects: AtomicUsize,
}

impl MockTransport {
    /// A console that behaves
    pub fn treadmill() -> Self {
        let mut characteristics = HashMap::new();
        for uuid in [WRITE_CHARACTERISTIC_UUID, NOTIFY_CHARACTERISTIC_UUID] {
            characteristics.insert(uuid.to_string(), CharacteristicHandle::new(uuid.to_string()));
        }

        Self {
            device: Some(DeviceHandle {
                name: DEVICE_NAME.to_string(),
                address: "C8:FD:19:00:12:34".to_string(),
            }),
            service: true,
            characteristics,
            endless_scan: false,
            fail_connect: false,
            fail_handshake: false,
            failing_polls: AtomicUsize::new(0),
            written_data: Mutex::new(Vec::new()),
            notify_tx: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn without_device(mut self) -> Self {
        self.device = None;
        self
    }

    pub fn without_service(mut self) -> Self {
        self.service = false;
        self
    }

    pub fn without_characteristic(mut self, uuid: &str) -> Self {
        self.characteristics.remove(uuid);
        self
    }

    /// Discovery never completes on its own
    pub fn with_endless_scan(mut self) -> Self {
        self.endless_scan = true;
        self
    }

    pub fn with_failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Every handshake write is rejected
    pub fn with_failing_handshake(mut self) -> Self {
        self.fail_handshake = true;
        self
    }

    /// Reject the next `count` writes made after the handshake
    pub fn fail_next_polls(&self, count: usize) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }

    /// Successful writes, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.written_data.lock().unwrap().clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.notify_tx.lock().unwrap().is_some()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Deliver a notification, as the device would
    pub async fn notify(&self, data: Vec<u8>) {
        let tx = self.notify_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(data).await;
        }
    }

    /// Simulate the device going away
    pub fn drop_link(&self) {
        self.notify_tx.lock().unwrap().take();
    }
}

#[async_trait::async_trait]
impl BleTransport for MockTransport {
    async fn discover(&self, name: &str) -> Result<Option<DeviceHandle>> {
        if self.endless_scan {
            std::future::pending::<()>().await;
        }
        Ok(self.device.clone().filter(|device| device.name == name))
    }

    async fn connect(&self, _device: &DeviceHandle) -> Result<()> {
        if self.fail_connect {
            return Err(TreadmillError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn has_service(&self, service_uuid: &str) -> Result<bool> {
        Ok(self.service && service_uuid == SERVICE_UUID)
    }

    async fn get_characteristic(
        &self,
        _service_uuid: &str,
        uuid: &str,
    ) -> Result<Option<CharacteristicHandle>> {
        Ok(self.characteristics.get(uuid).cloned())
    }

    async fn subscribe(&self, _handle: &CharacteristicHandle) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(16);
        *self.notify_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn write_characteristic(
        &self,
        _handle: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<()> {
        let mut written = self.written_data.lock().unwrap();
        if written.len() < INITIALIZATION_SEQUENCE.len() {
            if self.fail_handshake {
                return Err(TreadmillError::Transport("write rejected".to_string()));
            }
        } else if self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TreadmillError::Transport("write rejected".to_string()));
        }
        written.push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.notify_tx.lock().unwrap().take();
        Ok(())
    }
}
