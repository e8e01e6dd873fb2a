//! BLE GATT link
//!
//! Connects to a BLE adapter, finds the serial-over-GATT service among a
//! fixed list of known OBD service/characteristic triples (falling back
//! to the first service exposing a writable and a notifiable
//! characteristic), subscribes to notifications and treats the pair as a
//! byte stream. Writes above the usable MTU are fragmented into
//! confirmed chunks with a small flow-control delay.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queue::{rx_queue, RxQueue};
use super::{mtu_chunks, LinkInfo, Transport, TransportError};
use crate::config::{BleConfig, TransportKind};

/// GATT service/characteristic triples used by common OBD BLE adapters:
/// (service, notify characteristic, write characteristic).
const KNOWN_OBD_SERVICES: &[(Uuid, Uuid, Uuid)] = &[
    (
        Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb),
        Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb),
        Uuid::from_u128(0x0000fff2_0000_1000_8000_00805f9b34fb),
    ),
    (
        Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb),
        Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb),
        Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb),
    ),
    (
        Uuid::from_u128(0x000018f0_0000_1000_8000_00805f9b34fb),
        Uuid::from_u128(0x00002af0_0000_1000_8000_00805f9b34fb),
        Uuid::from_u128(0x00002af1_0000_1000_8000_00805f9b34fb),
    ),
];

/// An adapter reached over BLE GATT.
pub struct BleLink {
    address: String,
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_char: Characteristic,
    mtu: usize,
    chunk_delay: Duration,
    queue: RxQueue,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    notifier: parking_lot::Mutex<Option<JoinHandle<()>>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl BleLink {
    /// Scan, connect, discover and subscribe.
    pub async fn connect(config: &BleConfig) -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("ble manager: {e}")))?;
        let central = manager
            .adapters()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("ble adapters: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::NotFound("no bluetooth adapter".to_string()))?;

        let peripheral = Self::scan_for(&central, config).await?;

        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        tokio::time::timeout(connect_timeout, peripheral.connect())
            .await
            .map_err(|_| TransportError::Timeout("gatt connect".to_string()))?
            .map_err(|e| TransportError::ConnectionFailed(format!("gatt connect: {e}")))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("service discovery: {e}")))?;

        let (write_char, notify_char) = Self::pick_characteristics(&peripheral)?;
        info!(
            address = config.address.as_str(),
            service = %write_char.service_uuid,
            "obd service selected"
        );

        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("enable notifications: {e}")))?;

        let (tx, queue) = rx_queue();
        let connected = Arc::new(AtomicBool::new(true));
        let notifier = {
            let connected = connected.clone();
            let notify_uuid = notify_char.uuid;
            let mut notifications = peripheral
                .notifications()
                .await
                .map_err(|e| TransportError::ConnectionFailed(format!("notifications: {e}")))?;
            tokio::spawn(async move {
                while let Some(event) = notifications.next().await {
                    if event.uuid == notify_uuid {
                        tx.push(event.value);
                    }
                }
                debug!("notification stream ended");
                connected.store(false, Ordering::SeqCst);
            })
        };

        Ok(Self {
            address: config.address.clone(),
            peripheral,
            write_char,
            notify_char,
            mtu: config.mtu,
            chunk_delay: Duration::from_millis(config.chunk_delay_ms),
            queue,
            connected,
            closed: AtomicBool::new(false),
            notifier: parking_lot::Mutex::new(Some(notifier)),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn scan_for(
        central: &btleplug::platform::Adapter,
        config: &BleConfig,
    ) -> Result<Peripheral, TransportError> {
        let target_addr = BDAddr::from_str(&config.address).ok();
        let target_lower = config.address.to_lowercase();

        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("scan: {e}")))?;

        let deadline = Instant::now() + Duration::from_millis(config.scan_timeout_ms);
        let found = 'scan: loop {
            for peripheral in central.peripherals().await.unwrap_or_default() {
                let addr_match = target_addr.map_or(false, |t| peripheral.address() == t);
                let id_match = peripheral.id().to_string().to_lowercase() == target_lower;
                if addr_match || id_match {
                    break 'scan Some(peripheral);
                }
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        };

        central.stop_scan().await.ok();
        found.ok_or_else(|| TransportError::NotFound(config.address.clone()))
    }

    /// Prefer a known OBD service; otherwise take the first service with
    /// both a writable and a notifiable characteristic.
    fn pick_characteristics(
        peripheral: &Peripheral,
    ) -> Result<(Characteristic, Characteristic), TransportError> {
        let services = peripheral.services();

        for (service_uuid, notify_uuid, write_uuid) in KNOWN_OBD_SERVICES {
            let Some(service) = services.iter().find(|s| s.uuid == *service_uuid) else {
                continue;
            };
            let notify = service.characteristics.iter().find(|c| c.uuid == *notify_uuid);
            let write = service.characteristics.iter().find(|c| c.uuid == *write_uuid);
            if let (Some(notify), Some(write)) = (notify, write) {
                return Ok((write.clone(), notify.clone()));
            }
        }

        for service in &services {
            let write = service.characteristics.iter().find(|c| {
                c.properties
                    .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
            });
            let notify = service
                .characteristics
                .iter()
                .find(|c| c.properties.contains(CharPropFlags::NOTIFY));
            if let (Some(write), Some(notify)) = (write, notify) {
                debug!(service = %service.uuid, "falling back to generic serial service");
                return Ok((write.clone(), notify.clone()));
            }
        }

        Err(TransportError::ConnectionFailed(
            "peripheral exposes no writable + notifiable characteristic pair".to_string(),
        ))
    }

    fn close_once(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.notifier.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        self.close_once();
    }
}

#[async_trait]
impl Transport for BleLink {
    /// Fragmented write: each chunk is written with-response, so the
    /// peer's confirmation gates the next chunk.
    async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let _guard = self.write_lock.lock().await;

        let chunks = mtu_chunks(data, self.mtu);
        let total = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            self.peripheral
                .write(&self.write_char, chunk, WriteType::WithResponse)
                .await
                .map_err(|e| {
                    TransportError::WriteFailed(format!("chunk {}/{}: {e}", index + 1, total))
                })?;
            if index + 1 < total && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }
        Ok(data.len())
    }

    async fn read(&self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) && self.queue.available() == 0 {
            return Err(TransportError::Disconnected);
        }
        match self.queue.read(max, timeout).await {
            Some(bytes) => Ok(bytes),
            None => Err(TransportError::Disconnected),
        }
    }

    async fn available(&self) -> usize {
        self.queue.available()
    }

    async fn clear_buffers(&self) {
        self.queue.clear().await;
    }

    async fn disconnect(&self, graceful: bool) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if graceful {
            self.peripheral.unsubscribe(&self.notify_char).await.ok();
        }
        self.peripheral.disconnect().await.ok();
        self.close_once();
        info!(address = self.address.as_str(), "ble link closed");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn describe(&self) -> LinkInfo {
        LinkInfo {
            kind: TransportKind::Ble,
            address: self.address.clone(),
            detail: format!("gatt mtu {}", self.mtu),
        }
    }
}
