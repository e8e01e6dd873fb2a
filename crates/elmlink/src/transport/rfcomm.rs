//! Bluetooth Classic RFCOMM link (Linux/BlueZ)
//!
//! ELM327 boards expose a serial-port profile; most sit on the standard
//! SPP channel but clones wander. Connection strategy, in order: the
//! configured channel, the standard SPP channel, then a scan of channels
//! 1-10. Each attempt is bounded by the connect timeout and the whole
//! ladder is retried with linear backoff. Pairing is the platform's
//! business and must already be done.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{rx_queue, RxQueue};
use super::{LinkInfo, Transport, TransportError};
use crate::config::{BluetoothConfig, TransportKind};

/// The RFCOMM channel the serial-port profile conventionally uses.
const SPP_CHANNEL: u8 = 1;
const SCAN_CHANNELS: std::ops::RangeInclusive<u8> = 2..=10;

/// An adapter behind a Bluetooth Classic RFCOMM socket.
pub struct RfcommLink {
    address: String,
    channel: u8,
    queue: RxQueue,
    writer: tokio::sync::Mutex<Option<WriteHalf<Stream>>>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RfcommLink {
    pub async fn connect(config: &BluetoothConfig) -> Result<Self, TransportError> {
        let address = bluer::Address::from_str(&config.address)
            .map_err(|e| TransportError::InvalidConfig(format!("{}: {e}", config.address)))?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);

        let mut channels: Vec<u8> = Vec::new();
        if let Some(configured) = config.channel {
            channels.push(configured);
        }
        if !channels.contains(&SPP_CHANNEL) {
            channels.push(SPP_CHANNEL);
        }
        for candidate in SCAN_CHANNELS {
            if !channels.contains(&candidate) {
                channels.push(candidate);
            }
        }

        let mut last_error =
            TransportError::ConnectionFailed("no channel attempted".to_string());
        for attempt in 1..=config.max_attempts.max(1) {
            if attempt > 1 {
                let backoff = Duration::from_secs(attempt as u64 - 1);
                debug!(attempt, ?backoff, "retrying rfcomm ladder");
                tokio::time::sleep(backoff).await;
            }
            for &channel in &channels {
                match Self::try_channel(address, channel, timeout).await {
                    Ok(stream) => {
                        info!(address = config.address.as_str(), channel, "rfcomm link up");
                        return Ok(Self::from_stream(config.address.clone(), channel, stream));
                    }
                    Err(e) => {
                        debug!(channel, %e, "rfcomm channel refused");
                        last_error = e;
                    }
                }
            }
            warn!(attempt, "rfcomm strategy ladder exhausted");
        }
        Err(last_error)
    }

    async fn try_channel(
        address: bluer::Address,
        channel: u8,
        timeout: Duration,
    ) -> Result<Stream, TransportError> {
        let target = SocketAddr::new(address, channel);
        tokio::time::timeout(timeout, Stream::connect(target))
            .await
            .map_err(|_| TransportError::Timeout(format!("rfcomm channel {channel}")))?
            .map_err(|e| TransportError::ConnectionFailed(format!("channel {channel}: {e}")))
    }

    fn from_stream(address: String, channel: u8, stream: Stream) -> Self {
        let (mut read_half, write_half) = tokio::io::split(stream);
        let (tx, queue) = rx_queue();
        let connected = Arc::new(AtomicBool::new(true));

        let reader = {
            let connected = connected.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                loop {
                    match read_half.read(&mut buf).await {
                        Ok(0) => {
                            debug!("rfcomm peer closed");
                            break;
                        }
                        Ok(n) => tx.push(buf[..n].to_vec()),
                        Err(e) => {
                            warn!(%e, "rfcomm receive failed");
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
            })
        };

        Self {
            address,
            channel,
            queue,
            writer: tokio::sync::Mutex::new(Some(write_half)),
            connected,
            closed: AtomicBool::new(false),
            reader: parking_lot::Mutex::new(Some(reader)),
        }
    }

    fn close_once(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for RfcommLink {
    fn drop(&mut self) {
        self.close_once();
    }
}

#[async_trait]
impl Transport for RfcommLink {
    async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Disconnected)?;
        writer
            .write_all(data)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
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
        if let Some(mut writer) = self.writer.lock().await.take() {
            if graceful {
                writer.flush().await.ok();
                writer.shutdown().await.ok();
            }
            drop(writer);
        }
        self.close_once();
        info!(address = self.address.as_str(), "rfcomm link closed");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn describe(&self) -> LinkInfo {
        LinkInfo {
            kind: TransportKind::BluetoothClassic,
            address: self.address.clone(),
            detail: format!("rfcomm channel {}", self.channel),
        }
    }
}
