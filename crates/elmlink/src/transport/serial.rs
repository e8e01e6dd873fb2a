//! USB serial link
//!
//! Enumerates serial devices, matches by path or VID:PID, classifies the
//! USB-serial bridge family and opens the port at ELM327 line settings.
//! A background task drains the port into the receive queue; on read
//! errors the device's presence is re-checked so "unplugged" is reported
//! as such rather than as a generic I/O failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{SerialPort, SerialPortType};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::SerialStream;
use tracing::{debug, info, warn};

use super::queue::{rx_queue, RxQueue};
use super::{LinkInfo, Transport, TransportError};
use crate::config::{TransportKind, UsbConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// USB-serial bridge families, detected from the vendor/product id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverFamily {
    Ftdi,
    Cp210x,
    Pl2303,
    Ch340,
    /// Anything else is driven as a plain CDC-ACM modem
    CdcAcm,
}

impl DriverFamily {
    pub fn from_ids(vid: u16, _pid: u16) -> Self {
        match vid {
            0x0403 => DriverFamily::Ftdi,
            0x10C4 => DriverFamily::Cp210x,
            0x067B => DriverFamily::Pl2303,
            0x1A86 | 0x4348 => DriverFamily::Ch340,
            _ => DriverFamily::CdcAcm,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DriverFamily::Ftdi => "FTDI",
            DriverFamily::Cp210x => "CP210x",
            DriverFamily::Pl2303 => "PL2303",
            DriverFamily::Ch340 => "CH340",
            DriverFamily::CdcAcm => "CDC-ACM",
        }
    }
}

/// An adapter on a USB serial port.
pub struct SerialLink {
    path: String,
    family: DriverFamily,
    queue: RxQueue,
    writer: tokio::sync::Mutex<Option<WriteHalf<SerialStream>>>,
    connected: Arc<AtomicBool>,
    vanished: Arc<AtomicBool>,
    closed: AtomicBool,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("family", &self.family)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("vanished", &self.vanished.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SerialLink {
    /// Enumerate, match, classify and open the configured device.
    pub async fn connect(config: &UsbConfig) -> Result<Self, TransportError> {
        let (path, family) = Self::resolve_device(config)?;
        info!(path = path.as_str(), family = family.label(), "opening serial port");

        let builder = serialport::new(&path, config.baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100));

        let stream = SerialStream::open(&builder).map_err(|e| match e.kind {
            serialport::ErrorKind::NoDevice => TransportError::NotFound(path.clone()),
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(path.clone())
            }
            _ => TransportError::ConnectionFailed(format!("{path}: {e}")),
        })?;

        if config.purge_on_open {
            stream.clear(serialport::ClearBuffer::All).ok();
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, queue) = rx_queue();
        let connected = Arc::new(AtomicBool::new(true));
        let vanished = Arc::new(AtomicBool::new(false));

        let reader = Self::spawn_reader(
            read_half,
            tx,
            path.clone(),
            connected.clone(),
            vanished.clone(),
        );

        Ok(Self {
            path,
            family,
            queue,
            writer: tokio::sync::Mutex::new(Some(write_half)),
            connected,
            vanished,
            closed: AtomicBool::new(false),
            reader: parking_lot::Mutex::new(Some(reader)),
        })
    }

    fn resolve_device(config: &UsbConfig) -> Result<(String, DriverFamily), TransportError> {
        let ports = serialport::available_ports()
            .map_err(|e| TransportError::ConnectionFailed(format!("enumeration: {e}")))?;

        for port in &ports {
            let matches = match (&config.path, config.vid, config.pid) {
                (Some(path), _, _) => &port.port_name == path,
                (None, Some(vid), pid) => match &port.port_type {
                    SerialPortType::UsbPort(usb) => {
                        usb.vid == vid && pid.map_or(true, |p| usb.pid == p)
                    }
                    _ => false,
                },
                (None, None, _) => matches!(port.port_type, SerialPortType::UsbPort(_)),
            };
            if !matches {
                continue;
            }
            let family = match &port.port_type {
                SerialPortType::UsbPort(usb) => DriverFamily::from_ids(usb.vid, usb.pid),
                _ => DriverFamily::CdcAcm,
            };
            return Ok((port.port_name.clone(), family));
        }

        Err(TransportError::NotFound(format!(
            "no serial device matching {:?} among {} ports",
            config.path.as_deref().unwrap_or("any usb adapter"),
            ports.len()
        )))
    }

    fn spawn_reader(
        mut read_half: ReadHalf<SerialStream>,
        tx: super::queue::RxSender,
        path: String,
        connected: Arc<AtomicBool>,
        vanished: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => tokio::time::sleep(POLL_INTERVAL).await,
                    Ok(n) => tx.push(buf[..n].to_vec()),
                    Err(e) => {
                        // One I/O error is not proof the device is gone;
                        // re-enumeration is.
                        if !Self::device_present(&path) {
                            warn!(path = path.as_str(), "serial device vanished");
                            vanished.store(true, Ordering::SeqCst);
                        } else {
                            warn!(%e, "serial receive failed");
                        }
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        })
    }

    fn device_present(path: &str) -> bool {
        serialport::available_ports()
            .map(|ports| ports.iter().any(|p| p.port_name == path))
            .unwrap_or(false)
    }

    fn io_error(&self) -> TransportError {
        if self.vanished.load(Ordering::SeqCst) {
            TransportError::NotFound(format!("{} was removed", self.path))
        } else {
            TransportError::Disconnected
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

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close_once();
    }
}

#[async_trait]
impl Transport for SerialLink {
    async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(self.io_error());
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
            return Err(self.io_error());
        }
        match self.queue.read(max, timeout).await {
            Some(bytes) => Ok(bytes),
            None => Err(self.io_error()),
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
            }
            drop(writer);
        }
        self.close_once();
        debug!(path = self.path.as_str(), "serial port released");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn describe(&self) -> LinkInfo {
        LinkInfo {
            kind: TransportKind::Usb,
            address: self.path.clone(),
            detail: format!("{} bridge", self.family.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_family_table() {
        assert_eq!(DriverFamily::from_ids(0x0403, 0x6001), DriverFamily::Ftdi);
        assert_eq!(DriverFamily::from_ids(0x10C4, 0xEA60), DriverFamily::Cp210x);
        assert_eq!(DriverFamily::from_ids(0x067B, 0x2303), DriverFamily::Pl2303);
        assert_eq!(DriverFamily::from_ids(0x1A86, 0x7523), DriverFamily::Ch340);
        assert_eq!(DriverFamily::from_ids(0x4348, 0x5523), DriverFamily::Ch340);
        assert_eq!(DriverFamily::from_ids(0xFFFF, 0x0001), DriverFamily::CdcAcm);
    }

    #[tokio::test]
    async fn missing_device_is_not_found() {
        let config = UsbConfig {
            path: Some("/dev/ttyUSB-not-a-real-port".to_string()),
            vid: None,
            pid: None,
            baud: 38_400,
            purge_on_open: true,
        };
        let err = SerialLink::connect(&config).await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));
    }
}
