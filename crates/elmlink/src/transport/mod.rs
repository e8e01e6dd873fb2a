//! Byte-stream transports to the diagnostic adapter
//!
//! This module provides duplex links to ELM327-class adapters:
//! - TCP/WiFi adapters (always available)
//! - USB serial adapters behind the `usb` feature
//! - BLE GATT adapters behind the `ble` feature
//! - Bluetooth Classic RFCOMM behind the `bluetooth` feature (Linux only)
//! - a scripted mock adapter for testing
//!
//! # Example
//!
//! ```ignore
//! use elmlink::config::TransportConfig;
//! use elmlink::transport::create_transport;
//!
//! let config = TransportConfig::Tcp(Default::default());
//! let link = create_transport(&config).await?;
//! link.write(b"ATZ\r").await?;
//! ```

pub mod error;
pub mod mock;
mod queue;
pub mod tcp;

#[cfg(feature = "usb")]
pub mod serial;

#[cfg(feature = "ble")]
pub mod ble;

#[cfg(all(target_os = "linux", feature = "bluetooth"))]
pub mod rfcomm;

pub use error::TransportError;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{TransportConfig, TransportKind};

/// Description of an established link, for logs and state reporting.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub kind: TransportKind,
    /// The caller-supplied address (MAC, device path, host:port).
    pub address: String,
    /// Transport-specific detail, e.g. the detected serial driver family.
    pub detail: String,
}

impl std::fmt::Display for LinkInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.address, self.detail)
    }
}

/// Duplex byte-stream link to a diagnostic adapter.
///
/// Implementations run a background receive task that drains the device
/// into a bounded queue; [`read`](Transport::read) only ever consumes
/// from that queue, so it never blocks past its timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write raw bytes, returning the number written.
    async fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `max` buffered bytes, waiting at most `timeout`.
    ///
    /// Returns an empty vector on timeout. A disconnect observed while
    /// waiting surfaces as [`TransportError::Disconnected`], never as an
    /// empty read.
    async fn read(&self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Bytes received but not yet consumed.
    async fn available(&self) -> usize;

    /// Drop any buffered incoming bytes.
    async fn clear_buffers(&self);

    /// Release the link. `graceful` flushes/unsubscribes before closing;
    /// a hard disconnect releases immediately. Calling this twice is a
    /// silent no-op the second time.
    async fn disconnect(&self, graceful: bool) -> Result<(), TransportError>;

    /// Whether the underlying device link is still up.
    async fn is_connected(&self) -> bool;

    fn describe(&self) -> LinkInfo;
}

/// Create a transport based on configuration.
pub async fn create_transport(
    config: &TransportConfig,
) -> Result<Arc<dyn Transport>, TransportError> {
    match config {
        TransportConfig::Tcp(cfg) => Ok(Arc::new(tcp::TcpLink::connect(cfg).await?)),
        #[cfg(feature = "usb")]
        TransportConfig::Usb(cfg) => Ok(Arc::new(serial::SerialLink::connect(cfg).await?)),
        #[cfg(not(feature = "usb"))]
        TransportConfig::Usb(_) => Err(TransportError::Unsupported(
            "USB serial requires the 'usb' feature".to_string(),
        )),
        #[cfg(feature = "ble")]
        TransportConfig::Ble(cfg) => Ok(Arc::new(ble::BleLink::connect(cfg).await?)),
        #[cfg(not(feature = "ble"))]
        TransportConfig::Ble(_) => Err(TransportError::Unsupported(
            "BLE requires the 'ble' feature".to_string(),
        )),
        #[cfg(all(target_os = "linux", feature = "bluetooth"))]
        TransportConfig::Bluetooth(cfg) => Ok(Arc::new(rfcomm::RfcommLink::connect(cfg).await?)),
        #[cfg(not(all(target_os = "linux", feature = "bluetooth")))]
        TransportConfig::Bluetooth(_) => Err(TransportError::Unsupported(
            "Bluetooth Classic requires Linux and the 'bluetooth' feature".to_string(),
        )),
        TransportConfig::Mock(cfg) => Ok(Arc::new(mock::MockLink::from_config(cfg))),
    }
}

/// Split a payload into GATT write-sized chunks.
///
/// A single BLE attribute write carries at most `mtu - 3` bytes (the ATT
/// header takes the rest), so a payload of `len` bytes needs
/// `ceil(len / (mtu - 3))` sequential writes.
pub fn mtu_chunks(payload: &[u8], mtu: usize) -> Vec<&[u8]> {
    let max = mtu.saturating_sub(3).max(1);
    payload.chunks(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_chunks_respects_att_header() {
        let payload: Vec<u8> = (0..100).collect();
        let chunks = mtu_chunks(&payload, 23);
        // 23 - 3 = 20 usable bytes per write
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.len() <= 20));

        let reassembled: Vec<u8> = chunks.concat();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn mtu_chunks_count_is_ceil_division() {
        for (len, mtu, expected) in [(41usize, 23usize, 3usize), (40, 23, 2), (1, 23, 1), (0, 23, 0)]
        {
            let payload = vec![0xAA; len];
            assert_eq!(mtu_chunks(&payload, mtu).len(), expected, "len={len}");
        }
    }

    #[test]
    fn mtu_chunks_survives_degenerate_mtu() {
        let payload = [1, 2, 3];
        let chunks = mtu_chunks(&payload, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), payload);
    }
}
