//! TCP link for WiFi adapters

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{rx_queue, RxQueue};
use super::{LinkInfo, Transport, TransportError};
use crate::config::{TcpConfig, TransportKind};

/// A WiFi ELM327 adapter behind a TCP socket.
pub struct TcpLink {
    peer: String,
    queue: RxQueue,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLink")
            .field("peer", &self.peer)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TcpLink {
    /// Connect within the configured timeout and start the background
    /// receive task.
    pub async fn connect(config: &TcpConfig) -> Result<Self, TransportError> {
        let peer = format!("{}:{}", config.host, config.port);
        let timeout = Duration::from_millis(config.connect_timeout_ms);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&peer))
            .await
            .map_err(|_| TransportError::Timeout(format!("connecting to {peer}")))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    TransportError::PermissionDenied(peer.clone())
                }
                _ => TransportError::ConnectionFailed(format!("{peer}: {e}")),
            })?;
        stream.set_nodelay(true).ok();
        info!(peer = peer.as_str(), "tcp link up");

        let (mut read_half, write_half) = stream.into_split();
        let (tx, queue) = rx_queue();
        let connected = Arc::new(AtomicBool::new(true));

        let reader = {
            let connected = connected.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                loop {
                    match read_half.read(&mut buf).await {
                        Ok(0) => {
                            debug!("peer closed the tcp link");
                            break;
                        }
                        Ok(n) => tx.push(buf[..n].to_vec()),
                        Err(e) => {
                            warn!(%e, "tcp receive failed");
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
            })
        };

        Ok(Self {
            peer,
            queue,
            writer: tokio::sync::Mutex::new(Some(write_half)),
            connected,
            closed: AtomicBool::new(false),
            reader: parking_lot::Mutex::new(Some(reader)),
        })
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

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close_once();
    }
}

#[async_trait]
impl Transport for TcpLink {
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
        info!(peer = self.peer.as_str(), "tcp link closed");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn describe(&self) -> LinkInfo {
        LinkInfo {
            kind: TransportKind::Tcp,
            address: self.peer.clone(),
            detail: "wifi adapter socket".to_string(),
        }
    }
}
