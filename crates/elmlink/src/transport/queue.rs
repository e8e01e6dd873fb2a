//! Bounded byte queue between a link's background receive task and the
//! serialized command loop.
//!
//! Every transport drains its device (socket read, BLE notification,
//! serial poll) into one of these from a background task. The command
//! loop is the only consumer, so late bytes from a previous command can
//! be discarded with [`RxQueue::clear`] before the next one is issued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

const QUEUE_CAPACITY: usize = 64;

/// Create a connected sender/receiver pair.
pub(crate) fn rx_queue() -> (RxSender, RxQueue) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let buffered = Arc::new(AtomicUsize::new(0));
    (
        RxSender {
            tx,
            buffered: buffered.clone(),
        },
        RxQueue {
            inner: tokio::sync::Mutex::new(Inner {
                rx,
                leftover: VecDeque::new(),
            }),
            buffered,
        },
    )
}

/// Producer half, held by the background receive task.
#[derive(Clone)]
pub(crate) struct RxSender {
    tx: mpsc::Sender<Vec<u8>>,
    buffered: Arc<AtomicUsize>,
}

impl RxSender {
    /// Push a chunk of received bytes. If the queue is full the chunk is
    /// dropped; the consumer is expected to drain stale data before each
    /// command anyway.
    pub(crate) fn push(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        let len = chunk.len();
        match self.tx.try_send(chunk) {
            Ok(()) => {
                self.buffered.fetch_add(len, Ordering::SeqCst);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(len, "receive queue full, dropping chunk");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

struct Inner {
    rx: mpsc::Receiver<Vec<u8>>,
    leftover: VecDeque<u8>,
}

/// Consumer half, owned by the transport and read by the command loop.
pub(crate) struct RxQueue {
    inner: tokio::sync::Mutex<Inner>,
    buffered: Arc<AtomicUsize>,
}

impl RxQueue {
    /// Read up to `max` bytes, waiting at most `timeout` for the first
    /// chunk to arrive.
    ///
    /// Returns `Some(vec![])` on timeout and `None` when the producer is
    /// gone (link torn down mid-read).
    pub(crate) async fn read(&self, max: usize, timeout: Duration) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().await;

        if inner.leftover.is_empty() {
            match tokio::time::timeout(timeout, inner.rx.recv()).await {
                Ok(Some(chunk)) => inner.leftover.extend(chunk),
                Ok(None) => return None,
                Err(_) => return Some(Vec::new()),
            }
        }

        // Anything else that already arrived is taken in the same call.
        while let Ok(chunk) = inner.rx.try_recv() {
            inner.leftover.extend(chunk);
        }

        let take = max.min(inner.leftover.len());
        let out: Vec<u8> = inner.leftover.drain(..take).collect();
        self.buffered.fetch_sub(out.len(), Ordering::SeqCst);
        Some(out)
    }

    /// Bytes currently buffered and not yet consumed.
    pub(crate) fn available(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    /// Discard everything buffered so far.
    pub(crate) async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.leftover.clear();
        while inner.rx.try_recv().is_ok() {}
        self.buffered.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_returns_buffered_bytes() {
        let (tx, queue) = rx_queue();
        tx.push(b"41 00".to_vec());
        let got = queue
            .read(64, Duration::from_millis(50))
            .await
            .expect("producer alive");
        assert_eq!(got, b"41 00");
        assert_eq!(queue.available(), 0);
    }

    #[tokio::test]
    async fn read_times_out_with_empty_chunk() {
        let (_tx, queue) = rx_queue();
        let got = queue.read(64, Duration::from_millis(10)).await;
        assert_eq!(got, Some(Vec::new()));
    }

    #[tokio::test]
    async fn read_reports_closed_producer() {
        let (tx, queue) = rx_queue();
        drop(tx);
        assert_eq!(queue.read(64, Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn partial_reads_leave_remainder_available() {
        let (tx, queue) = rx_queue();
        tx.push(vec![1, 2, 3, 4, 5, 6]);
        let first = queue.read(4, Duration::from_millis(50)).await.unwrap();
        assert_eq!(first, vec![1, 2, 3, 4]);
        assert_eq!(queue.available(), 2);
        let rest = queue.read(64, Duration::from_millis(50)).await.unwrap();
        assert_eq!(rest, vec![5, 6]);
    }

    #[tokio::test]
    async fn clear_discards_stale_bytes() {
        let (tx, queue) = rx_queue();
        tx.push(b"stale reply".to_vec());
        queue.clear().await;
        assert_eq!(queue.available(), 0);
        assert_eq!(
            queue.read(64, Duration::from_millis(10)).await,
            Some(Vec::new())
        );
    }
}
