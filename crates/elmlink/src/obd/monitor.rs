//! Live data monitor
//!
//! Polls a set of PIDs at a fixed interval on a background task and
//! yields readings as a stream. The task shares the session's command
//! lock, so monitor polls and one-shot requests never overlap on the
//! wire.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::codec::PidReading;
use crate::obd::ObdClient;

/// Stream of live PID readings. Dropping it stops the polling task.
pub struct PidStream {
    rx: mpsc::Receiver<PidReading>,
    task: JoinHandle<()>,
}

impl PidStream {
    pub(crate) fn spawn(client: ObdClient, pids: Vec<u8>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for &pid in &pids {
                    match client.read_pid(pid).await {
                        Ok(Some(reading)) => {
                            if tx.send(reading).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => debug!(pid, "no reading this cycle"),
                        Err(e) => {
                            warn!(%e, "live monitor stopping");
                            return;
                        }
                    }
                }
            }
        });
        Self { rx, task }
    }
}

impl Stream for PidStream {
    type Item = PidReading;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for PidStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::session::ElmSession;
    use crate::transport::mock::MockLink;
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    fn fast_config() -> AdapterConfig {
        AdapterConfig {
            reset_settle_ms: 1,
            command_timeout_ms: 100,
            probe_timeout_ms: 100,
            init_retries: 0,
            init_retry_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn monitor_yields_fresh_readings() {
        let mock = Arc::new(MockLink::new());
        mock.stub("010C", "41 0C 1A F8");
        mock.stub("0105", "41 05 5A");
        let session = Arc::new(ElmSession::new(mock.clone(), fast_config()));
        let client = ObdClient::new(session);

        let mut stream =
            PidStream::spawn(client, vec![0x0C, 0x05], Duration::from_millis(5));

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.pid, 0x0C);
        assert_eq!(first.value, 1726.0);
        assert_eq!(second.pid, 0x05);
        assert_eq!(second.value, 50.0);
    }

    #[tokio::test]
    async fn monitor_stops_on_transport_failure() {
        let mock = Arc::new(MockLink::new());
        mock.stub("010C", "41 0C 1A F8");
        let session = Arc::new(ElmSession::new(mock.clone(), fast_config()));
        let client = ObdClient::new(session);

        let mut stream = PidStream::spawn(client, vec![0x0C], Duration::from_millis(5));
        assert!(stream.next().await.is_some());

        mock.drop_link();
        // The polling task ends; the stream terminates instead of hanging.
        let mut remaining = 0;
        while tokio::time::timeout(Duration::from_millis(200), stream.next())
            .await
            .ok()
            .flatten()
            .is_some()
        {
            remaining += 1;
            assert!(remaining < 64, "stream must terminate after disconnect");
        }
    }
}
