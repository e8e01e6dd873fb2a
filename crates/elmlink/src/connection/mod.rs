//! Connection orchestrator
//!
//! One [`DiagnosticLink`] per logical connection owns the transport, the
//! adapter session and the retry policy, and is the single writer of the
//! observable [`ConnectionState`]. Reconnection always tears the old
//! transport down completely before a new one is built, so one logical
//! connection never holds two live links.

mod manager;

pub use manager::LinkManager;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::codec::{DtcRecord, PidReading};
use crate::config::LinkConfig;
use crate::error::Error;
use crate::obd::{ObdClient, PidStream};
use crate::session::{AdapterInfo, ElmSession, WireProtocol};
use crate::transport::{create_transport, Transport, TransportError};
use crate::uds::{UdsClient, UdsRequest, UdsResponse};

/// Observable state of one logical connection. Transitions are the only
/// way it changes, and only the orchestrator performs them.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Initializing,
    ProtocolDetection,
    Connected {
        adapter: AdapterInfo,
        protocol: WireProtocol,
    },
    Error {
        reason: String,
        /// Whether a caller-initiated reconnect may succeed without
        /// operator action.
        recoverable: bool,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Initializing => f.write_str("initializing adapter"),
            ConnectionState::ProtocolDetection => f.write_str("detecting protocol"),
            ConnectionState::Connected { adapter, protocol } => {
                write!(f, "connected to {} via {}", adapter.identity, protocol)
            }
            ConnectionState::Error { reason, recoverable } => {
                write!(f, "error ({}): {reason}", if *recoverable { "recoverable" } else { "needs attention" })
            }
        }
    }
}

struct Active {
    transport: Arc<dyn Transport>,
    obd: ObdClient,
    uds: UdsClient,
}

/// Orchestrator for one logical connection to one adapter.
pub struct DiagnosticLink {
    config: LinkConfig,
    state_tx: watch::Sender<ConnectionState>,
    active: tokio::sync::Mutex<Option<Active>>,
}

impl DiagnosticLink {
    pub fn new(config: LinkConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state_tx,
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// The address this link was configured for.
    pub fn address(&self) -> String {
        self.config.transport.address()
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Stream of state changes, starting with the current state.
    pub fn state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.state_tx.subscribe())
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(state = %state, address = self.address(), "state transition");
        // send_replace updates the value even while nobody is observing.
        self.state_tx.send_replace(state);
    }

    /// Establish the connection: transport, adapter initialization,
    /// protocol detection. Transport failures are retried with linear
    /// backoff up to the configured attempt count; protocol failures are
    /// terminal and marked unrecoverable.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.config.retry.max_attempts.max(1) {
            if attempt > 1 {
                let delay = self.config.retry.backoff(attempt - 1);
                debug!(attempt, ?delay, "waiting before reconnection attempt");
                tokio::time::sleep(delay).await;
            }

            // A failed previous attempt must be fully torn down before a
            // new transport exists.
            self.teardown(false).await;
            self.set_state(ConnectionState::Connecting);

            match self.try_connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, %e, "connection attempt failed");
                    self.teardown(false).await;
                    if !e.is_recoverable() {
                        self.set_state(ConnectionState::Error {
                            reason: e.to_string(),
                            recoverable: false,
                        });
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            TransportError::ConnectionFailed("no attempts were made".to_string()).into()
        });
        self.set_state(ConnectionState::Error {
            reason: error.to_string(),
            recoverable: true,
        });
        Err(error)
    }

    async fn try_connect(&self) -> Result<(), Error> {
        let transport = create_transport(&self.config.transport).await?;
        info!(link = %transport.describe(), "transport established");

        let session = Arc::new(ElmSession::new(
            transport.clone(),
            self.config.adapter.clone(),
        ));
        *self.active.lock().await = Some(Active {
            transport,
            obd: ObdClient::new(session.clone()),
            uds: UdsClient::new(session.clone()),
        });

        self.set_state(ConnectionState::Initializing);
        let adapter = session.initialize().await?;

        self.set_state(ConnectionState::ProtocolDetection);
        let protocol = session.detect_protocol().await?;

        self.set_state(ConnectionState::Connected { adapter, protocol });
        Ok(())
    }

    /// Tear down and reconnect the same logical connection.
    pub async fn reconnect(&self) -> Result<(), Error> {
        self.teardown(false).await;
        self.connect().await
    }

    /// Release the connection. Graceful disconnects flush and
    /// unsubscribe before closing; hard ones release immediately.
    pub async fn disconnect(&self, graceful: bool) {
        self.teardown(graceful).await;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn teardown(&self, graceful: bool) {
        if let Some(active) = self.active.lock().await.take() {
            if let Err(e) = active.transport.disconnect(graceful).await {
                debug!(%e, "transport close reported an error");
            }
        }
    }

    async fn active_obd(&self) -> Result<ObdClient, Error> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.obd.clone())
            .ok_or_else(|| TransportError::Disconnected.into())
    }

    async fn active_uds(&self) -> Result<UdsClient, Error> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.uds.clone())
            .ok_or_else(|| TransportError::Disconnected.into())
    }

    /// All trouble codes the vehicle reports right now.
    pub async fn read_all_dtcs(&self) -> Result<Vec<DtcRecord>, Error> {
        self.active_obd().await?.read_all_dtcs().await
    }

    /// Like [`read_all_dtcs`](Self::read_all_dtcs), with descriptions
    /// filled in from the host's fault-code database.
    pub async fn read_all_dtcs_described(
        &self,
        source: &dyn crate::codec::DtcDescriptionSource,
    ) -> Result<Vec<DtcRecord>, Error> {
        let records = self.read_all_dtcs().await?;
        Ok(records
            .into_iter()
            .map(|record| record.describe_with(source))
            .collect())
    }

    /// Clear codes and the warning indicator.
    pub async fn clear_dtcs(&self) -> Result<bool, Error> {
        self.active_obd().await?.clear_dtcs().await
    }

    /// One fresh PID reading, or `None` when the vehicle has nothing.
    pub async fn read_pid(&self, pid: u8) -> Result<Option<PidReading>, Error> {
        self.active_obd().await?.read_pid(pid).await
    }

    /// Poll a set of PIDs at an interval as a stream of readings.
    pub async fn start_live_monitor(
        &self,
        pids: Vec<u8>,
        interval: Duration,
    ) -> Result<PidStream, Error> {
        if pids.is_empty() {
            return Err(Error::Validation("no PIDs to monitor".to_string()));
        }
        for pid in &pids {
            if crate::codec::pid::definition(*pid).is_none() {
                return Err(Error::Validation(format!(
                    "no decode rule for PID 0x{pid:02X}"
                )));
            }
        }
        let obd = self.active_obd().await?;
        Ok(PidStream::spawn(obd, pids, interval))
    }

    /// Raw UDS passthrough. The negative outcome is returned as a value;
    /// only transport problems and unparseable replies are errors.
    pub async fn uds_request(&self, service: u8, params: &[u8]) -> Result<UdsResponse, Error> {
        let request = UdsRequest::new(service).with_data(params.to_vec());
        self.active_uds().await?.raw_request(&request).await
    }

    /// Typed UDS client for session control, DTC reads, identifiers and
    /// security access.
    pub async fn uds(&self) -> Result<UdsClient, Error> {
        self.active_uds().await
    }

    /// Typed OBD-II client.
    pub async fn obd(&self) -> Result<ObdClient, Error> {
        self.active_obd().await
    }

    #[cfg(test)]
    async fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        self.active.lock().await.as_ref().map(|a| a.transport.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdapterConfig, MockConfig, MockScenario, RetryConfig, TransportConfig};
    use crate::error::ProtocolError;
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    fn link_for(scenario: MockScenario) -> DiagnosticLink {
        let mut config = LinkConfig::new(TransportConfig::Mock(MockConfig {
            latency_ms: 0,
            scenario,
        }));
        config.adapter = AdapterConfig {
            reset_settle_ms: 1,
            command_timeout_ms: 100,
            probe_timeout_ms: 100,
            init_retries: 0,
            init_retry_delay_ms: 1,
        };
        config.retry = RetryConfig {
            max_attempts: 2,
            backoff_step_ms: 1,
        };
        DiagnosticLink::new(config)
    }

    #[tokio::test]
    async fn connect_walks_the_state_machine() {
        // A little mock latency puts a yield point after every
        // transition, so the observer sees each state.
        let mut config = LinkConfig::new(TransportConfig::Mock(MockConfig {
            latency_ms: 1,
            scenario: MockScenario::Healthy,
        }));
        config.adapter = AdapterConfig {
            reset_settle_ms: 1,
            command_timeout_ms: 100,
            probe_timeout_ms: 100,
            init_retries: 0,
            init_retry_delay_ms: 1,
        };
        let link = DiagnosticLink::new(config);

        let mut states = link.state_stream();
        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(state) = states.next().await {
                let done = state.is_connected();
                seen.push(format!("{state:?}"));
                if done {
                    break;
                }
            }
            seen
        });

        link.connect().await.unwrap();
        assert!(link.state().is_connected());

        let seen = tokio::time::timeout(Duration::from_secs(2), observer)
            .await
            .expect("observer must finish")
            .unwrap();
        assert!(seen.iter().any(|n| n.contains("Initializing")), "states seen: {seen:?}");
        assert!(
            seen.iter().any(|n| n.contains("ProtocolDetection")),
            "states seen: {seen:?}"
        );
        assert!(seen.last().unwrap().contains("Connected"));
    }

    #[tokio::test]
    async fn connected_link_serves_diagnostics() {
        let link = link_for(MockScenario::Healthy);
        link.connect().await.unwrap();

        let records = link.read_all_dtcs().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code.to_string(), "P0301");

        let rpm = link.read_pid(0x0C).await.unwrap().unwrap();
        assert_eq!(rpm.value, 1726.0);

        assert!(link.clear_dtcs().await.unwrap());

        let response = link.uds_request(0x22, &[0xF1, 0x90]).await.unwrap();
        assert!(response.is_positive());
    }

    #[tokio::test]
    async fn no_vehicle_is_a_terminal_unrecoverable_error() {
        let link = link_for(MockScenario::NoVehicle);
        let err = link.connect().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::NoProtocolDetected)
        ));
        match link.state() {
            ConnectionState::Error { recoverable, .. } => assert!(!recoverable),
            other => panic!("expected error state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn incompatible_adapter_is_unrecoverable() {
        let link = link_for(MockScenario::NotAnAdapter);
        let err = link.connect().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::AdapterNotRecognized { .. })
        ));
    }

    #[tokio::test]
    async fn reconnect_closes_the_previous_transport() {
        let link = link_for(MockScenario::Healthy);

        link.connect().await.unwrap();
        let first = link.active_transport().await.unwrap();
        assert!(first.is_connected().await);

        link.reconnect().await.unwrap();
        let second = link.active_transport().await.unwrap();
        assert!(
            !first.is_connected().await,
            "old transport must be released before a new one exists"
        );
        assert!(second.is_connected().await);

        link.disconnect(false).await;
        assert!(!second.is_connected().await);
        assert!(link.active_transport().await.is_none());
    }

    #[tokio::test]
    async fn operations_without_connection_fail_as_transport_errors() {
        let link = link_for(MockScenario::Healthy);
        let err = link.read_pid(0x0C).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn live_monitor_validates_pids_before_spawn() {
        let link = link_for(MockScenario::Healthy);
        link.connect().await.unwrap();
        assert!(matches!(
            link.start_live_monitor(vec![], Duration::from_millis(5)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            link.start_live_monitor(vec![0xEE], Duration::from_millis(5)).await,
            Err(Error::Validation(_))
        ));

        let mut stream = link
            .start_live_monitor(vec![0x0C], Duration::from_millis(5))
            .await
            .unwrap();
        let reading = stream.next().await.unwrap();
        assert_eq!(reading.pid, 0x0C);
        link.disconnect(false).await;
    }
}
