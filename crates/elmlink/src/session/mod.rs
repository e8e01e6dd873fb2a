//! Adapter session: ELM327-class initialization and protocol detection
//!
//! [`ElmSession`] owns the transport for one connection and serializes
//! every command through a single write-then-read-until-prompt cycle, so
//! there is never more than one request in flight. Initialization drives
//! the AT dialect (reset, identity check, echo/format configuration) and
//! protocol detection tries automatic mode first, then walks a fixed
//! fallback list.

mod wire;

pub use wire::WireProtocol;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::codec::text;
use crate::config::AdapterConfig;
use crate::error::{Error, ProtocolError};
use crate::transport::{Transport, TransportError};

/// Identity and environment of the connected adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Reply to ATI, e.g. "ELM327 V1.5"
    pub identity: String,
    /// Battery voltage reply from ATRV, when the adapter reports one
    pub voltage: Option<String>,
}

/// Substrings a genuine adapter identity reply contains.
const IDENTITY_MARKERS: &[&str] = &["ELM327", "ELM", "OBD", "STN", "V1.", "V2."];

/// Universal probe: mode 01 PID 00, supported by every OBD-II vehicle.
const PROBE_COMMAND: &str = "0100";

/// Fallback order when automatic detection fails, most common buses
/// first. KWP variants get a slow-init step before their probe.
const FALLBACK_PROTOCOLS: &[WireProtocol] = &[
    WireProtocol::Can11Bit500k,
    WireProtocol::Can29Bit500k,
    WireProtocol::Kwp2000Fast,
    WireProtocol::Kwp2000Slow,
    WireProtocol::Iso9141_2,
    WireProtocol::Can11Bit250k,
    WireProtocol::Can29Bit250k,
];

/// One adapter session over one transport.
pub struct ElmSession {
    transport: Arc<dyn Transport>,
    config: AdapterConfig,
    /// Serializes the write + read-until-prompt cycle.
    io_lock: tokio::sync::Mutex<()>,
    info: RwLock<Option<AdapterInfo>>,
    protocol: RwLock<Option<WireProtocol>>,
}

impl ElmSession {
    pub fn new(transport: Arc<dyn Transport>, config: AdapterConfig) -> Self {
        Self {
            transport,
            config,
            io_lock: tokio::sync::Mutex::new(()),
            info: RwLock::new(None),
            protocol: RwLock::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Adapter identity, once initialization has run.
    pub fn adapter_info(&self) -> Option<AdapterInfo> {
        self.info.read().clone()
    }

    /// The committed wire protocol, once detection has run.
    pub fn protocol(&self) -> Option<WireProtocol> {
        self.protocol.read().clone()
    }

    /// Send one command and return the normalized reply.
    ///
    /// Stale bytes from a previous command are drained first; the read
    /// phase ends at the `>` prompt or the command timeout.
    pub async fn request(&self, command: &str) -> Result<String, Error> {
        self.request_with_timeout(command, self.config.command_timeout())
            .await
    }

    async fn request_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, Error> {
        let _guard = self.io_lock.lock().await;
        self.transport.clear_buffers().await;

        let line = format!("{command}\r");
        self.transport.write(line.as_bytes()).await?;
        let reply = self.read_until_prompt(timeout).await?;
        debug!(command, reply = reply.as_str(), "adapter exchange");
        Ok(reply)
    }

    /// Read a follow-up reply (e.g. after `responsePending`) without
    /// issuing a new command. Empty when nothing arrives in time.
    pub async fn read_continuation(&self, timeout: Duration) -> Result<String, Error> {
        let _guard = self.io_lock.lock().await;
        match self.read_until_prompt(timeout).await {
            Ok(reply) => Ok(reply),
            Err(Error::Transport(TransportError::Timeout(_))) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    async fn read_until_prompt(&self, timeout: Duration) -> Result<String, Error> {
        let deadline = Instant::now() + timeout;
        let mut buf: Vec<u8> = Vec::with_capacity(128);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(format!(
                    "no prompt within {timeout:?}"
                ))
                .into());
            }
            let chunk = self.transport.read(256, remaining).await?;
            if chunk.is_empty() {
                return Err(TransportError::Timeout(format!(
                    "no prompt within {timeout:?}"
                ))
                .into());
            }
            buf.extend_from_slice(&chunk);
            if buf.contains(&text::PROMPT) {
                break;
            }
        }
        Ok(text::normalize(&buf))
    }

    /// Retry wrapper for initialization steps: transient transport
    /// failures are retried a bounded number of times, everything else
    /// propagates immediately.
    async fn command_with_retry(&self, command: &str) -> Result<String, Error> {
        let mut attempt = 0;
        loop {
            match self.request(command).await {
                Ok(reply) => return Ok(reply),
                Err(Error::Transport(e))
                    if e.is_recoverable() && attempt < self.config.init_retries =>
                {
                    attempt += 1;
                    warn!(command, attempt, %e, "init command failed, retrying");
                    tokio::time::sleep(Duration::from_millis(self.config.init_retry_delay_ms))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the ordered initialization sequence: reset, identity check,
    /// echo/linefeed/spaces off, headers on, adaptive timing, maximum
    /// timeout. Fails terminally when the device is not a compatible
    /// adapter.
    pub async fn initialize(&self) -> Result<AdapterInfo, Error> {
        // Reset first. The reply is whatever banner the adapter prints;
        // it settles for a moment and stale bytes are dropped after.
        let _ = self.command_with_retry("ATZ").await?;
        tokio::time::sleep(Duration::from_millis(self.config.reset_settle_ms)).await;
        self.transport.clear_buffers().await;

        let identity = self.command_with_retry("ATI").await?;
        if !IDENTITY_MARKERS.iter().any(|m| identity.contains(m)) {
            return Err(ProtocolError::AdapterNotRecognized { identity }.into());
        }

        for command in ["ATE0", "ATL0", "ATS0", "ATH1", "ATAT1", "ATSTFF"] {
            let reply = self.command_with_retry(command).await?;
            if !reply.contains("OK") {
                // Clones tend to answer these laxly; log and move on.
                debug!(command, reply = reply.as_str(), "configure step without OK");
            }
        }

        let voltage = match self.command_with_retry("ATRV").await {
            Ok(reply) if !text::has_error_marker(&reply) && !reply.is_empty() => Some(reply),
            _ => None,
        };

        let info = AdapterInfo {
            identity: identity.clone(),
            voltage,
        };
        *self.info.write() = Some(info.clone());
        info!(identity = identity.as_str(), "adapter initialized");
        Ok(info)
    }

    /// Detect the vehicle's wire protocol.
    ///
    /// Automatic mode is tried first; if its probe fails, each protocol
    /// in the fallback list is set explicitly and probed exactly once.
    /// No protocol answering is a terminal failure, not a retry.
    pub async fn detect_protocol(&self) -> Result<WireProtocol, Error> {
        if self.try_protocol(WireProtocol::Auto).await? {
            return self.commit_protocol(WireProtocol::Auto);
        }
        debug!("automatic detection failed, walking fallback list");

        for &protocol in FALLBACK_PROTOCOLS {
            if self.try_protocol(protocol).await? {
                return self.commit_protocol(protocol);
            }
        }
        warn!("no protocol responded to the probe");
        Err(ProtocolError::NoProtocolDetected.into())
    }

    async fn try_protocol(&self, protocol: WireProtocol) -> Result<bool, Error> {
        let select = format!("ATSP{}", protocol.elm_code());
        self.command_with_retry(&select).await?;

        if protocol.needs_slow_init() {
            // Bus init can fail when no KWP ECU is present; the probe
            // below is the real judge.
            let _ = self
                .request_with_timeout("ATSI", self.config.probe_timeout())
                .await?;
        }

        let reply = self
            .request_with_timeout(PROBE_COMMAND, self.config.probe_timeout())
            .await?;
        let ok = text::probe_succeeded(&reply);
        debug!(protocol = %protocol, ok, reply = reply.as_str(), "probe");
        Ok(ok)
    }

    fn commit_protocol(&self, protocol: WireProtocol) -> Result<WireProtocol, Error> {
        *self.protocol.write() = Some(protocol);
        info!(protocol = %protocol, "wire protocol committed");
        Ok(protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockConfig, MockScenario};
    use crate::transport::mock::MockLink;
    use pretty_assertions::assert_eq;

    fn fast_config() -> AdapterConfig {
        AdapterConfig {
            reset_settle_ms: 1,
            command_timeout_ms: 100,
            probe_timeout_ms: 100,
            init_retries: 1,
            init_retry_delay_ms: 1,
        }
    }

    fn session_for(scenario: MockScenario) -> (Arc<MockLink>, ElmSession) {
        let mock = Arc::new(MockLink::from_config(&MockConfig {
            latency_ms: 0,
            scenario,
        }));
        let session = ElmSession::new(mock.clone(), fast_config());
        (mock, session)
    }

    #[tokio::test]
    async fn initialize_validates_identity_and_configures() {
        let (mock, session) = session_for(MockScenario::Healthy);
        let info = session.initialize().await.unwrap();
        assert!(info.identity.contains("ELM327"));
        assert_eq!(info.voltage.as_deref(), Some("12.6V"));

        let writes = mock.writes();
        let reset_pos = writes.iter().position(|w| w == "ATZ").unwrap();
        let ident_pos = writes.iter().position(|w| w == "ATI").unwrap();
        let echo_pos = writes.iter().position(|w| w == "ATE0").unwrap();
        assert!(reset_pos < ident_pos && ident_pos < echo_pos, "order matters");
        for expected in ["ATL0", "ATS0", "ATH1", "ATAT1", "ATSTFF"] {
            assert!(writes.iter().any(|w| w == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn initialize_rejects_incompatible_device() {
        let (_mock, session) = session_for(MockScenario::NotAnAdapter);
        let err = session.initialize().await.unwrap_err();
        match err {
            Error::Protocol(ProtocolError::AdapterNotRecognized { identity }) => {
                assert_eq!(identity, "MODEM READY");
            }
            other => panic!("expected adapter rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn detection_succeeds_in_auto_without_fallback() {
        let (mock, session) = session_for(MockScenario::Healthy);
        let protocol = session.detect_protocol().await.unwrap();
        assert_eq!(protocol, WireProtocol::Auto);
        assert_eq!(session.protocol(), Some(WireProtocol::Auto));

        let probes = mock.writes().iter().filter(|w| *w == "0100").count();
        assert_eq!(probes, 1, "auto success must not iterate the fallback list");
    }

    #[tokio::test]
    async fn detection_walks_fallback_list_exactly_once() {
        let (mock, session) = session_for(MockScenario::NoVehicle);
        let err = session.detect_protocol().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::NoProtocolDetected)
        ));
        assert_eq!(session.protocol(), None);

        let writes = mock.writes();
        let probes = writes.iter().filter(|w| *w == "0100").count();
        assert_eq!(probes, 1 + FALLBACK_PROTOCOLS.len(), "auto + each fallback once");

        // Every fallback protocol was selected explicitly, in order.
        let selects: Vec<&String> = writes
            .iter()
            .filter(|w| w.starts_with("ATSP") && *w != "ATSP0")
            .collect();
        assert_eq!(selects.len(), FALLBACK_PROTOCOLS.len());
        assert_eq!(selects[0], "ATSP6");
        assert_eq!(selects.last().unwrap().as_str(), "ATSP9");

        // KWP entries got their slow init.
        let slow_inits = writes.iter().filter(|w| *w == "ATSI").count();
        assert_eq!(slow_inits, 2);
    }

    #[tokio::test]
    async fn commands_are_serialized_in_issue_order() {
        let (mock, session) = session_for(MockScenario::Healthy);
        let session = Arc::new(session);

        let a = {
            let s = session.clone();
            tokio::spawn(async move { s.request("010C").await })
        };
        let b = {
            let s = session.clone();
            tokio::spawn(async move { s.request("0105").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let writes = mock.writes();
        // Both commands landed, one at a time (no interleaved partial writes
        // are possible through the session lock).
        assert_eq!(writes.iter().filter(|w| *w == "010C").count(), 1);
        assert_eq!(writes.iter().filter(|w| *w == "0105").count(), 1);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_transport_error() {
        let (mock, session) = session_for(MockScenario::Healthy);
        mock.stub_silent("010C");
        let err = session.request("010C").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_mid_read_is_a_transport_error() {
        let (mock, session) = session_for(MockScenario::Healthy);
        mock.drop_link();
        let err = session.request("010C").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Disconnected)
        ));
    }
}
