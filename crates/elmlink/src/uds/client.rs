//! UDS service client
//!
//! Request/response pairs for the supported services, all sharing one
//! adapter session. This layer never retries on its own: transport
//! failures and negative responses are both returned typed so the
//! connection orchestrator can decide policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::codec::dtc::{DtcCode, DtcRecord, DtcStatus};
use crate::codec::text;
use crate::error::{Error, ProtocolError};
use crate::session::ElmSession;
use crate::uds::frame::{parse_response, UdsRequest, UdsResponse};
use crate::uds::{dtc_sub_function, service_id};

/// How long an ECU may keep answering `responsePending` before the
/// request is abandoned.
const RESPONSE_PENDING_WINDOW: Duration = Duration::from_secs(10);
const CONTINUATION_SLICE: Duration = Duration::from_millis(500);

/// Manufacturer-specific seed-to-key transform for SecurityAccess.
/// Its cryptographic strength is out of this crate's hands.
pub type SeedKeyFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// A security access level: the odd request-seed sub-function. The even
/// send-key sub-function is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityLevel(u8);

impl SecurityLevel {
    pub fn new(request_seed_sub: u8) -> Result<Self, Error> {
        if request_seed_sub == 0 || request_seed_sub % 2 == 0 || request_seed_sub > 0xFD {
            return Err(Error::Validation(format!(
                "security level must be an odd sub-function in 0x01..=0xFD, got 0x{request_seed_sub:02X}"
            )));
        }
        Ok(Self(request_seed_sub))
    }

    pub fn request_seed_sub(&self) -> u8 {
        self.0
    }

    pub fn send_key_sub(&self) -> u8 {
        self.0 + 1
    }
}

/// The one sub-function + parameter shape each 0x19 variant uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtcReadRequest {
    /// Number of DTCs matching a status mask
    CountByStatusMask { mask: u8 },
    /// DTC + status records matching a status mask
    ByStatusMask { mask: u8 },
    /// Snapshot record for one DTC
    SnapshotByDtc { dtc: [u8; 3], record: u8 },
    /// Extended data record for one DTC
    ExtendedDataByDtc { dtc: [u8; 3], record: u8 },
    /// Everything the ECU can report
    Supported,
}

impl DtcReadRequest {
    pub fn sub_function(&self) -> u8 {
        match self {
            DtcReadRequest::CountByStatusMask { .. } => {
                dtc_sub_function::REPORT_NUMBER_OF_DTC_BY_STATUS_MASK
            }
            DtcReadRequest::ByStatusMask { .. } => dtc_sub_function::REPORT_DTC_BY_STATUS_MASK,
            DtcReadRequest::SnapshotByDtc { .. } => {
                dtc_sub_function::REPORT_DTC_SNAPSHOT_RECORD_BY_DTC_NUMBER
            }
            DtcReadRequest::ExtendedDataByDtc { .. } => {
                dtc_sub_function::REPORT_DTC_EXTENDED_DATA_RECORD_BY_DTC_NUMBER
            }
            DtcReadRequest::Supported => dtc_sub_function::REPORT_SUPPORTED_DTC,
        }
    }

    fn parameters(&self) -> Vec<u8> {
        match self {
            DtcReadRequest::CountByStatusMask { mask }
            | DtcReadRequest::ByStatusMask { mask } => vec![*mask],
            DtcReadRequest::SnapshotByDtc { dtc, record }
            | DtcReadRequest::ExtendedDataByDtc { dtc, record } => {
                vec![dtc[0], dtc[1], dtc[2], *record]
            }
            DtcReadRequest::Supported => Vec::new(),
        }
    }
}

/// Result of a DTC count query (0x19 0x01).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtcCount {
    pub status_availability_mask: u8,
    pub format_identifier: u8,
    pub count: u16,
}

/// Result of a DTC-by-mask or supported-DTC query.
#[derive(Debug, Clone)]
pub struct DtcReport {
    pub status_availability_mask: u8,
    pub records: Vec<DtcRecord>,
}

/// Positive acknowledgement of DiagnosticSessionControl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionControl {
    pub session_type: u8,
    /// P2 server max in milliseconds, when the ECU reports timing
    pub p2_max_ms: Option<u16>,
    /// P2* server max in milliseconds
    pub p2_star_max_ms: Option<u32>,
}

struct PendingSeed {
    level: SecurityLevel,
    seed: Vec<u8>,
}

/// Client for the UDS services this engine speaks.
#[derive(Clone)]
pub struct UdsClient {
    session: Arc<ElmSession>,
    security: Arc<Mutex<Option<PendingSeed>>>,
}

impl UdsClient {
    pub fn new(session: Arc<ElmSession>) -> Self {
        Self {
            session,
            security: Arc::new(Mutex::new(None)),
        }
    }

    /// Send a raw UDS request and return the decoded reply, negative
    /// responses included as values. Used by the raw passthrough API.
    pub async fn raw_request(&self, request: &UdsRequest) -> Result<UdsResponse, Error> {
        self.exchange(request).await
    }

    /// DiagnosticSessionControl (0x10)
    pub async fn diagnostic_session_control(
        &self,
        session_type: u8,
    ) -> Result<SessionControl, Error> {
        if session_type == 0 {
            return Err(Error::Validation(
                "session type 0x00 is reserved; use 0x01..=0xFF".to_string(),
            ));
        }
        let request =
            UdsRequest::new(service_id::DIAGNOSTIC_SESSION_CONTROL).with_sub_function(session_type);
        let payload = self.expect_positive(&request).await?;
        if payload.first() != Some(&session_type) {
            return Err(ProtocolError::malformed("checking session type echo", &payload).into());
        }

        let (p2, p2_star) = if payload.len() >= 5 {
            (
                Some(u16::from_be_bytes([payload[1], payload[2]])),
                Some(u16::from_be_bytes([payload[3], payload[4]]) as u32 * 10),
            )
        } else {
            (None, None)
        };
        info!(
            session_type = format!("0x{session_type:02X}"),
            "diagnostic session changed"
        );
        Ok(SessionControl {
            session_type,
            p2_max_ms: p2,
            p2_star_max_ms: p2_star,
        })
    }

    /// ECUReset (0x11). Returns the power-down time when the ECU reports
    /// one.
    pub async fn ecu_reset(&self, reset_type: u8) -> Result<Option<u8>, Error> {
        if reset_type == 0 {
            return Err(Error::Validation(
                "reset type 0x00 is reserved; use 0x01..=0xFF".to_string(),
            ));
        }
        let request = UdsRequest::new(service_id::ECU_RESET).with_sub_function(reset_type);
        let payload = self.expect_positive(&request).await?;
        if payload.first() != Some(&reset_type) {
            return Err(ProtocolError::malformed("checking reset type echo", &payload).into());
        }
        // Security and session state do not survive a reset.
        *self.security.lock() = None;
        Ok(payload.get(1).copied())
    }

    /// ReadDTCInformation (0x19), raw form: the payload after the
    /// sub-function echo.
    pub async fn read_dtc_information(&self, req: &DtcReadRequest) -> Result<Vec<u8>, Error> {
        let sub = req.sub_function();
        let request = UdsRequest::new(service_id::READ_DTC_INFO)
            .with_sub_function(sub)
            .with_data(req.parameters());
        let payload = self.expect_positive(&request).await?;
        if payload.first() != Some(&sub) {
            return Err(ProtocolError::malformed("checking 0x19 sub-function echo", &payload).into());
        }
        Ok(payload[1..].to_vec())
    }

    /// 0x19 0x01: how many DTCs match the status mask.
    pub async fn dtc_count(&self, mask: u8) -> Result<DtcCount, Error> {
        let body = self
            .read_dtc_information(&DtcReadRequest::CountByStatusMask { mask })
            .await?;
        if body.len() < 4 {
            return Err(ProtocolError::malformed("parsing DTC count", &body).into());
        }
        Ok(DtcCount {
            status_availability_mask: body[0],
            format_identifier: body[1],
            count: u16::from_be_bytes([body[2], body[3]]),
        })
    }

    /// 0x19 0x02: DTC records matching the status mask.
    pub async fn dtcs_by_status_mask(&self, mask: u8) -> Result<DtcReport, Error> {
        let body = self
            .read_dtc_information(&DtcReadRequest::ByStatusMask { mask })
            .await?;
        Self::parse_dtc_groups(&body)
    }

    /// 0x19 0x0A: every DTC the ECU knows.
    pub async fn supported_dtcs(&self) -> Result<DtcReport, Error> {
        let body = self.read_dtc_information(&DtcReadRequest::Supported).await?;
        Self::parse_dtc_groups(&body)
    }

    /// 0x19 0x04: snapshot record bytes for one DTC.
    pub async fn dtc_snapshot(&self, dtc: [u8; 3], record: u8) -> Result<Vec<u8>, Error> {
        self.read_dtc_information(&DtcReadRequest::SnapshotByDtc { dtc, record })
            .await
    }

    /// 0x19 0x06: extended data record bytes for one DTC.
    pub async fn dtc_extended_data(&self, dtc: [u8; 3], record: u8) -> Result<Vec<u8>, Error> {
        self.read_dtc_information(&DtcReadRequest::ExtendedDataByDtc { dtc, record })
            .await
    }

    /// Walk `[availability mask] { dtcHigh dtcMid dtcLow status }*`.
    fn parse_dtc_groups(body: &[u8]) -> Result<DtcReport, Error> {
        let Some((&mask, groups)) = body.split_first() else {
            return Err(ProtocolError::malformed("parsing DTC report", body).into());
        };
        let mut records = Vec::new();
        for group in groups.chunks(4) {
            if group.len() < 4 {
                break;
            }
            if let Some(code) = DtcCode::from_uds_bytes(group[0], group[1], group[2]) {
                records.push(DtcRecord::new(code, DtcStatus::from_byte(group[3])));
            }
        }
        Ok(DtcReport {
            status_availability_mask: mask,
            records,
        })
    }

    /// ReadDataByIdentifier (0x22): the payload after SID + DID echo,
    /// opaque to this layer; the caller interprets it per identifier.
    pub async fn read_data_by_identifier(&self, did: u16) -> Result<Vec<u8>, Error> {
        let request =
            UdsRequest::new(service_id::READ_DATA_BY_ID).with_data(did.to_be_bytes().to_vec());
        let payload = self.expect_positive(&request).await?;
        if payload.len() < 2 || payload[..2] != did.to_be_bytes() {
            return Err(ProtocolError::malformed("checking DID echo", &payload).into());
        }
        Ok(payload[2..].to_vec())
    }

    /// SecurityAccess (0x27), odd sub-function: request a seed.
    ///
    /// An all-zero seed means the level is already unlocked; nothing is
    /// left pending and an empty seed is returned.
    pub async fn request_seed(&self, level: SecurityLevel) -> Result<Vec<u8>, Error> {
        let request = UdsRequest::new(service_id::SECURITY_ACCESS)
            .with_sub_function(level.request_seed_sub());
        let payload = self.expect_positive(&request).await?;
        if payload.first() != Some(&level.request_seed_sub()) {
            return Err(ProtocolError::malformed("checking seed sub-function echo", &payload).into());
        }
        let seed = payload[1..].to_vec();
        if seed.iter().all(|b| *b == 0) {
            debug!(level = level.request_seed_sub(), "zero seed, level already unlocked");
            *self.security.lock() = None;
            return Ok(Vec::new());
        }
        info!(level = level.request_seed_sub(), seed_len = seed.len(), "security seed received");
        *self.security.lock() = Some(PendingSeed {
            level,
            seed: seed.clone(),
        });
        Ok(seed)
    }

    /// SecurityAccess (0x27), even sub-function: submit the computed key.
    ///
    /// Rejected before any bytes reach the transport when no seed for
    /// this level is outstanding. The pending seed is consumed either
    /// way, matching the ECU's one-shot challenge.
    pub async fn send_key(&self, level: SecurityLevel, key: &[u8]) -> Result<(), Error> {
        {
            let mut pending = self.security.lock();
            match pending.as_ref() {
                None => {
                    return Err(Error::Validation(
                        "no outstanding seed; request a seed before sending a key".to_string(),
                    ))
                }
                Some(p) if p.level != level => {
                    return Err(Error::Validation(format!(
                        "outstanding seed is for level 0x{:02X}, not 0x{:02X}",
                        p.level.request_seed_sub(),
                        level.request_seed_sub()
                    )))
                }
                Some(_) => {}
            }
            *pending = None;
        }

        let request = UdsRequest::new(service_id::SECURITY_ACCESS)
            .with_sub_function(level.send_key_sub())
            .with_data(key.to_vec());
        let payload = self.expect_positive(&request).await?;
        if payload.first() != Some(&level.send_key_sub()) {
            return Err(ProtocolError::malformed("checking key sub-function echo", &payload).into());
        }
        info!(level = level.request_seed_sub(), "security access granted");
        Ok(())
    }

    /// Full seed/key handshake with a caller-supplied transform. This
    /// layer validates shape only, never the key's correctness.
    pub async fn unlock(&self, level: SecurityLevel, compute_key: &SeedKeyFn) -> Result<(), Error> {
        let seed = self.request_seed(level).await?;
        if seed.is_empty() {
            return Ok(());
        }
        let key = compute_key(&seed);
        self.send_key(level, &key).await
    }

    /// The seed currently awaiting a key, if any.
    pub fn pending_seed(&self) -> Option<Vec<u8>> {
        self.security.lock().as_ref().map(|p| p.seed.clone())
    }

    async fn expect_positive(&self, request: &UdsRequest) -> Result<Vec<u8>, Error> {
        match self.exchange(request).await? {
            UdsResponse::Positive { payload, .. } => Ok(payload),
            UdsResponse::Negative { service, nrc } => {
                Err(ProtocolError::NegativeResponse { service, nrc }.into())
            }
        }
    }

    async fn exchange(&self, request: &UdsRequest) -> Result<UdsResponse, Error> {
        let reply = self.session.request(&request.to_hex_command()).await?;
        let mut response = Self::decode_reply(&reply, request)?;

        // An ECU may answer 0x78 while it works; the real reply follows
        // on the same link within a bounded window.
        let deadline = Instant::now() + RESPONSE_PENDING_WINDOW;
        while response.is_pending() {
            if Instant::now() >= deadline {
                return Err(ProtocolError::NegativeResponse {
                    service: request.service,
                    nrc: crate::uds::NegativeResponseCode::ResponsePending,
                }
                .into());
            }
            let follow = self.session.read_continuation(CONTINUATION_SLICE).await?;
            if follow.is_empty() {
                continue;
            }
            response = Self::decode_reply(&follow, request)?;
        }
        Ok(response)
    }

    fn decode_reply(reply: &str, request: &UdsRequest) -> Result<UdsResponse, Error> {
        if text::has_error_marker(reply) {
            return Err(ProtocolError::AdapterReported(reply.to_string()).into());
        }
        let stream = text::hex_stream(reply);
        let positive_echo = hex::encode_upper(request.expected_echo());
        let negative_echo = format!("7F{:02X}", request.service);

        let frame = if let Some(idx) = stream.find(&positive_echo) {
            text::hex_pairs(&stream[idx..])
        } else if let Some(idx) = stream.find(&negative_echo) {
            text::hex_pairs(&stream[idx..])
        } else {
            return Err(ProtocolError::malformed(
                "locating UDS response echo",
                &text::hex_pairs(&stream),
            )
            .into());
        };
        parse_response(&frame).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::transport::mock::MockLink;
    use crate::uds::NegativeResponseCode;
    use pretty_assertions::assert_eq;

    fn client_with(stubs: &[(&str, &str)]) -> (Arc<MockLink>, UdsClient) {
        let mock = Arc::new(MockLink::new());
        for (cmd, reply) in stubs {
            mock.stub(cmd, reply);
        }
        let session = Arc::new(ElmSession::new(mock.clone(), AdapterConfig::default()));
        (mock, UdsClient::new(session))
    }

    #[tokio::test]
    async fn session_control_parses_timing() {
        let (_mock, client) = client_with(&[("1003", "50 03 00 32 01 F4")]);
        let ack = client.diagnostic_session_control(0x03).await.unwrap();
        assert_eq!(ack.session_type, 0x03);
        assert_eq!(ack.p2_max_ms, Some(0x0032));
        assert_eq!(ack.p2_star_max_ms, Some(5000));
    }

    #[tokio::test]
    async fn session_control_rejects_zero_before_io() {
        let (mock, client) = client_with(&[]);
        let err = client.diagnostic_session_control(0x00).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn ecu_reset_returns_power_down_time() {
        let (_mock, client) = client_with(&[("1101", "51 01 0F")]);
        let power_down = client.ecu_reset(0x01).await.unwrap();
        assert_eq!(power_down, Some(0x0F));
    }

    #[tokio::test]
    async fn read_did_strips_sid_and_did() {
        let (_mock, client) = client_with(&[("22F190", "62 F1 90 31 44 34")]);
        let data = client.read_data_by_identifier(0xF190).await.unwrap();
        assert_eq!(data, vec![0x31, 0x44, 0x34]);
    }

    #[tokio::test]
    async fn negative_response_is_typed() {
        let (_mock, client) = client_with(&[("22F191", "7F 22 31")]);
        let err = client.read_data_by_identifier(0xF191).await.unwrap_err();
        match err {
            Error::Protocol(ProtocolError::NegativeResponse { service, nrc }) => {
                assert_eq!(service, 0x22);
                assert_eq!(nrc, NegativeResponseCode::RequestOutOfRange);
            }
            other => panic!("expected negative response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dtc_report_walks_four_byte_groups() {
        let (_mock, client) = client_with(&[(
            "1902FF",
            "59 02 FF 01 23 45 09 06 78 90 28 00 00 00 00",
        )]);
        let report = client.dtcs_by_status_mask(0xFF).await.unwrap();
        assert_eq!(report.status_availability_mask, 0xFF);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].code.to_string(), "P0123");
        assert!(report.records[0].status.is_active());
        assert_eq!(report.records[1].code.to_string(), "P0678");
        assert!(report.records[1].status.confirmed);
    }

    #[tokio::test]
    async fn dtc_count_parses() {
        let (_mock, client) = client_with(&[("1901FF", "59 01 FF 01 00 05")]);
        let count = client.dtc_count(0xFF).await.unwrap();
        assert_eq!(count.count, 5);
        assert_eq!(count.format_identifier, 0x01);
    }

    #[tokio::test]
    async fn seed_then_key_handshake() {
        let (_mock, client) = client_with(&[
            ("2701", "67 01 AA BB CC DD"),
            ("2702DDCCBBAA", "67 02"),
        ]);
        let level = SecurityLevel::new(0x01).unwrap();
        let seed = client.request_seed(level).await.unwrap();
        assert_eq!(seed, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(client.pending_seed(), Some(seed.clone()));

        let key: Vec<u8> = seed.iter().rev().copied().collect();
        client.send_key(level, &key).await.unwrap();
        assert_eq!(client.pending_seed(), None);
    }

    #[tokio::test]
    async fn key_without_seed_sends_no_bytes() {
        let (mock, client) = client_with(&[]);
        let level = SecurityLevel::new(0x01).unwrap();
        let err = client.send_key(level, &[0x01, 0x02]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(mock.writes().is_empty(), "nothing may reach the transport");
    }

    #[tokio::test]
    async fn key_for_wrong_level_is_rejected() {
        let (mock, client) = client_with(&[("2703", "67 03 01 02")]);
        client
            .request_seed(SecurityLevel::new(0x03).unwrap())
            .await
            .unwrap();
        let writes_before = mock.writes().len();

        let err = client
            .send_key(SecurityLevel::new(0x01).unwrap(), &[0x00])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(mock.writes().len(), writes_before);
    }

    #[tokio::test]
    async fn zero_seed_means_already_unlocked() {
        let (_mock, client) = client_with(&[("2701", "67 01 00 00 00 00")]);
        let level = SecurityLevel::new(0x01).unwrap();
        let seed = client.request_seed(level).await.unwrap();
        assert!(seed.is_empty());
        assert_eq!(client.pending_seed(), None);
    }

    #[tokio::test]
    async fn unlock_runs_full_handshake() {
        let (_mock, client) = client_with(&[
            ("2701", "67 01 11 22"),
            ("27022112", "67 02"),
        ]);
        let transform: SeedKeyFn =
            Arc::new(|seed: &[u8]| seed.iter().rev().copied().collect());
        client
            .unlock(SecurityLevel::new(0x01).unwrap(), &transform)
            .await
            .unwrap();
    }

    #[test]
    fn security_level_validation() {
        assert!(SecurityLevel::new(0x01).is_ok());
        assert!(SecurityLevel::new(0x00).is_err());
        assert!(SecurityLevel::new(0x02).is_err());
        assert!(SecurityLevel::new(0xFF).is_err());
    }

    #[test]
    fn sub_function_shape_table() {
        let req = DtcReadRequest::SnapshotByDtc {
            dtc: [0x01, 0x23, 0x45],
            record: 0x01,
        };
        assert_eq!(req.sub_function(), 0x04);
        assert_eq!(req.parameters(), vec![0x01, 0x23, 0x45, 0x01]);
    }
}
