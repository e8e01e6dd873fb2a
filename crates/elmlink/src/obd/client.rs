//! OBD-II mode request/response handlers

use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::dtc::{status_bit, DtcCode, DtcRecord, DtcStatus};
use crate::codec::{obd, pid, text, PidReading};
use crate::error::Error;
use crate::obd::mode;
use crate::session::ElmSession;

/// Client for the OBD-II modes this engine speaks. Stateless besides the
/// shared session; cheap to clone.
#[derive(Clone)]
pub struct ObdClient {
    session: Arc<ElmSession>,
}

impl ObdClient {
    pub fn new(session: Arc<ElmSession>) -> Self {
        Self { session }
    }

    /// Mode 01: read one PID as a physical value.
    ///
    /// `Ok(None)` when the vehicle does not answer or reports too few
    /// data bytes for this PID; transport problems are errors.
    pub async fn read_pid(&self, pid_number: u8) -> Result<Option<PidReading>, Error> {
        let def = pid::definition(pid_number).ok_or_else(|| {
            Error::Validation(format!("no decode rule for PID 0x{pid_number:02X}"))
        })?;

        let reply = self
            .session
            .request(&format!("{:02X}{:02X}", mode::CURRENT_DATA, pid_number))
            .await?;
        if text::has_error_marker(&reply) {
            debug!(pid = pid_number, reply = reply.as_str(), "no PID data");
            return Ok(None);
        }
        let data = obd::extract_pid_data(&reply, mode::CURRENT_DATA, pid_number, def.bytes);
        Ok(data.and_then(|bytes| pid::decode(pid_number, &bytes)))
    }

    /// Mode 02: read one PID from the freeze frame stored with a DTC.
    pub async fn read_freeze_frame(
        &self,
        pid_number: u8,
        frame: u8,
    ) -> Result<Option<PidReading>, Error> {
        let def = pid::definition(pid_number).ok_or_else(|| {
            Error::Validation(format!("no decode rule for PID 0x{pid_number:02X}"))
        })?;

        let reply = self
            .session
            .request(&format!(
                "{:02X}{:02X}{:02X}",
                mode::FREEZE_FRAME,
                pid_number,
                frame
            ))
            .await?;
        if text::has_error_marker(&reply) {
            return Ok(None);
        }
        let echo = [mode::FREEZE_FRAME.wrapping_add(0x40), pid_number, frame];
        let data = obd::extract_after_echo(&reply, &echo, def.bytes);
        Ok(data.and_then(|bytes| pid::decode(pid_number, &bytes)))
    }

    /// Mode 03: confirmed (stored) trouble codes.
    pub async fn stored_dtcs(&self) -> Result<Vec<DtcCode>, Error> {
        self.dtc_mode(mode::STORED_DTCS).await
    }

    /// Mode 07: pending trouble codes.
    pub async fn pending_dtcs(&self) -> Result<Vec<DtcCode>, Error> {
        self.dtc_mode(mode::PENDING_DTCS).await
    }

    /// Mode 0A: permanent trouble codes.
    pub async fn permanent_dtcs(&self) -> Result<Vec<DtcCode>, Error> {
        self.dtc_mode(mode::PERMANENT_DTCS).await
    }

    async fn dtc_mode(&self, dtc_mode: u8) -> Result<Vec<DtcCode>, Error> {
        let reply = self.session.request(&format!("{dtc_mode:02X}")).await?;
        obd::parse_dtc_response(&reply, dtc_mode).map_err(Into::into)
    }

    /// All trouble codes the vehicle reports, with a status derived from
    /// the mode each one appeared in. Codes found by several modes are
    /// merged into one record with the combined status.
    pub async fn read_all_dtcs(&self) -> Result<Vec<DtcRecord>, Error> {
        let mut records: Vec<DtcRecord> = Vec::new();
        let groups = [
            (self.stored_dtcs().await?, status_bit::CONFIRMED_DTC),
            (self.pending_dtcs().await?, status_bit::PENDING_DTC),
            (
                self.permanent_dtcs().await?,
                status_bit::CONFIRMED_DTC | status_bit::WARNING_INDICATOR_REQUESTED,
            ),
        ];

        for (codes, bits) in groups {
            for code in codes {
                match records.iter_mut().find(|r| r.code == code) {
                    Some(existing) => {
                        existing.status = DtcStatus::from_byte(existing.status.raw | bits);
                    }
                    None => records.push(DtcRecord::with_status_byte(code, bits)),
                }
            }
        }
        info!(count = records.len(), "trouble codes read");
        Ok(records)
    }

    /// Mode 04: clear codes and the MIL. True when the vehicle
    /// acknowledged.
    pub async fn clear_dtcs(&self) -> Result<bool, Error> {
        let reply = self
            .session
            .request(&format!("{:02X}", mode::CLEAR_DTCS))
            .await?;
        let cleared = obd::clear_acknowledged(&reply);
        info!(cleared, "clear request finished");
        Ok(cleared)
    }

    /// Mode 09 PID 02: the vehicle identification number.
    pub async fn read_vin(&self) -> Result<Option<String>, Error> {
        let reply = self
            .session
            .request(&format!("{:02X}02", mode::VEHICLE_INFO))
            .await?;
        if text::has_error_marker(&reply) {
            return Ok(None);
        }
        Ok(obd::parse_vin(&reply))
    }

    /// PIDs the vehicle claims to support, from the 0100/0120/... support
    /// bitmaps. Stops at the first bitmap without a continuation bit.
    pub async fn supported_pids(&self) -> Result<Vec<u8>, Error> {
        let mut supported = Vec::new();
        let mut base = 0x00u8;
        loop {
            let reply = self
                .session
                .request(&format!("{:02X}{base:02X}", mode::CURRENT_DATA))
                .await?;
            if text::has_error_marker(&reply) {
                break;
            }
            let Some(pids) = obd::parse_pid_bitmap(&reply, base) else {
                break;
            };
            let next = base.wrapping_add(0x20);
            let has_next = next != 0 && pids.contains(&next);
            supported.extend(pids.into_iter().filter(|p| *p != next || !has_next));
            if !has_next {
                break;
            }
            base = next;
        }
        Ok(supported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::transport::mock::MockLink;
    use pretty_assertions::assert_eq;

    fn fast_config() -> AdapterConfig {
        AdapterConfig {
            reset_settle_ms: 1,
            command_timeout_ms: 100,
            probe_timeout_ms: 100,
            init_retries: 0,
            init_retry_delay_ms: 1,
        }
    }

    fn client_with(stubs: &[(&str, &str)]) -> (Arc<MockLink>, ObdClient) {
        let mock = Arc::new(MockLink::new());
        for (cmd, reply) in stubs {
            mock.stub(cmd, reply);
        }
        let session = Arc::new(ElmSession::new(mock.clone(), fast_config()));
        (mock, ObdClient::new(session))
    }

    #[tokio::test]
    async fn read_pid_decodes_rpm() {
        let (_mock, client) = client_with(&[("010C", "41 0C 1A F8")]);
        let reading = client.read_pid(0x0C).await.unwrap().unwrap();
        assert_eq!(reading.value, 1726.0);
        assert_eq!(reading.unit, "rpm");
    }

    #[tokio::test]
    async fn read_pid_handles_no_data() {
        let (_mock, client) = client_with(&[("010C", "NO DATA")]);
        assert_eq!(client.read_pid(0x0C).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_pid_rejects_unknown_pid_before_io() {
        let (mock, client) = client_with(&[]);
        let err = client.read_pid(0xEE).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn short_pid_data_yields_none() {
        let (_mock, client) = client_with(&[("010C", "41 0C 1A")]);
        assert_eq!(client.read_pid(0x0C).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stored_dtcs_parse_and_filter_padding() {
        let (_mock, client) = client_with(&[("03", "43 01 03 01 00 00")]);
        let codes = client.stored_dtcs().await.unwrap();
        let strings: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        assert_eq!(strings, vec!["P0301"]);
    }

    #[tokio::test]
    async fn read_all_dtcs_merges_statuses() {
        let (_mock, client) = client_with(&[
            ("03", "43 01 03 01 00 00"),
            ("07", "47 01 03 01 00 00"),
            ("0A", "NO DATA"),
        ]);
        let records = client.read_all_dtcs().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code.to_string(), "P0301");
        assert!(records[0].status.confirmed);
        assert!(records[0].status.pending);
        assert!(records[0].description.is_none());
    }

    #[tokio::test]
    async fn clear_dtcs_checks_acknowledgement() {
        let (_mock, client) = client_with(&[("04", "44")]);
        assert!(client.clear_dtcs().await.unwrap());

        let (_mock, client) = client_with(&[("04", "NO DATA")]);
        assert!(!client.clear_dtcs().await.unwrap());
    }

    #[tokio::test]
    async fn vin_reads_through_multiline_reply() {
        let (_mock, client) = client_with(&[(
            "0902",
            "014 0: 49 02 01 31 44 34 1: 47 50 30 30 52 35 35 2: 42 31 32 33 34 35 36",
        )]);
        assert_eq!(client.read_vin().await.unwrap().unwrap(), "1D4GP00R55B123456");
    }

    #[tokio::test]
    async fn freeze_frame_includes_frame_in_echo() {
        let (_mock, client) = client_with(&[("020C00", "42 0C 00 0B B8")]);
        let reading = client.read_freeze_frame(0x0C, 0x00).await.unwrap().unwrap();
        assert_eq!(reading.value, 750.0);
    }
}
