//! UDS (ISO 14229) protocol layer
//!
//! Request/response framing plus the service client for the services this
//! engine speaks: DiagnosticSessionControl (0x10), ECUReset (0x11),
//! ReadDTCInformation (0x19), ReadDataByIdentifier (0x22) and
//! SecurityAccess (0x27). Requests travel hex-encoded over the same
//! AT-command transport as OBD-II.

mod client;
mod frame;
mod nrc;

pub use client::{
    DtcCount, DtcReadRequest, DtcReport, SecurityLevel, SeedKeyFn, SessionControl, UdsClient,
};
pub use frame::{UdsRequest, UdsResponse};
pub use nrc::NegativeResponseCode;

/// Service ids used by this engine
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// DiagnosticSessionControl (0x10) session types
pub mod session_type {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    pub const EXTENDED: u8 = 0x03;
    pub const SAFETY_SYSTEM: u8 = 0x04;
}

/// ECUReset (0x11) reset types
pub mod reset_type {
    pub const HARD_RESET: u8 = 0x01;
    pub const KEY_OFF_ON_RESET: u8 = 0x02;
    pub const SOFT_RESET: u8 = 0x03;
    pub const ENABLE_RAPID_POWER_SHUTDOWN: u8 = 0x04;
}

/// ReadDTCInformation (0x19) sub-functions
pub mod dtc_sub_function {
    /// Report number of DTCs matching a status mask
    pub const REPORT_NUMBER_OF_DTC_BY_STATUS_MASK: u8 = 0x01;
    /// Report DTCs matching a status mask
    pub const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;
    /// Report DTC snapshot record by DTC number
    pub const REPORT_DTC_SNAPSHOT_RECORD_BY_DTC_NUMBER: u8 = 0x04;
    /// Report DTC extended data record by DTC number
    pub const REPORT_DTC_EXTENDED_DATA_RECORD_BY_DTC_NUMBER: u8 = 0x06;
    /// Report all DTCs supported by the ECU
    pub const REPORT_SUPPORTED_DTC: u8 = 0x0A;
}
