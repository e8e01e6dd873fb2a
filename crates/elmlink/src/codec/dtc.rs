//! Diagnostic trouble codes
//!
//! A DTC is defined by two raw bytes (OBD-II modes 03/07/0A) or three
//! (UDS 0x19); either way the displayable code is letter + four digits,
//! e.g. `P0301`. The all-zero byte pattern means "no code" and never
//! becomes a value.

use std::fmt;

/// Vehicle system addressed by a DTC, from bits 7-6 of the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtcCategory {
    /// P codes - engine and transmission
    Powertrain,
    /// C codes - brakes, steering, suspension
    Chassis,
    /// B codes - cabin systems
    Body,
    /// U codes - vehicle network
    Network,
}

impl DtcCategory {
    pub fn from_high_bits(first_byte: u8) -> Self {
        match (first_byte >> 6) & 0x03 {
            0 => DtcCategory::Powertrain,
            1 => DtcCategory::Chassis,
            2 => DtcCategory::Body,
            _ => DtcCategory::Network,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            DtcCategory::Powertrain => 'P',
            DtcCategory::Chassis => 'C',
            DtcCategory::Body => 'B',
            DtcCategory::Network => 'U',
        }
    }
}

/// An immutable trouble-code value. Equality is code equality; the
/// canonical 5-character string is the sole interchange form with the
/// description-database collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DtcCode {
    category: DtcCategory,
    /// The 14 code bits: low 6 of byte one, all of byte two.
    raw: u16,
}

impl DtcCode {
    /// Decode the 2-byte OBD-II form. `(0x00, 0x00)` is "no code".
    pub fn from_obd_pair(first: u8, second: u8) -> Option<Self> {
        if first == 0 && second == 0 {
            return None;
        }
        Some(Self {
            category: DtcCategory::from_high_bits(first),
            raw: (((first & 0x3F) as u16) << 8) | second as u16,
        })
    }

    /// Decode the 3-byte UDS form. The first two bytes carry the same
    /// layout as the OBD pair; the third is the failure-type byte and
    /// does not appear in the 5-character code.
    pub fn from_uds_bytes(high: u8, mid: u8, _low: u8) -> Option<Self> {
        Self::from_obd_pair(high, mid)
    }

    pub fn category(&self) -> DtcCategory {
        self.category
    }

    /// Canonical form, e.g. "P0301".
    pub fn code_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DtcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:01X}{:01X}{:01X}{:01X}",
            self.category.letter(),
            (self.raw >> 12) & 0x3,
            (self.raw >> 8) & 0xF,
            (self.raw >> 4) & 0xF,
            self.raw & 0xF,
        )
    }
}

/// DTC status byte bits per ISO 14229-1
pub mod status_bit {
    pub const TEST_FAILED: u8 = 0x01;
    pub const TEST_FAILED_THIS_OPERATION_CYCLE: u8 = 0x02;
    pub const PENDING_DTC: u8 = 0x04;
    pub const CONFIRMED_DTC: u8 = 0x08;
    pub const TEST_NOT_COMPLETED_SINCE_LAST_CLEAR: u8 = 0x10;
    pub const TEST_FAILED_SINCE_LAST_CLEAR: u8 = 0x20;
    pub const TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE: u8 = 0x40;
    pub const WARNING_INDICATOR_REQUESTED: u8 = 0x80;
}

/// Parsed DTC status bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtcStatus {
    pub test_failed: bool,
    pub test_failed_this_operation_cycle: bool,
    pub pending: bool,
    pub confirmed: bool,
    pub test_not_completed_since_last_clear: bool,
    pub test_failed_since_last_clear: bool,
    pub test_not_completed_this_operation_cycle: bool,
    pub warning_indicator_requested: bool,
    pub raw: u8,
}

impl DtcStatus {
    pub fn from_byte(status: u8) -> Self {
        Self {
            test_failed: status & status_bit::TEST_FAILED != 0,
            test_failed_this_operation_cycle: status
                & status_bit::TEST_FAILED_THIS_OPERATION_CYCLE
                != 0,
            pending: status & status_bit::PENDING_DTC != 0,
            confirmed: status & status_bit::CONFIRMED_DTC != 0,
            test_not_completed_since_last_clear: status
                & status_bit::TEST_NOT_COMPLETED_SINCE_LAST_CLEAR
                != 0,
            test_failed_since_last_clear: status & status_bit::TEST_FAILED_SINCE_LAST_CLEAR != 0,
            test_not_completed_this_operation_cycle: status
                & status_bit::TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE
                != 0,
            warning_indicator_requested: status & status_bit::WARNING_INDICATOR_REQUESTED != 0,
            raw: status,
        }
    }

    /// Test failed and the fault is confirmed.
    pub fn is_active(&self) -> bool {
        self.test_failed && self.confirmed
    }

    pub fn matches_mask(&self, mask: u8) -> bool {
        self.raw & mask != 0
    }
}

/// Description lookup owned by the host application (typically a fault
/// code database). This engine only defines the seam and passes the
/// canonical code string through it.
pub trait DtcDescriptionSource: Send + Sync {
    fn lookup(&self, code: &str) -> Option<String>;
}

/// A trouble code with its status and, once the description collaborator
/// has been consulted, a human-readable text. Built fresh per read; it
/// has no persistent identity here.
#[derive(Debug, Clone)]
pub struct DtcRecord {
    pub code: DtcCode,
    pub status: DtcStatus,
    pub description: Option<String>,
}

impl DtcRecord {
    pub fn new(code: DtcCode, status: DtcStatus) -> Self {
        Self {
            code,
            status,
            description: None,
        }
    }

    pub fn with_status_byte(code: DtcCode, status: u8) -> Self {
        Self::new(code, DtcStatus::from_byte(status))
    }

    /// Fill the description from the external lookup collaborator.
    pub fn describe_with(mut self, source: &dyn DtcDescriptionSource) -> Self {
        self.description = source.lookup(&self.code.code_string());
        self
    }
}
