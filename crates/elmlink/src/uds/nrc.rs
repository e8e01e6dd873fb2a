//! UDS negative response codes (ISO 14229-1)

use std::fmt;

/// Negative response code carried in a `7F <sid> <nrc>` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLengthOrFormat,
    ResponseTooLong,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededNumberOfAttempts,
    RequiredTimeDelayNotExpired,
    GeneralProgrammingFailure,
    ResponsePending,
    SubFunctionNotSupportedInActiveSession,
    ServiceNotSupportedInActiveSession,
    /// Reserved or manufacturer-specific code
    Other(u8),
}

/// (raw, variant, name) in one place; `From`, `Into` and `Display` all
/// read from this table.
const TABLE: &[(u8, NegativeResponseCode, &str)] = &[
    (0x10, NegativeResponseCode::GeneralReject, "generalReject"),
    (
        0x11,
        NegativeResponseCode::ServiceNotSupported,
        "serviceNotSupported",
    ),
    (
        0x12,
        NegativeResponseCode::SubFunctionNotSupported,
        "subFunctionNotSupported",
    ),
    (
        0x13,
        NegativeResponseCode::IncorrectMessageLengthOrFormat,
        "incorrectMessageLengthOrInvalidFormat",
    ),
    (0x14, NegativeResponseCode::ResponseTooLong, "responseTooLong"),
    (
        0x21,
        NegativeResponseCode::BusyRepeatRequest,
        "busyRepeatRequest",
    ),
    (
        0x22,
        NegativeResponseCode::ConditionsNotCorrect,
        "conditionsNotCorrect",
    ),
    (
        0x24,
        NegativeResponseCode::RequestSequenceError,
        "requestSequenceError",
    ),
    (
        0x31,
        NegativeResponseCode::RequestOutOfRange,
        "requestOutOfRange",
    ),
    (
        0x33,
        NegativeResponseCode::SecurityAccessDenied,
        "securityAccessDenied",
    ),
    (0x35, NegativeResponseCode::InvalidKey, "invalidKey"),
    (
        0x36,
        NegativeResponseCode::ExceededNumberOfAttempts,
        "exceededNumberOfAttempts",
    ),
    (
        0x37,
        NegativeResponseCode::RequiredTimeDelayNotExpired,
        "requiredTimeDelayNotExpired",
    ),
    (
        0x72,
        NegativeResponseCode::GeneralProgrammingFailure,
        "generalProgrammingFailure",
    ),
    (
        0x78,
        NegativeResponseCode::ResponsePending,
        "requestCorrectlyReceivedResponsePending",
    ),
    (
        0x7E,
        NegativeResponseCode::SubFunctionNotSupportedInActiveSession,
        "subFunctionNotSupportedInActiveSession",
    ),
    (
        0x7F,
        NegativeResponseCode::ServiceNotSupportedInActiveSession,
        "serviceNotSupportedInActiveSession",
    ),
];

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        TABLE
            .iter()
            .find(|(raw, _, _)| *raw == value)
            .map(|(_, variant, _)| *variant)
            .unwrap_or(NegativeResponseCode::Other(value))
    }
}

impl From<NegativeResponseCode> for u8 {
    fn from(nrc: NegativeResponseCode) -> Self {
        if let NegativeResponseCode::Other(v) = nrc {
            return v;
        }
        TABLE
            .iter()
            .find(|(_, variant, _)| *variant == nrc)
            .map(|(raw, _, _)| *raw)
            .unwrap_or(0x10)
    }
}

impl NegativeResponseCode {
    pub fn name(&self) -> &'static str {
        if let NegativeResponseCode::Other(_) = self {
            return "reservedOrManufacturerSpecific";
        }
        TABLE
            .iter()
            .find(|(_, variant, _)| variant == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("reservedOrManufacturerSpecific")
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: u8 = (*self).into();
        fmt::UpperHex::fmt(&value, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_raw_byte() {
        for &(raw, variant, _) in TABLE {
            assert_eq!(NegativeResponseCode::from(raw), variant);
            assert_eq!(u8::from(variant), raw);
        }
    }

    #[test]
    fn unknown_codes_are_preserved() {
        let nrc = NegativeResponseCode::from(0x93);
        assert_eq!(nrc, NegativeResponseCode::Other(0x93));
        assert_eq!(u8::from(nrc), 0x93);
        assert_eq!(nrc.name(), "reservedOrManufacturerSpecific");
    }

    #[test]
    fn display_uses_iso_names() {
        assert_eq!(
            NegativeResponseCode::SecurityAccessDenied.to_string(),
            "securityAccessDenied"
        );
    }
}
