//! UDS request/response framing
//!
//! Pure encode/decode, no I/O. A request is a service id, an optional
//! sub-function and parameter bytes; on the wire it is hex-encoded like
//! any other command to the adapter. A reply is either positive
//! (`SID + 0x40` then payload) or negative (`7F <sid> <nrc>`); the
//! negative branch is checked first, before any positive-path parse.

use crate::error::ProtocolError;
use crate::uds::{service_id, NegativeResponseCode};

/// An outgoing UDS request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdsRequest {
    pub service: u8,
    pub sub_function: Option<u8>,
    pub data: Vec<u8>,
}

impl UdsRequest {
    pub fn new(service: u8) -> Self {
        Self {
            service,
            sub_function: None,
            data: Vec::new(),
        }
    }

    pub fn with_sub_function(mut self, sub_function: u8) -> Self {
        self.sub_function = Some(sub_function);
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Raw request bytes: service id, sub-function if any, parameters.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.data.len());
        bytes.push(self.service);
        if let Some(sub) = self.sub_function {
            bytes.push(sub);
        }
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Hex line sent to the adapter, e.g. `22F190`.
    pub fn to_hex_command(&self) -> String {
        hex::encode_upper(self.to_bytes())
    }

    /// The leading bytes a positive reply echoes back: `SID + 0x40`
    /// followed by the sub-function, or by the first two parameter bytes
    /// for identifier-addressed services. Used to locate the reply inside
    /// a noisy response buffer.
    pub fn expected_echo(&self) -> Vec<u8> {
        let mut echo = vec![self.service.wrapping_add(0x40)];
        if let Some(sub) = self.sub_function {
            echo.push(sub);
        } else {
            echo.extend(self.data.iter().take(2));
        }
        echo
    }
}

/// A decoded UDS reply. The negative form is a first-class outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdsResponse {
    Positive {
        /// Original request service id (echo minus 0x40)
        service: u8,
        /// Everything after the response SID, echo bytes included
        payload: Vec<u8>,
    },
    Negative {
        /// Service id the ECU rejected
        service: u8,
        nrc: NegativeResponseCode,
    },
}

impl UdsResponse {
    pub fn is_positive(&self) -> bool {
        matches!(self, UdsResponse::Positive { .. })
    }

    /// Negative-pending replies mean the ECU needs more time, not a
    /// definitive refusal.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            UdsResponse::Negative {
                nrc: NegativeResponseCode::ResponsePending,
                ..
            }
        )
    }
}

/// Decode raw reply bytes. Branches on the `7F` prefix before any
/// positive-path interpretation.
pub fn parse_response(bytes: &[u8]) -> Result<UdsResponse, ProtocolError> {
    match bytes.first() {
        None => Err(ProtocolError::malformed("parsing empty UDS reply", bytes)),
        Some(&service_id::NEGATIVE_RESPONSE) => {
            if bytes.len() < 3 {
                return Err(ProtocolError::malformed(
                    "parsing truncated negative response",
                    bytes,
                ));
            }
            Ok(UdsResponse::Negative {
                service: bytes[1],
                nrc: NegativeResponseCode::from(bytes[2]),
            })
        }
        Some(&sid) if sid >= 0x40 => Ok(UdsResponse::Positive {
            service: sid.wrapping_sub(0x40),
            payload: bytes[1..].to_vec(),
        }),
        Some(_) => Err(ProtocolError::malformed(
            "parsing UDS reply with invalid response SID",
            bytes,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encodes_read_data_by_identifier() {
        let req = UdsRequest::new(0x22).with_data(vec![0xF1, 0x90]);
        assert_eq!(req.to_bytes(), vec![0x22, 0xF1, 0x90]);
        assert_eq!(req.to_hex_command(), "22F190");
        assert_eq!(req.expected_echo(), vec![0x62, 0xF1, 0x90]);
    }

    #[test]
    fn encodes_sub_function_request() {
        let req = UdsRequest::new(0x10).with_sub_function(0x03);
        assert_eq!(req.to_hex_command(), "1003");
        assert_eq!(req.expected_echo(), vec![0x50, 0x03]);
    }

    #[test]
    fn parses_positive_response() {
        let resp = parse_response(&[0x62, 0xF1, 0x90, 0x31, 0x32]).unwrap();
        assert_eq!(
            resp,
            UdsResponse::Positive {
                service: 0x22,
                payload: vec![0xF1, 0x90, 0x31, 0x32],
            }
        );
    }

    #[test]
    fn parses_negative_response_before_positive_path() {
        let resp = parse_response(&[0x7F, 0x22, 0x31]).unwrap();
        assert_eq!(
            resp,
            UdsResponse::Negative {
                service: 0x22,
                nrc: NegativeResponseCode::RequestOutOfRange,
            }
        );
        assert!(!resp.is_positive());
    }

    #[test]
    fn pending_is_recognized() {
        let resp = parse_response(&[0x7F, 0x19, 0x78]).unwrap();
        assert!(resp.is_pending());
    }

    #[test]
    fn truncated_negative_is_malformed() {
        assert!(parse_response(&[0x7F, 0x22]).is_err());
        assert!(parse_response(&[]).is_err());
        assert!(parse_response(&[0x22, 0xF1]).is_err());
    }
}
