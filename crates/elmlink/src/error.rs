//! Crate error taxonomy
//!
//! Three families with distinct retry semantics:
//! - [`TransportError`]: the link itself failed; generally retryable.
//! - [`ProtocolError`]: the adapter or vehicle said something terminal;
//!   retrying without operator action will not help.
//! - `Validation`: the caller passed an out-of-range argument; rejected
//!   before any I/O happens.

use thiserror::Error;

use crate::transport::TransportError;
use crate::uds::NegativeResponseCode;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid argument: {0}")]
    Validation(String),
}

impl Error {
    /// Whether a caller-initiated reconnect is worth attempting.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Transport(t) => t.is_recoverable(),
            Error::Protocol(_) | Error::Validation(_) => false,
        }
    }
}

/// Adapter or vehicle-side protocol failures.
///
/// Malformed responses carry the raw bytes for diagnostics.
#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    #[error("not a compatible adapter (identity: {identity:?})")]
    AdapterNotRecognized { identity: String },

    #[error("no wire protocol detected after exhausting the fallback list")]
    NoProtocolDetected,

    #[error("malformed response while {context}: {raw:02X?}")]
    MalformedResponse { context: String, raw: Vec<u8> },

    #[error("negative response for service 0x{service:02X}: {nrc} (0x{nrc:02X})")]
    NegativeResponse {
        service: u8,
        nrc: NegativeResponseCode,
    },

    #[error("adapter reported: {0}")]
    AdapterReported(String),
}

impl ProtocolError {
    pub(crate) fn malformed(context: impl Into<String>, raw: &[u8]) -> Self {
        ProtocolError::MalformedResponse {
            context: context.into(),
            raw: raw.to_vec(),
        }
    }
}
