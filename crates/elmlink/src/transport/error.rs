//! Transport layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("link disconnected")]
    Disconnected,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("transport not supported: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Whether a new connection attempt is worth making.
    ///
    /// Missing devices, permission problems and configuration mistakes
    /// need operator action; everything else is transient.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TransportError::NotFound(_)
                | TransportError::PermissionDenied(_)
                | TransportError::InvalidConfig(_)
                | TransportError::Unsupported(_)
        )
    }
}
