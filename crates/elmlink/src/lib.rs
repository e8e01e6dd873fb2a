//! elmlink - vehicle diagnostic link engine
//!
//! Drives ELM327-class adapters over Bluetooth Classic, BLE, USB serial
//! or TCP, auto-detects the vehicle's wire protocol and speaks OBD-II
//! (SAE J1979) and UDS (ISO 14229) on top.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DiagnosticLink                         │
//! │  state machine, retry/backoff, reconnection                 │
//! │  (LinkManager maps address -> link for multi-device use)    │
//! │                                                             │
//! │   ┌─────────────┐                 ┌─────────────┐           │
//! │   │  ObdClient  │                 │  UdsClient  │           │
//! │   │ (J1979)     │                 │ (ISO 14229) │           │
//! │   └──────┬──────┘                 └──────┬──────┘           │
//! │          │            codec              │                  │
//! │          │   (DTC / PID / framing, pure) │                  │
//! │          └──────────────┬────────────────┘                  │
//! │                   ┌─────┴──────┐                            │
//! │                   │ ElmSession │  AT init + protocol        │
//! │                   │            │  detection, one command    │
//! │                   └─────┬──────┘  in flight at a time       │
//! │                         │                                   │
//! │                  ┌──────┴──────┐                            │
//! │                  │  Transport  │  rfcomm / ble / usb /      │
//! │                  │             │  tcp / mock                │
//! │                  └─────────────┘                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use elmlink::{DiagnosticLink, LinkConfig, TransportConfig};
//! use elmlink::config::TcpConfig;
//!
//! let link = DiagnosticLink::new(LinkConfig::new(TransportConfig::Tcp(TcpConfig {
//!     host: "192.168.0.10".into(),
//!     ..Default::default()
//! })));
//! link.connect().await?;
//! for record in link.read_all_dtcs().await? {
//!     println!("{} {:?}", record.code, record.status);
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod obd;
pub mod session;
pub mod transport;
pub mod uds;

pub use codec::{DtcCategory, DtcCode, DtcDescriptionSource, DtcRecord, DtcStatus, PidReading};
pub use config::{LinkConfig, TransportConfig, TransportKind};
pub use connection::{ConnectionState, DiagnosticLink, LinkManager};
pub use error::{Error, ProtocolError};
pub use obd::{ObdClient, PidStream};
pub use session::{AdapterInfo, ElmSession, WireProtocol};
pub use transport::{create_transport, Transport, TransportError};
pub use uds::{
    DtcReadRequest, NegativeResponseCode, SecurityLevel, SeedKeyFn, UdsClient, UdsRequest,
    UdsResponse,
};
