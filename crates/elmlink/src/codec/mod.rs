//! Message codec
//!
//! Stateless, deterministic translation between the adapter's text
//! replies / raw response bytes and typed domain values. No I/O and no
//! mutable state lives here, which keeps every function independently
//! unit-testable.

pub mod dtc;
pub mod obd;
pub mod pid;
pub mod text;

pub use dtc::{DtcCategory, DtcCode, DtcDescriptionSource, DtcRecord, DtcStatus};
pub use pid::PidReading;
