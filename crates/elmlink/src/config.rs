//! Link configuration
//!
//! Configuration types for a diagnostic link: which transport to use and
//! how to reach it, adapter initialization timing, and the orchestrator's
//! retry policy. All types deserialize from TOML.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The physical transport family for a connection attempt.
///
/// Fixed once per attempt; changing the kind means a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    BluetoothClassic,
    Ble,
    Usb,
    Tcp,
    Mock,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::BluetoothClassic => "bluetooth",
            TransportKind::Ble => "ble",
            TransportKind::Usb => "usb",
            TransportKind::Tcp => "tcp",
            TransportKind::Mock => "mock",
        };
        f.write_str(s)
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Bluetooth Classic RFCOMM (Linux only)
    Bluetooth(BluetoothConfig),
    /// Bluetooth Low Energy GATT
    Ble(BleConfig),
    /// USB serial adapter
    Usb(UsbConfig),
    /// TCP/WiFi adapter
    Tcp(TcpConfig),
    /// Mock adapter for testing
    Mock(MockConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Bluetooth(_) => TransportKind::BluetoothClassic,
            TransportConfig::Ble(_) => TransportKind::Ble,
            TransportConfig::Usb(_) => TransportKind::Usb,
            TransportConfig::Tcp(_) => TransportKind::Tcp,
            TransportConfig::Mock(_) => TransportKind::Mock,
        }
    }

    /// The caller-supplied address, usable as a map key for the
    /// multi-device manager.
    pub fn address(&self) -> String {
        match self {
            TransportConfig::Bluetooth(c) => c.address.clone(),
            TransportConfig::Ble(c) => c.address.clone(),
            TransportConfig::Usb(c) => c
                .path
                .clone()
                .unwrap_or_else(|| format!("usb:{:04x}:{:04x}", c.vid.unwrap_or(0), c.pid.unwrap_or(0))),
            TransportConfig::Tcp(c) => format!("{}:{}", c.host, c.port),
            TransportConfig::Mock(c) => format!("mock:{}", c.scenario),
        }
    }
}

/// Bluetooth Classic RFCOMM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothConfig {
    /// Adapter MAC address, e.g. "00:1D:A5:68:98:8B"
    pub address: String,
    /// RFCOMM channel, if known. When absent the standard serial-port
    /// channel is tried first, then channels 1-10 are scanned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    /// Per-attempt connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Full strategy-ladder retries with linear backoff
    #[serde(default = "default_bt_attempts")]
    pub max_attempts: u32,
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_bt_attempts() -> u32 {
    3
}

/// BLE GATT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleConfig {
    /// Peripheral MAC address or platform device id
    pub address: String,
    /// Scan window when the peripheral is not already known
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_ms: u64,
    /// Negotiated/assumed ATT MTU; writes above `mtu - 3` are fragmented
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Flow-control delay between write chunks in milliseconds
    #[serde(default = "default_chunk_delay")]
    pub chunk_delay_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_scan_timeout() -> u64 {
    10_000
}

fn default_mtu() -> usize {
    23
}

fn default_chunk_delay() -> u64 {
    20
}

/// USB serial configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbConfig {
    /// Exact device path, e.g. "/dev/ttyUSB0". Takes precedence over ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// USB vendor id to match during enumeration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    /// USB product id to match during enumeration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    /// Line speed; ELM327 boards default to 38400
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Purge driver buffers after opening
    #[serde(default = "default_true")]
    pub purge_on_open: bool,
}

fn default_baud() -> u32 {
    38_400
}

fn default_true() -> bool {
    true
}

/// TCP/WiFi adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Adapter host, e.g. "192.168.0.10"
    pub host: String,
    /// WiFi ELM327 dongles listen on 35000 by convention
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_tcp_port() -> u16 {
    35_000
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.10".to_string(),
            port: default_tcp_port(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Mock transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated reply latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Simulated adapter/vehicle behavior
    #[serde(default)]
    pub scenario: MockScenario,
}

/// What the scripted mock adapter pretends to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockScenario {
    /// Genuine adapter, vehicle answers the 0100 probe
    #[default]
    Healthy,
    /// Genuine adapter, no vehicle on the bus (every probe -> NO DATA)
    NoVehicle,
    /// Device that is not an ELM327-compatible adapter at all
    NotAnAdapter,
}

impl std::fmt::Display for MockScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MockScenario::Healthy => "healthy",
            MockScenario::NoVehicle => "no_vehicle",
            MockScenario::NotAnAdapter => "not_an_adapter",
        };
        f.write_str(s)
    }
}

/// Adapter session timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Settle delay after ATZ before the adapter accepts commands
    #[serde(default = "default_reset_settle")]
    pub reset_settle_ms: u64,
    /// Timeout for a single AT/OBD command round trip
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Timeout for a 0100 protocol probe (bus search can be slow)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Internal retries for transient transport failures during init
    #[serde(default = "default_init_retries")]
    pub init_retries: u32,
    /// Delay between those retries
    #[serde(default = "default_init_retry_delay")]
    pub init_retry_delay_ms: u64,
}

fn default_reset_settle() -> u64 {
    1_000
}

fn default_command_timeout() -> u64 {
    5_000
}

fn default_probe_timeout() -> u64 {
    15_000
}

fn default_init_retries() -> u32 {
    2
}

fn default_init_retry_delay() -> u64 {
    200
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            reset_settle_ms: default_reset_settle(),
            command_timeout_ms: default_command_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            init_retries: default_init_retries(),
            init_retry_delay_ms: default_init_retry_delay(),
        }
    }
}

impl AdapterConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Orchestrator retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Connection attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff step: attempt n waits n * step
    #[serde(default = "default_backoff_step")]
    pub backoff_step_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_step() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_ms: default_backoff_step(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(attempt as u64))
    }
}

/// Complete configuration for one logical connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub transport: TransportConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl LinkConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            adapter: AdapterConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Parse a link configuration from TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self, crate::Error> {
        toml::from_str(raw).map_err(|e| crate::Error::Validation(format!("config: {e}")))
    }
}
