//! Scripted mock adapter for testing
//!
//! Behaves like an ELM327 on the other end of a byte stream: every
//! command gets its scripted reply followed by the `>` prompt, unknown
//! commands get `?`, and written commands are recorded so tests can
//! assert exactly what reached the wire. A global live-link counter
//! backs the resource-leak checks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LinkInfo, Transport, TransportError};
use crate::config::{MockConfig, MockScenario, TransportKind};

static LIVE_LINKS: AtomicUsize = AtomicUsize::new(0);

/// A scripted in-memory adapter link.
pub struct MockLink {
    /// command -> reply; `None` keeps the adapter silent (forces timeout)
    stubs: Mutex<Vec<(String, Option<String>)>>,
    writes: Mutex<Vec<String>>,
    buffer: Mutex<VecDeque<u8>>,
    connected: AtomicBool,
    closed: AtomicBool,
    latency: Duration,
    scenario: MockScenario,
}

impl MockLink {
    /// An empty-script link; add replies with [`stub`](Self::stub).
    pub fn new() -> Self {
        LIVE_LINKS.fetch_add(1, Ordering::SeqCst);
        Self {
            stubs: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            buffer: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            latency: Duration::ZERO,
            scenario: MockScenario::Healthy,
        }
    }

    /// A link pre-scripted for the configured scenario.
    pub fn from_config(config: &MockConfig) -> Self {
        let mut link = Self::new();
        link.latency = Duration::from_millis(config.latency_ms);
        link.scenario = config.scenario;
        *link.stubs.lock() = Self::scenario_script(config.scenario);
        link
    }

    /// Script a reply for a command. Later stubs win over earlier ones.
    pub fn stub(&self, command: &str, reply: &str) {
        self.stubs
            .lock()
            .insert(0, (Self::normalize_command(command), Some(reply.to_string())));
    }

    /// Script a command the adapter never answers.
    pub fn stub_silent(&self, command: &str) {
        self.stubs
            .lock()
            .insert(0, (Self::normalize_command(command), None));
    }

    /// Commands written so far, prompt-terminator stripped.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// Simulate the device vanishing mid-session.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Mock links constructed and not yet closed, process-wide.
    pub fn live_links() -> usize {
        LIVE_LINKS.load(Ordering::SeqCst)
    }

    fn normalize_command(command: &str) -> String {
        command
            .trim()
            .chars()
            .filter(|c| *c != ' ')
            .collect::<String>()
            .to_ascii_uppercase()
    }

    fn find_reply(&self, command: &str) -> Option<Option<String>> {
        let stubs = self.stubs.lock();
        if let Some((_, reply)) = stubs.iter().find(|(cmd, _)| cmd == command) {
            return Some(reply.clone());
        }
        stubs
            .iter()
            .find(|(cmd, _)| command.starts_with(cmd.as_str()))
            .map(|(_, reply)| reply.clone())
    }

    fn scenario_script(scenario: MockScenario) -> Vec<(String, Option<String>)> {
        let mut script: Vec<(&str, &str)> = vec![
            ("ATZ", "ELM327 v1.5"),
            ("ATI", "ELM327 v1.5"),
            ("ATE0", "OK"),
            ("ATL0", "OK"),
            ("ATS0", "OK"),
            ("ATH1", "OK"),
            ("ATAT1", "OK"),
            ("ATSTFF", "OK"),
            ("ATRV", "12.6V"),
            ("ATSI", "OK"),
            ("ATSP", "OK"),
            ("ATPC", "OK"),
        ];

        match scenario {
            MockScenario::Healthy => {
                script.extend([
                    ("0100", "41 00 BE 3E B8 11"),
                    ("0105", "41 05 5A"),
                    ("010C", "41 0C 1A F8"),
                    ("010D", "41 0D 40"),
                    ("03", "43 01 03 01 00 00"),
                    ("07", "NO DATA"),
                    ("0A", "NO DATA"),
                    ("04", "44"),
                    (
                        "0902",
                        "49 02 01 31 44 34 47 50 30 30 52 35 35 42 31 32 33 34 35 36",
                    ),
                    ("1001", "50 01 00 32 01 F4"),
                    ("1003", "50 03 00 32 01 F4"),
                    ("1101", "51 01"),
                    ("22F190", "62 F1 90 31 44 34 47 50 30 30 52 35 35 42 31 32 33 34 35 36"),
                    ("1902FF", "59 02 FF 03 01 00 09"),
                    ("2701", "67 01 AA BB CC DD"),
                    ("2702", "67 02"),
                ]);
            }
            MockScenario::NoVehicle => {
                // The adapter is fine; the bus never answers.
                script.extend([("01", "NO DATA"), ("03", "NO DATA"), ("0", "NO DATA")]);
            }
            MockScenario::NotAnAdapter => {
                script = vec![("ATZ", ""), ("ATI", "MODEM READY")];
            }
        }

        script
            .into_iter()
            .map(|(cmd, reply)| (Self::normalize_command(cmd), Some(reply.to_string())))
            .collect()
    }

    fn close_once(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            LIVE_LINKS.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.close_once();
    }
}

#[async_trait]
impl Transport for MockLink {
    async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let command = Self::normalize_command(&String::from_utf8_lossy(data));
        self.writes.lock().push(command.clone());

        match self.find_reply(&command) {
            Some(Some(reply)) => {
                let mut buffer = self.buffer.lock();
                buffer.extend(reply.as_bytes());
                buffer.extend(b"\r\r>");
            }
            Some(None) => {}
            None => {
                let mut buffer = self.buffer.lock();
                buffer.extend(b"?\r\r>");
            }
        }
        Ok(data.len())
    }

    async fn read(&self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        {
            let mut buffer = self.buffer.lock();
            if !buffer.is_empty() {
                let take = max.min(buffer.len());
                return Ok(buffer.drain(..take).collect());
            }
        }
        tokio::time::sleep(timeout).await;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        Ok(Vec::new())
    }

    async fn available(&self) -> usize {
        self.buffer.lock().len()
    }

    async fn clear_buffers(&self) {
        self.buffer.lock().clear();
    }

    async fn disconnect(&self, _graceful: bool) -> Result<(), TransportError> {
        self.close_once();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn describe(&self) -> LinkInfo {
        LinkInfo {
            kind: TransportKind::Mock,
            address: format!("mock:{}", self.scenario),
            detail: "scripted adapter".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn replies_end_with_prompt() {
        let mock = MockLink::new();
        mock.stub("ATI", "ELM327 v1.5");
        mock.write(b"ATI\r").await.unwrap();
        let reply = mock.read(64, Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply, b"ELM327 v1.5\r\r>");
    }

    #[tokio::test]
    async fn unknown_commands_get_question_mark() {
        let mock = MockLink::new();
        mock.write(b"ATXYZ\r").await.unwrap();
        let reply = mock.read(64, Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply, b"?\r\r>");
    }

    #[tokio::test]
    async fn silent_stub_forces_timeout() {
        let mock = MockLink::new();
        mock.stub_silent("0100");
        mock.write(b"0100\r").await.unwrap();
        let reply = mock.read(64, Duration::from_millis(10)).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn dropped_link_errors_instead_of_empty_read() {
        let mock = MockLink::new();
        mock.drop_link();
        assert!(matches!(
            mock.read(64, Duration::from_millis(10)).await,
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(
            mock.write(b"ATI\r").await,
            Err(TransportError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn double_disconnect_is_tolerated() {
        let before = MockLink::live_links();
        let mock = MockLink::new();
        assert_eq!(MockLink::live_links(), before + 1);
        mock.disconnect(true).await.unwrap();
        mock.disconnect(false).await.unwrap();
        assert_eq!(MockLink::live_links(), before);
        drop(mock);
        assert_eq!(MockLink::live_links(), before);
    }

    #[tokio::test]
    async fn later_stubs_override_scenario_defaults() {
        let mock = MockLink::from_config(&MockConfig::default());
        mock.stub("0100", "NO DATA");
        mock.write(b"0100\r").await.unwrap();
        let reply = mock.read(64, Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply, b"NO DATA\r\r>");
    }
}
