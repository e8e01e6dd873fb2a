//! Vehicle wire protocols an ELM327-class adapter can speak

/// A bus protocol with its adapter protocol code.
///
/// Chosen once per session during detection and read-only afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireProtocol {
    /// Let the adapter search (ATSP0)
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (5 baud init, 10.4 kbaud)
    Iso9141_2,
    /// ISO 14230-4 KWP2000, 5 baud init
    Kwp2000Slow,
    /// ISO 14230-4 KWP2000, fast init
    Kwp2000Fast,
    /// ISO 15765-4 CAN, 11-bit id, 500 kbaud
    Can11Bit500k,
    /// ISO 15765-4 CAN, 29-bit id, 500 kbaud
    Can29Bit500k,
    /// ISO 15765-4 CAN, 11-bit id, 250 kbaud
    Can11Bit250k,
    /// ISO 15765-4 CAN, 29-bit id, 250 kbaud
    Can29Bit250k,
}

impl WireProtocol {
    /// Digit for the `ATSP` command.
    pub fn elm_code(&self) -> char {
        match self {
            WireProtocol::Auto => '0',
            WireProtocol::J1850Pwm => '1',
            WireProtocol::J1850Vpw => '2',
            WireProtocol::Iso9141_2 => '3',
            WireProtocol::Kwp2000Slow => '4',
            WireProtocol::Kwp2000Fast => '5',
            WireProtocol::Can11Bit500k => '6',
            WireProtocol::Can29Bit500k => '7',
            WireProtocol::Can11Bit250k => '8',
            WireProtocol::Can29Bit250k => '9',
        }
    }

    /// KWP buses need a slow init handshake before the first request.
    pub fn needs_slow_init(&self) -> bool {
        matches!(self, WireProtocol::Kwp2000Slow | WireProtocol::Kwp2000Fast)
    }

    pub fn is_can(&self) -> bool {
        matches!(
            self,
            WireProtocol::Can11Bit500k
                | WireProtocol::Can29Bit500k
                | WireProtocol::Can11Bit250k
                | WireProtocol::Can29Bit250k
        )
    }

    /// Human-readable bus description.
    pub fn describe(&self) -> &'static str {
        match self {
            WireProtocol::Auto => "automatic",
            WireProtocol::J1850Pwm => "SAE J1850 PWM (41.6 kbaud)",
            WireProtocol::J1850Vpw => "SAE J1850 VPW (10.4 kbaud)",
            WireProtocol::Iso9141_2 => "ISO 9141-2",
            WireProtocol::Kwp2000Slow => "ISO 14230-4 KWP (5 baud init)",
            WireProtocol::Kwp2000Fast => "ISO 14230-4 KWP (fast init)",
            WireProtocol::Can11Bit500k => "ISO 15765-4 CAN (11-bit, 500 kbaud)",
            WireProtocol::Can29Bit500k => "ISO 15765-4 CAN (29-bit, 500 kbaud)",
            WireProtocol::Can11Bit250k => "ISO 15765-4 CAN (11-bit, 250 kbaud)",
            WireProtocol::Can29Bit250k => "ISO 15765-4 CAN (29-bit, 250 kbaud)",
        }
    }
}

impl std::fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elm_codes_cover_the_dialect() {
        assert_eq!(WireProtocol::Auto.elm_code(), '0');
        assert_eq!(WireProtocol::Iso9141_2.elm_code(), '3');
        assert_eq!(WireProtocol::Can11Bit500k.elm_code(), '6');
        assert_eq!(WireProtocol::Can29Bit250k.elm_code(), '9');
    }

    #[test]
    fn kwp_needs_slow_init() {
        assert!(WireProtocol::Kwp2000Fast.needs_slow_init());
        assert!(WireProtocol::Kwp2000Slow.needs_slow_init());
        assert!(!WireProtocol::Can11Bit500k.needs_slow_init());
        assert!(!WireProtocol::Auto.needs_slow_init());
    }
}
