//! Mode 01 parameter decoding
//!
//! A static table maps each supported PID to its byte count, unit and
//! SAE J1979 scaling formula. The formula is a compiled enum matched in
//! one place, so a PID lookup never dispatches through stored closures.

/// One decoded parameter reading. Carries no history; every poll makes a
/// fresh value.
#[derive(Debug, Clone, PartialEq)]
pub struct PidReading {
    pub pid: u8,
    pub value: f64,
    pub unit: &'static str,
    pub raw: Vec<u8>,
}

/// SAE J1979 scaling shapes shared by the standard PIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Formula {
    /// A * 100 / 255
    Percent,
    /// A / 1.28 - 100
    SignedPercent,
    /// A - 40
    TemperatureOffset,
    /// ((A * 256) + B) / 4
    EngineRpm,
    /// A
    Byte,
    /// (A * 256) + B
    Word,
    /// A * 3
    FuelPressure,
    /// ((A * 256) + B) / 100
    MassAirFlow,
    /// A / 2 - 64
    TimingAdvance,
    /// ((A * 256) + B) / 1000
    Millivolts,
    /// ((A * 256) + B) * 100 / 255
    WordPercent,
    /// ((A * 256) + B) / 20
    FuelRate,
    /// ((A * 256) + B) / 10
    KpaTenth,
}

impl Formula {
    fn apply(&self, data: &[u8]) -> f64 {
        let a = data[0] as f64;
        let b = *data.get(1).unwrap_or(&0) as f64;
        match self {
            Formula::Percent => a * 100.0 / 255.0,
            Formula::SignedPercent => a / 1.28 - 100.0,
            Formula::TemperatureOffset => a - 40.0,
            Formula::EngineRpm => (a * 256.0 + b) / 4.0,
            Formula::Byte => a,
            Formula::Word => a * 256.0 + b,
            Formula::FuelPressure => a * 3.0,
            Formula::MassAirFlow => (a * 256.0 + b) / 100.0,
            Formula::TimingAdvance => a / 2.0 - 64.0,
            Formula::Millivolts => (a * 256.0 + b) / 1000.0,
            Formula::WordPercent => (a * 256.0 + b) * 100.0 / 255.0,
            Formula::FuelRate => (a * 256.0 + b) / 20.0,
            Formula::KpaTenth => (a * 256.0 + b) / 10.0,
        }
    }
}

/// Static definition of one supported PID.
#[derive(Debug, Clone, Copy)]
pub struct PidDef {
    pub pid: u8,
    /// Data bytes the formula needs; fewer means the decode fails.
    pub bytes: usize,
    pub unit: &'static str,
    pub label: &'static str,
    formula: Formula,
}

/// Standard mode 01 PIDs this engine decodes.
static PID_TABLE: &[PidDef] = &[
    PidDef { pid: 0x04, bytes: 1, unit: "%", label: "Calculated engine load", formula: Formula::Percent },
    PidDef { pid: 0x05, bytes: 1, unit: "°C", label: "Engine coolant temperature", formula: Formula::TemperatureOffset },
    PidDef { pid: 0x06, bytes: 1, unit: "%", label: "Short term fuel trim, bank 1", formula: Formula::SignedPercent },
    PidDef { pid: 0x07, bytes: 1, unit: "%", label: "Long term fuel trim, bank 1", formula: Formula::SignedPercent },
    PidDef { pid: 0x08, bytes: 1, unit: "%", label: "Short term fuel trim, bank 2", formula: Formula::SignedPercent },
    PidDef { pid: 0x09, bytes: 1, unit: "%", label: "Long term fuel trim, bank 2", formula: Formula::SignedPercent },
    PidDef { pid: 0x0A, bytes: 1, unit: "kPa", label: "Fuel pressure", formula: Formula::FuelPressure },
    PidDef { pid: 0x0B, bytes: 1, unit: "kPa", label: "Intake manifold pressure", formula: Formula::Byte },
    PidDef { pid: 0x0C, bytes: 2, unit: "rpm", label: "Engine speed", formula: Formula::EngineRpm },
    PidDef { pid: 0x0D, bytes: 1, unit: "km/h", label: "Vehicle speed", formula: Formula::Byte },
    PidDef { pid: 0x0E, bytes: 1, unit: "°", label: "Timing advance", formula: Formula::TimingAdvance },
    PidDef { pid: 0x0F, bytes: 1, unit: "°C", label: "Intake air temperature", formula: Formula::TemperatureOffset },
    PidDef { pid: 0x10, bytes: 2, unit: "g/s", label: "Mass air flow rate", formula: Formula::MassAirFlow },
    PidDef { pid: 0x11, bytes: 1, unit: "%", label: "Throttle position", formula: Formula::Percent },
    PidDef { pid: 0x1F, bytes: 2, unit: "s", label: "Run time since engine start", formula: Formula::Word },
    PidDef { pid: 0x21, bytes: 2, unit: "km", label: "Distance with MIL on", formula: Formula::Word },
    PidDef { pid: 0x22, bytes: 2, unit: "kPa", label: "Fuel rail pressure (relative)", formula: Formula::KpaTenth },
    PidDef { pid: 0x2F, bytes: 1, unit: "%", label: "Fuel tank level", formula: Formula::Percent },
    PidDef { pid: 0x31, bytes: 2, unit: "km", label: "Distance since codes cleared", formula: Formula::Word },
    PidDef { pid: 0x33, bytes: 1, unit: "kPa", label: "Barometric pressure", formula: Formula::Byte },
    PidDef { pid: 0x42, bytes: 2, unit: "V", label: "Control module voltage", formula: Formula::Millivolts },
    PidDef { pid: 0x43, bytes: 2, unit: "%", label: "Absolute load value", formula: Formula::WordPercent },
    PidDef { pid: 0x46, bytes: 1, unit: "°C", label: "Ambient air temperature", formula: Formula::TemperatureOffset },
    PidDef { pid: 0x5C, bytes: 1, unit: "°C", label: "Engine oil temperature", formula: Formula::TemperatureOffset },
    PidDef { pid: 0x5E, bytes: 2, unit: "L/h", label: "Engine fuel rate", formula: Formula::FuelRate },
];

/// Look up the static definition for a PID.
pub fn definition(pid: u8) -> Option<&'static PidDef> {
    PID_TABLE.iter().find(|def| def.pid == pid)
}

/// All PIDs with a decode rule, in table order.
pub fn supported_pids() -> impl Iterator<Item = u8> {
    PID_TABLE.iter().map(|def| def.pid)
}

/// Apply a PID's formula to its raw data bytes.
///
/// Returns `None` for unknown PIDs or when fewer bytes are supplied than
/// the PID's declared requirement.
pub fn decode(pid: u8, data: &[u8]) -> Option<PidReading> {
    let def = definition(pid)?;
    if data.len() < def.bytes {
        return None;
    }
    let data = &data[..def.bytes];
    Some(PidReading {
        pid,
        value: def.formula.apply(data),
        unit: def.unit,
        raw: data.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rpm_scaling_matches_reference() {
        let reading = decode(0x0C, &[0x1A, 0xF8]).unwrap();
        assert_eq!(reading.value, 1726.0);
        assert_eq!(reading.unit, "rpm");
        assert_eq!(reading.raw, vec![0x1A, 0xF8]);
    }

    #[test]
    fn coolant_temperature_offset() {
        let reading = decode(0x05, &[0x5A]).unwrap();
        assert_eq!(reading.value, 50.0);
        assert_eq!(reading.unit, "°C");
    }

    #[test]
    fn throttle_percent() {
        let reading = decode(0x11, &[0xFF]).unwrap();
        assert_eq!(reading.value, 100.0);
        let reading = decode(0x11, &[0x00]).unwrap();
        assert_eq!(reading.value, 0.0);
    }

    #[test]
    fn fuel_trim_is_signed() {
        assert_eq!(decode(0x06, &[0x80]).unwrap().value, 0.0);
        assert!(decode(0x06, &[0x00]).unwrap().value < 0.0);
    }

    #[test]
    fn control_module_voltage() {
        let reading = decode(0x42, &[0x31, 0x8A]).unwrap();
        assert!((reading.value - 12.682).abs() < 1e-9);
    }

    #[test]
    fn short_data_fails_decode() {
        assert_eq!(decode(0x0C, &[0x1A]), None);
        assert_eq!(decode(0x0C, &[]), None);
    }

    #[test]
    fn unknown_pid_fails_decode() {
        assert_eq!(decode(0xEE, &[0x00, 0x00]), None);
    }

    #[test]
    fn surplus_bytes_are_ignored() {
        // Concatenated multi-ECU data may leave trailing bytes.
        let reading = decode(0x0D, &[0x40, 0x99, 0x99]).unwrap();
        assert_eq!(reading.value, 64.0);
        assert_eq!(reading.raw, vec![0x40]);
    }

    #[test]
    fn table_declares_consistent_byte_counts() {
        for def in supported_pids().filter_map(definition) {
            assert!(def.bytes >= 1 && def.bytes <= 2, "pid {:02X}", def.pid);
        }
    }
}
