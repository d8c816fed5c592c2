//! OBD-II PID Definitions and Response Decoding
//!
//! Mode 01 parameter table with the standard SAE J1979 scaling formulas.

use crate::sample::Reading;

/// Linear decoding formula applied to the data bytes of a response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Formula {
    /// One data byte `A`: `A * scale + offset`
    Byte { scale: f64, offset: f64 },
    /// Two data bytes `A B`: `(A * 256 + B) * scale + offset`
    Word { scale: f64, offset: f64 },
}

impl Formula {
    const PERCENT: Formula = Formula::Byte { scale: 100.0 / 255.0, offset: 0.0 };
    const TEMPERATURE: Formula = Formula::Byte { scale: 1.0, offset: -40.0 };
    const FUEL_TRIM: Formula = Formula::Byte { scale: 100.0 / 128.0, offset: -100.0 };
    const RAW_BYTE: Formula = Formula::Byte { scale: 1.0, offset: 0.0 };
    const RAW_WORD: Formula = Formula::Word { scale: 1.0, offset: 0.0 };

    /// Number of data bytes the formula consumes
    pub fn response_bytes(&self) -> usize {
        match self {
            Formula::Byte { .. } => 1,
            Formula::Word { .. } => 2,
        }
    }

    /// Apply the formula; `None` when the response is too short
    pub fn apply(&self, bytes: &[u8]) -> Option<f64> {
        match *self {
            Formula::Byte { scale, offset } => {
                let a = *bytes.first()?;
                Some(f64::from(a) * scale + offset)
            }
            Formula::Word { scale, offset } => {
                let a = *bytes.first()?;
                let b = *bytes.get(1)?;
                Some((f64::from(a) * 256.0 + f64::from(b)) * scale + offset)
            }
        }
    }
}

/// Static description of one Mode 01 PID
#[derive(Debug, Clone, Copy)]
pub struct PidSpec {
    pub pid: u8,
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub formula: Formula,
}

const fn spec(
    pid: u8,
    name: &'static str,
    description: &'static str,
    unit: &'static str,
    formula: Formula,
) -> PidSpec {
    PidSpec { pid, name, description, unit, formula }
}

/// Numeric Mode 01 PIDs, in PID order
pub const MODE01: &[PidSpec] = &[
    spec(0x04, "ENGINE_LOAD", "Calculated Engine Load", "percent", Formula::PERCENT),
    spec(0x05, "COOLANT_TEMP", "Engine Coolant Temperature", "degC", Formula::TEMPERATURE),
    spec(0x06, "SHORT_FUEL_TRIM_1", "Short Term Fuel Trim - Bank 1", "percent", Formula::FUEL_TRIM),
    spec(0x07, "LONG_FUEL_TRIM_1", "Long Term Fuel Trim - Bank 1", "percent", Formula::FUEL_TRIM),
    spec(0x08, "SHORT_FUEL_TRIM_2", "Short Term Fuel Trim - Bank 2", "percent", Formula::FUEL_TRIM),
    spec(0x09, "LONG_FUEL_TRIM_2", "Long Term Fuel Trim - Bank 2", "percent", Formula::FUEL_TRIM),
    spec(0x0A, "FUEL_PRESSURE", "Fuel Pressure", "kPa", Formula::Byte { scale: 3.0, offset: 0.0 }),
    spec(0x0B, "INTAKE_PRESSURE", "Intake Manifold Pressure", "kPa", Formula::RAW_BYTE),
    spec(0x0C, "RPM", "Engine RPM", "rpm", Formula::Word { scale: 0.25, offset: 0.0 }),
    spec(0x0D, "SPEED", "Vehicle Speed", "kph", Formula::RAW_BYTE),
    spec(0x0E, "TIMING_ADVANCE", "Timing Advance", "degree", Formula::Byte { scale: 0.5, offset: -64.0 }),
    spec(0x0F, "INTAKE_TEMP", "Intake Air Temp", "degC", Formula::TEMPERATURE),
    spec(0x10, "MAF", "Air Flow Rate (MAF)", "gps", Formula::Word { scale: 0.01, offset: 0.0 }),
    spec(0x11, "THROTTLE_POS", "Throttle Position", "percent", Formula::PERCENT),
    spec(0x14, "O2_B1S1", "O2: Bank 1 - Sensor 1 Voltage", "volt", Formula::Byte { scale: 0.005, offset: 0.0 }),
    spec(0x15, "O2_B1S2", "O2: Bank 1 - Sensor 2 Voltage", "volt", Formula::Byte { scale: 0.005, offset: 0.0 }),
    spec(0x1F, "RUN_TIME", "Engine Run Time", "second", Formula::RAW_WORD),
    spec(0x21, "DISTANCE_W_MIL", "Distance Traveled with MIL on", "km", Formula::RAW_WORD),
    spec(0x22, "FUEL_RAIL_PRESSURE_VAC", "Fuel Rail Pressure (relative to vacuum)", "kPa", Formula::Word { scale: 0.079, offset: 0.0 }),
    spec(0x23, "FUEL_RAIL_PRESSURE_DIRECT", "Fuel Rail Pressure (direct inject)", "kPa", Formula::Word { scale: 10.0, offset: 0.0 }),
    spec(0x2C, "COMMANDED_EGR", "Commanded EGR", "percent", Formula::PERCENT),
    spec(0x2D, "EGR_ERROR", "EGR Error", "percent", Formula::FUEL_TRIM),
    spec(0x2E, "EVAPORATIVE_PURGE", "Commanded Evaporative Purge", "percent", Formula::PERCENT),
    spec(0x2F, "FUEL_LEVEL", "Fuel Level Input", "percent", Formula::PERCENT),
    spec(0x30, "WARMUPS_SINCE_DTC_CLEAR", "Number of warm-ups since codes cleared", "count", Formula::RAW_BYTE),
    spec(0x31, "DISTANCE_SINCE_DTC_CLEAR", "Distance traveled since codes cleared", "km", Formula::RAW_WORD),
    spec(0x33, "BAROMETRIC_PRESSURE", "Barometric Pressure", "kPa", Formula::RAW_BYTE),
    spec(0x3C, "CATALYST_TEMP_B1S1", "Catalyst Temperature: Bank 1 - Sensor 1", "degC", Formula::Word { scale: 0.1, offset: -40.0 }),
    spec(0x42, "CONTROL_MODULE_VOLTAGE", "Control module voltage", "volt", Formula::Word { scale: 0.001, offset: 0.0 }),
    spec(0x43, "ABSOLUTE_LOAD", "Absolute load value", "percent", Formula::Word { scale: 100.0 / 255.0, offset: 0.0 }),
    spec(0x44, "COMMANDED_EQUIV_RATIO", "Commanded equivalence ratio", "ratio", Formula::Word { scale: 2.0 / 65536.0, offset: 0.0 }),
    spec(0x45, "RELATIVE_THROTTLE_POS", "Relative throttle position", "percent", Formula::PERCENT),
    spec(0x46, "AMBIANT_AIR_TEMP", "Ambient air temperature", "degC", Formula::TEMPERATURE),
    spec(0x47, "THROTTLE_POS_B", "Absolute throttle position B", "percent", Formula::PERCENT),
    spec(0x49, "ACCELERATOR_POS_D", "Accelerator pedal position D", "percent", Formula::PERCENT),
    spec(0x4A, "ACCELERATOR_POS_E", "Accelerator pedal position E", "percent", Formula::PERCENT),
    spec(0x4C, "THROTTLE_ACTUATOR", "Commanded throttle actuator", "percent", Formula::PERCENT),
    spec(0x4D, "RUN_TIME_MIL", "Time run with MIL on", "minute", Formula::RAW_WORD),
    spec(0x4E, "TIME_SINCE_DTC_CLEARED", "Time since trouble codes cleared", "minute", Formula::RAW_WORD),
    spec(0x52, "ETHANOL_PERCENT", "Ethanol Fuel Percent", "percent", Formula::PERCENT),
    spec(0x5C, "OIL_TEMP", "Engine oil temperature", "degC", Formula::TEMPERATURE),
    spec(0x5E, "FUEL_RATE", "Engine fuel rate", "liters_per_hour", Formula::Word { scale: 0.05, offset: 0.0 }),
];

/// Look up the table entry for a Mode 01 PID
pub fn lookup(pid: u8) -> Option<&'static PidSpec> {
    MODE01.iter().find(|spec| spec.pid == pid)
}

/// Decode the data bytes of a Mode 01 response into a reading.
///
/// Returns `None` for unknown PIDs and short responses.
pub fn decode(pid: u8, bytes: &[u8]) -> Option<Reading> {
    let spec = lookup(pid)?;
    let value = spec.formula.apply(bytes)?;
    Some(Reading::new(value, spec.unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_decode() {
        // 1A 2B => ((0x1A * 256) + 0x2B) / 4 = 6699/4 = 1674.75
        let reading = decode(0x0C, &[0x1A, 0x2B]).unwrap();
        assert!((reading.value - 1674.75).abs() < 0.01);
        assert_eq!(reading.unit, "rpm");
    }

    #[test]
    fn test_coolant_temp_decode() {
        // 0x73 = 115, so temp = 115 - 40 = 75°C
        let reading = decode(0x05, &[0x73]).unwrap();
        assert!((reading.value - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_speed_decode() {
        let reading = decode(0x0D, &[0x55]).unwrap();
        assert!((reading.value - 85.0).abs() < 0.01);
    }

    #[test]
    fn test_fuel_trim_decode() {
        let reading = decode(0x06, &[0x80]).unwrap();
        assert!(reading.value.abs() < 0.01);

        // 0x90 = 144, so trim = (144-128)*100/128 = 12.5%
        let reading = decode(0x06, &[0x90]).unwrap();
        assert!((reading.value - 12.5).abs() < 0.01);
    }

    #[test]
    fn test_short_response_and_unknown_pid() {
        assert!(decode(0x0C, &[0x1A]).is_none());
        assert!(decode(0x00, &[0xBE, 0x1F, 0xA8, 0x13]).is_none());
    }

    #[test]
    fn test_table_has_unique_pids_and_names() {
        for (i, a) in MODE01.iter().enumerate() {
            for b in &MODE01[i + 1..] {
                assert_ne!(a.pid, b.pid);
                assert_ne!(a.name, b.name);
            }
        }
    }
}
