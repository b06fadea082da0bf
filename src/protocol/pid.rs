//! OBD-II parameter definitions and Mode 01 response decoding.
//!
//! Decoding is a pure function of the parameter and the cleaned response
//! text. A response that lacks the positive-response marker, carries too few
//! data bytes, or is an adapter error decodes to `None`; it never yields a
//! placeholder value.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::command::{Command, at, mode};
use crate::protocol::response::{RawResponse, payload_after};
use crate::types::{Reading, TemperatureUnit, Unit};

/// A measurable quantity.
///
/// All variants except [`Parameter::BatteryVoltage`] are Mode 01 PIDs; the
/// battery voltage is measured by the adapter itself (`ATRV`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    /// Calculated engine load (0x04)
    EngineLoad,
    /// Engine coolant temperature (0x05)
    CoolantTemp,
    /// Fuel pressure, gauge (0x0A)
    FuelPressure,
    /// Engine RPM (0x0C)
    EngineRpm,
    /// Vehicle speed (0x0D)
    VehicleSpeed,
    /// Intake air temperature (0x0F)
    IntakeAirTemp,
    /// Mass air flow rate (0x10)
    MafAirFlow,
    /// Throttle position (0x11)
    ThrottlePosition,
    /// Fuel tank level input (0x2F)
    FuelLevel,
    /// Voltage at the OBD connector, read with `ATRV`
    BatteryVoltage,
}

impl Parameter {
    /// Every parameter this crate can decode.
    pub const ALL: [Self; 10] = [
        Self::EngineLoad,
        Self::CoolantTemp,
        Self::FuelPressure,
        Self::EngineRpm,
        Self::VehicleSpeed,
        Self::IntakeAirTemp,
        Self::MafAirFlow,
        Self::ThrottlePosition,
        Self::FuelLevel,
        Self::BatteryVoltage,
    ];

    /// The Mode 01 PID, or `None` for adapter-measured values.
    #[must_use]
    pub const fn pid(self) -> Option<u8> {
        match self {
            Self::EngineLoad => Some(0x04),
            Self::CoolantTemp => Some(0x05),
            Self::FuelPressure => Some(0x0A),
            Self::EngineRpm => Some(0x0C),
            Self::VehicleSpeed => Some(0x0D),
            Self::IntakeAirTemp => Some(0x0F),
            Self::MafAirFlow => Some(0x10),
            Self::ThrottlePosition => Some(0x11),
            Self::FuelLevel => Some(0x2F),
            Self::BatteryVoltage => None,
        }
    }

    /// Number of data bytes following the PID echo.
    #[must_use]
    pub const fn data_bytes(self) -> usize {
        match self {
            Self::EngineRpm | Self::MafAirFlow => 2,
            Self::BatteryVoltage => 0,
            _ => 1,
        }
    }

    /// The command that requests this parameter.
    #[must_use]
    pub fn command(self) -> Command {
        match self.pid() {
            Some(pid) => Command::pid(mode::CURRENT_DATA, pid),
            None => Command::new(at::READ_VOLTAGE),
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EngineLoad => "engine load",
            Self::CoolantTemp => "coolant temperature",
            Self::FuelPressure => "fuel pressure",
            Self::EngineRpm => "engine rpm",
            Self::VehicleSpeed => "vehicle speed",
            Self::IntakeAirTemp => "intake air temperature",
            Self::MafAirFlow => "mass air flow",
            Self::ThrottlePosition => "throttle position",
            Self::FuelLevel => "fuel level",
            Self::BatteryVoltage => "battery voltage",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decodes the adapter's reply to [`Parameter::command`].
#[must_use]
pub fn decode(
    parameter: Parameter,
    response: &RawResponse,
    temperature: TemperatureUnit,
) -> Option<Reading> {
    if response.is_negative() {
        return None;
    }
    let Some(pid) = parameter.pid() else {
        return decode_voltage(response);
    };

    let marker = format!("{:02X}{pid:02X}", mode::positive_response(mode::CURRENT_DATA));
    let data = response
        .hex_lines()
        .find_map(|line| payload_after(&line, &marker))?;
    decode_data(parameter, &data, temperature)
}

/// Applies the PID formula to the data bytes following the PID echo.
///
/// Returns `None` if fewer bytes than the PID defines are present.
#[must_use]
pub fn decode_data(parameter: Parameter, data: &[u8], temperature: TemperatureUnit) -> Option<Reading> {
    if data.len() < parameter.data_bytes() {
        return None;
    }
    let a = data.first().copied().map_or(0.0, f64::from);
    let b = data.get(1).copied().map_or(0.0, f64::from);

    let (value, unit) = match parameter {
        // ((A*256)+B)/4
        Parameter::EngineRpm => ((a * 256.0 + b) / 4.0, Unit::Rpm),
        // A, as transmitted
        Parameter::VehicleSpeed => (a, Unit::KilometersPerHour),
        // A-40 in Celsius, then the configured unit
        Parameter::CoolantTemp | Parameter::IntakeAirTemp => {
            (temperature.from_celsius(a - 40.0), temperature.unit())
        }
        // A*3
        Parameter::FuelPressure => (a * 3.0, Unit::Kilopascal),
        // round(A*100/255), in [0,100] for any byte
        Parameter::EngineLoad => ((a * 100.0 / 255.0).round(), Unit::Percent),
        // A*100/255
        Parameter::ThrottlePosition | Parameter::FuelLevel => (a * 100.0 / 255.0, Unit::Percent),
        // ((A*256)+B)/100
        Parameter::MafAirFlow => ((a * 256.0 + b) / 100.0, Unit::GramsPerSecond),
        Parameter::BatteryVoltage => return None,
    };
    Some(Reading::new(parameter, value, unit))
}

/// Parses an `ATRV` reply such as `12.6V`.
fn decode_voltage(response: &RawResponse) -> Option<Reading> {
    response.lines().iter().find_map(|line| {
        let volts: f64 = line
            .trim()
            .trim_end_matches(['V', 'v'])
            .trim()
            .parse()
            .ok()?;
        (volts.is_finite() && volts >= 0.0)
            .then(|| Reading::new(Parameter::BatteryVoltage, volts, Unit::Volts))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reply(parameter: Parameter, text: &str) -> RawResponse {
        RawResponse::from_text(text, &parameter.command())
    }

    fn value(parameter: Parameter, text: &str) -> Option<f64> {
        decode(parameter, &reply(parameter, text), TemperatureUnit::Celsius).map(|r| r.value)
    }

    #[test]
    fn test_rpm_decode() {
        // ((0x1A * 256) + 0xF8) / 4 = 6904 / 4 = 1726
        assert_eq!(value(Parameter::EngineRpm, "410C1AF8\r"), Some(1726.0));
        assert_eq!(value(Parameter::EngineRpm, "41 0C 1A F8\r"), Some(1726.0));
    }

    #[test]
    fn test_speed_decode() {
        assert_eq!(value(Parameter::VehicleSpeed, "410D55\r"), Some(85.0));
        // A real zero is a reading, not an absence.
        assert_eq!(value(Parameter::VehicleSpeed, "410D00\r"), Some(0.0));
    }

    #[test]
    fn test_coolant_decode_in_both_units() {
        let response = reply(Parameter::CoolantTemp, "410573\r");
        let celsius = decode(Parameter::CoolantTemp, &response, TemperatureUnit::Celsius).unwrap();
        assert!((celsius.value - 75.0).abs() < 0.01);
        assert_eq!(celsius.unit, Unit::Celsius);

        let fahrenheit =
            decode(Parameter::CoolantTemp, &response, TemperatureUnit::Fahrenheit).unwrap();
        assert!((fahrenheit.value - 167.0).abs() < 0.01);
        assert_eq!(fahrenheit.unit, Unit::Fahrenheit);
    }

    #[test]
    fn test_fuel_pressure_decode() {
        assert_eq!(value(Parameter::FuelPressure, "410A64\r"), Some(300.0));
    }

    #[test]
    fn test_engine_load_bounds() {
        assert_eq!(value(Parameter::EngineLoad, "4104FF\r"), Some(100.0));
        assert_eq!(value(Parameter::EngineLoad, "410400\r"), Some(0.0));
        assert_eq!(value(Parameter::EngineLoad, "410480\r"), Some(50.0));
    }

    #[test]
    fn test_maf_decode() {
        assert_eq!(value(Parameter::MafAirFlow, "41100190\r"), Some(4.0));
    }

    #[test]
    fn test_missing_marker_is_none() {
        assert_eq!(value(Parameter::EngineRpm, "NO DATA\r"), None);
        assert_eq!(value(Parameter::EngineRpm, "410D1AF8\r"), None);
        assert_eq!(value(Parameter::EngineRpm, "OK\r"), None);
        assert_eq!(value(Parameter::EngineRpm, ""), None);
    }

    #[test]
    fn test_short_payload_is_none() {
        assert_eq!(value(Parameter::EngineRpm, "410C1A\r"), None);
        assert_eq!(value(Parameter::VehicleSpeed, "410D\r"), None);
    }

    #[test]
    fn test_searching_prefix_is_ignored() {
        assert_eq!(
            value(Parameter::EngineRpm, "SEARCHING...\r410C1AF8\r"),
            Some(1726.0)
        );
    }

    #[test]
    fn test_battery_voltage() {
        let reading = decode(
            Parameter::BatteryVoltage,
            &reply(Parameter::BatteryVoltage, "12.6V\r"),
            TemperatureUnit::Celsius,
        )
        .unwrap();
        assert!((reading.value - 12.6).abs() < f64::EPSILON);
        assert_eq!(reading.unit, Unit::Volts);
        assert!(!reading.simulated);
        assert_eq!(value(Parameter::BatteryVoltage, "?\r"), None);
    }

    #[test]
    fn test_commands() {
        assert_eq!(Parameter::EngineRpm.command().as_str(), "010C");
        assert_eq!(Parameter::FuelLevel.command().as_str(), "012F");
        assert_eq!(Parameter::BatteryVoltage.command().as_str(), "ATRV");
    }

    proptest! {
        #[test]
        fn prop_never_panics(text in "\\PC{0,40}") {
            for parameter in Parameter::ALL {
                let _ = value(parameter, &text);
            }
        }

        #[test]
        fn prop_no_marker_no_reading(text in "[0-9A-F ]{0,24}") {
            prop_assume!(!text.replace(' ', "").contains("41"));
            for parameter in Parameter::ALL.into_iter().filter(|p| p.pid().is_some()) {
                prop_assert_eq!(value(parameter, &text), None);
            }
        }

        #[test]
        fn prop_engine_load_in_range(byte in any::<u8>()) {
            let reading = decode_data(Parameter::EngineLoad, &[byte], TemperatureUnit::Celsius).unwrap();
            prop_assert!((0.0..=100.0).contains(&reading.value));
        }
    }
}
