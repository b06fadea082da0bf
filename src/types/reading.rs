//! Decoded measurement types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::Parameter;

/// Physical unit of a [`Reading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// Revolutions per minute.
    Rpm,
    /// Kilometers per hour, as transmitted by the ECU.
    KilometersPerHour,
    /// Degrees Celsius.
    Celsius,
    /// Degrees Fahrenheit.
    Fahrenheit,
    /// Kilopascal.
    Kilopascal,
    /// Percent.
    Percent,
    /// Grams per second.
    GramsPerSecond,
    /// Volts.
    Volts,
}

impl Unit {
    /// Short display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Rpm => "rpm",
            Self::KilometersPerHour => "km/h",
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
            Self::Kilopascal => "kPa",
            Self::Percent => "%",
            Self::GramsPerSecond => "g/s",
            Self::Volts => "V",
        }
    }
}

/// Display unit applied to every temperature reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Converts a Celsius value into this unit.
    #[must_use]
    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            Self::Celsius => celsius,
            Self::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    /// The reading unit for this convention.
    #[must_use]
    pub const fn unit(self) -> Unit {
        match self {
            Self::Celsius => Unit::Celsius,
            Self::Fahrenheit => Unit::Fahrenheit,
        }
    }
}

/// One decoded physical measurement.
///
/// A failed decode produces no `Reading` at all; a `Reading` with value `0.0`
/// is always a real zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// What was measured.
    pub parameter: Parameter,
    /// Measured value in `unit`.
    pub value: f64,
    /// Unit of `value`.
    pub unit: Unit,
    /// True only for values produced by a simulator rather than the vehicle
    /// or adapter.
    pub simulated: bool,
}

impl Reading {
    /// Creates a measured (non-simulated) reading.
    #[must_use]
    pub const fn new(parameter: Parameter, value: f64, unit: Unit) -> Self {
        Self {
            parameter,
            value,
            unit,
            simulated: false,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.parameter, self.value, self.unit.symbol())?;
        if self.simulated {
            f.write_str(" (simulated)")?;
        }
        Ok(())
    }
}

/// Last-known value of every tracked parameter.
///
/// Fields are `None` until the parameter has been decoded at least once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveData {
    /// Time of the cycle that produced this snapshot (Unix ms).
    pub timestamp_ms: u64,
    /// Engine speed (rpm).
    pub rpm: Option<f64>,
    /// Vehicle speed (km/h).
    pub speed: Option<f64>,
    /// Coolant temperature, in the configured temperature unit.
    pub coolant_temp: Option<f64>,
    /// Fuel rail pressure (kPa).
    pub fuel_pressure: Option<f64>,
    /// Calculated engine load (%).
    pub engine_load: Option<f64>,
    /// Throttle position (%).
    pub throttle_position: Option<f64>,
    /// Intake air temperature, in the configured temperature unit.
    pub intake_air_temp: Option<f64>,
    /// Mass air flow (g/s).
    pub maf: Option<f64>,
    /// Fuel tank level (%).
    pub fuel_level: Option<f64>,
    /// Voltage at the adapter's OBD connector (V).
    pub battery_voltage: Option<f64>,
}

impl LiveData {
    /// Records a reading as the latest value for its parameter.
    pub fn apply(&mut self, reading: &Reading) {
        *self.slot_mut(reading.parameter) = Some(reading.value);
    }

    /// Returns the last-known value of `parameter`.
    #[must_use]
    pub const fn get(&self, parameter: Parameter) -> Option<f64> {
        match parameter {
            Parameter::EngineRpm => self.rpm,
            Parameter::VehicleSpeed => self.speed,
            Parameter::CoolantTemp => self.coolant_temp,
            Parameter::FuelPressure => self.fuel_pressure,
            Parameter::EngineLoad => self.engine_load,
            Parameter::ThrottlePosition => self.throttle_position,
            Parameter::IntakeAirTemp => self.intake_air_temp,
            Parameter::MafAirFlow => self.maf,
            Parameter::FuelLevel => self.fuel_level,
            Parameter::BatteryVoltage => self.battery_voltage,
        }
    }

    fn slot_mut(&mut self, parameter: Parameter) -> &mut Option<f64> {
        match parameter {
            Parameter::EngineRpm => &mut self.rpm,
            Parameter::VehicleSpeed => &mut self.speed,
            Parameter::CoolantTemp => &mut self.coolant_temp,
            Parameter::FuelPressure => &mut self.fuel_pressure,
            Parameter::EngineLoad => &mut self.engine_load,
            Parameter::ThrottlePosition => &mut self.throttle_position,
            Parameter::IntakeAirTemp => &mut self.intake_air_temp,
            Parameter::MafAirFlow => &mut self.maf,
            Parameter::FuelLevel => &mut self.fuel_level,
            Parameter::BatteryVoltage => &mut self.battery_voltage,
        }
    }
}
