//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{ObdProtocol, Parameter};
use crate::types::TemperatureUnit;

/// Default scan duration.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit for establishing the link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for one command's response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default wait for the `ATZ` banner; a reset takes longer than other commands.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay after each initialization command.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Default delay between clearing codes and reading them back.
pub const DEFAULT_CLEAR_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Default poll cycle interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default event buffer per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Advertised-name fragments of known OBD-II adapters.
pub const KNOWN_ADAPTER_NAMES: &[&str] = &[
    "ELM327",
    "OBDII",
    "OBD-II",
    "OBD2",
    "OBD",
    "VLINK",
    "VEEPEAK",
    "KONNWEI",
    "VGATE",
    "ICAR",
    "BAFX",
    "CARISTA",
    "IOS-VLINK",
    "ANDROID-VLINK",
];

/// Parameters polled by default, in polling order.
pub const DEFAULT_TRACKED: &[Parameter] = &[
    Parameter::EngineRpm,
    Parameter::VehicleSpeed,
    Parameter::CoolantTemp,
    Parameter::FuelPressure,
    Parameter::EngineLoad,
    Parameter::BatteryVoltage,
];

/// Configuration for [`ObdClient`](crate::ObdClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How long a scan runs before stopping on its own.
    pub scan_timeout: Duration,
    /// Limit for establishing the link and resolving characteristics.
    pub connect_timeout: Duration,
    /// Wait for one command's response.
    pub response_timeout: Duration,
    /// Wait for the reset banner during initialization.
    pub reset_timeout: Duration,
    /// Delay after each initialization command.
    pub settle_delay: Duration,
    /// Delay between clearing codes and reading them back.
    pub clear_settle_delay: Duration,
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Name fragments identifying adapters during a scan.
    pub adapter_names: Vec<String>,
    /// Bus protocol selected at the end of initialization.
    pub protocol: ObdProtocol,
    /// Unit for every temperature reading.
    pub temperature_unit: TemperatureUnit,
    /// Parameters read each poll cycle, in order.
    pub tracked: Vec<Parameter>,
    /// Start polling as soon as the link is ready.
    pub poll_on_connect: bool,
    /// Event buffer per subscriber.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            clear_settle_delay: DEFAULT_CLEAR_SETTLE_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            adapter_names: KNOWN_ADAPTER_NAMES.iter().map(|&s| s.to_owned()).collect(),
            protocol: ObdProtocol::Auto,
            temperature_unit: TemperatureUnit::Celsius,
            tracked: DEFAULT_TRACKED.to_vec(),
            poll_on_connect: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan duration.
    #[must_use]
    pub const fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-command response timeout.
    #[must_use]
    pub const fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Sets the reset banner timeout.
    #[must_use]
    pub const fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets the inter-command settle delay used during initialization.
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the delay between clearing and re-reading codes.
    #[must_use]
    pub const fn clear_settle_delay(mut self, delay: Duration) -> Self {
        self.clear_settle_delay = delay;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replaces the adapter name fragments matched during scans.
    #[must_use]
    pub fn adapter_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.adapter_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the bus protocol.
    #[must_use]
    pub const fn protocol(mut self, protocol: ObdProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the temperature unit.
    #[must_use]
    pub const fn temperature_unit(mut self, unit: TemperatureUnit) -> Self {
        self.temperature_unit = unit;
        self
    }

    /// Sets the polled parameters, in polling order.
    #[must_use]
    pub fn tracked(mut self, parameters: impl Into<Vec<Parameter>>) -> Self {
        self.tracked = parameters.into();
        self
    }

    /// Sets whether polling starts once the link is ready.
    #[must_use]
    pub const fn poll_on_connect(mut self, enabled: bool) -> Self {
        self.poll_on_connect = enabled;
        self
    }

    /// Sets the event buffer per subscriber.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
