//! Data types for OBD-II link entities.
//!
//! This module contains the value types handed across the crate boundary:
//! - Adapter identity and link state
//! - Decoded readings and the live-data snapshot
//! - Diagnostic trouble codes

pub mod device;
pub mod reading;
pub mod trouble;

pub use device::{AdapterDevice, CharacteristicInfo, ConnectionState, select_command_characteristic};
pub use reading::{LiveData, Reading, TemperatureUnit, Unit};
pub use trouble::{Severity, TroubleCode};
