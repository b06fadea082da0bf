//! Mode 03 trouble-code decoding.
//!
//! A positive reply is the marker `43` followed by two-byte groups:
//! ```text
//! F = [cc dd nnnn]   S = [nnnnnnnn]
//!      |  |   |           |
//!      |  |   |           +-- 4th/5th digits (hex)
//!      |  |   +-------------- 3rd digit (hex)
//!      |  +------------------ 2nd digit
//!      +--------------------- category: P, C, B, U
//! ```
//! CAN adapters insert a code-count byte after the marker; it is detected by
//! the odd byte count and skipped.

use crate::protocol::command::mode;
use crate::protocol::response::{RawResponse, payload_after};
use crate::types::{Severity, TroubleCode};

/// The all-zero slot, meaning "no code here".
pub const EMPTY_CODE: &str = "P0000";

const CATEGORIES: [char; 4] = ['P', 'C', 'B', 'U'];

/// Well-known code descriptions.
const DESCRIPTIONS: &[(&str, &str)] = &[
    ("P0100", "Mass or Volume Air Flow Circuit Malfunction"),
    ("P0101", "Mass or Volume Air Flow Circuit Range/Performance Problem"),
    ("P0106", "Manifold Absolute Pressure/Barometric Pressure Circuit Range/Performance Problem"),
    ("P0110", "Intake Air Temperature Circuit Malfunction"),
    ("P0115", "Engine Coolant Temperature Circuit Malfunction"),
    ("P0120", "Throttle Position Sensor/Switch A Circuit Malfunction"),
    ("P0128", "Coolant Thermostat (Coolant Temperature Below Thermostat Regulating Temperature)"),
    ("P0130", "O2 Sensor Circuit Malfunction (Bank 1 Sensor 1)"),
    ("P0133", "O2 Sensor Circuit Slow Response (Bank 1 Sensor 1)"),
    ("P0171", "System Too Lean (Bank 1)"),
    ("P0172", "System Too Rich (Bank 1)"),
    ("P0174", "System Too Lean (Bank 2)"),
    ("P0175", "System Too Rich (Bank 2)"),
    ("P0217", "Engine Overheat Condition"),
    ("P0219", "Engine Overspeed Condition"),
    ("P0300", "Random/Multiple Cylinder Misfire Detected"),
    ("P0301", "Cylinder 1 Misfire Detected"),
    ("P0302", "Cylinder 2 Misfire Detected"),
    ("P0303", "Cylinder 3 Misfire Detected"),
    ("P0304", "Cylinder 4 Misfire Detected"),
    ("P0305", "Cylinder 5 Misfire Detected"),
    ("P0306", "Cylinder 6 Misfire Detected"),
    ("P0325", "Knock Sensor 1 Circuit Malfunction"),
    ("P0335", "Crankshaft Position Sensor A Circuit Malfunction"),
    ("P0340", "Camshaft Position Sensor Circuit Malfunction"),
    ("P0401", "Exhaust Gas Recirculation Flow Insufficient Detected"),
    ("P0420", "Catalyst System Efficiency Below Threshold (Bank 1)"),
    ("P0430", "Catalyst System Efficiency Below Threshold (Bank 2)"),
    ("P0440", "Evaporative Emission Control System Malfunction"),
    ("P0442", "Evaporative Emission Control System Leak Detected (Small Leak)"),
    ("P0455", "Evaporative Emission Control System Leak Detected (Gross Leak)"),
    ("P0500", "Vehicle Speed Sensor Malfunction"),
    ("P0505", "Idle Control System Malfunction"),
    ("P0520", "Engine Oil Pressure Sensor/Switch Circuit Malfunction"),
    ("P0524", "Engine Oil Pressure Too Low"),
    ("P0562", "System Voltage Low"),
    ("P0563", "System Voltage High"),
    ("P0600", "Serial Communication Link Malfunction"),
    ("P0700", "Transmission Control System Malfunction"),
    ("P0705", "Transmission Range Sensor Circuit Malfunction"),
    ("C0035", "Left Front Wheel Speed Sensor Circuit"),
    ("U0100", "Lost Communication With ECM/PCM A"),
];

/// Codes classified as high severity.
const HIGH_SEVERITY: &[&str] = &[
    "P0217", "P0219", "P0300", "P0301", "P0302", "P0303", "P0304", "P0305", "P0306", "P0335",
    "P0524", "P0600", "U0100",
];

/// Codes classified as medium severity.
const MEDIUM_SEVERITY: &[&str] = &[
    "P0100", "P0101", "P0106", "P0115", "P0120", "P0128", "P0171", "P0172", "P0174", "P0175",
    "P0325", "P0340", "P0401", "P0420", "P0430", "P0500", "P0505", "P0520", "P0562", "P0563",
    "P0700", "P0705", "C0035",
];

/// Renders one two-byte group as a five-character code.
#[must_use]
pub fn code_from_bytes(first: u8, second: u8) -> String {
    let category = CATEGORIES[usize::from(first >> 6)];
    let digit2 = (first % 64) / 16;
    let digit3 = first % 16;
    format!("{category}{digit2}{digit3:X}{second:02X}")
}

/// Looks up a description; unknown codes get a generic label naming the code.
#[must_use]
pub fn describe(code: &str) -> String {
    DESCRIPTIONS
        .iter()
        .find(|(known, _)| *known == code)
        .map_or_else(
            || format!("Unknown trouble code {code}"),
            |(_, description)| (*description).to_string(),
        )
}

/// Classifies a code by list membership; anything unlisted is low.
#[must_use]
pub fn severity(code: &str) -> Severity {
    if HIGH_SEVERITY.contains(&code) {
        Severity::High
    } else if MEDIUM_SEVERITY.contains(&code) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Builds a [`TroubleCode`] for a code string.
#[must_use]
pub fn trouble_code(code: String) -> TroubleCode {
    TroubleCode {
        description: describe(&code),
        severity: severity(&code),
        code,
    }
}

/// Decodes a Mode 03 reply. Empty slots and duplicates are dropped; a
/// negative or unrecognised reply yields an empty list.
#[must_use]
pub fn decode(response: &RawResponse) -> Vec<TroubleCode> {
    if response.is_negative() {
        return Vec::new();
    }
    let marker = format!("{:02X}", mode::positive_response(mode::READ_DTC));
    let mut codes: Vec<TroubleCode> = Vec::new();

    for line in response.hex_lines() {
        let Some(mut payload) = payload_after(&line, &marker) else {
            continue;
        };
        if payload.len() % 2 == 1 {
            payload.remove(0);
        }
        for group in payload.chunks_exact(2) {
            let code = code_from_bytes(group[0], group[1]);
            if code == EMPTY_CODE || codes.iter().any(|c| c.code == code) {
                continue;
            }
            codes.push(trouble_code(code));
        }
    }

    tracing::debug!("decoded {} trouble codes", codes.len());
    codes
}
