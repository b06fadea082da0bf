//! Adapter identity and link state types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDevice {
    /// Opaque platform identifier (MAC address on Linux/Windows, UUID on macOS).
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl AdapterDevice {
    /// Creates a device entry with only an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
        }
    }

    /// Sets the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the signal strength.
    #[must_use]
    pub const fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Returns true if the advertised name contains one of `known`
    /// (case-insensitive substring match).
    #[must_use]
    pub fn matches_any(&self, known: &[String]) -> bool {
        let Some(name) = &self.name else {
            return false;
        };
        let name = name.to_ascii_uppercase();
        known
            .iter()
            .any(|pattern| name.contains(&pattern.to_ascii_uppercase()))
    }
}

/// A GATT characteristic as reported by the platform after service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: String,
    /// Supports write-with-response.
    pub write: bool,
    /// Supports write-without-response.
    pub write_without_response: bool,
    /// Supports notifications or indications.
    pub notify: bool,
}

impl CharacteristicInfo {
    /// Returns true if commands can be written to this characteristic.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// Picks the characteristic used for command/response exchange.
///
/// Returns the first characteristic supporting write-with-response, falling
/// back to the first one supporting write-without-response.
#[must_use]
pub fn select_command_characteristic(
    characteristics: &[CharacteristicInfo],
) -> Option<&CharacteristicInfo> {
    characteristics
        .iter()
        .find(|c| c.write)
        .or_else(|| characteristics.iter().find(|c| c.write_without_response))
}

/// Link lifecycle state, owned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link and no scan.
    #[default]
    Idle,
    /// Discovering adapters.
    Scanning,
    /// Establishing the link and resolving characteristics.
    Connecting,
    /// Link up, running the setup handshake.
    Initializing,
    /// Accepting commands.
    Ready,
    /// Tearing down the link.
    Disconnecting,
    /// Link or handshake failed; carries the reason.
    Failed(String),
}

impl ConnectionState {
    /// Returns true if raw reads and writes are allowed.
    #[must_use]
    pub const fn has_link(&self) -> bool {
        matches!(self, Self::Ready | Self::Initializing)
    }

    /// Returns true if a new scan or connect may start from here.
    #[must_use]
    pub const fn is_resting(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Scanning => f.write_str("scanning"),
            Self::Connecting => f.write_str("connecting"),
            Self::Initializing => f.write_str("initializing"),
            Self::Ready => f.write_str("ready"),
            Self::Disconnecting => f.write_str("disconnecting"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristic(uuid: &str, write: bool, write_without_response: bool) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid: uuid.into(),
            write,
            write_without_response,
            notify: true,
        }
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let known = vec!["ELM327".to_string(), "OBD".to_string()];
        assert!(AdapterDevice::new("a").with_name("vLinker elm327").matches_any(&known));
        assert!(AdapterDevice::new("b").with_name("obdii").matches_any(&known));
        assert!(!AdapterDevice::new("c").with_name("Headphones").matches_any(&known));
        assert!(!AdapterDevice::new("d").matches_any(&known));
    }

    #[test]
    fn test_select_prefers_write_with_response() {
        let chars = vec![
            characteristic("fff1", false, false),
            characteristic("fff2", false, true),
            characteristic("fff3", true, false),
        ];
        assert_eq!(select_command_characteristic(&chars).unwrap().uuid, "fff3");
    }

    #[test]
    fn test_select_falls_back_to_write_without_response() {
        let chars = vec![
            characteristic("fff1", false, false),
            characteristic("fff2", false, true),
        ];
        assert_eq!(select_command_characteristic(&chars).unwrap().uuid, "fff2");
        assert!(select_command_characteristic(&chars[..1]).is_none());
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Ready.has_link());
        assert!(ConnectionState::Initializing.has_link());
        assert!(!ConnectionState::Connecting.has_link());
        assert!(ConnectionState::Failed("x".into()).is_resting());
        assert!(!ConnectionState::Scanning.is_resting());
        assert_eq!(ConnectionState::Failed("link lost".into()).to_string(), "failed (link lost)");
    }
}
