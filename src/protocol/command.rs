//! ELM327 command vocabulary.
//!
//! Commands are plain ASCII: either an `AT` configuration command or an
//! OBD-II request written as hex pairs (`010C` = mode 01, PID 0C). Every
//! command is terminated by a carriage return on the wire.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Command terminator.
pub const CR: u8 = b'\r';

/// Prompt byte the adapter prints when it is ready for the next command.
pub const PROMPT: u8 = b'>';

/// SAE J1979 request modes used by this crate.
pub mod mode {
    /// Current powertrain data.
    pub const CURRENT_DATA: u8 = 0x01;
    /// Stored diagnostic trouble codes.
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes and stored values.
    pub const CLEAR_DTC: u8 = 0x04;

    /// Positive responses echo the request mode plus `0x40`.
    #[must_use]
    pub const fn positive_response(mode: u8) -> u8 {
        mode + 0x40
    }
}

/// AT commands understood by every ELM327 clone.
pub mod at {
    /// Full reset; the adapter answers with its version banner.
    pub const RESET: &str = "ATZ";
    /// Stop echoing received commands.
    pub const ECHO_OFF: &str = "ATE0";
    /// Stop emitting line feeds after carriage returns.
    pub const LINEFEEDS_OFF: &str = "ATL0";
    /// Stop separating hex bytes with spaces.
    pub const SPACES_OFF: &str = "ATS0";
    /// Read the voltage at the OBD connector's battery pin.
    pub const READ_VOLTAGE: &str = "ATRV";
}

/// One textual command, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Creates a command from free text. Surrounding whitespace and any
    /// trailing terminator are removed; the text is upper-cased.
    #[must_use]
    pub fn new(text: impl AsRef<str>) -> Self {
        Self(text.as_ref().trim().to_ascii_uppercase())
    }

    /// A mode + PID request such as `010C`.
    #[must_use]
    pub fn pid(mode: u8, pid: u8) -> Self {
        Self(format!("{mode:02X}{pid:02X}"))
    }

    /// Mode 03: read stored trouble codes.
    #[must_use]
    pub fn read_codes() -> Self {
        Self(format!("{:02X}", mode::READ_DTC))
    }

    /// Mode 04: clear trouble codes.
    #[must_use]
    pub fn clear_codes() -> Self {
        Self(format!("{:02X}", mode::CLEAR_DTC))
    }

    /// The command text without terminator.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encodes the command for the wire, appending the terminator.
    #[must_use]
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.0.len() + 1);
        buf.put_slice(self.0.as_bytes());
        buf.put_u8(CR);
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// OBD-II bus protocols selectable with `ATSP`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// The `ATSPn` command selecting this protocol.
    #[must_use]
    pub const fn to_elm_command(self) -> &'static str {
        match self {
            Self::Auto => "ATSP0",
            Self::J1850Pwm => "ATSP1",
            Self::J1850Vpw => "ATSP2",
            Self::Iso9141_2 => "ATSP3",
            Self::Iso14230_4Kwp => "ATSP4",
            Self::Iso14230_4KwpFast => "ATSP5",
            Self::Iso15765_4Can11bit500 => "ATSP6",
            Self::Iso15765_4Can29bit500 => "ATSP7",
            Self::Iso15765_4Can11bit250 => "ATSP8",
            Self::Iso15765_4Can29bit250 => "ATSP9",
        }
    }
}
