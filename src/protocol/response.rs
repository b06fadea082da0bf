//! Response assembly and cleanup for the ELM327 text protocol.
//!
//! The adapter answers every command with ASCII text terminated by a prompt:
//! ```text
//! [echo\r] line\r [line\r ...] \r >
//! ```
//! Notifications may split this anywhere, so bytes are accumulated until the
//! prompt arrives.

use bytes::{Buf, BytesMut};

use crate::protocol::command::{Command, PROMPT};

/// Replies the adapter uses instead of data.
const NEGATIVE_REPLIES: &[&str] = &[
    "?",
    "NO DATA",
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS ERROR",
    "BUS BUSY",
    "STOPPED",
    "ERROR",
];

/// Accumulates notification chunks until a complete response is available.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    buffer: BytesMut,
}

impl ResponseAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds received bytes. NUL padding some clones emit is dropped.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer
            .extend(data.iter().copied().filter(|&b| b != 0));
    }

    /// Returns the text before the next prompt, consuming it and the prompt.
    ///
    /// Returns `None` if no prompt has been received yet.
    pub fn take(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == PROMPT)?;
        let body = self.buffer.split_to(end);
        self.buffer.advance(1);
        Some(String::from_utf8_lossy(&body).into_owned())
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// A response with echo, prompt and blank lines removed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    lines: Vec<String>,
}

impl RawResponse {
    /// Cleans the text the adapter sent in reply to `command`.
    #[must_use]
    pub fn from_text(text: &str, command: &Command) -> Self {
        let mut lines: Vec<String> = text
            .split(['\r', '\n'])
            .map(|line| line.trim().trim_end_matches(char::from(PROMPT)).trim())
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        // Echo is on after a reset until ATE0 takes effect.
        if lines
            .first()
            .is_some_and(|first| first.eq_ignore_ascii_case(command.as_str()))
        {
            lines.remove(0);
        }

        Self { lines }
    }

    /// The non-empty response lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The response as a single string, lines separated by `\n`.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Returns true if the adapter answered with an error or no-data reply.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.lines.iter().any(|line| {
            let upper = line.to_ascii_uppercase();
            NEGATIVE_REPLIES
                .iter()
                .any(|reply| upper == *reply || (reply.len() > 1 && upper.contains(reply)))
        })
    }

    /// Lines that consist solely of hex digits once whitespace is removed,
    /// upper-cased. Status lines such as `SEARCHING...` are skipped.
    pub fn hex_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.lines.iter().filter_map(|line| normalize_hex(line))
    }
}

/// Removes whitespace and upper-cases; `None` unless the result is non-empty hex.
#[must_use]
pub fn normalize_hex(line: &str) -> Option<String> {
    let normalized: String = line
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if !normalized.is_empty() && normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(normalized)
    } else {
        None
    }
}

/// Finds `marker` (a hex string) at a byte-aligned offset of `hex` and
/// decodes everything after it.
#[must_use]
pub fn payload_after(hex: &str, marker: &str) -> Option<Vec<u8>> {
    let (hex, marker) = (hex.as_bytes(), marker.as_bytes());
    let mut offset = 0;
    while offset + marker.len() <= hex.len() {
        if hex[offset..].starts_with(marker) {
            let rest = &hex[offset + marker.len()..];
            let even = rest.len() - rest.len() % 2;
            return hex::decode(&rest[..even]).ok();
        }
        offset += 2;
    }
    None
}
