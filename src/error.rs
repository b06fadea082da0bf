//! Error types for the obd-ble library.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::init::InitStep;

/// The main error type for adapter operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The OS has not granted the Bluetooth permissions scanning requires.
    #[error("bluetooth permission denied")]
    PermissionDenied,

    /// No Bluetooth adapter is present, or the radio is powered off.
    #[error("bluetooth unavailable")]
    BluetoothUnavailable,

    /// The link could not be established in time.
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// The peripheral exposes no characteristic we can write commands to.
    #[error("no writable characteristic found")]
    NoWritableCharacteristic,

    /// A step of the ELM327 setup handshake failed.
    #[error("initialization failed at {step}: {source}")]
    InitializationFailed {
        step: InitStep,
        #[source]
        source: Box<Error>,
    },

    /// Another command is already in flight on the channel.
    #[error("command channel busy")]
    ChannelBusy,

    /// The adapter did not answer within the response timeout.
    #[error("response timed out after {timeout_ms}ms")]
    ResponseTimeout { timeout_ms: u64 },

    /// The link is gone or was never established.
    #[error("link lost")]
    LinkLost,

    /// Operation not allowed in the current connection state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Unclassified failure reported by the platform BLE stack.
    #[error("bluetooth backend error: {message}")]
    Backend { message: String },
}

impl Error {
    /// Returns the notification-level kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::BluetoothUnavailable => ErrorKind::BluetoothUnavailable,
            Self::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Self::NoWritableCharacteristic => ErrorKind::NoWritableCharacteristic,
            Self::InitializationFailed { .. } => ErrorKind::InitializationFailed,
            Self::ChannelBusy => ErrorKind::ChannelBusy,
            Self::ResponseTimeout { .. } => ErrorKind::ResponseTimeout,
            Self::LinkLost => ErrorKind::LinkLost,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Backend { .. } => ErrorKind::Backend,
        }
    }

    pub(crate) fn connect_timeout(timeout: std::time::Duration) -> Self {
        Self::ConnectTimeout {
            timeout_ms: millis(timeout),
        }
    }

    pub(crate) fn response_timeout(timeout: std::time::Duration) -> Self {
        Self::ResponseTimeout {
            timeout_ms: millis(timeout),
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Error classification carried by [`Event::Error`](crate::Event::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    BluetoothUnavailable,
    ConnectTimeout,
    NoWritableCharacteristic,
    InitializationFailed,
    ChannelBusy,
    ResponseTimeout,
    LinkLost,
    InvalidState,
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result type alias for obd-ble operations.
pub type Result<T> = std::result::Result<T, Error>;
