//! # obd-ble
//!
//! An async client for ELM327-class OBD-II adapters over Bluetooth Low Energy.
//!
//! The library discovers adapters, holds a single BLE link, brings the
//! adapter into a known state, and polls live engine parameters and stored
//! trouble codes. Rendering and persistence are left to the host, which
//! consumes values and events.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Explicit connection state machine with cooperative cancellation
//! - Strictly serialized command/response exchange
//! - Pure decoders for Mode 01 parameters and Mode 03 trouble codes
//! - Event-driven notifications for state, readings and errors
//!
//! ## Quick Start
//!
//! ```no_run
//! use obd_ble::{ClientConfig, Event, ObdClient, Parameter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), obd_ble::Error> {
//!     // The simulator stands in for a real adapter; enable the `ble`
//!     // feature and use `ObdClient::bluetooth` for hardware.
//!     let client = ObdClient::mock();
//!     let mut events = client.subscribe(None);
//!
//!     let devices = client.discover(std::time::Duration::from_secs(5)).await?;
//!     let Some(adapter) = devices.first() else {
//!         return Ok(());
//!     };
//!     client.connect(adapter).await?;
//!
//!     let rpm = client.read(Parameter::EngineRpm).await?;
//!     println!("RPM: {rpm:?}");
//!
//!     for code in client.read_trouble_codes().await? {
//!         println!("{code}");
//!     }
//!
//!     while let Some(event) = events.recv().await {
//!         if let Event::Snapshot(data) = event {
//!             println!("{data:?}");
//!             break;
//!         }
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`transport`] - BLE seam, connection state machine, adapter simulator
//! - [`channel`] - One-at-a-time command/response exchange
//! - [`init`] - ELM327 setup handshake
//! - [`poller`] - Cyclic parameter acquisition
//! - [`protocol`] - Command text, response cleanup, PID and DTC decoding
//! - [`types`] - Devices, readings, trouble codes
//! - [`event`] - Async event system for notifications
//! - [`client`] - High-level [`ObdClient`]
//!
//! [`ClientConfig`] is re-exported at the root.

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod init;
pub mod poller;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use channel::CommandChannel;
pub use client::ObdClient;
pub use config::ClientConfig;
pub use error::{Error, ErrorKind, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use init::InitStep;
pub use protocol::{Command, ObdProtocol, Parameter, RawResponse};
pub use transport::{BleBackend, BleLink, MockBackend, Transport};
pub use types::{
    AdapterDevice, CharacteristicInfo, ConnectionState, LiveData, Reading, Severity,
    TemperatureUnit, TroubleCode, Unit,
};

#[cfg(feature = "ble")]
pub use transport::BtleBackend;
