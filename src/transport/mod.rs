//! Transport layer for adapter communication.
//!
//! The platform Bluetooth stack is reached through two traits: a
//! [`BleBackend`] that scans and opens links, and the [`BleLink`] it returns.
//! [`Transport`] drives them through the connection state machine and is the
//! only owner of the resulting [`ConnectionHandle`].

pub mod mock;
pub mod session;

#[cfg(feature = "ble")]
pub mod btle;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{AdapterDevice, CharacteristicInfo};

/// Trait for platform BLE stacks.
pub trait BleBackend: Send + Sync + 'static {
    /// The link type produced by [`BleBackend::connect`].
    type Link: BleLink;

    /// Starts discovery and returns every advertisement seen, unfiltered.
    ///
    /// Fails with `BluetoothUnavailable` if the radio is off and with
    /// `PermissionDenied` if the OS refuses access.
    fn start_scan(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<BoxStream<'static, AdapterDevice>>> + Send + '_>>;

    /// Stops discovery. Stopping an idle scanner is not an error.
    fn stop_scan(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Connects to a peripheral and discovers its characteristics.
    fn connect(
        &self,
        device: AdapterDevice,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Link>> + Send + '_>>;
}

/// Trait for an established link to one peripheral.
pub trait BleLink: Send + Sync + 'static {
    /// Characteristics found during service discovery.
    fn characteristics(&self) -> Vec<CharacteristicInfo>;

    /// Routes writes to `command` and subscribes to the adapter's replies.
    ///
    /// The returned receiver yields raw notification chunks and closes when
    /// the link drops.
    fn bind(
        &mut self,
        command: CharacteristicInfo,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::UnboundedReceiver<Bytes>>> + Send + '_>>;

    /// Writes raw bytes to the bound characteristic.
    fn write(&self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Releases the link.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Everything the transport holds for one connected adapter.
pub struct ConnectionHandle<L> {
    /// The connected peripheral.
    pub device: AdapterDevice,
    /// The characteristic commands are written to.
    pub characteristic: CharacteristicInfo,
    /// The platform link.
    pub link: Arc<L>,
}

pub use mock::MockBackend;
pub use session::Transport;

#[cfg(feature = "ble")]
pub use btle::BtleBackend;
