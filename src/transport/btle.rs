//! [`BleBackend`] over the platform Bluetooth stack via `btleplug`.
//!
//! Compiled with the `ble` feature.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::{BleBackend, BleLink};
use crate::types::{AdapterDevice, CharacteristicInfo};

/// Backend bound to one host Bluetooth adapter.
pub struct BtleBackend {
    adapter: Adapter,
}

impl BtleBackend {
    /// Opens the first Bluetooth adapter on the system.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await.map_err(map_scan_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(map_scan_error)?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;
        Ok(Self { adapter })
    }

    /// Wraps an adapter chosen by the caller.
    #[must_use]
    pub const fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    async fn find(&self, id: &str) -> Result<Peripheral> {
        self.adapter
            .peripherals()
            .await
            .map_err(map_error)?
            .into_iter()
            .find(|p| p.id().to_string() == id)
            .ok_or_else(|| Error::Backend {
                message: format!("unknown peripheral {id}"),
            })
    }
}

impl BleBackend for BtleBackend {
    type Link = BtleLink;

    fn start_scan(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<BoxStream<'static, AdapterDevice>>> + Send + '_>> {
        Box::pin(async move {
            let events = self.adapter.events().await.map_err(map_scan_error)?;
            self.adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(map_scan_error)?;

            let adapter = self.adapter.clone();
            let adverts = events.filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                        _ => return None,
                    };
                    let peripheral = adapter.peripheral(&id).await.ok()?;
                    let properties = peripheral.properties().await.ok()??;
                    Some(AdapterDevice {
                        id: id.to_string(),
                        name: properties.local_name,
                        rssi: properties.rssi,
                    })
                }
            });
            Ok(adverts.boxed())
        })
    }

    fn stop_scan(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.adapter.stop_scan().await.map_err(map_error) })
    }

    fn connect(
        &self,
        device: AdapterDevice,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Link>> + Send + '_>> {
        Box::pin(async move {
            // Disarmed only once the link is handed over, so a timeout or
            // failure during discovery does not leave the peripheral up.
            let guard = DisconnectOnDrop {
                peripheral: self.find(&device.id).await?,
                armed: true,
            };
            let peripheral = &guard.peripheral;
            if !peripheral.is_connected().await.map_err(map_error)? {
                peripheral.connect().await.map_err(map_error)?;
            }
            peripheral.discover_services().await.map_err(map_error)?;

            let characteristics: Vec<Characteristic> =
                peripheral.characteristics().into_iter().collect();
            tracing::debug!(
                "{} exposes {} characteristics",
                device.id,
                characteristics.len()
            );
            Ok(BtleLink {
                adapter: self.adapter.clone(),
                peripheral: guard.disarm(),
                characteristics,
                command: None,
                pump: Mutex::new(None),
                closed: AtomicBool::new(false),
            })
        })
    }
}

/// Connected peripheral.
pub struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
    characteristics: Vec<Characteristic>,
    command: Option<(Characteristic, WriteType)>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl BtleLink {
    fn lookup(&self, uuid: &str) -> Option<&Characteristic> {
        self.characteristics
            .iter()
            .find(|c| c.uuid.to_string() == uuid)
    }
}

impl BleLink for BtleLink {
    fn characteristics(&self) -> Vec<CharacteristicInfo> {
        self.characteristics.iter().map(describe).collect()
    }

    fn bind(
        &mut self,
        command: CharacteristicInfo,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::UnboundedReceiver<Bytes>>> + Send + '_>> {
        Box::pin(async move {
            let write = self
                .lookup(&command.uuid)
                .cloned()
                .ok_or(Error::NoWritableCharacteristic)?;
            let write_type = if command.write {
                WriteType::WithResponse
            } else {
                WriteType::WithoutResponse
            };

            // Replies come back on the command characteristic itself when it
            // notifies, otherwise on the first characteristic that does.
            let notify = if can_notify(&write) {
                write.clone()
            } else {
                self.characteristics
                    .iter()
                    .find(|c| can_notify(c))
                    .cloned()
                    .ok_or_else(|| Error::Backend {
                        message: "no notifying characteristic".into(),
                    })?
            };
            self.peripheral.subscribe(&notify).await.map_err(map_error)?;
            tracing::debug!("write {} / notify {}", write.uuid, notify.uuid);

            let mut notifications = self.peripheral.notifications().await.map_err(map_error)?;
            let mut events = self.adapter.events().await.map_err(map_error)?;
            let id = self.peripheral.id();
            let (tx, rx) = mpsc::unbounded_channel();

            let pump = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        notification = notifications.next() => match notification {
                            Some(n) if n.uuid == notify.uuid => {
                                if tx.send(Bytes::from(n.value)).is_err() {
                                    break;
                                }
                            }
                            Some(_) => {}
                            None => break,
                        },
                        event = events.next() => match event {
                            Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                                tracing::debug!("peripheral {} disconnected", gone);
                                break;
                            }
                            Some(_) => {}
                            None => break,
                        },
                    }
                }
            });

            self.command = Some((write, write_type));
            let slot = self
                .pump
                .get_mut()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(old) = slot.replace(pump) {
                old.abort();
            }
            Ok(rx)
        })
    }

    fn write(&self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let (characteristic, write_type) = self.command.as_ref().ok_or(Error::LinkLost)?;
            self.peripheral
                .write(characteristic, &data, *write_type)
                .await
                .map_err(map_error)
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            let pump = self
                .pump
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            if let Some(pump) = pump {
                pump.abort();
            }
            self.peripheral.disconnect().await.map_err(map_error)
        })
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let pump = self
            .pump
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }
        disconnect_in_background(self.peripheral.clone());
    }
}

/// Disconnects the peripheral when dropped while armed.
struct DisconnectOnDrop {
    peripheral: Peripheral,
    armed: bool,
}

impl DisconnectOnDrop {
    fn disarm(mut self) -> Peripheral {
        self.armed = false;
        self.peripheral.clone()
    }
}

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        if self.armed {
            disconnect_in_background(self.peripheral.clone());
        }
    }
}

/// Drops can happen inside a cancelled future, so the disconnect runs on
/// its own task.
fn disconnect_in_background(peripheral: Peripheral) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no runtime to release peripheral {}", peripheral.id());
        return;
    };
    runtime.spawn(async move {
        tracing::debug!("releasing abandoned peripheral {}", peripheral.id());
        if let Err(e) = peripheral.disconnect().await {
            tracing::warn!("failed to release peripheral: {}", e);
        }
    });
}

fn describe(characteristic: &Characteristic) -> CharacteristicInfo {
    let flags = characteristic.properties;
    CharacteristicInfo {
        uuid: characteristic.uuid.to_string(),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: can_notify(characteristic),
    }
}

fn can_notify(characteristic: &Characteristic) -> bool {
    characteristic
        .properties
        .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
}

fn map_error(error: btleplug::Error) -> Error {
    match error {
        btleplug::Error::PermissionDenied => Error::PermissionDenied,
        btleplug::Error::NotConnected | btleplug::Error::DeviceNotFound => Error::LinkLost,
        other => Error::Backend {
            message: other.to_string(),
        },
    }
}

/// Scanning failures other than a permission refusal mean the radio is not
/// usable.
fn map_scan_error(error: btleplug::Error) -> Error {
    match error {
        btleplug::Error::PermissionDenied => Error::PermissionDenied,
        other => {
            tracing::warn!("bluetooth unavailable: {}", other);
            Error::BluetoothUnavailable
        }
    }
}
