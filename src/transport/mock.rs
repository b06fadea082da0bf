//! In-process ELM327 simulator implementing [`BleBackend`].
//!
//! Used by the test suite and by hosts that want to exercise the client
//! without hardware. Every knob lives behind a shared handle, so a test can
//! keep a clone of the backend and reconfigure it while a client uses it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{CR, PROMPT, at};
use crate::transport::{BleBackend, BleLink};
use crate::types::{AdapterDevice, CharacteristicInfo};

/// Identifier of the adapter advertised by [`MockBackend::new`].
pub const MOCK_DEVICE_ID: &str = "00:1D:A5:68:98:8B";

/// Characteristic the simulated adapter reads commands from.
pub const MOCK_CHARACTERISTIC: &str = "0000fff2-0000-1000-8000-00805f9b34fb";

/// Radio condition reported when a scan starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Radio {
    #[default]
    Available,
    PoweredOff,
    PermissionDenied,
}

/// How the adapter answers one command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Text(String),
    Silent,
}

struct Shared {
    radio: Radio,
    adverts: Vec<AdapterDevice>,
    characteristics: Vec<CharacteristicInfo>,
    connect_delay: Duration,
    response_delay: Duration,
    chunk_size: Option<usize>,
    replies: HashMap<String, Reply>,
    stored_codes: Vec<(u8, u8)>,
    echo: bool,
    writes: Vec<String>,
    scanning: bool,
    link: Option<mpsc::UnboundedSender<Bytes>>,
}

/// Simulated adapter and radio.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Mutex<Shared>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates a simulator advertising one `OBDII` adapter with typical
    /// ELM327 replies and no stored trouble codes.
    #[must_use]
    pub fn new() -> Self {
        let shared = Shared {
            radio: Radio::Available,
            adverts: vec![AdapterDevice::new(MOCK_DEVICE_ID).with_name("OBDII").with_rssi(-58)],
            characteristics: vec![
                CharacteristicInfo {
                    uuid: "0000fff1-0000-1000-8000-00805f9b34fb".into(),
                    write: false,
                    write_without_response: false,
                    notify: true,
                },
                CharacteristicInfo {
                    uuid: MOCK_CHARACTERISTIC.into(),
                    write: true,
                    write_without_response: true,
                    notify: false,
                },
            ],
            connect_delay: Duration::ZERO,
            response_delay: Duration::from_millis(20),
            chunk_size: None,
            replies: elm327_defaults(),
            stored_codes: Vec::new(),
            echo: true,
            writes: Vec::new(),
            scanning: false,
            link: None,
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Shared) -> T) -> T {
        let mut shared = self
            .shared
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut shared)
    }

    /// Sets the radio condition seen by the next scan.
    pub fn set_radio(&self, radio: Radio) {
        self.with(|s| s.radio = radio);
    }

    /// Replaces the advertisements delivered during a scan.
    pub fn set_adverts(&self, adverts: Vec<AdapterDevice>) {
        self.with(|s| s.adverts = adverts);
    }

    /// Replaces the characteristics discovered after connecting.
    pub fn set_characteristics(&self, characteristics: Vec<CharacteristicInfo>) {
        self.with(|s| s.characteristics = characteristics);
    }

    /// Delays link establishment.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.with(|s| s.connect_delay = delay);
    }

    /// Delays every reply.
    pub fn set_response_delay(&self, delay: Duration) {
        self.with(|s| s.response_delay = delay);
    }

    /// Splits replies into notifications of at most `size` bytes.
    pub fn set_chunk_size(&self, size: Option<usize>) {
        self.with(|s| s.chunk_size = size.filter(|&n| n > 0));
    }

    /// Sets the reply text for `command`, without the trailing prompt.
    pub fn set_reply(&self, command: &str, reply: &str) {
        self.with(|s| {
            s.replies
                .insert(normalize(command), Reply::Text(reply.to_owned()));
        });
    }

    /// Makes the adapter ignore `command` entirely.
    pub fn set_silent(&self, command: &str) {
        self.with(|s| {
            s.replies.insert(normalize(command), Reply::Silent);
        });
    }

    /// Sets the stored trouble codes as raw byte pairs, e.g. `(0x01, 0x06)`
    /// for `P0106`.
    pub fn set_stored_codes(&self, codes: Vec<(u8, u8)>) {
        self.with(|s| s.stored_codes = codes);
    }

    /// Commands received so far, without the terminating carriage return.
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        self.with(|s| s.writes.clone())
    }

    /// Returns true while a scan is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.with(|s| s.scanning)
    }

    /// Returns true while a link is bound.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.with(|s| s.link.is_some())
    }

    /// Delivers bytes the host did not ask for.
    pub fn push_unsolicited(&self, data: &[u8]) {
        if let Some(link) = self.with(|s| s.link.clone()) {
            let _ = link.send(Bytes::copy_from_slice(data));
        }
    }

    /// Simulates the adapter going out of range.
    pub fn drop_link(&self) {
        self.with(|s| s.link = None);
    }

    /// Computes the bytes the adapter sends back for one command line.
    fn respond(&self, command: &str) -> Option<Bytes> {
        self.with(|s| {
            let command = normalize(command);
            s.writes.push(command.clone());

            let reply = match s.replies.get(&command) {
                Some(Reply::Silent) => return None,
                Some(Reply::Text(text)) => text.clone(),
                None if command == "03" => codes_reply(&s.stored_codes),
                None if command == "04" => {
                    s.stored_codes.clear();
                    "44".to_owned()
                }
                None if command.starts_with("ATSP") => "OK".to_owned(),
                None => "?".to_owned(),
            };

            let mut out = String::new();
            if s.echo {
                out.push_str(&command);
                out.push(char::from(CR));
            }
            match command.as_str() {
                at::RESET => s.echo = true,
                at::ECHO_OFF => s.echo = false,
                _ => {}
            }
            for line in reply.lines() {
                out.push_str(line);
                out.push(char::from(CR));
            }
            out.push(char::from(CR));
            out.push(char::from(PROMPT));
            Some(Bytes::from(out))
        })
    }
}

fn normalize(command: &str) -> String {
    command.trim().to_ascii_uppercase()
}

/// Replies of a healthy adapter on a warm idling engine.
fn elm327_defaults() -> HashMap<String, Reply> {
    [
        (at::RESET, "ELM327 v1.5"),
        (at::ECHO_OFF, "OK"),
        (at::LINEFEEDS_OFF, "OK"),
        (at::SPACES_OFF, "OK"),
        (at::READ_VOLTAGE, "12.6V"),
        ("0104", "41 04 80"),
        ("0105", "41 05 5A"),
        ("010A", "NO DATA"),
        ("010C", "41 0C 1A F8"),
        ("010D", "41 0D 00"),
        ("010F", "41 0F 46"),
        ("0110", "41 10 01 F4"),
        ("0111", "41 11 33"),
        ("012F", "41 2F 80"),
    ]
    .into_iter()
    .map(|(command, reply)| (command.to_owned(), Reply::Text(reply.to_owned())))
    .collect()
}

/// Formats stored codes the way a legacy-protocol adapter reports them:
/// three codes per `43` line, padded with empty slots.
fn codes_reply(codes: &[(u8, u8)]) -> String {
    if codes.is_empty() {
        return "43 00 00 00 00 00 00".to_owned();
    }
    codes
        .chunks(3)
        .map(|group| {
            let mut line = String::from("43");
            for slot in 0..3 {
                let (first, second) = group.get(slot).copied().unwrap_or((0, 0));
                line.push_str(&format!(" {first:02X} {second:02X}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl BleBackend for MockBackend {
    type Link = MockLink;

    fn start_scan(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<BoxStream<'static, AdapterDevice>>> + Send + '_>> {
        Box::pin(async move {
            let adverts = self.with(|s| {
                match s.radio {
                    Radio::PoweredOff => return Err(Error::BluetoothUnavailable),
                    Radio::PermissionDenied => return Err(Error::PermissionDenied),
                    Radio::Available => {}
                }
                s.scanning = true;
                Ok(s.adverts.clone())
            })?;
            // Advertisements repeat; the stream stays open like a real scan.
            let repeated = adverts.clone();
            let stream = stream::iter(adverts)
                .chain(stream::iter(repeated))
                .chain(stream::pending());
            Ok(stream.boxed())
        })
    }

    fn stop_scan(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.with(|s| s.scanning = false);
            Ok(())
        })
    }

    fn connect(
        &self,
        device: AdapterDevice,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Link>> + Send + '_>> {
        Box::pin(async move {
            let (delay, characteristics) =
                self.with(|s| (s.connect_delay, s.characteristics.clone()));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !self.with(|s| s.adverts.iter().any(|d| d.id == device.id)) {
                return Err(Error::Backend {
                    message: format!("unknown peripheral {}", device.id),
                });
            }
            Ok(MockLink {
                backend: self.clone(),
                characteristics,
            })
        })
    }
}

/// Link to the simulated adapter.
pub struct MockLink {
    backend: MockBackend,
    characteristics: Vec<CharacteristicInfo>,
}

impl BleLink for MockLink {
    fn characteristics(&self) -> Vec<CharacteristicInfo> {
        self.characteristics.clone()
    }

    fn bind(
        &mut self,
        _command: CharacteristicInfo,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::UnboundedReceiver<Bytes>>> + Send + '_>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.backend.with(|s| {
                s.link = Some(tx);
                s.echo = true;
            });
            Ok(rx)
        })
    }

    fn write(&self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.backend.is_linked() {
                return Err(Error::Backend {
                    message: "peripheral disconnected".into(),
                });
            }
            let text = String::from_utf8_lossy(&data).into_owned();
            let replies: Vec<Bytes> = text
                .split(char::from(CR))
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| self.backend.respond(line))
                .collect();
            if replies.is_empty() {
                return Ok(());
            }

            let backend = self.backend.clone();
            let (delay, chunk_size) = backend.with(|s| (s.response_delay, s.chunk_size));
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for reply in replies {
                    let chunk_size = chunk_size.unwrap_or(reply.len()).max(1);
                    for chunk in reply.chunks(chunk_size) {
                        // Looked up per chunk so a dropped link stays dropped.
                        let Some(link) = backend.with(|s| s.link.clone()) else {
                            return;
                        };
                        let _ = link.send(Bytes::copy_from_slice(chunk));
                    }
                }
            });
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.backend.drop_link();
            Ok(())
        })
    }
}
