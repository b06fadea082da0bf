//! Connection state machine over a [`BleBackend`].
//!
//! ```text
//! Idle ──scan──▶ Scanning ──connect──▶ Connecting ──▶ Initializing ──▶ Ready
//!   ▲               │                     │                │             │
//!   └───timeout─────┘◀────error───────────┘          Failed(reason) ◀────┘ link lost
//! ```
//! `disconnect()` moves any state through `Disconnecting` to `Idle`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::transport::{BleBackend, BleLink, ConnectionHandle};
use crate::types::{
    AdapterDevice, CharacteristicInfo, ConnectionState, select_command_characteristic,
};

/// Buffer of discovered devices not yet taken by the caller.
const DISCOVERY_BUFFER: usize = 32;

/// A link that is open and bound but not yet installed.
type Opened<L> = (L, CharacteristicInfo, mpsc::UnboundedReceiver<Bytes>);

/// Owns the link to one adapter and the [`ConnectionState`].
pub struct Transport<B: BleBackend> {
    backend: B,
    adapter_names: Vec<String>,
    dispatcher: EventDispatcher,
    state: watch::Sender<ConnectionState>,
    handle: Mutex<Option<ConnectionHandle<B::Link>>>,
    inbound: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every `connect` and `disconnect`; a connect only installs
    /// its link while its number is still current.
    attempt: AtomicU64,
}

impl<B: BleBackend> Transport<B> {
    /// Creates an idle transport.
    #[must_use]
    pub fn new(backend: B, adapter_names: Vec<String>, dispatcher: EventDispatcher) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            backend,
            adapter_names,
            dispatcher,
            state,
            handle: Mutex::new(None),
            inbound: tokio::sync::Mutex::new(None),
            forwarder: Mutex::new(None),
            attempt: AtomicU64::new(0),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Returns a read-only view of the state that can be awaited for changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Returns the connected device, if any.
    #[must_use]
    pub fn device(&self) -> Option<AdapterDevice> {
        lock(&self.handle).as_ref().map(|h| h.device.clone())
    }

    // ==================== Scanning ====================

    /// Starts discovery of known adapters.
    ///
    /// Each matching device is delivered once on the returned channel. The
    /// scan stops when `timeout` elapses, when `connect` is called, or when
    /// the receiver is dropped.
    pub async fn scan(self: &Arc<Self>, timeout: Duration) -> Result<mpsc::Receiver<AdapterDevice>> {
        self.transition_if(ConnectionState::is_resting, ConnectionState::Scanning)
            .map_err(|state| invalid_state("scan", &state))?;

        let adverts = match self.backend.start_scan().await {
            Ok(adverts) => adverts,
            Err(e) => {
                tracing::warn!("scan could not start: {}", e);
                let _ = self.transition_if(is_scanning, ConnectionState::Idle);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(DISCOVERY_BUFFER);
        let transport = Arc::clone(self);
        tokio::spawn(async move { transport.run_scan(adverts, tx, timeout).await });
        Ok(rx)
    }

    async fn run_scan(
        &self,
        mut adverts: BoxStream<'static, AdapterDevice>,
        tx: mpsc::Sender<AdapterDevice>,
        timeout: Duration,
    ) {
        let mut state_rx = self.state.subscribe();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut seen = HashSet::new();

        loop {
            tokio::select! {
                () = &mut deadline => {
                    tracing::debug!("scan timed out after {:?}", timeout);
                    break;
                }
                () = until(&mut state_rx, |s| !is_scanning(s)) => {
                    tracing::debug!("scan interrupted");
                    break;
                }
                advert = adverts.next() => {
                    let Some(device) = advert else {
                        tracing::debug!("advertisement stream ended");
                        break;
                    };
                    if !device.matches_any(&self.adapter_names) || !seen.insert(device.id.clone()) {
                        continue;
                    }
                    tracing::info!("discovered adapter {} ({:?})", device.id, device.name);
                    self.dispatcher.dispatch(Event::DeviceDiscovered(device.clone()));
                    match tx.try_send(device) {
                        Ok(()) => {}
                        Err(TrySendError::Full(device)) => {
                            tracing::warn!("discovery buffer full, dropping {}", device.id);
                        }
                        Err(TrySendError::Closed(_)) => {
                            tracing::debug!("discovery receiver dropped");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.backend.stop_scan().await {
            tracing::warn!("failed to stop scan: {}", e);
        }
        let _ = self.transition_if(is_scanning, ConnectionState::Idle);
    }

    // ==================== Connection ====================

    /// Establishes the link and resolves the command characteristic.
    ///
    /// On success the state is `Initializing`; the caller runs the setup
    /// handshake and reports it with [`Transport::finish_initialization`].
    /// On failure the state returns to `Idle`. A `disconnect` while the link
    /// is opening abandons the attempt with `LinkLost`.
    pub async fn connect(self: &Arc<Self>, device: &AdapterDevice, timeout: Duration) -> Result<()> {
        let mut attempt = 0;
        let previous = self
            .transition_if(
                |s| {
                    let allowed = s.is_resting() || is_scanning(s);
                    if allowed {
                        attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
                    }
                    allowed
                },
                ConnectionState::Connecting,
            )
            .map_err(|state| invalid_state("connect", &state))?;

        if previous == ConnectionState::Scanning {
            if let Err(e) = self.backend.stop_scan().await {
                tracing::warn!("failed to stop scan: {}", e);
            }
        }

        tracing::info!("connecting to {}", device.id);
        match self.open(device, timeout, attempt).await {
            Ok(opened) => self.install(device, opened, attempt).await,
            Err(e) => {
                tracing::warn!("connect to {} failed: {}", device.id, e);
                let _ = self.transition_if(
                    |s| *s == ConnectionState::Connecting && self.is_current(attempt),
                    ConnectionState::Idle,
                );
                Err(e)
            }
        }
    }

    /// Opens and binds the link, giving up on timeout or once `attempt` is
    /// superseded.
    async fn open(
        &self,
        device: &AdapterDevice,
        timeout: Duration,
        attempt: u64,
    ) -> Result<Opened<B::Link>> {
        let mut state_rx = self.state.subscribe();
        tokio::select! {
            opened = tokio::time::timeout(timeout, self.establish(device)) => {
                opened.map_err(|_| Error::connect_timeout(timeout))?
            }
            () = until(&mut state_rx, |s| {
                *s != ConnectionState::Connecting || !self.is_current(attempt)
            }) => {
                tracing::debug!("connect to {} abandoned", device.id);
                Err(Error::LinkLost)
            }
        }
    }

    async fn establish(&self, device: &AdapterDevice) -> Result<Opened<B::Link>> {
        let mut link = self.backend.connect(device.clone()).await?;
        let characteristics = link.characteristics();
        tracing::debug!("{} characteristics discovered", characteristics.len());

        let Some(command) = select_command_characteristic(&characteristics).cloned() else {
            close_quietly(&link).await;
            return Err(Error::NoWritableCharacteristic);
        };
        tracing::debug!("command characteristic {}", command.uuid);

        match link.bind(command.clone()).await {
            Ok(inbound) => Ok((link, command, inbound)),
            Err(e) => {
                close_quietly(&link).await;
                Err(e)
            }
        }
    }

    /// Installs the opened link as the single connection handle and moves to
    /// `Initializing`, unless a `disconnect` got there first.
    async fn install(
        self: &Arc<Self>,
        device: &AdapterDevice,
        (link, characteristic, link_rx): Opened<B::Link>,
        attempt: u64,
    ) -> Result<()> {
        // Held across install and transition so a racing teardown sees
        // either nothing or the complete handle.
        let mut inbound = self.inbound.lock().await;
        if !self.is_current(attempt) {
            drop(inbound);
            tracing::debug!("connect to {} superseded, closing its link", device.id);
            close_quietly(&link).await;
            return Err(Error::LinkLost);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *inbound = Some(rx);
        *lock(&self.handle) = Some(ConnectionHandle {
            device: device.clone(),
            characteristic,
            link: Arc::new(link),
        });
        let forwarder = tokio::spawn(forward(Arc::downgrade(self), link_rx, tx));
        *lock(&self.forwarder) = Some(forwarder);

        // A refusal here means a disconnect bumped the attempt; its teardown
        // closes the handle once the lock is released.
        let moved = self.transition_if(
            |s| *s == ConnectionState::Connecting && self.is_current(attempt),
            ConnectionState::Initializing,
        );
        drop(inbound);
        moved.map(|_| ()).map_err(|_| {
            tracing::debug!("connect to {} superseded by disconnect", device.id);
            Error::LinkLost
        })
    }

    /// Records the outcome of the setup handshake: `Ready` on success,
    /// `Failed` plus teardown on error. The error is passed back unchanged.
    pub async fn finish_initialization(&self, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => self
                .transition_if(|s| *s == ConnectionState::Initializing, ConnectionState::Ready)
                .map(|_| ())
                .map_err(|_| Error::LinkLost),
            Err(e) => {
                self.fail_if(|s| *s == ConnectionState::Initializing, &e);
                self.teardown(true).await;
                Err(e)
            }
        }
    }

    /// Disconnects from the adapter. Safe to call from any state.
    ///
    /// A pending read resolves with `LinkLost` as soon as the state leaves
    /// `Ready`/`Initializing`.
    pub async fn disconnect(&self) {
        if self
            .transition_if(
                |s| {
                    let allowed = *s != ConnectionState::Idle;
                    if allowed {
                        self.attempt.fetch_add(1, Ordering::SeqCst);
                    }
                    allowed
                },
                ConnectionState::Disconnecting,
            )
            .is_err()
        {
            return;
        }
        tracing::info!("disconnecting");
        self.teardown(true).await;
        let _ = self.transition_if(|_| true, ConnectionState::Idle);
    }

    async fn on_link_lost(&self) {
        if self.fail_if(ConnectionState::has_link, &Error::LinkLost) {
            tracing::warn!("link to adapter lost");
            self.teardown(false).await;
        }
    }

    async fn teardown(&self, abort_forwarder: bool) {
        let (forwarder, handle) = {
            let mut inbound = self.inbound.lock().await;
            *inbound = None;
            (lock(&self.forwarder).take(), lock(&self.handle).take())
        };
        if abort_forwarder {
            if let Some(forwarder) = forwarder {
                forwarder.abort();
            }
        }
        if let Some(handle) = handle {
            tracing::debug!("releasing link to {}", handle.device.id);
            close_quietly(handle.link.as_ref()).await;
        }
    }

    // ==================== Raw I/O ====================

    /// Writes raw bytes to the command characteristic.
    pub async fn write(&self, data: Bytes) -> Result<()> {
        if !self.state.borrow().has_link() {
            return Err(Error::LinkLost);
        }
        let link = lock(&self.handle)
            .as_ref()
            .map(|h| Arc::clone(&h.link))
            .ok_or(Error::LinkLost)?;

        tracing::trace!("writing {} bytes", data.len());
        match link.write(data).await {
            Ok(()) => Ok(()),
            Err(_) if !self.state.borrow().has_link() => Err(Error::LinkLost),
            Err(e) => Err(e),
        }
    }

    /// Reads the next chunk the adapter sent. Chunks may split a response
    /// anywhere.
    pub async fn read(&self) -> Result<Bytes> {
        let mut state_rx = self.state.subscribe();
        if !state_rx.borrow().has_link() {
            return Err(Error::LinkLost);
        }
        let mut inbound = self.inbound.lock().await;
        let rx = inbound.as_mut().ok_or(Error::LinkLost)?;

        tokio::select! {
            chunk = rx.recv() => chunk.ok_or(Error::LinkLost),
            () = until(&mut state_rx, |s| !s.has_link()) => Err(Error::LinkLost),
        }
    }

    /// Discards bytes received outside any transaction.
    pub async fn discard_pending(&self) -> usize {
        let mut inbound = self.inbound.lock().await;
        let mut dropped = 0;
        if let Some(rx) = inbound.as_mut() {
            while let Ok(chunk) = rx.try_recv() {
                dropped += chunk.len();
            }
        }
        if dropped > 0 {
            tracing::debug!("discarded {} stale bytes", dropped);
        }
        dropped
    }

    // ==================== State transitions ====================

    /// Moves to `next` if `allowed` accepts the current state. Returns the
    /// previous state, or the current state if the move was refused.
    fn transition_if(
        &self,
        allowed: impl FnOnce(&ConnectionState) -> bool,
        next: ConnectionState,
    ) -> std::result::Result<ConnectionState, ConnectionState> {
        let mut outcome = Err(ConnectionState::Idle);
        self.state.send_if_modified(|state| {
            if allowed(state) && *state != next {
                outcome = Ok(std::mem::replace(state, next.clone()));
                true
            } else {
                outcome = Err(state.clone());
                false
            }
        });
        if let Ok(previous) = &outcome {
            self.announce(previous, &next);
        }
        outcome
    }

    /// Moves to `Failed` if `allowed` accepts the current state and emits the
    /// error notification.
    fn fail_if(&self, allowed: impl FnOnce(&ConnectionState) -> bool, error: &Error) -> bool {
        let failed = self
            .transition_if(allowed, ConnectionState::Failed(error.to_string()))
            .is_ok();
        if failed {
            self.dispatcher.dispatch(Event::Error {
                kind: error.kind(),
                detail: error.to_string(),
            });
        }
        failed
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::SeqCst) == attempt
    }

    fn announce(&self, previous: &ConnectionState, next: &ConnectionState) {
        tracing::info!("state {} -> {}", previous, next);
        self.dispatcher.dispatch(Event::StateChanged(next.clone()));

        let was_ready = *previous == ConnectionState::Ready;
        let is_ready = *next == ConnectionState::Ready;
        if was_ready != is_ready {
            self.dispatcher.dispatch(Event::ConnectionChanged(is_ready));
        }
    }
}

impl<B: BleBackend> Drop for Transport<B> {
    fn drop(&mut self) {
        if let Some(forwarder) = lock(&self.forwarder).take() {
            forwarder.abort();
        }
    }
}

/// Pumps link notifications into the transport's inbound queue and reports
/// link loss when the platform stream ends.
async fn forward<B: BleBackend>(
    transport: Weak<Transport<B>>,
    mut link_rx: mpsc::UnboundedReceiver<Bytes>,
    tx: mpsc::UnboundedSender<Bytes>,
) {
    while let Some(chunk) = link_rx.recv().await {
        tracing::trace!("received {} bytes", chunk.len());
        if tx.send(chunk).is_err() {
            return;
        }
    }
    if let Some(transport) = transport.upgrade() {
        transport.on_link_lost().await;
    }
}

/// Resolves once `condition` holds for the watched state.
pub(crate) async fn until(
    state_rx: &mut watch::Receiver<ConnectionState>,
    condition: impl FnMut(&ConnectionState) -> bool,
) {
    let _ = state_rx.wait_for(condition).await;
}

async fn close_quietly<L: BleLink>(link: &L) {
    if let Err(e) = link.close().await {
        tracing::warn!("failed to close link: {}", e);
    }
}

fn is_scanning(state: &ConnectionState) -> bool {
    *state == ConnectionState::Scanning
}

fn invalid_state(operation: &'static str, state: &ConnectionState) -> Error {
    Error::InvalidState {
        operation,
        state: state.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::event::{EventFilter, EventKind};
    use crate::transport::MockBackend;
    use crate::transport::mock::{MOCK_DEVICE_ID, Radio};

    fn transport(backend: &MockBackend) -> Arc<Transport<MockBackend>> {
        Arc::new(Transport::new(
            backend.clone(),
            vec!["OBD".into(), "ELM327".into()],
            EventDispatcher::new(64),
        ))
    }

    fn adapter() -> AdapterDevice {
        AdapterDevice::new(MOCK_DEVICE_ID).with_name("OBDII")
    }

    async fn connected(backend: &MockBackend) -> Arc<Transport<MockBackend>> {
        let transport = transport(backend);
        transport.connect(&adapter(), Duration::from_secs(1)).await.unwrap();
        transport.finish_initialization(Ok(())).await.unwrap();
        transport
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_filters_and_deduplicates() {
        let backend = MockBackend::new();
        backend.set_adverts(vec![
            AdapterDevice::new("AA").with_name("Vgate iCar Pro"),
            AdapterDevice::new("BB").with_name("Headphones"),
            AdapterDevice::new("CC"),
            AdapterDevice::new("DD").with_name("obdii"),
        ]);
        let transport = transport(&backend);

        let mut found = transport.scan(Duration::from_secs(5)).await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Scanning);

        let mut ids = Vec::new();
        while let Some(device) = found.recv().await {
            ids.push(device.id);
        }
        assert_eq!(ids, ["DD"]);
        assert_eq!(transport.state(), ConnectionState::Idle);
        assert!(!backend.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_ends_on_time_with_undrained_receiver() {
        let backend = MockBackend::new();
        backend.set_adverts(
            (0..40)
                .map(|n| AdapterDevice::new(format!("{n:02}")).with_name(format!("OBDII-{n}")))
                .collect(),
        );
        let transport = transport(&backend);

        let mut found = transport.scan(Duration::from_secs(5)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(transport.state(), ConnectionState::Idle);
        assert!(!backend.is_scanning());
        let mut delivered = 0;
        while found.recv().await.is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, DISCOVERY_BUFFER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_unavailable_radio() {
        let backend = MockBackend::new();
        let transport = transport(&backend);

        backend.set_radio(Radio::PoweredOff);
        assert!(matches!(
            transport.scan(Duration::from_secs(1)).await,
            Err(Error::BluetoothUnavailable)
        ));
        backend.set_radio(Radio::PermissionDenied);
        assert!(matches!(
            transport.scan(Duration::from_secs(1)).await,
            Err(Error::PermissionDenied)
        ));
        assert_eq!(transport.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_stops_scan() {
        let backend = MockBackend::new();
        let transport = transport(&backend);

        let mut found = transport.scan(Duration::from_secs(30)).await.unwrap();
        let device = found.recv().await.unwrap();
        transport.connect(&device, Duration::from_secs(1)).await.unwrap();

        assert_eq!(transport.state(), ConnectionState::Initializing);
        assert!(!backend.is_scanning());
        assert!(found.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_writable_characteristic() {
        let backend = MockBackend::new();
        backend.set_characteristics(vec![CharacteristicInfo {
            uuid: "2a19".into(),
            write: false,
            write_without_response: false,
            notify: true,
        }]);
        let transport = transport(&backend);

        let result = transport.connect(&adapter(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::NoWritableCharacteristic)));
        assert_eq!(transport.state(), ConnectionState::Idle);
        assert!(transport.device().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let backend = MockBackend::new();
        backend.set_connect_delay(Duration::from_secs(30));
        let transport = transport(&backend);

        let result = transport.connect(&adapter(), Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(Error::ConnectTimeout { timeout_ms: 2000 })
        ));
        assert_eq!(transport.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_abandons_pending_connect() {
        let backend = MockBackend::new();
        backend.set_connect_delay(Duration::from_secs(1));
        let transport = transport(&backend);

        let first = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.connect(&adapter(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        transport.disconnect().await;
        assert_eq!(transport.state(), ConnectionState::Idle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.connect(&adapter(), Duration::from_secs(5)).await })
        };

        assert!(matches!(first.await.unwrap(), Err(Error::LinkLost)));
        second.await.unwrap().unwrap();
        assert_eq!(transport.state(), ConnectionState::Initializing);
        assert_eq!(transport.device().map(|d| d.id), Some(MOCK_DEVICE_ID.to_owned()));
        assert!(backend.is_linked());

        transport.finish_initialization(Ok(())).await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_announces_connection() {
        let backend = MockBackend::new();
        let transport = transport(&backend);
        let mut sub = transport.dispatcher.subscribe(Some(EventFilter::kinds(vec![
            EventKind::ConnectionChanged,
        ])));

        transport.connect(&adapter(), Duration::from_secs(1)).await.unwrap();
        transport.finish_initialization(Ok(())).await.unwrap();
        assert!(matches!(sub.recv().await, Some(Event::ConnectionChanged(true))));

        transport.disconnect().await;
        assert!(matches!(sub.recv().await, Some(Event::ConnectionChanged(false))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_rejected_while_ready() {
        let backend = MockBackend::new();
        let transport = connected(&backend).await;

        let result = transport.connect(&adapter(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::InvalidState { .. })));
        assert_eq!(transport.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_moves_to_failed() {
        let backend = MockBackend::new();
        let transport = connected(&backend).await;
        let mut errors = transport
            .dispatcher
            .subscribe(Some(EventFilter::kinds(vec![EventKind::Error])));
        let mut state_rx = transport.watch_state();

        backend.drop_link();
        state_rx
            .wait_for(|s| matches!(s, ConnectionState::Failed(_)))
            .await
            .unwrap();

        assert!(matches!(
            errors.recv().await,
            Some(Event::Error {
                kind: ErrorKind::LinkLost,
                ..
            })
        ));
        assert!(transport.device().is_none());
        assert!(matches!(
            transport.write(Bytes::from_static(b"010C\r")).await,
            Err(Error::LinkLost)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initialization_tears_down() {
        let backend = MockBackend::new();
        let transport = transport(&backend);
        transport.connect(&adapter(), Duration::from_secs(1)).await.unwrap();

        let result = transport.finish_initialization(Err(Error::LinkLost)).await;
        assert!(matches!(result, Err(Error::LinkLost)));
        assert!(matches!(transport.state(), ConnectionState::Failed(_)));
        assert!(!backend.is_linked());

        // Failed is a resting state.
        transport.connect(&adapter(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Initializing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_unblocks_read() {
        let backend = MockBackend::new();
        let transport = connected(&backend).await;

        let reader = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.read().await })
        };
        tokio::task::yield_now().await;

        transport.disconnect().await;
        assert!(matches!(reader.await.unwrap(), Err(Error::LinkLost)));
        assert_eq!(transport.state(), ConnectionState::Idle);
        assert!(!backend.is_linked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let backend = MockBackend::new();
        let transport = connected(&backend).await;
        let mut sub = transport.dispatcher.subscribe(Some(EventFilter::kinds(vec![
            EventKind::ConnectionChanged,
        ])));

        transport.disconnect().await;
        transport.disconnect().await;

        assert_eq!(transport.state(), ConnectionState::Idle);
        assert!(matches!(sub.recv().await, Some(Event::ConnectionChanged(false))));
        let extra = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_pending() {
        let backend = MockBackend::new();
        let transport = connected(&backend).await;

        backend.push_unsolicited(b"STOPPED\r>");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.discard_pending().await, 9);
        assert_eq!(transport.discard_pending().await, 0);
    }
}
