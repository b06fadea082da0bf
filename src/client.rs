//! Main [`ObdClient`] implementation.
//!
//! This module provides the high-level [`ObdClient`] that combines the
//! transport, the command channel, the setup handshake and the poll loop
//! into a unified interface.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::CommandChannel;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::init;
use crate::poller::{PollSettings, Poller};
use crate::protocol::{Command, Parameter, RawResponse, dtc, pid};
use crate::transport::{BleBackend, MockBackend, Transport};
use crate::types::{AdapterDevice, ConnectionState, LiveData, Reading, TroubleCode};

#[cfg(feature = "ble")]
use crate::transport::BtleBackend;

/// Client for an ELM327-class OBD-II adapter.
pub struct ObdClient<B: BleBackend> {
    config: ClientConfig,
    dispatcher: EventDispatcher,
    transport: Arc<Transport<B>>,
    channel: Arc<CommandChannel<B>>,
    live: Arc<Mutex<LiveData>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ObdClient<MockBackend> {
    /// Creates a client wired to the in-process adapter simulator.
    #[must_use]
    pub fn mock() -> Self {
        Self::new(MockBackend::new(), ClientConfig::default())
    }
}

#[cfg(feature = "ble")]
impl ObdClient<BtleBackend> {
    /// Creates a client on the system's first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns `BluetoothUnavailable` if the system has no usable adapter.
    pub async fn bluetooth(config: ClientConfig) -> Result<Self> {
        let backend = BtleBackend::new().await?;
        Ok(Self::new(backend, config))
    }
}

impl<B: BleBackend> ObdClient<B> {
    /// Creates a client over `backend`. Nothing happens until
    /// [`scan`](Self::scan) or [`connect`](Self::connect).
    #[must_use]
    pub fn new(backend: B, config: ClientConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_capacity);
        let transport = Arc::new(Transport::new(
            backend,
            config.adapter_names.clone(),
            dispatcher.clone(),
        ));
        let channel = Arc::new(CommandChannel::new(Arc::clone(&transport)));

        Self {
            config,
            dispatcher,
            transport,
            channel,
            live: Arc::new(Mutex::new(LiveData::default())),
            poll_task: Mutex::new(None),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<Transport<B>> {
        &self.transport
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    /// Returns the connected adapter, if any.
    #[must_use]
    pub fn device(&self) -> Option<AdapterDevice> {
        self.transport.device()
    }

    /// Returns the last-known value of every tracked parameter.
    #[must_use]
    pub fn live_data(&self) -> LiveData {
        lock(&self.live).clone()
    }

    /// Subscribes to client events.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        self.dispatcher.subscribe(filter)
    }

    // ==================== Discovery ====================

    /// Scans for known adapters for the configured scan timeout.
    ///
    /// Each matching adapter arrives once on the returned channel, which
    /// closes when the scan ends.
    pub async fn scan(&self) -> Result<mpsc::Receiver<AdapterDevice>> {
        self.transport.scan(self.config.scan_timeout).await
    }

    /// Scans for `timeout` and returns every adapter found.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<AdapterDevice>> {
        let mut found = self.transport.scan(timeout).await?;
        let mut devices = Vec::new();
        while let Some(device) = found.recv().await {
            devices.push(device);
        }
        Ok(devices)
    }

    // ==================== Connection ====================

    /// Connects to an adapter and runs the setup handshake.
    ///
    /// This will:
    /// 1. Stop any running scan and open the link
    /// 2. Run the ELM327 initialization sequence
    /// 3. Start polling if `poll_on_connect` is set
    ///
    /// # Errors
    ///
    /// Returns the connect error with the state back at `Idle`, or
    /// `InitializationFailed` with the state at `Failed`.
    pub async fn connect(&self, device: &AdapterDevice) -> Result<()> {
        self.stop_polling();
        self.transport
            .connect(device, self.config.connect_timeout)
            .await?;

        let outcome = init::run(&self.channel, &self.config).await;
        self.transport.finish_initialization(outcome).await?;
        *lock(&self.live) = LiveData::default();

        if self.config.poll_on_connect {
            if let Err(e) = self.start_polling() {
                tracing::warn!("polling not started: {}", e);
            }
        }
        Ok(())
    }

    /// Stops polling and releases the link. Safe to call in any state.
    pub async fn disconnect(&self) {
        self.stop_polling();
        self.transport.disconnect().await;
    }

    // ==================== Polling ====================

    /// Starts the poll loop. Does nothing if it is already running.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the link is `Ready`.
    pub fn start_polling(&self) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(Error::InvalidState {
                operation: "start polling",
                state: state.to_string(),
            });
        }

        let mut task = lock(&self.poll_task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let poller = Poller::new(
            Arc::clone(&self.channel),
            self.dispatcher.clone(),
            self.transport.watch_state(),
            Arc::clone(&self.live),
            PollSettings {
                interval: self.config.poll_interval,
                response_timeout: self.config.response_timeout,
                tracked: self.config.tracked.clone(),
                temperature_unit: self.config.temperature_unit,
            },
        );
        *task = Some(poller.spawn());
        Ok(())
    }

    /// Stops the poll loop if it is running.
    pub fn stop_polling(&self) {
        if let Some(task) = lock(&self.poll_task).take() {
            task.abort();
            tracing::debug!("poll loop stopped");
        }
    }

    /// Returns true while the poll loop is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        lock(&self.poll_task)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    // ==================== Commands ====================

    /// Sends an arbitrary AT or OBD command and returns the cleaned reply.
    ///
    /// Shares the command channel with the poll loop, so it fails with
    /// `ChannelBusy` if a poll read is in flight.
    pub async fn send_raw(&self, text: &str) -> Result<RawResponse> {
        self.channel
            .send(&Command::new(text), self.config.response_timeout)
            .await
    }

    /// Reads one parameter on demand.
    ///
    /// Returns `Ok(None)` if the vehicle does not support the parameter or
    /// the reply does not decode.
    pub async fn read(&self, parameter: Parameter) -> Result<Option<Reading>> {
        let response = self
            .channel
            .send(&parameter.command(), self.config.response_timeout)
            .await?;
        let reading = pid::decode(parameter, &response, self.config.temperature_unit);

        if let Some(reading) = &reading {
            lock(&self.live).apply(reading);
            self.dispatcher.dispatch(Event::Readings(vec![*reading]));
        } else {
            tracing::debug!("{} not decoded from {:?}", parameter, response.text());
        }
        Ok(reading)
    }

    /// Reads stored trouble codes.
    ///
    /// A timeout, a negative reply or an undecodable reply yields an empty
    /// list. `LinkLost` and `ChannelBusy` are returned as errors.
    pub async fn read_trouble_codes(&self) -> Result<Vec<TroubleCode>> {
        let response = match self
            .channel
            .send(&Command::read_codes(), self.config.response_timeout)
            .await
        {
            Ok(response) => response,
            Err(e @ Error::ResponseTimeout { .. }) => {
                tracing::warn!("trouble code read failed: {}", e);
                RawResponse::default()
            }
            Err(e) => return Err(e),
        };

        let codes = dtc::decode(&response);
        tracing::info!("{} stored trouble codes", codes.len());
        self.dispatcher.dispatch(Event::TroubleCodes(codes.clone()));
        Ok(codes)
    }

    /// Asks the vehicle to erase stored trouble codes.
    ///
    /// Erasure is not verified; use [`clear_and_verify`](Self::clear_and_verify)
    /// to read the codes back.
    pub async fn clear_trouble_codes(&self) -> Result<()> {
        let response = self
            .channel
            .send(&Command::clear_codes(), self.config.response_timeout)
            .await?;
        if response.is_negative() {
            tracing::warn!("clear request answered {:?}", response.text());
        } else {
            tracing::info!("trouble codes cleared");
        }
        Ok(())
    }

    /// Clears trouble codes, waits `clear_settle_delay`, and returns the
    /// codes still stored afterwards.
    pub async fn clear_and_verify(&self) -> Result<Vec<TroubleCode>> {
        self.clear_trouble_codes().await?;
        tokio::time::sleep(self.config.clear_settle_delay).await;
        self.read_trouble_codes().await
    }
}

impl<B: BleBackend> Drop for ObdClient<B> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.poll_task).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
