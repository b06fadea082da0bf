//! Cyclic acquisition of live readings.
//!
//! Each cycle reads every tracked parameter in order, one command at a time.
//! A parameter that times out or does not decode is left out of that cycle;
//! the snapshot keeps its last-known value. The loop ends for good when the
//! link leaves `Ready`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::channel::CommandChannel;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::{Parameter, pid};
use crate::transport::BleBackend;
use crate::transport::session::until;
use crate::types::{ConnectionState, LiveData, Reading, TemperatureUnit};

/// Poll loop settings.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub response_timeout: Duration,
    pub tracked: Vec<Parameter>,
    pub temperature_unit: TemperatureUnit,
}

/// Reads tracked parameters on a fixed interval while the link is ready.
pub struct Poller<B: BleBackend> {
    channel: Arc<CommandChannel<B>>,
    dispatcher: EventDispatcher,
    state: watch::Receiver<ConnectionState>,
    live: Arc<Mutex<LiveData>>,
    settings: PollSettings,
}

impl<B: BleBackend> Poller<B> {
    /// Creates a poller that records snapshots into `live`.
    #[must_use]
    pub const fn new(
        channel: Arc<CommandChannel<B>>,
        dispatcher: EventDispatcher,
        state: watch::Receiver<ConnectionState>,
        live: Arc<Mutex<LiveData>>,
        settings: PollSettings,
    ) -> Self {
        Self {
            channel,
            dispatcher,
            state,
            live,
            settings,
        }
    }

    /// Runs the loop on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Polls until the link leaves `Ready`. The first cycle starts at once.
    pub async fn run(self) {
        let mut state = self.state.clone();
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "polling {} parameters every {:?}",
            self.settings.tracked.len(),
            self.settings.interval
        );

        loop {
            tokio::select! {
                () = until(&mut state, |s| *s != ConnectionState::Ready) => break,
                _ = ticker.tick() => {}
            }

            let cycle = tokio::select! {
                () = until(&mut state, |s| *s != ConnectionState::Ready) => break,
                cycle = self.poll_once() => cycle,
            };

            match cycle {
                Ok(readings) if readings.is_empty() => {
                    tracing::debug!("poll cycle produced no readings");
                }
                Ok(readings) => self.publish(readings),
                Err(e) => {
                    tracing::debug!("poll cycle aborted: {}", e);
                    break;
                }
            }
        }
        tracing::info!("polling stopped");
    }

    /// Reads every tracked parameter once, in order.
    ///
    /// Fails only with `LinkLost`; other per-parameter failures are skipped.
    pub async fn poll_once(&self) -> Result<Vec<Reading>> {
        let mut readings = Vec::with_capacity(self.settings.tracked.len());
        for &parameter in &self.settings.tracked {
            match self
                .channel
                .send(&parameter.command(), self.settings.response_timeout)
                .await
            {
                Ok(response) => {
                    match pid::decode(parameter, &response, self.settings.temperature_unit) {
                        Some(reading) => readings.push(reading),
                        None => tracing::debug!("{} not decoded from {:?}", parameter, response.text()),
                    }
                }
                Err(Error::LinkLost) => return Err(Error::LinkLost),
                Err(e) => tracing::debug!("skipping {}: {}", parameter, e),
            }
        }
        Ok(readings)
    }

    fn publish(&self, readings: Vec<Reading>) {
        let snapshot = {
            let mut live = self
                .live
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for reading in &readings {
                live.apply(reading);
            }
            live.timestamp_ms = now_millis();
            live.clone()
        };
        tracing::trace!("cycle decoded {} readings", readings.len());
        self.dispatcher.dispatch(Event::Readings(readings));
        self.dispatcher.dispatch(Event::Snapshot(Box::new(snapshot)));
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventFilter, EventKind, Subscription};
    use crate::transport::mock::MOCK_DEVICE_ID;
    use crate::transport::{MockBackend, Transport};
    use crate::types::AdapterDevice;

    struct Harness {
        transport: Arc<Transport<MockBackend>>,
        poller: Poller<MockBackend>,
        live: Arc<Mutex<LiveData>>,
        snapshots: Subscription,
    }

    async fn harness(backend: &MockBackend, tracked: Vec<Parameter>) -> Harness {
        let dispatcher = EventDispatcher::new(64);
        let transport = Arc::new(Transport::new(
            backend.clone(),
            vec!["OBD".into()],
            dispatcher.clone(),
        ));
        transport
            .connect(&AdapterDevice::new(MOCK_DEVICE_ID), Duration::from_secs(1))
            .await
            .unwrap();
        transport.finish_initialization(Ok(())).await.unwrap();

        let channel = Arc::new(CommandChannel::new(Arc::clone(&transport)));
        channel
            .send(&crate::protocol::Command::new("ATE0"), Duration::from_secs(1))
            .await
            .unwrap();

        let live = Arc::new(Mutex::new(LiveData::default()));
        let snapshots = dispatcher.subscribe(Some(EventFilter::kinds(vec![EventKind::Snapshot])));
        let poller = Poller::new(
            channel,
            dispatcher,
            transport.watch_state(),
            Arc::clone(&live),
            PollSettings {
                interval: Duration::from_secs(3),
                response_timeout: Duration::from_secs(1),
                tracked,
                temperature_unit: TemperatureUnit::Celsius,
            },
        );
        Harness {
            transport,
            poller,
            live,
            snapshots,
        }
    }

    async fn next_snapshot(snapshots: &mut Subscription) -> LiveData {
        match snapshots.recv().await {
            Some(Event::Snapshot(data)) => *data,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skips_undecodable_parameter() {
        let backend = MockBackend::new();
        backend.set_reply("010D", "41 0D");
        let h = harness(&backend, vec![Parameter::EngineRpm, Parameter::VehicleSpeed]).await;

        let readings = h.poller.poll_once().await.unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].parameter, Parameter::EngineRpm);
        assert!((readings[0].value - 1726.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_keeps_last_known_value() {
        let backend = MockBackend::new();
        backend.set_reply("010D", "41 0D 50");
        let mut h = harness(&backend, vec![Parameter::EngineRpm, Parameter::VehicleSpeed]).await;
        let task = h.poller.spawn();

        let first = next_snapshot(&mut h.snapshots).await;
        assert_eq!(first.rpm, Some(1726.0));
        assert_eq!(first.speed, Some(80.0));

        backend.set_reply("010D", "NO DATA");
        backend.set_reply("010C", "41 0C 0C 80");
        let second = next_snapshot(&mut h.snapshots).await;
        assert_eq!(second.rpm, Some(800.0));
        assert_eq!(second.speed, Some(80.0));
        assert_eq!(h.live.lock().unwrap().rpm, Some(800.0));

        h.transport.disconnect().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_snapshot_leaves_missing_values_absent() {
        let backend = MockBackend::new();
        backend.set_silent("010D");
        let mut h = harness(&backend, vec![Parameter::EngineRpm, Parameter::VehicleSpeed]).await;
        let task = h.poller.spawn();

        let snapshot = next_snapshot(&mut h.snapshots).await;
        assert_eq!(snapshot.rpm, Some(1726.0));
        assert_eq!(snapshot.speed, None);
        assert!(snapshot.timestamp_ms > 0);

        h.transport.disconnect().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_snapshot_when_nothing_decodes() {
        let backend = MockBackend::new();
        backend.set_reply("010C", "NO DATA");
        let mut h = harness(&backend, vec![Parameter::EngineRpm]).await;
        let task = h.poller.spawn();

        let waited = tokio::time::timeout(Duration::from_secs(10), h.snapshots.recv()).await;
        assert!(waited.is_err());

        h.transport.disconnect().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_stops_on_link_loss() {
        let backend = MockBackend::new();
        let mut h = harness(&backend, vec![Parameter::EngineRpm]).await;
        let task = h.poller.spawn();
        next_snapshot(&mut h.snapshots).await;

        backend.drop_link();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(h.transport.state(), ConnectionState::Failed(_)));
    }
}
