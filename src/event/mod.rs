//! Event system for push-style notifications.
//!
//! The transport and poller publish state changes, readings and errors here;
//! the host application subscribes and owns all display and persistence.
//! Every subscriber sees events in the order they were dispatched.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::types::{AdapterDevice, ConnectionState, LiveData, Reading, TroubleCode};

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// The transport moved to a new state.
    StateChanged(ConnectionState),
    /// A matching adapter was seen for the first time during a scan.
    DeviceDiscovered(AdapterDevice),
    /// The link became ready (`true`) or stopped being ready (`false`).
    ConnectionChanged(bool),
    /// Readings decoded during one poll cycle or on-demand read.
    Readings(Vec<Reading>),
    /// Aggregated last-known values after a poll cycle.
    Snapshot(Box<LiveData>),
    /// Stored trouble codes were read.
    TroubleCodes(Vec<TroubleCode>),
    /// A failure worth surfacing to the user.
    Error { kind: ErrorKind, detail: String },
}

/// Discriminant of [`Event`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    DeviceDiscovered,
    ConnectionChanged,
    Readings,
    Snapshot,
    TroubleCodes,
    Error,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StateChanged(_) => EventKind::StateChanged,
            Self::DeviceDiscovered(_) => EventKind::DeviceDiscovered,
            Self::ConnectionChanged(_) => EventKind::ConnectionChanged,
            Self::Readings(_) => EventKind::Readings,
            Self::Snapshot(_) => EventKind::Snapshot,
            Self::TroubleCodes(_) => EventKind::TroubleCodes,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// Receives the next event that passes the subscription's filter.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("subscriber lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific event kinds.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Accepted kinds; `None` accepts all.
    pub kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self { kinds: Some(kinds) }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind()))
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher buffering up to `capacity` events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events with an optional filter.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
            filter,
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.inner.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe(None);

        dispatcher.dispatch(Event::ConnectionChanged(true));

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert!(matches!(event, Some(Event::ConnectionChanged(true))));
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe(None);

        dispatcher.dispatch(Event::StateChanged(ConnectionState::Connecting));
        dispatcher.dispatch(Event::StateChanged(ConnectionState::Initializing));
        dispatcher.dispatch(Event::StateChanged(ConnectionState::Ready));

        for expected in [
            ConnectionState::Connecting,
            ConnectionState::Initializing,
            ConnectionState::Ready,
        ] {
            match sub.recv().await {
                Some(Event::StateChanged(state)) => assert_eq!(state, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_filtered_subscription_skips_other_kinds() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe(Some(EventFilter::kinds(vec![EventKind::Error])));

        dispatcher.dispatch(Event::ConnectionChanged(false));
        dispatcher.dispatch(Event::Error {
            kind: ErrorKind::LinkLost,
            detail: "gone".into(),
        });

        assert!(matches!(
            sub.recv().await,
            Some(Event::Error {
                kind: ErrorKind::LinkLost,
                ..
            })
        ));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::kinds(vec![EventKind::Readings, EventKind::Snapshot]);

        assert!(filter.matches(&Event::Readings(Vec::new())));
        assert!(filter.matches(&Event::Snapshot(Box::default())));
        assert!(!filter.matches(&Event::ConnectionChanged(true)));
        assert!(EventFilter::default().matches(&Event::ConnectionChanged(true)));
    }
}
