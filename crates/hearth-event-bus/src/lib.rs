//! Event bus with typed pub/sub for Hearth
//!
//! Bounded multi-consumer broadcast of state-change and automation
//! lifecycle events. A slow subscriber never stalls writers: when a
//! receiver falls behind, the oldest events are dropped for that receiver
//! and its lag counter advances. Consumers that cannot tolerate loss (the
//! automation engine) take the state store's direct hook instead of this
//! bus.

use dashmap::DashMap;
use hearth_core::{Context, Event, EventData, EventType};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default per-channel capacity, in event slots.
const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// The event bus for publishing and subscribing to events.
pub struct EventBus {
    /// Broadcast senders per event type
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Sender for wildcard subscribers
    match_all_sender: broadcast::Sender<Event<serde_json::Value>>,
    /// Channel capacity applied to every channel
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            capacity,
        }
    }

    /// Subscribe to events of one type. The returned receiver tracks how
    /// many events it lost to lag.
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> BusReceiver {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "subscribing");

        if event_type.is_match_all() {
            return BusReceiver::new(self.match_all_sender.subscribe());
        }

        let rx = self
            .listeners
            .entry(event_type)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe();
        BusReceiver::new(rx)
    }

    /// Subscribe with payloads parsed into `T`.
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver::new(self.subscribe(T::event_type()))
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self) -> BusReceiver {
        BusReceiver::new(self.match_all_sender.subscribe())
    }

    /// Fire an event to type-specific and wildcard subscribers.
    ///
    /// Never blocks; receivers that are full lose their oldest slot.
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // A send error only means no live receivers for this type.
            let _ = sender.send(event.clone());
        }
        let _ = self.match_all_sender.send(event);
    }

    /// Fire a typed payload under its own event type.
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context);
        let json_data = serde_json::to_value(&event.data).unwrap_or_default();
        self.fire(Event {
            event_type: event.event_type,
            data: json_data,
            origin: event.origin,
            time_fired: event.time_fired,
            context: event.context,
        });
    }

    /// Number of event types with at least one subscription channel.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A bus receiver that absorbs lag instead of failing.
pub struct BusReceiver {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    lagged: u64,
}

impl BusReceiver {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self { rx, lagged: 0 }
    }

    /// Receive the next event, skipping over any lag gap.
    ///
    /// Returns `None` once the bus side has been dropped.
    pub async fn recv(&mut self) -> Option<Event<serde_json::Value>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.lagged += n;
                    warn!(dropped = n, total = self.lagged, "bus receiver lagging");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive for tests and polling consumers.
    pub fn try_recv(&mut self) -> Option<Event<serde_json::Value>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.lagged += n;
                    warn!(dropped = n, total = self.lagged, "bus receiver lagging");
                }
                Err(_) => return None,
            }
        }
    }

    /// Total events this receiver has lost to lag.
    pub fn lag_count(&self) -> u64 {
        self.lagged
    }
}

/// A receiver that deserializes payloads into `T`.
pub struct TypedEventReceiver<T> {
    inner: BusReceiver,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(inner: BusReceiver) -> Self {
        Self {
            inner,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next event whose payload parses as `T`.
    ///
    /// Undecodable payloads are skipped. Returns `None` when closed.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        loop {
            let event = self.inner.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Some(Event {
                    event_type: event.event_type,
                    data,
                    origin: event.origin,
                    time_fired: event.time_fired,
                    context: event.context,
                });
            }
        }
    }

    pub fn lag_count(&self) -> u64 {
        self.inner.lag_count()
    }
}

/// Thread-safe alias used across the workspace.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::events::CallServiceData;
    use serde_json::json;

    #[tokio::test]
    async fn subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("test_event");

        bus.fire(Event::new("test_event", json!({"key": "value"}), Context::new()));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type.as_str(), "test_event");
        assert_eq!(received.data["key"], "value");
        assert_eq!(rx.lag_count(), 0);
    }

    #[tokio::test]
    async fn wildcard_sees_everything() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        bus.fire(Event::new("event_a", json!({}), Context::new()));
        bus.fire(Event::new("event_b", json!({}), Context::new()));

        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "event_a");
        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "event_b");
    }

    #[tokio::test]
    async fn typed_subscription_parses_payload() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<CallServiceData>();

        bus.fire_typed(
            CallServiceData {
                domain: "light".to_string(),
                service: "turn_on".to_string(),
                service_data: json!({"brightness": 128}),
            },
            Context::new(),
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data.domain, "light");
        assert_eq!(received.data.service, "turn_on");
    }

    #[tokio::test]
    async fn no_cross_type_delivery() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("event_a");
        let mut rx_b = bus.subscribe("event_b");

        bus.fire(Event::new("event_a", json!({"n": 1}), Context::new()));

        assert_eq!(rx_a.recv().await.unwrap().data["n"], 1);
        assert!(rx_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn lagging_receiver_drops_and_counts() {
        let bus = EventBus::with_capacity(4);
        let mut rx = bus.subscribe("flood");

        for i in 0..10 {
            bus.fire(Event::new("flood", json!({"i": i}), Context::new()));
        }

        // The first event still available is past the dropped window.
        let first = rx.recv().await.unwrap();
        assert!(first.data["i"].as_i64().unwrap() >= 6);
        assert_eq!(rx.lag_count(), 6);
    }

    #[tokio::test]
    async fn slow_subscriber_never_blocks_writers() {
        let bus = EventBus::with_capacity(2);
        let _rx = bus.subscribe("burst");

        // Far more events than capacity; fire must return immediately.
        for i in 0..100 {
            bus.fire(Event::new("burst", json!({"i": i}), Context::new()));
        }
    }
}
