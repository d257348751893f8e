//! Event envelope for the notification bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// Trait for typed event payloads.
///
/// Implemented by any payload type that has a fixed event-type string.
pub trait EventData: Clone + Send + Sync + 'static {
    /// The event type string this payload is carried under
    fn event_type() -> &'static str;
}

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The wildcard type used to subscribe to every event.
    pub fn match_all() -> Self {
        Self("*".to_string())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == "*"
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event as carried on the bus: typed payload plus origin metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    /// The type of event
    pub event_type: EventType,

    /// The event payload
    pub data: T,

    /// Where the event came from
    pub origin: EventOrigin,

    /// When the event was fired
    pub time_fired: DateTime<Utc>,

    /// Causality context
    pub context: Context,
}

impl<T> Event<T> {
    /// Build an event stamped with the current wall clock.
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            origin: EventOrigin::Local,
            time_fired: Utc::now(),
            context,
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }
}

impl<T: EventData> Event<T> {
    /// Build a typed event, taking the type string from the payload.
    pub fn typed(data: T, context: Context) -> Self {
        Self::new(T::event_type(), data, context)
    }
}

/// Origin of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// Produced by this process
    #[default]
    Local,
    /// Relayed from elsewhere (a bridge, a remote node)
    Remote,
}
