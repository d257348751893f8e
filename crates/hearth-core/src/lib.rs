//! Core types for Hearth
//!
//! This crate provides the fundamental types used throughout the Hearth
//! runtime: EntityId, State, Event, Context, ChangeOutcome, the Clock
//! abstraction, and the traits for externally injected collaborators
//! (service registry, expression evaluator, recorder).

mod clock;
mod context;
mod entity_id;
mod event;
mod external;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use external::{
    ExpressionEvaluator, Recorder, RenderError, ServiceCallError, ServiceRegistry, ServiceTarget,
};
pub use state::{ChangeOutcome, State};

/// State value for an entity that exists but has no meaningful value yet
pub const STATE_UNKNOWN: &str = "unknown";

/// State value for an entity whose device is not reachable
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Standard event types used by the Hearth core
pub mod events {
    use super::*;

    /// Event type for state changes (value or attributes differ)
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for pure no-op writes (only last_reported advanced)
    pub const STATE_REPORTED: &str = "state_reported";

    /// Event type for service calls
    pub const CALL_SERVICE: &str = "call_service";

    /// Event type fired when an automation's conditions pass and a run starts
    pub const AUTOMATION_TRIGGERED: &str = "automation_triggered";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for STATE_REPORTED events (unchanged state was written again)
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateReportedData {
        pub entity_id: EntityId,
        pub new_state: State,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub old_last_reported: Option<chrono::DateTime<chrono::Utc>>,
        pub last_reported: chrono::DateTime<chrono::Utc>,
    }

    impl EventData for StateReportedData {
        fn event_type() -> &'static str {
            STATE_REPORTED
        }
    }

    /// Data for CALL_SERVICE events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct CallServiceData {
        pub domain: String,
        pub service: String,
        pub service_data: serde_json::Value,
    }

    impl EventData for CallServiceData {
        fn event_type() -> &'static str {
            CALL_SERVICE
        }
    }

    /// Data for AUTOMATION_TRIGGERED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct AutomationTriggeredData {
        pub automation_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub alias: Option<String>,
    }

    impl EventData for AutomationTriggeredData {
        fn event_type() -> &'static str {
            AUTOMATION_TRIGGERED
        }
    }
}
