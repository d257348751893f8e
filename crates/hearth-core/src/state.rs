//! Entity state snapshot and write-outcome bookkeeping

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId};

/// What a store write actually did to an entity.
///
/// The store distinguishes three timestamp updates:
/// - `last_changed` moves only when the state *value* changes,
/// - `last_updated` moves when the value or the attributes change,
/// - `last_reported` moves on every write, including exact no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// First write for this entity id
    Created,
    /// The state value changed (attributes may have too)
    Changed,
    /// Same value, different attributes
    AttributesChanged,
    /// Exact no-op write; only `last_reported` advanced
    Reported,
}

impl ChangeOutcome {
    /// True when this outcome produces a `state_changed` event.
    pub fn emits_change_event(self) -> bool {
        !matches!(self, ChangeOutcome::Reported)
    }
}

/// A snapshot of one entity at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// The entity this snapshot belongs to
    pub entity_id: EntityId,

    /// The state value (e.g. "on", "off", "21.5", "unavailable")
    pub state: String,

    /// Attributes associated with the state
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the value or attributes last changed
    pub last_updated: DateTime<Utc>,

    /// When any write last occurred, including no-ops
    pub last_reported: DateTime<Utc>,

    /// Causal context of the write that produced this snapshot
    pub context: Context,
}

impl State {
    /// First snapshot for an entity; all timestamps start at `now`.
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            last_reported: now,
            context,
        }
    }

    /// Produce the successor snapshot for a write, advancing only the
    /// timestamps the write warrants. Returns the snapshot together with
    /// what kind of write it was.
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
        now: DateTime<Utc>,
    ) -> (Self, ChangeOutcome) {
        let new_state = new_state.into();
        let value_changed = self.state != new_state;
        let attrs_changed = self.attributes != new_attributes;

        let outcome = if value_changed {
            ChangeOutcome::Changed
        } else if attrs_changed {
            ChangeOutcome::AttributesChanged
        } else {
            ChangeOutcome::Reported
        };

        let next = Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed: if value_changed { now } else { self.last_changed },
            last_updated: if value_changed || attrs_changed {
                now
            } else {
                self.last_updated
            },
            last_reported: now,
            context,
        };

        (next, outcome)
    }

    /// Whether the device behind this entity is unreachable.
    pub fn is_unavailable(&self) -> bool {
        self.state == crate::STATE_UNAVAILABLE
    }

    /// Whether this entity has no meaningful value yet.
    pub fn is_unknown(&self) -> bool {
        self.state == crate::STATE_UNKNOWN
    }

    /// Deserialize an attribute by key.
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl PartialEq for State {
    // Timestamps and context are deliberately excluded: two snapshots are
    // the "same state" when id, value, and attributes agree.
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}
