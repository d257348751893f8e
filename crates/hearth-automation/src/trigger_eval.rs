//! Trigger matching logic
//!
//! Pure evaluation of state triggers against a state change. Duration
//! holds (`for:`) are not decided here: a match on a trigger with `for`
//! set tells the caller to arm a timer, and [`state_satisfies`] is the
//! re-check it performs when that timer elapses.

use chrono::{DateTime, Utc};
use hearth_core::events::StateChangedData;
use tracing::trace;

use crate::trigger::{StateTrigger, SunTrigger, TimeTrigger, Trigger, TriggerData};

/// Evaluate a state trigger against a state change.
///
/// Returns `Some(TriggerData)` when the change satisfies the trigger's
/// entity/from/to constraints. With neither `from` nor `to` set, any
/// value change of a monitored entity matches (entity creation and
/// removal included).
pub fn match_state_trigger(
    trigger: &StateTrigger,
    change: &StateChangedData,
    now: DateTime<Utc>,
) -> Option<TriggerData> {
    let entity_id = change.entity_id.to_string();
    if !trigger.entity_id.contains(&entity_id) {
        return None;
    }

    let old_value = change.old_state.as_ref().map(|s| s.state.as_str());
    let new_value = change.new_state.as_ref().map(|s| s.state.as_str());

    if let Some(from) = &trigger.from {
        match old_value {
            Some(old) if from.matches(old) => {}
            _ => {
                trace!(entity_id, "old state does not match from");
                return None;
            }
        }
    }

    if let Some(to) = &trigger.to {
        match new_value {
            Some(new) if to.matches(new) => {}
            _ => {
                trace!(entity_id, "new state does not match to");
                return None;
            }
        }
    }

    if trigger.from.is_none() && trigger.to.is_none() && old_value == new_value {
        return None;
    }

    let mut data = TriggerData::new("state", now)
        .with_var("entity_id", serde_json::json!(entity_id))
        .with_var(
            "from_state",
            serde_json::to_value(&change.old_state).unwrap_or_default(),
        )
        .with_var(
            "to_state",
            serde_json::to_value(&change.new_state).unwrap_or_default(),
        );

    if let Some(id) = &trigger.id {
        data = data.with_id(id);
    }

    Some(data)
}

/// Whether the current state still satisfies a held trigger.
///
/// Called when a `for:` timer elapses. `armed_value` is the value that
/// started the timer; triggers without a `to` constraint require the
/// value to be unchanged since arming.
pub fn state_satisfies(
    trigger: &StateTrigger,
    current_value: Option<&str>,
    armed_value: &str,
) -> bool {
    match (&trigger.to, current_value) {
        (Some(to), Some(current)) => to.matches(current),
        (None, Some(current)) => current == armed_value,
        (_, None) => false,
    }
}

/// TriggerData for a time trigger firing.
pub fn time_trigger_data(trigger: &TimeTrigger, now: DateTime<Utc>) -> TriggerData {
    let mut data =
        TriggerData::new("time", now).with_var("now", serde_json::json!(now.to_rfc3339()));
    if let Some(id) = &trigger.id {
        data = data.with_id(id);
    }
    data
}

/// TriggerData for a sun trigger firing.
pub fn sun_trigger_data(trigger: &SunTrigger, now: DateTime<Utc>) -> TriggerData {
    let mut data =
        TriggerData::new("sun", now).with_var("event", serde_json::json!(trigger.event));
    if let Some(id) = &trigger.id {
        data = data.with_id(id);
    }
    data
}

/// TriggerData for any trigger variant, for callers that only have the
/// enum.
pub fn generic_trigger_data(trigger: &Trigger, now: DateTime<Utc>) -> TriggerData {
    match trigger {
        Trigger::Time(t) => time_trigger_data(t, now),
        Trigger::Sun(t) => sun_trigger_data(t, now),
        Trigger::State(t) => {
            let mut data = TriggerData::new("state", now);
            if let Some(id) = &t.id {
                data = data.with_id(id);
            }
            data
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{EntityIdSpec, StateMatch};
    use hearth_core::{Context, EntityId, State};
    use std::collections::HashMap;

    fn change(entity: &str, old: Option<&str>, new: Option<&str>) -> StateChangedData {
        let entity_id: EntityId = entity.parse().unwrap();
        let now = Utc::now();
        let mk = |value: &str| {
            State::new(
                entity_id.clone(),
                value,
                HashMap::new(),
                Context::new(),
                now,
            )
        };
        let old_state = old.map(&mk);
        let new_state = new.map(&mk);
        StateChangedData {
            entity_id,
            old_state,
            new_state,
        }
    }

    fn trigger(entity: &str, from: Option<&str>, to: Option<&str>) -> StateTrigger {
        StateTrigger {
            id: None,
            entity_id: EntityIdSpec::Single(entity.to_string()),
            from: from.map(|s| StateMatch::Single(s.to_string())),
            to: to.map(|s| StateMatch::Single(s.to_string())),
            r#for: None,
        }
    }

    #[test]
    fn to_constraint_matches() {
        let t = trigger("binary_sensor.motion", None, Some("on"));
        let now = Utc::now();

        assert!(match_state_trigger(&t, &change("binary_sensor.motion", Some("off"), Some("on")), now).is_some());
        assert!(match_state_trigger(&t, &change("binary_sensor.motion", Some("on"), Some("off")), now).is_none());
        assert!(match_state_trigger(&t, &change("binary_sensor.door", Some("off"), Some("on")), now).is_none());
    }

    #[test]
    fn from_and_to_both_required() {
        let t = trigger("light.desk", Some("off"), Some("on"));
        let now = Utc::now();

        assert!(match_state_trigger(&t, &change("light.desk", Some("off"), Some("on")), now).is_some());
        assert!(match_state_trigger(&t, &change("light.desk", Some("unavailable"), Some("on")), now).is_none());
    }

    #[test]
    fn bare_trigger_fires_on_any_value_change() {
        let t = trigger("sensor.temp", None, None);
        let now = Utc::now();

        assert!(match_state_trigger(&t, &change("sensor.temp", Some("20"), Some("21")), now).is_some());
        // Attribute-only changes carry equal values and do not match.
        assert!(match_state_trigger(&t, &change("sensor.temp", Some("20"), Some("20")), now).is_none());
        // Creation and removal count as changes.
        assert!(match_state_trigger(&t, &change("sensor.temp", None, Some("20")), now).is_some());
        assert!(match_state_trigger(&t, &change("sensor.temp", Some("20"), None), now).is_some());
    }

    #[test]
    fn creation_does_not_match_from_constraint() {
        let t = trigger("light.desk", Some("off"), None);
        let now = Utc::now();
        assert!(match_state_trigger(&t, &change("light.desk", None, Some("on")), now).is_none());
    }

    #[test]
    fn satisfies_recheck() {
        let with_to = trigger("binary_sensor.motion", None, Some("on"));
        assert!(state_satisfies(&with_to, Some("on"), "on"));
        assert!(!state_satisfies(&with_to, Some("off"), "on"));
        assert!(!state_satisfies(&with_to, None, "on"));

        let bare = trigger("sensor.temp", None, None);
        assert!(state_satisfies(&bare, Some("21"), "21"));
        assert!(!state_satisfies(&bare, Some("22"), "21"));
    }

    #[test]
    fn trigger_data_carries_states() {
        let t = trigger("light.desk", None, Some("on"));
        let data = match_state_trigger(
            &t,
            &change("light.desk", Some("off"), Some("on")),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(data.platform, "state");
        assert_eq!(
            data.variables.get("entity_id").unwrap(),
            &serde_json::json!("light.desk")
        );
        assert_eq!(
            data.variables.get("to_state").unwrap()["state"],
            serde_json::json!("on")
        );
    }
}
