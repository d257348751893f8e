//! Trigger types
//!
//! Triggers are the event detectors that start automations. When one
//! matches it produces [`TriggerData`], the variables conditions and
//! actions see as `trigger.*`.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Trigger errors
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid trigger configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for trigger operations
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Data provided when a trigger fires
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerData {
    /// Optional trigger ID for referencing in conditions/actions
    pub id: Option<String>,

    /// Trigger platform type ("state", "time", "sun")
    pub platform: String,

    /// Variables exposed to templates as `trigger.*`
    #[serde(flatten)]
    pub variables: HashMap<String, serde_json::Value>,

    /// When the trigger matched
    pub triggered_at: DateTime<Utc>,
}

impl TriggerData {
    pub fn new(platform: impl Into<String>, triggered_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            platform: platform.into(),
            variables: HashMap::new(),
            triggered_at,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }
}

/// Trigger definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires when an entity's state changes
    State(StateTrigger),

    /// Fires at a specific wall-clock time each day
    Time(TimeTrigger),

    /// Fires at sunrise/sunset, with an optional offset
    Sun(SunTrigger),
}

impl Trigger {
    pub fn id(&self) -> Option<&str> {
        match self {
            Trigger::State(t) => t.id.as_deref(),
            Trigger::Time(t) => t.id.as_deref(),
            Trigger::Sun(t) => t.id.as_deref(),
        }
    }

    pub fn platform(&self) -> &'static str {
        match self {
            Trigger::State(_) => "state",
            Trigger::Time(_) => "time",
            Trigger::Sun(_) => "sun",
        }
    }
}

/// State change trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTrigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Entity IDs to monitor (single or list)
    pub entity_id: EntityIdSpec,

    /// Previous state to match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<StateMatch>,

    /// New state to match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<StateMatch>,

    /// Duration the new state must be held before firing
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        with = "option_duration_serde"
    )]
    pub r#for: Option<Duration>,
}

/// Time trigger, fires once per day at `at`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeTrigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Time to trigger at (HH:MM:SS)
    pub at: NaiveTime,
}

/// Sun trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SunTrigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// sunrise or sunset
    pub event: SunEvent,

    /// Signed offset from the event ("-00:30:00" for half an hour before)
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        with = "option_signed_duration_serde"
    )]
    pub offset: Option<chrono::Duration>,
}

// --- Supporting types ---

/// Entity ID specification (single or list)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityIdSpec {
    Single(String),
    List(Vec<String>),
}

impl EntityIdSpec {
    pub fn ids(&self) -> Vec<&str> {
        match self {
            EntityIdSpec::Single(id) => vec![id.as_str()],
            EntityIdSpec::List(ids) => ids.iter().map(|s| s.as_str()).collect(),
        }
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        match self {
            EntityIdSpec::Single(id) => id == entity_id,
            EntityIdSpec::List(ids) => ids.iter().any(|id| id == entity_id),
        }
    }
}

/// State match specification (single value or list)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateMatch {
    Single(String),
    List(Vec<String>),
}

impl StateMatch {
    pub fn matches(&self, state: &str) -> bool {
        match self {
            StateMatch::Single(s) => s == state,
            StateMatch::List(list) => list.iter().any(|s| s == state),
        }
    }
}

/// Sun event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

// --- Duration serde helpers ---

pub(crate) mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => {
                let secs = d.as_secs();
                serializer.serialize_str(&format!(
                    "{:02}:{:02}:{:02}",
                    secs / 3600,
                    (secs % 3600) / 60,
                    secs % 60
                ))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(s) => parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }

    /// Parse HH:MM:SS, MM:SS, or SS.
    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let parts: Vec<&str> = s.split(':').collect();
        let parse = |p: &str, what: &str| -> Result<u64, String> {
            p.parse().map_err(|_| format!("invalid {what}: {p}"))
        };
        match parts.len() {
            1 => Ok(Duration::from_secs(parse(parts[0], "seconds")?)),
            2 => Ok(Duration::from_secs(
                parse(parts[0], "minutes")? * 60 + parse(parts[1], "seconds")?,
            )),
            3 => Ok(Duration::from_secs(
                parse(parts[0], "hours")? * 3600
                    + parse(parts[1], "minutes")? * 60
                    + parse(parts[2], "seconds")?,
            )),
            _ => Err(format!("invalid duration: {s}")),
        }
    }
}

pub(crate) mod option_signed_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(
        value: &Option<chrono::Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => {
                let secs = d.num_seconds();
                let sign = if secs < 0 { "-" } else { "" };
                let secs = secs.unsigned_abs();
                serializer.serialize_str(&format!(
                    "{sign}{:02}:{:02}:{:02}",
                    secs / 3600,
                    (secs % 3600) / 60,
                    secs % 60
                ))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<chrono::Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let (negative, rest) = match s.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, s.as_str()),
                };
                let d = super::option_duration_serde::parse_duration(rest)
                    .map_err(serde::de::Error::custom)?;
                let d = chrono::Duration::from_std(d)
                    .map_err(|e| serde::de::Error::custom(e.to_string()))?;
                Ok(Some(if negative { -d } else { d }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_trigger_from_yaml() {
        let yaml = r#"
trigger: state
entity_id: binary_sensor.motion
to: "on"
for: "00:05:00"
"#;
        let trigger: Trigger = serde_yaml::from_str(yaml).unwrap();
        let Trigger::State(t) = trigger else {
            panic!("expected state trigger");
        };
        assert!(t.entity_id.contains("binary_sensor.motion"));
        assert!(t.to.as_ref().unwrap().matches("on"));
        assert_eq!(t.r#for, Some(Duration::from_secs(300)));
    }

    #[test]
    fn entity_id_spec_single_or_list() {
        let single: EntityIdSpec = serde_json::from_str(r#""light.test""#).unwrap();
        assert_eq!(single.ids(), vec!["light.test"]);

        let list: EntityIdSpec = serde_json::from_str(r#"["light.one", "light.two"]"#).unwrap();
        assert_eq!(list.ids(), vec!["light.one", "light.two"]);
    }

    #[test]
    fn time_trigger_parses_naive_time() {
        let yaml = "trigger: time\nat: \"07:30:00\"\n";
        let trigger: Trigger = serde_yaml::from_str(yaml).unwrap();
        let Trigger::Time(t) = trigger else {
            panic!("expected time trigger");
        };
        assert_eq!(t.at, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
    }

    #[test]
    fn sun_trigger_negative_offset() {
        let yaml = "trigger: sun\nevent: sunset\noffset: \"-00:30:00\"\n";
        let trigger: Trigger = serde_yaml::from_str(yaml).unwrap();
        let Trigger::Sun(t) = trigger else {
            panic!("expected sun trigger");
        };
        assert_eq!(t.event, SunEvent::Sunset);
        assert_eq!(t.offset, Some(chrono::Duration::minutes(-30)));
    }
}
