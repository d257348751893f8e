//! Action types
//!
//! Actions are the building blocks of automation sequences. The untagged
//! enum means each action is recognized by its distinguishing key
//! (`service`, `delay`, `wait_template`, ...), matching how they are
//! written in YAML.

use hearth_automation::Condition;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Deserialize a field that can be a single string or a list of strings
fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(vec![s]),
        StringOrVec::Vec(v) => Ok(v),
    }
}

/// Target specification for service calls
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Target {
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_or_vec"
    )]
    pub entity_id: Vec<String>,
}

impl Target {
    pub fn is_empty(&self) -> bool {
        self.entity_id.is_empty()
    }
}

/// A single action in a sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// Call a service
    Service(ServiceAction),

    /// Pause for a duration
    Delay(DelayAction),

    /// Wait for a template to become true
    WaitTemplate(WaitTemplateAction),

    /// First matching branch wins
    Choose(ChooseAction),

    /// Loop a nested sequence
    Repeat(RepeatAction),

    /// Run branches concurrently
    Parallel(ParallelAction),

    /// Fire an event on the bus
    Event(EventAction),
}

/// Service call action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Service to call ("light.turn_on")
    pub service: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,

    /// Service data; string values may be templates
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

/// Delay action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub delay: DelaySpec,
}

/// Delay specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelaySpec {
    /// Template or literal duration string ("00:00:05")
    Template(String),

    /// Duration components
    Components {
        #[serde(default)]
        hours: u64,
        #[serde(default)]
        minutes: u64,
        #[serde(default)]
        seconds: u64,
        #[serde(default)]
        milliseconds: u64,
    },
}

impl DelaySpec {
    /// Convert to a Duration if no rendering is needed.
    pub fn to_duration(&self) -> Option<Duration> {
        match self {
            DelaySpec::Template(_) => None,
            DelaySpec::Components {
                hours,
                minutes,
                seconds,
                milliseconds,
            } => Some(Duration::from_millis(
                hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + milliseconds,
            )),
        }
    }
}

/// Wait for a template to become true
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitTemplateAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub wait_template: String,

    /// Timeout as a duration string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// When false, a timeout aborts the rest of the sequence
    #[serde(default = "default_true")]
    pub continue_on_timeout: bool,
}

fn default_true() -> bool {
    true
}

/// Choose action (first matching branch wins)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChooseAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub choose: Vec<ChooseOption>,

    /// Run when no branch matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default: Vec<serde_json::Value>,
}

/// A single branch in a choose action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChooseOption {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    pub sequence: Vec<serde_json::Value>,
}

/// Repeat action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub repeat: RepeatConfig,
}

/// Repeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatConfig {
    /// Fixed iteration count
    Count {
        count: usize,
        sequence: Vec<serde_json::Value>,
    },

    /// Run while conditions hold (checked before each iteration)
    While {
        r#while: Vec<Condition>,
        sequence: Vec<serde_json::Value>,
    },

    /// Run until conditions hold (checked after each iteration)
    Until {
        until: Vec<Condition>,
        sequence: Vec<serde_json::Value>,
    },
}

/// Parallel action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Branches; each entry is an action or a list of actions
    pub parallel: Vec<serde_json::Value>,
}

/// Fire an event on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub event: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub event_data: HashMap<String, serde_json::Value>,
}
