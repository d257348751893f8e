//! Condition types
//!
//! Conditions are state-based tests evaluated at trigger time. All of an
//! automation's conditions must pass for its actions to run.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trigger::{EntityIdSpec, StateMatch};

/// Condition errors
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("invalid condition configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for condition operations
pub type ConditionResult<T> = Result<T, ConditionError>;

/// Condition definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Condition {
    /// Check entity state
    State(StateCondition),

    /// Check numeric value thresholds
    NumericState(NumericStateCondition),

    /// Check current time of day and weekday
    Time(TimeCondition),

    /// Evaluate a template expression
    Template(TemplateCondition),

    /// All nested conditions must be true
    And(AndCondition),

    /// Any nested condition must be true
    Or(OrCondition),

    /// Nested condition must be false
    Not(NotCondition),
}

impl Condition {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And(AndCondition { conditions })
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or(OrCondition { conditions })
    }

    pub fn not(condition: Condition) -> Self {
        Condition::Not(NotCondition {
            condition: Box::new(condition),
        })
    }
}

/// State condition
///
/// With a list entity_id, every listed entity must hold a matching state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateCondition {
    pub entity_id: EntityIdSpec,

    /// State to match (single value or list of alternatives)
    pub state: StateMatch,
}

/// Numeric state condition
///
/// The entity's state must parse as a number and fall strictly above
/// and/or below the bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericStateCondition {
    pub entity_id: EntityIdSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub above: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub below: Option<f64>,
}

/// Time-of-day condition
///
/// An `after` later than `before` is read as a window that wraps
/// midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<NaiveTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<NaiveTime>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekday: Vec<Weekday>,
}

/// Template condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCondition {
    pub value_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AndCondition {
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrCondition {
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotCondition {
    pub condition: Box<Condition>,
}
