//! Automation model and evaluation
//!
//! Automations are event-driven rules: triggers fire, conditions gate,
//! actions run.
//!
//! ```text
//! AUTOMATION = TRIGGER → CONDITIONS → ACTIONS
//! ```
//!
//! - **Triggers**: event detectors (state changes, times of day, sun)
//! - **Conditions**: state-based tests evaluated at trigger time
//! - **Actions**: raw values here, interpreted by the script crate
//!
//! The run-mode machinery that actually executes automations lives in
//! the engine crate; this one owns definitions, matching, and condition
//! evaluation.
//!
//! # Key Types
//!
//! - [`Trigger`] - event that starts an automation
//! - [`Condition`] - state check that must pass
//! - [`Automation`] - complete automation definition
//! - [`AutomationManager`] - holds all loaded automations
//! - [`ConditionEvaluator`] - evaluates conditions against the live store

pub mod automation;
pub mod condition;
pub mod eval;
pub mod trigger;
pub mod trigger_eval;

pub use automation::{
    Automation, AutomationConfig, AutomationError, AutomationManager, AutomationResult, RunMode,
    RunModeName,
};
pub use condition::{Condition, ConditionError, ConditionResult};
pub use eval::{ConditionEvaluator, EvalContext, DEFAULT_TEMPLATE_TIMEOUT};
pub use trigger::{SunEvent, Trigger, TriggerData, TriggerError, TriggerResult};
pub use trigger_eval::{match_state_trigger, state_satisfies};
