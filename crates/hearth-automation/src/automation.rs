//! Automation definitions and lifecycle
//!
//! An automation ties triggers, conditions, and actions together. The
//! AutomationManager owns every loaded automation; the run-mode engine
//! lives elsewhere and consults the manager for definitions and run
//! accounting.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::condition::Condition;
use crate::trigger::Trigger;

/// Automation errors
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("automation not found: {0}")]
    NotFound(String),

    #[error("invalid automation configuration: {0}")]
    InvalidConfig(String),

    #[error("trigger error: {0}")]
    Trigger(#[from] crate::trigger::TriggerError),

    #[error("condition error: {0}")]
    Condition(#[from] crate::condition::ConditionError),
}

/// Result type for automation operations
pub type AutomationResult<T> = Result<T, AutomationError>;

/// Concurrency mode for automation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Ignore new triggers while a run is in flight
    Single,

    /// Cancel the in-flight run and start over
    Restart,

    /// Queue pending runs, oldest first
    Queued { max: usize },

    /// Run concurrently up to max
    Parallel { max: usize },
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Single
    }
}

/// Mode name as written in configuration; `max` is a sibling key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunModeName {
    #[default]
    Single,
    Restart,
    Queued,
    Parallel,
}

const DEFAULT_MAX_RUNS: usize = 10;

impl RunMode {
    fn from_config(mode: RunModeName, max: Option<usize>) -> Self {
        let max = max.unwrap_or(DEFAULT_MAX_RUNS);
        match mode {
            RunModeName::Single => RunMode::Single,
            RunModeName::Restart => RunMode::Restart,
            RunModeName::Queued => RunMode::Queued { max },
            RunModeName::Parallel => RunMode::Parallel { max },
        }
    }
}

/// Automation configuration as loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Unique ID, generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, alias = "trigger")]
    pub triggers: Vec<Trigger>,

    #[serde(default, alias = "condition")]
    pub conditions: Vec<Condition>,

    /// Actions to execute, raw values interpreted by the script crate
    #[serde(default, alias = "action")]
    pub actions: Vec<serde_json::Value>,

    #[serde(default)]
    pub mode: RunModeName,

    /// Run bound for queued/parallel modes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A loaded automation
#[derive(Debug, Clone)]
pub struct Automation {
    pub id: String,
    pub alias: Option<String>,
    pub description: Option<String>,
    pub triggers: Vec<Trigger>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<serde_json::Value>,
    pub mode: RunMode,
    pub enabled: bool,

    /// Last time a run started
    pub last_triggered: Option<DateTime<Utc>>,

    /// Runs currently in flight
    pub current_runs: usize,
}

impl Automation {
    pub fn from_config(config: AutomationConfig) -> Self {
        let id = config.id.unwrap_or_else(|| ulid::Ulid::new().to_string());

        Self {
            id,
            alias: config.alias,
            description: config.description,
            triggers: config.triggers,
            conditions: config.conditions,
            actions: config.actions,
            mode: RunMode::from_config(config.mode, config.max),
            enabled: config.enabled,
            last_triggered: None,
            current_runs: 0,
        }
    }

    /// Display name (alias or ID)
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }
}

/// Holds every loaded automation, keyed by ID
pub struct AutomationManager {
    automations: DashMap<String, Automation>,
}

impl AutomationManager {
    pub fn new() -> Self {
        Self {
            automations: DashMap::new(),
        }
    }

    /// Load automations from configs.
    pub fn load(&self, configs: Vec<AutomationConfig>) -> AutomationResult<()> {
        for config in configs {
            self.add(config)?;
        }
        Ok(())
    }

    /// Add a single automation, rejecting duplicate IDs.
    pub fn add(&self, config: AutomationConfig) -> AutomationResult<String> {
        let automation = Automation::from_config(config);
        let id = automation.id.clone();

        if self.automations.contains_key(&id) {
            return Err(AutomationError::InvalidConfig(format!(
                "duplicate automation id: {id}"
            )));
        }

        info!(id = %id, name = %automation.display_name(), "loaded automation");
        self.automations.insert(id.clone(), automation);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Automation> {
        self.automations.get(id).map(|a| a.value().clone())
    }

    pub fn all(&self) -> Vec<Automation> {
        self.automations.iter().map(|a| a.value().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.automations.len()
    }

    pub fn remove(&self, id: &str) -> AutomationResult<Automation> {
        self.automations
            .remove(id)
            .map(|(_, a)| a)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))
    }

    pub fn enable(&self, id: &str) -> AutomationResult<()> {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: &str) -> AutomationResult<()> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> AutomationResult<()> {
        let mut automation = self
            .automations
            .get_mut(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;

        automation.enabled = enabled;
        info!(
            id = %automation.id,
            enabled,
            "automation {}", if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.automations
            .get(id)
            .map(|a| a.enabled)
            .unwrap_or(false)
    }

    /// Record that a run started.
    pub fn mark_triggered(&self, id: &str, when: DateTime<Utc>) {
        if let Some(mut automation) = self.automations.get_mut(id) {
            automation.last_triggered = Some(when);
        }
    }

    pub fn increment_runs(&self, id: &str) {
        if let Some(mut automation) = self.automations.get_mut(id) {
            automation.current_runs += 1;
            debug!(id = %automation.id, runs = automation.current_runs, "run started");
        }
    }

    pub fn decrement_runs(&self, id: &str) {
        if let Some(mut automation) = self.automations.get_mut(id) {
            automation.current_runs = automation.current_runs.saturating_sub(1);
            debug!(id = %automation.id, runs = automation.current_runs, "run finished");
        }
    }

    pub fn current_runs(&self, id: &str) -> usize {
        self.automations
            .get(id)
            .map(|a| a.current_runs)
            .unwrap_or(0)
    }
}

impl Default for AutomationManager {
    fn default() -> Self {
        Self::new()
    }
}
