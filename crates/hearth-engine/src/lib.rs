//! Automation execution engine
//!
//! This crate turns definitions from the automation crate into running
//! behavior:
//!
//! - [`AutomationEngine`] consumes the state store's lossless change
//!   hook, matches state triggers (including `for:` holds), evaluates
//!   conditions, and starts runs under each automation's run mode
//! - [`Scheduler`] polls the clock for time-of-day and sun triggers
//! - [`sun`] computes sunrise/sunset for the configured location
//! - [`trace`] keeps a bounded record of every run for inspection

pub mod engine;
pub mod scheduler;
pub mod sun;
pub mod trace;

pub use engine::AutomationEngine;
pub use scheduler::{DueTrigger, Scheduler, DEFAULT_TICK_INTERVAL};
pub use sun::Location;
pub use trace::{RunOutcome, RunTrace, TraceLog, DEFAULT_TRACE_CAPACITY};
