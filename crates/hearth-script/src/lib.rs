//! Action sequence execution
//!
//! This crate interprets the action lists automations carry: service
//! calls, delays, template waits, branching, loops, parallel blocks, and
//! event fires. Runs are cooperatively cancellable through
//! [`CancelToken`], which is how restart-mode automations supersede an
//! in-flight run.
//!
//! # Key Types
//!
//! - [`Action`] - a single step in a sequence
//! - [`ScriptExecutor`] - runs sequences against the live system
//! - [`ExecutionContext`] - per-run variables and trigger data
//! - [`CancelToken`] - cooperative cancellation handle

pub mod action;
pub mod cancel;
pub mod executor;

pub use action::{Action, DelaySpec, RepeatConfig, Target};
pub use cancel::CancelToken;
pub use executor::{ExecutionContext, ScriptError, ScriptExecutor, ScriptResult};
