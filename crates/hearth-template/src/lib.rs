//! Templating for Hearth
//!
//! A minijinja-based engine with live state access for condition
//! expressions, discovery payload extraction, and templated action fields.
//!
//! # State Access
//!
//! - `states('entity_id')` - state value as a string
//! - `states.light.desk` - full state object
//! - `is_state('entity_id', 'on')` - state check
//! - `state_attr('entity_id', 'brightness')` - attribute value
//! - `has_value('entity_id')` - entity is known and available
//!
//! # Example
//!
//! ```ignore
//! use hearth_template::TemplateEngine;
//!
//! let engine = TemplateEngine::new(store);
//! let result = engine.render("{{ states('sensor.temperature') }}")?;
//! ```

mod engine;
mod error;
mod evaluator;
mod states;

pub use engine::{result_as_boolean, TemplateEngine};
pub use error::{TemplateError, TemplateResult};
pub use evaluator::TemplateEvaluator;
pub use states::{StateWrapper, StatesObject};

pub use minijinja::Value;
