//! Jinja-style template engine with state-store access

use crate::error::TemplateResult;
use crate::states::{json_to_value, StatesObject};
use hearth_state_store::StateStore;
use minijinja::{Environment, Value};
use std::sync::Arc;
use tracing::trace;

/// Template engine bound to a state store
///
/// Templates see:
/// - the `states` object (`states('sensor.x')`, `states.light.desk`)
/// - `is_state()`, `state_attr()`, `has_value()`
/// - `now()` / `utcnow()`
/// - filters: `float`, `int`, `slugify`, `to_json`, `from_json`
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new(store: Arc<StateStore>) -> Self {
        let states = Arc::new(StatesObject::new(store));
        let mut env = Environment::new();
        env.set_debug(true);

        Self::register_filters(&mut env);
        Self::register_globals(&mut env, states);

        Self { env }
    }

    fn register_filters(env: &mut Environment<'static>) {
        env.add_filter("float", |value: Value| -> Value {
            value
                .as_str()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .or_else(|| f64::try_from(value.clone()).ok())
                .map(Value::from)
                .unwrap_or(Value::UNDEFINED)
        });

        env.add_filter("int", |value: Value| -> Value {
            value
                .as_str()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .or_else(|| f64::try_from(value.clone()).ok())
                .map(|f| Value::from(f as i64))
                .unwrap_or(Value::UNDEFINED)
        });

        env.add_filter("slugify", |value: &str| slug::slugify(value));

        env.add_filter("to_json", |value: Value| -> Result<String, minijinja::Error> {
            serde_json::to_string(&value).map_err(|e| {
                minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
            })
        });

        env.add_filter("from_json", |value: &str| -> Result<Value, minijinja::Error> {
            let json: serde_json::Value = serde_json::from_str(value).map_err(|e| {
                minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
            })?;
            Ok(json_to_value(json))
        });
    }

    fn register_globals(env: &mut Environment<'static>, states: Arc<StatesObject>) {
        env.add_global("states", Value::from_object((*states).clone()));

        let s = states.clone();
        env.add_function("is_state", move |entity_id: &str, state: &str| {
            s.is_state(entity_id, state)
        });

        let s = states.clone();
        env.add_function("state_attr", move |entity_id: &str, attribute: &str| {
            s.state_attr(entity_id, attribute)
        });

        let s = states;
        env.add_function("has_value", move |entity_id: &str| s.has_value(entity_id));

        env.add_function("now", || chrono::Local::now().to_rfc3339());
        env.add_function("utcnow", || chrono::Utc::now().to_rfc3339());
    }

    /// Render a template string.
    pub fn render(&self, template: &str) -> TemplateResult<String> {
        trace!(template, "rendering template");
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(())?)
    }

    /// Render with extra context variables (e.g. `value_json`, `trigger`).
    pub fn render_with_context(
        &self,
        template: &str,
        context: impl serde::Serialize,
    ) -> TemplateResult<String> {
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(context)?)
    }

    /// Evaluate an expression and return the value rather than a string.
    pub fn evaluate_with_context(
        &self,
        template: &str,
        context: impl serde::Serialize,
    ) -> TemplateResult<Value> {
        let expr = self.env.compile_expression(template)?;
        Ok(expr.eval(context)?)
    }

    /// Whether a string contains template syntax at all.
    pub fn is_template(template: &str) -> bool {
        template.contains("{{") || template.contains("{%") || template.contains("{#")
    }
}

/// Interpret a rendered template result as a boolean.
///
/// Matches the usual automation semantics: "true", "yes", "on", "enable"
/// and "1" (case-insensitive) are true, everything else is false.
pub fn result_as_boolean(rendered: &str) -> bool {
    matches!(
        rendered.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "enable" | "1"
    )
}
