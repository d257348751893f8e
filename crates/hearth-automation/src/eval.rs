//! Condition evaluation
//!
//! Conditions read the live store at evaluation time, never cached
//! snapshots. Template conditions go through the injected expression
//! evaluator under a deadline; a timeout or render failure makes the
//! condition false rather than erroring the whole automation.

use chrono::Datelike;
use hearth_core::{Clock, ExpressionEvaluator};
use hearth_state_store::StateStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use crate::condition::{
    AndCondition, Condition, ConditionResult, NotCondition, NumericStateCondition, OrCondition,
    StateCondition, TemplateCondition, TimeCondition,
};
use crate::trigger::TriggerData;

/// Default deadline for template condition rendering.
pub const DEFAULT_TEMPLATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Context for condition evaluation
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// The trigger that fired (if any)
    pub trigger: Option<TriggerData>,

    /// Additional variables available in templates
    pub variables: HashMap<String, serde_json::Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(trigger: TriggerData) -> Self {
        Self {
            trigger: Some(trigger),
            ..Default::default()
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Flatten into the variables templates see.
    pub fn to_template_context(&self) -> serde_json::Value {
        let mut ctx = serde_json::Map::new();

        if let Some(trigger) = &self.trigger {
            ctx.insert(
                "trigger".to_string(),
                serde_json::to_value(trigger).unwrap_or(serde_json::Value::Null),
            );
        }

        for (k, v) in &self.variables {
            ctx.insert(k.clone(), v.clone());
        }

        serde_json::Value::Object(ctx)
    }
}

/// Condition evaluator
pub struct ConditionEvaluator {
    store: Arc<StateStore>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    clock: Arc<dyn Clock>,
    template_timeout: Duration,
}

impl ConditionEvaluator {
    pub fn new(
        store: Arc<StateStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            evaluator,
            clock,
            template_timeout: DEFAULT_TEMPLATE_TIMEOUT,
        }
    }

    pub fn with_template_timeout(mut self, timeout: Duration) -> Self {
        self.template_timeout = timeout;
        self
    }

    /// Evaluate a single condition against the current store.
    pub async fn evaluate(&self, condition: &Condition, ctx: &EvalContext) -> ConditionResult<bool> {
        match condition {
            Condition::State(c) => Ok(self.eval_state(c)),
            Condition::NumericState(c) => Ok(self.eval_numeric_state(c)),
            Condition::Time(c) => Ok(self.eval_time(c)),
            Condition::Template(c) => Ok(self.eval_template(c, ctx).await),
            Condition::And(c) => self.eval_and(c, ctx).await,
            Condition::Or(c) => self.eval_or(c, ctx).await,
            Condition::Not(c) => self.eval_not(c, ctx).await,
        }
    }

    /// Evaluate a condition list; all must pass, and an empty list passes.
    pub async fn evaluate_all(
        &self,
        conditions: &[Condition],
        ctx: &EvalContext,
    ) -> ConditionResult<bool> {
        for condition in conditions {
            if !self.evaluate(condition, ctx).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_state(&self, condition: &StateCondition) -> bool {
        condition.entity_id.ids().iter().all(|entity_id| {
            match self.store.get_state(entity_id) {
                Some(current) => condition.state.matches(&current),
                None => false,
            }
        })
    }

    fn eval_numeric_state(&self, condition: &NumericStateCondition) -> bool {
        condition.entity_id.ids().iter().all(|entity_id| {
            let Some(value) = self
                .store
                .get_state(entity_id)
                .and_then(|s| s.trim().parse::<f64>().ok())
            else {
                trace!(entity_id, "state is not numeric");
                return false;
            };

            if let Some(above) = condition.above {
                if value <= above {
                    return false;
                }
            }
            if let Some(below) = condition.below {
                if value >= below {
                    return false;
                }
            }
            true
        })
    }

    fn eval_time(&self, condition: &TimeCondition) -> bool {
        let now = self.clock.now();

        if !condition.weekday.is_empty() && !condition.weekday.contains(&now.weekday()) {
            return false;
        }

        let time = now.time();
        match (condition.after, condition.before) {
            (Some(after), Some(before)) if after > before => {
                // Window wraps midnight
                time >= after || time < before
            }
            (after, before) => {
                after.map(|a| time >= a).unwrap_or(true)
                    && before.map(|b| time < b).unwrap_or(true)
            }
        }
    }

    async fn eval_template(&self, condition: &TemplateCondition, ctx: &EvalContext) -> bool {
        let template_ctx = ctx.to_template_context();
        let render = self
            .evaluator
            .render(&condition.value_template, &template_ctx);

        match tokio::time::timeout(self.template_timeout, render).await {
            Ok(Ok(rendered)) => is_truthy(&rendered),
            Ok(Err(e)) => {
                warn!(template = %condition.value_template, error = %e, "template condition failed");
                false
            }
            Err(_) => {
                warn!(template = %condition.value_template, "template condition timed out");
                false
            }
        }
    }

    async fn eval_and(&self, condition: &AndCondition, ctx: &EvalContext) -> ConditionResult<bool> {
        for c in &condition.conditions {
            if !Box::pin(self.evaluate(c, ctx)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn eval_or(&self, condition: &OrCondition, ctx: &EvalContext) -> ConditionResult<bool> {
        for c in &condition.conditions {
            if Box::pin(self.evaluate(c, ctx)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn eval_not(&self, condition: &NotCondition, ctx: &EvalContext) -> ConditionResult<bool> {
        Ok(!Box::pin(self.evaluate(&condition.condition, ctx)).await?)
    }
}

/// Truthiness of a rendered template result.
fn is_truthy(rendered: &str) -> bool {
    matches!(
        rendered.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "enable" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{EntityIdSpec, StateMatch};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use hearth_core::{Context, EntityId, ManualClock, RenderError};
    use hearth_event_bus::EventBus;
    use serde_json::Value;

    /// Evaluator that returns the template string itself, or hangs when
    /// asked to render "hang".
    struct EchoEvaluator;

    #[async_trait]
    impl ExpressionEvaluator for EchoEvaluator {
        async fn render(&self, template: &str, _context: &Value) -> Result<String, RenderError> {
            if template == "hang" {
                std::future::pending::<()>().await;
            }
            Ok(template.to_string())
        }
    }

    fn setup(at: DateTime<Utc>) -> (ConditionEvaluator, Arc<StateStore>) {
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(ManualClock::at(at));
        let store = Arc::new(StateStore::with_clock(bus, clock.clone()));
        let eval = ConditionEvaluator::new(store.clone(), Arc::new(EchoEvaluator), clock)
            .with_template_timeout(Duration::from_millis(50));
        (eval, store)
    }

    fn eid(s: &str) -> EntityId {
        s.parse().unwrap()
    }

    fn noon() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn state_condition_checks_every_entity() {
        let (eval, store) = setup(noon());
        store.set(eid("light.a"), "on", Default::default(), Context::new());
        store.set(eid("light.b"), "off", Default::default(), Context::new());

        let both_on = Condition::State(StateCondition {
            entity_id: EntityIdSpec::List(vec!["light.a".into(), "light.b".into()]),
            state: StateMatch::Single("on".into()),
        });
        assert!(!eval.evaluate(&both_on, &EvalContext::new()).await.unwrap());

        store.set(eid("light.b"), "on", Default::default(), Context::new());
        assert!(eval.evaluate(&both_on, &EvalContext::new()).await.unwrap());
    }

    #[tokio::test]
    async fn numeric_bounds_are_strict() {
        let (eval, store) = setup(noon());
        store.set(eid("sensor.temp"), "18.0", Default::default(), Context::new());

        let below_18 = Condition::NumericState(NumericStateCondition {
            entity_id: EntityIdSpec::Single("sensor.temp".into()),
            above: None,
            below: Some(18.0),
        });
        assert!(!eval.evaluate(&below_18, &EvalContext::new()).await.unwrap());

        store.set(eid("sensor.temp"), "17.9", Default::default(), Context::new());
        assert!(eval.evaluate(&below_18, &EvalContext::new()).await.unwrap());
    }

    #[tokio::test]
    async fn non_numeric_state_fails_numeric_condition() {
        let (eval, store) = setup(noon());
        store.set(
            eid("sensor.temp"),
            "unavailable",
            Default::default(),
            Context::new(),
        );

        let condition = Condition::NumericState(NumericStateCondition {
            entity_id: EntityIdSpec::Single("sensor.temp".into()),
            above: Some(0.0),
            below: None,
        });
        assert!(!eval.evaluate(&condition, &EvalContext::new()).await.unwrap());
    }

    #[tokio::test]
    async fn time_window_wraps_midnight() {
        let night = DateTime::parse_from_rfc3339("2026-03-02T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (eval, _store) = setup(night);

        let window = Condition::Time(TimeCondition {
            after: chrono::NaiveTime::from_hms_opt(22, 0, 0),
            before: chrono::NaiveTime::from_hms_opt(6, 0, 0),
            weekday: vec![],
        });
        assert!(eval.evaluate(&window, &EvalContext::new()).await.unwrap());

        let (eval, _store) = setup(noon());
        assert!(!eval.evaluate(&window, &EvalContext::new()).await.unwrap());
    }

    #[tokio::test]
    async fn template_timeout_is_false() {
        let (eval, _store) = setup(noon());
        let condition = Condition::Template(TemplateCondition {
            value_template: "hang".into(),
        });
        assert!(!eval.evaluate(&condition, &EvalContext::new()).await.unwrap());
    }

    #[tokio::test]
    async fn logical_nesting() {
        let (eval, store) = setup(noon());
        store.set(eid("light.a"), "on", Default::default(), Context::new());

        let is_on = || {
            Condition::State(StateCondition {
                entity_id: EntityIdSpec::Single("light.a".into()),
                state: StateMatch::Single("on".into()),
            })
        };
        let truthy = || {
            Condition::Template(TemplateCondition {
                value_template: "true".into(),
            })
        };

        let combined = Condition::and(vec![
            is_on(),
            Condition::or(vec![Condition::not(is_on()), truthy()]),
        ]);
        assert!(eval.evaluate(&combined, &EvalContext::new()).await.unwrap());

        let empty = eval.evaluate_all(&[], &EvalContext::new()).await.unwrap();
        assert!(empty);
    }
}
