//! Action sequence executor
//!
//! Runs an automation's action list. The executor is wired to the
//! service registry, the expression evaluator, the event bus, and the
//! condition evaluator, and every run carries a [`CancelToken`] that is
//! checked between actions and raced against delays and waits.

use crate::action::{Action, DelaySpec, RepeatConfig};
use crate::cancel::CancelToken;
use futures::future::try_join_all;
use hearth_automation::{ConditionEvaluator, EvalContext, TriggerData};
use hearth_core::events::CallServiceData;
use hearth_core::{Context, Event, ExpressionEvaluator, ServiceRegistry, ServiceTarget};
use hearth_event_bus::EventBus;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Executor errors
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("service call failed: {0}")]
    ServiceCall(#[from] hearth_core::ServiceCallError),

    #[error("template error: {0}")]
    Template(String),

    #[error("condition error: {0}")]
    Condition(String),

    #[error("wait timed out")]
    Timeout,

    #[error("run cancelled")]
    Cancelled,
}

/// Result type for script execution
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Per-run execution context
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Variables available in templates
    pub variables: HashMap<String, Value>,

    /// Trigger data when started by an automation
    pub trigger: Option<TriggerData>,

    /// Causality context propagated into service calls and events
    pub context: Context,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(trigger: TriggerData, context: Context) -> Self {
        Self {
            variables: HashMap::new(),
            trigger: Some(trigger),
            context,
        }
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// Variables as seen by templates.
    pub fn to_template_vars(&self) -> Value {
        let mut vars = serde_json::Map::new();

        for (k, v) in &self.variables {
            vars.insert(k.clone(), v.clone());
        }

        if let Some(trigger) = &self.trigger {
            vars.insert(
                "trigger".to_string(),
                serde_json::to_value(trigger).unwrap_or(Value::Null),
            );
        }

        Value::Object(vars)
    }

    fn to_eval_context(&self) -> EvalContext {
        let mut eval_ctx = match &self.trigger {
            Some(trigger) => EvalContext::with_trigger(trigger.clone()),
            None => EvalContext::new(),
        };
        for (k, v) in &self.variables {
            eval_ctx = eval_ctx.with_var(k.clone(), v.clone());
        }
        eval_ctx
    }
}

/// Poll interval for wait_template
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for an un-timed wait_template
const WAIT_DEFAULT_LIMIT: Duration = Duration::from_secs(3600);

/// Executes action sequences
pub struct ScriptExecutor {
    services: Arc<dyn ServiceRegistry>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    event_bus: Arc<EventBus>,
    conditions: Arc<ConditionEvaluator>,
}

impl ScriptExecutor {
    pub fn new(
        services: Arc<dyn ServiceRegistry>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        event_bus: Arc<EventBus>,
        conditions: Arc<ConditionEvaluator>,
    ) -> Self {
        Self {
            services,
            evaluator,
            event_bus,
            conditions,
        }
    }

    /// Execute a sequence of actions.
    ///
    /// Returns `Err(ScriptError::Cancelled)` when the token fires at a
    /// suspension point; the action in progress at that moment is never
    /// interrupted mid-way.
    pub fn execute<'a>(
        &'a self,
        actions: &'a [Value],
        ctx: &'a mut ExecutionContext,
        token: &'a CancelToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ScriptResult<()>> + Send + 'a>> {
        Box::pin(async move {
            for (i, action_value) in actions.iter().enumerate() {
                if token.is_cancelled() {
                    return Err(ScriptError::Cancelled);
                }

                trace!(step = i, "executing action");
                let action: Action = serde_json::from_value(action_value.clone())
                    .map_err(|e| ScriptError::InvalidAction(e.to_string()))?;

                self.execute_action(&action, ctx, token).await?;
            }
            Ok(())
        })
    }

    async fn execute_action(
        &self,
        action: &Action,
        ctx: &mut ExecutionContext,
        token: &CancelToken,
    ) -> ScriptResult<()> {
        match action {
            Action::Service(service) => self.execute_service(service, ctx).await,
            Action::Delay(delay) => self.execute_delay(delay, ctx, token).await,
            Action::WaitTemplate(wait) => self.execute_wait_template(wait, ctx, token).await,
            Action::Choose(choose) => self.execute_choose(choose, ctx, token).await,
            Action::Repeat(repeat) => self.execute_repeat(repeat, ctx, token).await,
            Action::Parallel(parallel) => self.execute_parallel(parallel, ctx, token).await,
            Action::Event(event) => self.execute_event(event, ctx).await,
        }
    }

    async fn execute_service(
        &self,
        service: &crate::action::ServiceAction,
        ctx: &mut ExecutionContext,
    ) -> ScriptResult<()> {
        let (domain, name) = service.service.split_once('.').ok_or_else(|| {
            ScriptError::InvalidAction(format!("invalid service: {}", service.service))
        })?;

        let template_ctx = ctx.to_template_vars();
        let mut data = serde_json::Map::new();
        for (key, value) in &service.data {
            data.insert(key.clone(), self.render_value(value, &template_ctx).await?);
        }

        let target = ServiceTarget {
            entity_id: service
                .target
                .as_ref()
                .map(|t| t.entity_id.clone())
                .unwrap_or_default(),
        };

        debug!(service = %service.service, "calling service");
        let data = Value::Object(data);
        self.event_bus.fire_typed(
            CallServiceData {
                domain: domain.to_string(),
                service: name.to_string(),
                service_data: data.clone(),
            },
            ctx.context.clone(),
        );
        self.services.call(domain, name, target, data).await?;
        Ok(())
    }

    async fn execute_delay(
        &self,
        delay: &crate::action::DelayAction,
        ctx: &mut ExecutionContext,
        token: &CancelToken,
    ) -> ScriptResult<()> {
        let duration = match &delay.delay {
            DelaySpec::Components { .. } => delay.delay.to_duration().unwrap_or_default(),
            DelaySpec::Template(template) => {
                let rendered = self.render_string(template, ctx).await?;
                parse_duration(&rendered).ok_or_else(|| {
                    ScriptError::Template(format!("invalid duration: {rendered}"))
                })?
            }
        };

        debug!(?duration, "delaying");
        tokio::select! {
            _ = token.cancelled() => Err(ScriptError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn execute_wait_template(
        &self,
        wait: &crate::action::WaitTemplateAction,
        ctx: &mut ExecutionContext,
        token: &CancelToken,
    ) -> ScriptResult<()> {
        let timeout = match &wait.timeout {
            Some(timeout_str) => {
                let rendered = self.render_string(timeout_str, ctx).await?;
                Some(parse_duration(&rendered).ok_or_else(|| {
                    ScriptError::Template(format!("invalid timeout: {rendered}"))
                })?)
            }
            None => None,
        };

        let limit = timeout.unwrap_or(WAIT_DEFAULT_LIMIT);
        let start = tokio::time::Instant::now();

        loop {
            let rendered = self.render_string(&wait.wait_template, ctx).await?;
            if is_truthy(&rendered) {
                return Ok(());
            }

            if start.elapsed() >= limit {
                if wait.continue_on_timeout {
                    debug!("wait_template timed out, continuing");
                    return Ok(());
                }
                return Err(ScriptError::Timeout);
            }

            tokio::select! {
                _ = token.cancelled() => return Err(ScriptError::Cancelled),
                _ = tokio::time::sleep(WAIT_POLL_INTERVAL) => {}
            }
        }
    }

    async fn execute_choose(
        &self,
        choose: &crate::action::ChooseAction,
        ctx: &mut ExecutionContext,
        token: &CancelToken,
    ) -> ScriptResult<()> {
        let eval_ctx = ctx.to_eval_context();

        for option in &choose.choose {
            let matches = self
                .conditions
                .evaluate_all(&option.conditions, &eval_ctx)
                .await
                .map_err(|e| ScriptError::Condition(e.to_string()))?;

            if matches {
                return self.execute(&option.sequence, ctx, token).await;
            }
        }

        if !choose.default.is_empty() {
            debug!("no choose branch matched, running default");
            return self.execute(&choose.default, ctx, token).await;
        }

        Ok(())
    }

    async fn execute_repeat(
        &self,
        repeat: &crate::action::RepeatAction,
        ctx: &mut ExecutionContext,
        token: &CancelToken,
    ) -> ScriptResult<()> {
        // Runaway guard for while/until loops
        const MAX_ITERATIONS: usize = 10_000;

        match &repeat.repeat {
            RepeatConfig::Count { count, sequence } => {
                for i in 1..=*count {
                    ctx.set_var("repeat", serde_json::json!({ "index": i, "first": i == 1, "last": i == *count }));
                    self.execute(sequence, ctx, token).await?;
                }
            }

            RepeatConfig::While { r#while, sequence } => {
                let mut index = 1;
                loop {
                    let eval_ctx = ctx.to_eval_context();
                    let keep_going = self
                        .conditions
                        .evaluate_all(r#while, &eval_ctx)
                        .await
                        .map_err(|e| ScriptError::Condition(e.to_string()))?;
                    if !keep_going {
                        break;
                    }

                    ctx.set_var("repeat", serde_json::json!({ "index": index, "first": index == 1 }));
                    self.execute(sequence, ctx, token).await?;

                    index += 1;
                    if index > MAX_ITERATIONS {
                        warn!("repeat while exceeded {MAX_ITERATIONS} iterations, stopping");
                        break;
                    }
                }
            }

            RepeatConfig::Until { until, sequence } => {
                let mut index = 1;
                loop {
                    ctx.set_var("repeat", serde_json::json!({ "index": index, "first": index == 1 }));
                    self.execute(sequence, ctx, token).await?;

                    let eval_ctx = ctx.to_eval_context();
                    let done = self
                        .conditions
                        .evaluate_all(until, &eval_ctx)
                        .await
                        .map_err(|e| ScriptError::Condition(e.to_string()))?;
                    if done {
                        break;
                    }

                    index += 1;
                    if index > MAX_ITERATIONS {
                        warn!("repeat until exceeded {MAX_ITERATIONS} iterations, stopping");
                        break;
                    }
                }
            }
        }

        ctx.variables.remove("repeat");
        Ok(())
    }

    async fn execute_parallel(
        &self,
        parallel: &crate::action::ParallelAction,
        ctx: &mut ExecutionContext,
        token: &CancelToken,
    ) -> ScriptResult<()> {
        // Each branch runs against its own copy of the context; any
        // branch error fails the whole block.
        let branches: Vec<Vec<Value>> = parallel
            .parallel
            .iter()
            .map(|value| match value {
                Value::Array(actions) => actions.clone(),
                other => vec![other.clone()],
            })
            .collect();

        let mut branch_ctxs: Vec<ExecutionContext> =
            branches.iter().map(|_| ctx.clone()).collect();

        let futures = branches
            .iter()
            .zip(branch_ctxs.iter_mut())
            .map(|(actions, branch_ctx)| self.execute(actions, branch_ctx, token))
            .collect::<Vec<_>>();

        try_join_all(futures).await?;
        Ok(())
    }

    async fn execute_event(
        &self,
        event: &crate::action::EventAction,
        ctx: &mut ExecutionContext,
    ) -> ScriptResult<()> {
        let template_ctx = ctx.to_template_vars();
        let mut data = serde_json::Map::new();
        for (key, value) in &event.event_data {
            data.insert(key.clone(), self.render_value(value, &template_ctx).await?);
        }

        debug!(event_type = %event.event, "firing event");
        self.event_bus.fire(Event::new(
            event.event.clone(),
            Value::Object(data),
            ctx.context.clone(),
        ));
        Ok(())
    }

    // --- Helpers ---

    async fn render_string(&self, template: &str, ctx: &ExecutionContext) -> ScriptResult<String> {
        if !contains_template(template) {
            return Ok(template.to_string());
        }
        self.evaluator
            .render(template, &ctx.to_template_vars())
            .await
            .map_err(|e| ScriptError::Template(e.to_string()))
    }

    /// Render string values that carry template syntax; pass everything
    /// else through. Rendered output that parses as JSON keeps its type.
    async fn render_value(&self, value: &Value, template_ctx: &Value) -> ScriptResult<Value> {
        match value {
            Value::String(s) if contains_template(s) => {
                let rendered = self
                    .evaluator
                    .render(s, template_ctx)
                    .await
                    .map_err(|e| ScriptError::Template(e.to_string()))?;
                Ok(serde_json::from_str(&rendered).unwrap_or(Value::String(rendered)))
            }
            other => Ok(other.clone()),
        }
    }
}

fn contains_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

fn is_truthy(rendered: &str) -> bool {
    matches!(
        rendered.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "enable" | "1"
    )
}

/// Parse HH:MM:SS, MM:SS, or plain seconds.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let parts: Vec<&str> = s.split(':').collect();
    match parts.len() {
        1 => s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(Duration::from_secs_f64),
        2 => {
            let mins: u64 = parts[0].parse().ok()?;
            let secs: u64 = parts[1].parse().ok()?;
            Some(Duration::from_secs(mins * 60 + secs))
        }
        3 => {
            let hours: u64 = parts[0].parse().ok()?;
            let mins: u64 = parts[1].parse().ok()?;
            let secs: u64 = parts[2].parse().ok()?;
            Some(Duration::from_secs(hours * 3600 + mins * 60 + secs))
        }
        _ => None,
    }
}
