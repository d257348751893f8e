//! Automation engine
//!
//! Consumes the state store's lossless change hook, matches state
//! triggers, enforces `for:` holds, evaluates conditions, and starts
//! action runs under each automation's run mode:
//!
//! - `single`: a new trigger is ignored while a run is in flight
//! - `restart`: the in-flight run is cancelled (at its next suspension
//!   point) and a replacement starts immediately
//! - `queued`: pending runs wait in FIFO order, at most `max` queued
//! - `parallel`: up to `max` runs execute concurrently
//!
//! Overflowing queued/parallel triggers are rejected with a warning,
//! never silently dropped.

use crate::trace::{RunOutcome, RunTrace, TraceLog};
use dashmap::DashMap;
use hearth_automation::{
    match_state_trigger, state_satisfies, trigger_eval, Automation, AutomationManager,
    ConditionEvaluator, EvalContext, RunMode, Trigger, TriggerData,
};
use hearth_core::events::{AutomationTriggeredData, StateChangedData};
use hearth_core::{Clock, Context, Event, Recorder};
use hearth_event_bus::EventBus;
use hearth_script::{CancelToken, ExecutionContext, ScriptError, ScriptExecutor};
use hearth_state_store::StateStore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

/// In-flight and queued runs for one automation
#[derive(Default)]
struct RunState {
    /// Cancel tokens of active runs, keyed by run id
    active: HashMap<String, CancelToken>,
    /// Pending triggers for queued mode, oldest first
    queue: VecDeque<TriggerData>,
}

/// A `for:` hold in progress
struct HoldTimer {
    token: CancelToken,
    armed_value: String,
}

/// The automation engine
pub struct AutomationEngine {
    manager: Arc<AutomationManager>,
    conditions: Arc<ConditionEvaluator>,
    executor: Arc<ScriptExecutor>,
    store: Arc<StateStore>,
    event_bus: Arc<EventBus>,
    recorder: Mutex<Option<Arc<dyn Recorder>>>,
    clock: Arc<dyn Clock>,

    runs: DashMap<String, Arc<Mutex<RunState>>>,
    /// Live `for:` timers keyed by (automation id, trigger index)
    hold_timers: DashMap<(String, usize), HoldTimer>,
    /// Bounded per-automation run history
    traces: TraceLog,
}

impl AutomationEngine {
    pub fn new(
        manager: Arc<AutomationManager>,
        conditions: Arc<ConditionEvaluator>,
        executor: Arc<ScriptExecutor>,
        store: Arc<StateStore>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager,
            conditions,
            executor,
            store,
            event_bus,
            recorder: Mutex::new(None),
            clock,
            runs: DashMap::new(),
            hold_timers: DashMap::new(),
            traces: TraceLog::default(),
        }
    }

    pub fn set_recorder(&self, recorder: Arc<dyn Recorder>) {
        *self.recorder.lock().unwrap() = Some(recorder);
    }

    /// Start consuming state changes.
    ///
    /// The receiver comes from [`StateStore::add_change_hook`], so every
    /// change is seen exactly once and in per-entity write order.
    pub fn start(
        self: &Arc<Self>,
        mut changes: mpsc::UnboundedReceiver<Event<StateChangedData>>,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            info!("automation engine started");
            while let Some(event) = changes.recv().await {
                engine.handle_state_change(&event).await;
            }
            info!("change hook closed, automation engine stopping");
        })
    }

    /// Match one state change against every enabled automation's state
    /// triggers.
    pub async fn handle_state_change(self: &Arc<Self>, event: &Event<StateChangedData>) {
        let now = self.clock.now();

        for automation in self.manager.all() {
            if !automation.enabled {
                continue;
            }

            for (index, trigger) in automation.triggers.iter().enumerate() {
                let Trigger::State(state_trigger) = trigger else {
                    continue;
                };

                let key = (automation.id.clone(), index);
                match match_state_trigger(state_trigger, &event.data, now) {
                    Some(data) => match state_trigger.r#for {
                        None => {
                            self.trigger_automation(&automation.id, data, event.context.child())
                                .await;
                        }
                        Some(hold) => {
                            // A fresh match while the timer runs does not
                            // reset the hold.
                            if !self.hold_timers.contains_key(&key) {
                                self.arm_hold_timer(&automation, index, hold, &event.data);
                            }
                        }
                    },
                    None => {
                        // A change that contradicts an armed hold cancels
                        // the timer outright.
                        if !state_trigger
                            .entity_id
                            .contains(&event.data.entity_id.to_string())
                        {
                            continue;
                        }
                        let new_value = event.data.new_state.as_ref().map(|s| s.state.as_str());
                        let contradicted = self
                            .hold_timers
                            .get(&key)
                            .map(|t| !state_satisfies(state_trigger, new_value, &t.armed_value))
                            .unwrap_or(false);
                        if contradicted {
                            if let Some((_, timer)) = self.hold_timers.remove(&key) {
                                debug!(
                                    automation_id = %automation.id,
                                    trigger = index,
                                    "hold contradicted, cancelling timer"
                                );
                                timer.token.cancel();
                            }
                        }
                    }
                }
            }
        }
    }

    fn arm_hold_timer(
        self: &Arc<Self>,
        automation: &Automation,
        index: usize,
        hold: std::time::Duration,
        change: &StateChangedData,
    ) {
        let Some(armed_value) = change.new_state.as_ref().map(|s| s.state.clone()) else {
            return;
        };

        let key = (automation.id.clone(), index);
        let token = CancelToken::new();
        debug!(
            automation_id = %automation.id,
            trigger = index,
            ?hold,
            "arming hold timer"
        );
        self.hold_timers.insert(
            key.clone(),
            HoldTimer {
                token: token.clone(),
                armed_value: armed_value.clone(),
            },
        );

        let engine = self.clone();
        let entity_id = change.entity_id.to_string();
        let automation_id = automation.id.clone();
        let trigger = match &automation.triggers[index] {
            Trigger::State(t) => t.clone(),
            _ => return,
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(hold) => {}
            }

            engine.hold_timers.remove(&key);

            // The hold elapsed; the store is re-read so a change the
            // timer raced with cannot slip through.
            let current = engine.store.get_state(&entity_id);
            if !state_satisfies(&trigger, current.as_deref(), &armed_value) {
                trace!(automation_id = %automation_id, "state moved on before hold elapsed");
                return;
            }

            let now = engine.clock.now();
            let mut data = TriggerData::new("state", now)
                .with_var("entity_id", serde_json::json!(entity_id))
                .with_var("for", serde_json::json!(format!("{}s", hold.as_secs())));
            if let Some(id) = &trigger.id {
                data = data.with_id(id);
            }

            engine
                .trigger_automation(&automation_id, data, Context::new())
                .await;
        });
    }

    /// Run the trigger pipeline for an automation: conditions, then the
    /// run-mode gate. Called by the change consumer and the scheduler.
    #[instrument(skip(self, data, context))]
    pub async fn trigger_automation(
        self: &Arc<Self>,
        automation_id: &str,
        data: TriggerData,
        context: Context,
    ) {
        let Some(automation) = self.manager.get(automation_id) else {
            warn!(automation_id, "trigger for unknown automation");
            return;
        };
        if !automation.enabled {
            return;
        }

        let eval_ctx = EvalContext::with_trigger(data.clone());
        match self.conditions.evaluate_all(&automation.conditions, &eval_ctx).await {
            Ok(true) => {}
            Ok(false) => {
                trace!(automation_id, "conditions not met");
                return;
            }
            Err(e) => {
                warn!(automation_id, error = %e, "condition evaluation failed");
                return;
            }
        }

        self.dispatch(&automation, data, context);
    }

    /// Apply the automation's run mode to a passed trigger.
    fn dispatch(self: &Arc<Self>, automation: &Automation, data: TriggerData, context: Context) {
        let state = self
            .runs
            .entry(automation.id.clone())
            .or_default()
            .clone();
        let mut run_state = state.lock().unwrap();

        match automation.mode {
            RunMode::Single => {
                if run_state.active.is_empty() {
                    self.spawn_run(automation, data, context, &mut run_state);
                } else {
                    debug!(
                        automation_id = %automation.id,
                        "already running, trigger ignored (single mode)"
                    );
                }
            }

            RunMode::Restart => {
                for token in run_state.active.values() {
                    token.cancel();
                }
                // The superseded run unwinds on its own; the replacement
                // starts now rather than waiting for it.
                self.spawn_run(automation, data, context, &mut run_state);
            }

            RunMode::Queued { max } => {
                if run_state.active.is_empty() {
                    self.spawn_run(automation, data, context, &mut run_state);
                } else if run_state.queue.len() < max {
                    debug!(
                        automation_id = %automation.id,
                        depth = run_state.queue.len() + 1,
                        "run queued"
                    );
                    run_state.queue.push_back(data);
                } else {
                    warn!(
                        automation_id = %automation.id,
                        max,
                        "queue full, trigger rejected"
                    );
                }
            }

            RunMode::Parallel { max } => {
                if run_state.active.len() < max {
                    self.spawn_run(automation, data, context, &mut run_state);
                } else {
                    warn!(
                        automation_id = %automation.id,
                        max,
                        "parallel limit reached, trigger rejected"
                    );
                }
            }
        }
    }

    /// Start one run. Fires `automation_triggered`, notifies the
    /// recorder, and spawns the action sequence.
    fn spawn_run(
        self: &Arc<Self>,
        automation: &Automation,
        data: TriggerData,
        context: Context,
        run_state: &mut RunState,
    ) {
        let run_id = ulid::Ulid::new().to_string();
        let token = CancelToken::new();
        run_state.active.insert(run_id.clone(), token.clone());

        let now = self.clock.now();
        self.manager.mark_triggered(&automation.id, now);
        self.manager.increment_runs(&automation.id);

        self.event_bus.fire_typed(
            AutomationTriggeredData {
                automation_id: automation.id.clone(),
                alias: automation.alias.clone(),
            },
            context.clone(),
        );
        if let Some(recorder) = self.recorder.lock().unwrap().as_ref() {
            recorder.automation_triggered(&automation.id, now);
        }

        info!(
            automation_id = %automation.id,
            name = %automation.display_name(),
            run_id = %run_id,
            "automation run starting"
        );
        self.traces.record_start(RunTrace {
            run_id: run_id.clone(),
            automation_id: automation.id.clone(),
            triggered_by: data.platform.clone(),
            started: now,
            finished: None,
            outcome: RunOutcome::Running,
        });

        let engine = self.clone();
        let automation_id = automation.id.clone();
        let actions = automation.actions.clone();
        tokio::spawn(async move {
            let mut ctx = ExecutionContext::with_trigger(data, context);
            let outcome = match engine.executor.execute(&actions, &mut ctx, &token).await {
                Ok(()) => {
                    debug!(automation_id = %automation_id, run_id = %run_id, "run finished");
                    RunOutcome::Completed
                }
                Err(ScriptError::Cancelled) => {
                    debug!(automation_id = %automation_id, run_id = %run_id, "run cancelled");
                    RunOutcome::Cancelled
                }
                Err(e) => {
                    warn!(automation_id = %automation_id, run_id = %run_id, error = %e, "run failed");
                    RunOutcome::Failed(e.to_string())
                }
            };
            engine
                .traces
                .record_end(&automation_id, &run_id, engine.clock.now(), outcome);
            engine.finish_run(&automation_id, &run_id);
        });
    }

    /// Bookkeeping after a run ends; drains the queue for queued mode.
    fn finish_run(self: &Arc<Self>, automation_id: &str, run_id: &str) {
        self.manager.decrement_runs(automation_id);

        let Some(state) = self.runs.get(automation_id).map(|s| s.clone()) else {
            return;
        };
        let mut run_state = state.lock().unwrap();
        run_state.active.remove(run_id);

        if run_state.active.is_empty() {
            if let Some(next) = run_state.queue.pop_front() {
                if let Some(automation) = self.manager.get(automation_id) {
                    debug!(automation_id, "starting queued run");
                    self.spawn_run(&automation, next, Context::new(), &mut run_state);
                }
            }
        }
    }

    /// Active run count for an automation.
    pub fn active_runs(&self, automation_id: &str) -> usize {
        self.runs
            .get(automation_id)
            .map(|s| s.lock().unwrap().active.len())
            .unwrap_or(0)
    }

    /// Queue depth for an automation.
    pub fn queued_runs(&self, automation_id: &str) -> usize {
        self.runs
            .get(automation_id)
            .map(|s| s.lock().unwrap().queue.len())
            .unwrap_or(0)
    }

    /// Recorded run traces for an automation, oldest first.
    pub fn run_traces(&self, automation_id: &str) -> Vec<RunTrace> {
        self.traces.traces(automation_id)
    }

    /// Whether a hold timer is currently armed.
    pub fn hold_armed(&self, automation_id: &str, trigger_index: usize) -> bool {
        self.hold_timers
            .contains_key(&(automation_id.to_string(), trigger_index))
    }

    /// Entry point for the scheduler: fire a time or sun trigger.
    pub async fn fire_scheduled(self: &Arc<Self>, automation_id: &str, trigger: &Trigger) {
        let data = trigger_eval::generic_trigger_data(trigger, self.clock.now());
        self.trigger_automation(automation_id, data, Context::new())
            .await;
    }
}
