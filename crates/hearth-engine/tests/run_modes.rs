//! Run-mode behavior of the automation engine

use async_trait::async_trait;
use hearth_automation::{AutomationConfig, AutomationManager, ConditionEvaluator};
use hearth_core::events::AUTOMATION_TRIGGERED;
use hearth_core::{
    Clock, Context, EntityId, ExpressionEvaluator, ManualClock, RenderError, ServiceCallError,
    ServiceRegistry, ServiceTarget,
};
use hearth_engine::{AutomationEngine, RunOutcome};
use hearth_event_bus::EventBus;
use hearth_script::ScriptExecutor;
use hearth_state_store::StateStore;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordingRegistry {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceRegistry for RecordingRegistry {
    async fn call(
        &self,
        domain: &str,
        service: &str,
        _target: ServiceTarget,
        _data: Value,
    ) -> Result<(), ServiceCallError> {
        self.calls.lock().unwrap().push(format!("{domain}.{service}"));
        Ok(())
    }
}

struct EchoEvaluator;

#[async_trait]
impl ExpressionEvaluator for EchoEvaluator {
    async fn render(&self, template: &str, _context: &Value) -> Result<String, RenderError> {
        Ok(template
            .trim_start_matches("{{")
            .trim_end_matches("}}")
            .trim()
            .to_string())
    }
}

struct Harness {
    engine: Arc<AutomationEngine>,
    manager: Arc<AutomationManager>,
    store: Arc<StateStore>,
    bus: Arc<EventBus>,
    registry: Arc<RecordingRegistry>,
    clock: ManualClock,
}

fn harness() -> Harness {
    let bus = Arc::new(EventBus::new());
    let clock = ManualClock::default();
    let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = Arc::new(StateStore::with_clock(bus.clone(), clock_arc.clone()));
    let registry = Arc::new(RecordingRegistry {
        calls: Mutex::new(Vec::new()),
    });
    let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(EchoEvaluator);
    let conditions = Arc::new(ConditionEvaluator::new(
        store.clone(),
        evaluator.clone(),
        clock_arc.clone(),
    ));
    let executor = Arc::new(ScriptExecutor::new(
        registry.clone(),
        evaluator,
        bus.clone(),
        conditions.clone(),
    ));
    let manager = Arc::new(AutomationManager::new());
    let engine = Arc::new(AutomationEngine::new(
        manager.clone(),
        conditions,
        executor,
        store.clone(),
        bus.clone(),
        clock_arc,
    ));

    Harness {
        engine,
        manager,
        store,
        bus,
        registry,
        clock,
    }
}

fn load(h: &Harness, yaml: &str) {
    let config: AutomationConfig = serde_yaml::from_str(yaml).unwrap();
    h.manager.add(config).unwrap();
}

fn slow_automation(id: &str, mode_lines: &str) -> String {
    format!(
        r#"
id: {id}
triggers:
  - trigger: state
    entity_id: binary_sensor.motion
    to: "on"
{mode_lines}
actions:
  - delay:
      seconds: 5
  - service: light.turn_on
    target:
      entity_id: light.desk
"#
    )
}

fn set_motion(h: &Harness, value: &str) {
    h.clock.advance_seconds(1);
    h.store.set(
        "binary_sensor.motion".parse::<EntityId>().unwrap(),
        value,
        Default::default(),
        Context::new(),
    );
}

async fn settle() {
    // Let spawned runs reach their next suspension point.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn calls(h: &Harness) -> usize {
    h.registry.calls.lock().unwrap().len()
}

#[tokio::test(start_paused = true)]
async fn single_mode_ignores_triggers_while_running() {
    let h = harness();
    load(&h, &slow_automation("motion", "mode: single"));
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);
    let mut triggered = h.bus.subscribe(AUTOMATION_TRIGGERED);

    set_motion(&h, "on");
    settle().await;
    assert_eq!(h.engine.active_runs("motion"), 1);

    // A second trigger while the delay is pending is dropped.
    set_motion(&h, "off");
    set_motion(&h, "on");
    settle().await;
    assert_eq!(h.engine.active_runs("motion"), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.engine.active_runs("motion"), 0);
    assert_eq!(calls(&h), 1);

    assert!(triggered.try_recv().is_some());
    assert!(triggered.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn restart_mode_cancels_and_replaces() {
    let h = harness();
    load(&h, &slow_automation("motion", "mode: restart"));
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);
    let mut triggered = h.bus.subscribe(AUTOMATION_TRIGGERED);

    set_motion(&h, "on");
    settle().await;
    assert_eq!(h.engine.active_runs("motion"), 1);

    // Retrigger one second in; the replacement's delay starts over.
    tokio::time::sleep(Duration::from_secs(1)).await;
    set_motion(&h, "off");
    set_motion(&h, "on");
    settle().await;
    assert_eq!(h.engine.active_runs("motion"), 1);

    // Past the first run's would-be finish, nothing has fired yet.
    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(calls(&h), 0);

    // The replacement finishes a second later.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls(&h), 1);
    assert_eq!(h.engine.active_runs("motion"), 0);

    assert!(triggered.try_recv().is_some());
    assert!(triggered.try_recv().is_some());
    assert!(triggered.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn queued_mode_bounds_the_queue() {
    let h = harness();
    load(&h, &slow_automation("motion", "mode: queued\nmax: 1"));
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);

    set_motion(&h, "on");
    settle().await;
    set_motion(&h, "off");
    set_motion(&h, "on");
    settle().await;
    set_motion(&h, "off");
    set_motion(&h, "on");
    settle().await;

    // One running, one queued, one rejected.
    assert_eq!(h.engine.active_runs("motion"), 1);
    assert_eq!(h.engine.queued_runs("motion"), 1);

    // The queued run drains after the first finishes.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.engine.queued_runs("motion"), 0);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(calls(&h), 2);
}

#[tokio::test(start_paused = true)]
async fn parallel_mode_caps_concurrency() {
    let h = harness();
    load(&h, &slow_automation("motion", "mode: parallel\nmax: 2"));
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);

    for _ in 0..3 {
        set_motion(&h, "off");
        set_motion(&h, "on");
        settle().await;
    }

    // Two admitted, the third rejected.
    assert_eq!(h.engine.active_runs("motion"), 2);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(calls(&h), 2);
}

#[tokio::test(start_paused = true)]
async fn conditions_gate_runs() {
    let h = harness();
    load(
        &h,
        r#"
id: motion
triggers:
  - trigger: state
    entity_id: binary_sensor.motion
    to: "on"
conditions:
  - condition: state
    entity_id: input_boolean.guard
    state: "on"
actions:
  - service: light.turn_on
    target:
      entity_id: light.desk
"#,
    );
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);

    set_motion(&h, "on");
    settle().await;
    assert_eq!(calls(&h), 0);

    h.store.set(
        "input_boolean.guard".parse::<EntityId>().unwrap(),
        "on",
        Default::default(),
        Context::new(),
    );
    set_motion(&h, "off");
    set_motion(&h, "on");
    settle().await;
    assert_eq!(calls(&h), 1);
}

#[tokio::test(start_paused = true)]
async fn hold_timer_fires_after_duration() {
    let h = harness();
    load(
        &h,
        r#"
id: lingering
triggers:
  - trigger: state
    entity_id: binary_sensor.motion
    to: "on"
    for: "00:00:30"
actions:
  - service: light.turn_on
    target:
      entity_id: light.desk
"#,
    );
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);

    set_motion(&h, "on");
    settle().await;
    assert!(h.engine.hold_armed("lingering", 0));
    assert_eq!(calls(&h), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!h.engine.hold_armed("lingering", 0));
    assert_eq!(calls(&h), 1);
}

#[tokio::test(start_paused = true)]
async fn hold_timer_cancelled_by_contradicting_change() {
    let h = harness();
    load(
        &h,
        r#"
id: lingering
triggers:
  - trigger: state
    entity_id: binary_sensor.motion
    to: "on"
    for: "00:00:30"
actions:
  - service: light.turn_on
    target:
      entity_id: light.desk
"#,
    );
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);

    set_motion(&h, "on");
    settle().await;
    assert!(h.engine.hold_armed("lingering", 0));

    // Motion clears before the hold elapses.
    set_motion(&h, "off");
    settle().await;
    assert!(!h.engine.hold_armed("lingering", 0));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls(&h), 0);
}

#[tokio::test(start_paused = true)]
async fn run_traces_record_start_and_outcome() {
    let h = harness();
    load(&h, &slow_automation("motion", "mode: restart"));
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);

    set_motion(&h, "on");
    settle().await;
    let traces = h.engine.run_traces("motion");
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].triggered_by, "state");
    assert_eq!(traces[0].outcome, RunOutcome::Running);
    assert!(traces[0].finished.is_none());

    set_motion(&h, "off");
    set_motion(&h, "on");
    settle().await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    // The superseded run shows up as cancelled, the replacement as
    // completed.
    let traces = h.engine.run_traces("motion");
    assert_eq!(traces.len(), 2);
    assert_eq!(traces[0].outcome, RunOutcome::Cancelled);
    assert_eq!(traces[1].outcome, RunOutcome::Completed);
    assert!(traces[1].finished.is_some());
}

#[tokio::test(start_paused = true)]
async fn disabled_automation_never_runs() {
    let h = harness();
    load(&h, &slow_automation("motion", "mode: single"));
    h.manager.disable("motion").unwrap();
    let hook = h.store.add_change_hook();
    let _consumer = h.engine.start(hook);

    set_motion(&h, "on");
    settle().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls(&h), 0);
}
