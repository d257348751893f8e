//! Runtime assembly.
//!
//! [`Hearth`] wires the store, bus, template engine, automation engine,
//! scheduler and discovery processor together into one owned context
//! object. There is no ambient singleton; everything hangs off the
//! instance you construct.

pub mod config;

pub use config::{ConfigError, ConfigResult, HearthConfig};

use hearth_automation::{AutomationConfig, AutomationManager, ConditionEvaluator, TriggerData};
use hearth_core::{
    ChangeOutcome, Clock, Context, EntityId, EventType, ExpressionEvaluator, ServiceRegistry,
    State, SystemClock,
};
use hearth_discovery::DiscoveryProcessor;
use hearth_engine::{AutomationEngine, Location, Scheduler};
use hearth_event_bus::{BusReceiver, EventBus};
use hearth_script::ScriptExecutor;
use hearth_state_store::StateStore;
use hearth_template::{TemplateEngine, TemplateEvaluator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber for binaries and tests.
///
/// Honors `RUST_LOG`, defaulting to `info`. Calling it twice is fine,
/// the second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// The assembled runtime.
pub struct Hearth {
    config: HearthConfig,
    bus: Arc<EventBus>,
    store: Arc<StateStore>,
    manager: Arc<AutomationManager>,
    engine: Arc<AutomationEngine>,
    scheduler: Arc<Scheduler>,
    discovery: Arc<DiscoveryProcessor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hearth {
    /// Build the full object graph from a config and an injected
    /// service registry. Nothing runs until [`start`] is called.
    ///
    /// [`start`]: Hearth::start
    pub fn new(config: HearthConfig, services: Arc<dyn ServiceRegistry>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let bus = Arc::new(EventBus::with_capacity(config.bus_capacity));
        let store = Arc::new(StateStore::with_clock(bus.clone(), clock.clone()));

        let templates = Arc::new(TemplateEngine::new(store.clone()));
        let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(TemplateEvaluator::new(templates));

        let conditions = Arc::new(
            ConditionEvaluator::new(store.clone(), evaluator.clone(), clock.clone())
                .with_template_timeout(config.template_timeout()),
        );
        let executor = Arc::new(ScriptExecutor::new(
            services,
            evaluator.clone(),
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
            clock.clone(),
        ));
        let scheduler = Arc::new(
            Scheduler::new(
                manager.clone(),
                clock,
                Location::new(config.latitude, config.longitude)
                    .with_elevation(config.elevation_m as f64),
            )
            .with_tick_interval(config.tick_interval()),
        );
        let discovery = Arc::new(DiscoveryProcessor::new(
            store.clone(),
            evaluator,
            config.discovery_prefix.clone(),
        ));

        Self {
            config,
            bus,
            store,
            manager,
            engine,
            scheduler,
            discovery,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the engine and scheduler loops.
    pub fn start(&self) {
        info!(name = %self.config.name, "starting runtime");

        let changes = self.store.add_change_hook();
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(self.engine.start(changes));
        tasks.push(self.scheduler.clone().start(self.engine.clone()));
    }

    /// Stop the background loops and wait for them to wind down.
    pub async fn shutdown(&self) {
        info!("shutting down runtime");

        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn config(&self) -> &HearthConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<StateStore> {
        self.store.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Automation handle for load/enable/disable.
    pub fn automations(&self) -> Arc<AutomationManager> {
        self.manager.clone()
    }

    /// Discovery handle for the broker client to feed.
    pub fn discovery(&self) -> Arc<DiscoveryProcessor> {
        self.discovery.clone()
    }

    pub fn get_state(&self, entity_id: &str) -> Option<State> {
        self.store.get(entity_id)
    }

    pub fn set_state(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
    ) -> ChangeOutcome {
        self.store.set(entity_id, state, attributes, Context::new())
    }

    pub fn subscribe(&self, event_type: impl Into<EventType>) -> BusReceiver {
        self.bus.subscribe(event_type)
    }

    pub fn add_automation(&self, config: AutomationConfig) -> Result<String, hearth_automation::AutomationError> {
        self.manager.add(config)
    }

    /// Recorded run traces for an automation, oldest first.
    pub fn run_traces(&self, automation_id: &str) -> Vec<hearth_engine::RunTrace> {
        self.engine.run_traces(automation_id)
    }

    /// Run an automation now, skipping its triggers but not its
    /// conditions.
    pub async fn trigger_now(&self, automation_id: &str) {
        let data = TriggerData::new("manual", hearth_core::SystemClock.now());
        self.engine
            .trigger_automation(automation_id, data, Context::new())
            .await;
    }
}
