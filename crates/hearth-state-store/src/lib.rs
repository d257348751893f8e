//! Entity state storage for Hearth
//!
//! The StateStore tracks the current state of every entity. Writes to the
//! same entity are linearized per key: the read-modify-write AND the change
//! dispatch both happen under that key's shard entry, so subscribers see
//! one entity's changes in write order. Writes to different entities
//! proceed without a global lock, and no lock is ever held across an await.
//!
//! Change distribution is two-tier:
//! - the broadcast [`EventBus`] carries `state_changed` / `state_reported`
//!   to consumers that may lag and drop (history, UIs),
//! - lossless mpsc hooks ([`StateStore::add_change_hook`]) feed consumers
//!   that must not miss a change (the automation engine).

use dashmap::DashMap;
use hearth_core::events::{StateChangedData, StateReportedData};
use hearth_core::{ChangeOutcome, Clock, Context, EntityId, Event, Recorder, State, SystemClock};
use hearth_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

/// The store of current entity states.
pub struct StateStore {
    /// Entity states keyed by the full entity id string
    states: DashMap<String, State>,
    /// Entity ids per domain
    domain_index: DashMap<String, Vec<String>>,
    /// Lossy broadcast path
    event_bus: Arc<EventBus>,
    /// Lossless direct hooks, pruned when a receiver is dropped
    change_hooks: Mutex<Vec<mpsc::UnboundedSender<Event<StateChangedData>>>>,
    /// History sink, fire-and-forget
    recorder: Mutex<Option<Arc<dyn Recorder>>>,
    /// Timestamp source
    clock: Arc<dyn Clock>,
}

impl StateStore {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self::with_clock(event_bus, Arc::new(SystemClock))
    }

    pub fn with_clock(event_bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
            change_hooks: Mutex::new(Vec::new()),
            recorder: Mutex::new(None),
            clock,
        }
    }

    /// Attach the recorder that gets told about every state change.
    pub fn set_recorder(&self, recorder: Arc<dyn Recorder>) {
        *self.recorder.lock().unwrap() = Some(recorder);
    }

    /// Register a lossless change hook.
    ///
    /// Every `state_changed` (not `state_reported`) is sent here in write
    /// order per entity, before the broadcast fire. The channel is
    /// unbounded: the consumer owns its backlog instead of losing events.
    pub fn add_change_hook(&self) -> mpsc::UnboundedReceiver<Event<StateChangedData>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.change_hooks.lock().unwrap().push(tx);
        rx
    }

    /// Write an entity's state.
    ///
    /// Timestamp rules:
    /// - different value: `last_changed`, `last_updated`, `last_reported`
    ///   all advance and a `state_changed` event fires;
    /// - same value, different attributes: `last_updated` and
    ///   `last_reported` advance, `last_changed` does not, and a
    ///   `state_changed` event still fires;
    /// - exact no-op: only `last_reported` advances and a low-priority
    ///   `state_reported` event fires instead.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> ChangeOutcome {
        let key = entity_id.to_string();
        let now = self.clock.now();

        // Per-key linearization: the successor is computed AND dispatched
        // while this key's entry is held, so hooks, recorder and bus all
        // observe changes to one entity in write order. Nothing inside the
        // guard blocks.
        match self.states.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let old = occupied.get().clone();
                let (next, outcome) = old.with_update(state, attributes, context.clone(), now);
                occupied.insert(next.clone());
                debug!(state = %next.state, ?outcome, "state written");

                match outcome {
                    ChangeOutcome::Reported => {
                        let data = StateReportedData {
                            entity_id,
                            old_last_reported: Some(old.last_reported),
                            last_reported: next.last_reported,
                            new_state: next,
                        };
                        self.event_bus.fire_typed(data, context);
                    }
                    _ => {
                        let data = StateChangedData {
                            entity_id,
                            old_state: Some(old),
                            new_state: Some(next),
                        };
                        self.dispatch_change(data, context);
                    }
                }
                outcome
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let key = vacant.key().clone();
                let next = State::new(entity_id.clone(), state, attributes, context.clone(), now);
                // `insert` hands back the entry guard; keep it alive so the
                // dispatch below still happens under this key's lock.
                let occupied = vacant.insert(next.clone());
                debug!(state = %next.state, outcome = ?ChangeOutcome::Created, "state written");

                self.domain_index
                    .entry(entity_id.domain().to_string())
                    .or_default()
                    .push(key);

                let data = StateChangedData {
                    entity_id,
                    old_state: None,
                    new_state: Some(next),
                };
                self.dispatch_change(data, context);
                drop(occupied);
                ChangeOutcome::Created
            }
        }
    }

    /// Remove an entity. Explicit removal is the only way an entity
    /// disappears; a `state_changed` with `new_state: None` is emitted.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let key = entity_id.to_string();

        // Same discipline as `set`: announce the removal while the entry is
        // held so it serializes with concurrent writes to this key.
        match self.states.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let state = occupied.get().clone();
                trace!("removing entity state");

                let data = StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                };
                self.dispatch_change(data, context);
                occupied.remove();

                if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
                    ids.retain(|id| id != &key);
                }

                Some(state)
            }
            dashmap::mapref::entry::Entry::Vacant(_) => None,
        }
    }

    fn dispatch_change(&self, data: StateChangedData, context: Context) {
        let event = Event::typed(data.clone(), context.clone());

        if let Some(recorder) = self.recorder.lock().unwrap().as_ref() {
            recorder.state_changed(&event);
        }

        // Lossless hooks first, so the engine observes the change no later
        // than any broadcast consumer. Closed receivers are pruned here.
        self.change_hooks
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());

        self.event_bus.fire_typed(data, context);
    }

    /// Current snapshot of an entity, if it exists.
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Just the state value string.
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// Whether an entity currently holds a specific value.
    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// All entity ids in a domain.
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// All snapshots in a domain.
    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Every known entity id.
    pub fn all_entity_ids(&self) -> Vec<String> {
        self.states.iter().map(|r| r.key().clone()).collect()
    }

    /// Every current snapshot.
    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }

    /// Total number of entities.
    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Thread-safe alias used across the workspace.
pub type SharedStateStore = Arc<StateStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use hearth_core::ManualClock;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn store_with_clock() -> (Arc<StateStore>, ManualClock, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let clock = ManualClock::at(start());
        let store = Arc::new(StateStore::with_clock(bus.clone(), Arc::new(clock.clone())));
        (store, clock, bus)
    }

    fn eid(s: &str) -> EntityId {
        s.parse().unwrap()
    }

    #[test]
    fn first_write_creates() {
        let (store, _clock, _bus) = store_with_clock();
        let outcome = store.set(eid("light.desk"), "on", HashMap::new(), Context::new());
        assert_eq!(outcome, ChangeOutcome::Created);
        assert!(store.is_state("light.desk", "on"));
        assert_eq!(store.entity_ids("light"), vec!["light.desk".to_string()]);
    }

    #[test]
    fn identical_write_advances_only_last_reported() {
        let (store, clock, _bus) = store_with_clock();
        store.set(eid("sensor.temp"), "21.0", HashMap::new(), Context::new());
        let first = store.get("sensor.temp").unwrap();

        clock.advance_seconds(30);
        let outcome = store.set(eid("sensor.temp"), "21.0", HashMap::new(), Context::new());
        assert_eq!(outcome, ChangeOutcome::Reported);

        clock.advance_seconds(30);
        store.set(eid("sensor.temp"), "21.0", HashMap::new(), Context::new());

        let last = store.get("sensor.temp").unwrap();
        assert_eq!(last.last_changed, first.last_changed);
        assert_eq!(
            (last.last_reported - first.last_reported).num_seconds(),
            60
        );
    }

    #[test]
    fn attribute_change_is_a_change_event_without_last_changed() {
        let (store, clock, bus) = store_with_clock();
        let mut rx = bus.subscribe(hearth_core::events::STATE_CHANGED);

        store.set(eid("light.desk"), "on", HashMap::new(), Context::new());
        let created = store.get("light.desk").unwrap();
        assert!(rx.try_recv().is_some());

        clock.advance_seconds(5);
        let attrs = HashMap::from([("brightness".to_string(), json!(128))]);
        let outcome = store.set(eid("light.desk"), "on", attrs, Context::new());
        assert_eq!(outcome, ChangeOutcome::AttributesChanged);
        assert!(rx.try_recv().is_some());

        let after = store.get("light.desk").unwrap();
        assert_eq!(after.last_changed, created.last_changed);
        assert!(after.last_updated > created.last_updated);
    }

    #[test]
    fn noop_write_fires_state_reported_not_state_changed() {
        let (store, clock, bus) = store_with_clock();
        store.set(eid("switch.fan"), "off", HashMap::new(), Context::new());

        let mut changed = bus.subscribe(hearth_core::events::STATE_CHANGED);
        let mut reported = bus.subscribe(hearth_core::events::STATE_REPORTED);

        clock.advance_seconds(1);
        store.set(eid("switch.fan"), "off", HashMap::new(), Context::new());

        assert!(changed.try_recv().is_none());
        assert!(reported.try_recv().is_some());
    }

    #[tokio::test]
    async fn change_hook_is_lossless_and_ordered() {
        let (store, clock, _bus) = store_with_clock();
        let mut hook = store.add_change_hook();

        for i in 0..5 {
            clock.advance_seconds(1);
            store.set(
                eid("sensor.counter"),
                format!("{i}"),
                HashMap::new(),
                Context::new(),
            );
        }

        for i in 0..5 {
            let event = hook.recv().await.unwrap();
            let new_state = event.data.new_state.unwrap();
            assert_eq!(new_state.state, format!("{i}"));
        }
    }

    #[test]
    fn concurrent_writers_to_one_key_deliver_in_write_order() {
        let (store, _clock, _bus) = store_with_clock();
        let mut hook = store.add_change_hook();

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        store.set(
                            eid("sensor.shared"),
                            format!("{t}-{i}"),
                            HashMap::new(),
                            Context::new(),
                        );
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        // Chain consistency: each event's old value is the previous
        // event's new value, regardless of which writer won each round.
        let mut previous: Option<String> = None;
        let mut delivered = 0;
        while let Ok(event) = hook.try_recv() {
            assert_eq!(event.data.old_state.map(|s| s.state), previous);
            previous = event.data.new_state.map(|s| s.state);
            delivered += 1;
        }
        assert_eq!(delivered, 8 * 500);
    }

    #[test]
    fn hook_skips_pure_reports() {
        let (store, clock, _bus) = store_with_clock();
        let mut hook = store.add_change_hook();

        store.set(eid("light.desk"), "on", HashMap::new(), Context::new());
        clock.advance_seconds(1);
        store.set(eid("light.desk"), "on", HashMap::new(), Context::new());

        assert!(hook.try_recv().is_ok()); // creation
        assert!(hook.try_recv().is_err()); // the no-op produced nothing
    }

    #[test]
    fn remove_emits_change_with_none_and_unindexes() {
        let (store, _clock, bus) = store_with_clock();
        store.set(eid("light.desk"), "on", HashMap::new(), Context::new());

        let mut rx = bus.subscribe_typed::<StateChangedData>();
        let removed = store.remove(&eid("light.desk"), Context::new());
        assert!(removed.is_some());
        assert!(store.get("light.desk").is_none());
        assert!(store.entity_ids("light").is_empty());

        // Drain via async receiver without awaiting forever.
        let event = tokio_test::block_on(rx.recv()).unwrap();
        assert!(event.data.new_state.is_none());
    }
}
