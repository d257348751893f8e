//! The `states` object exposed to templates
//!
//! Gives templates read access to the live state store:
//! - `states('entity_id')` returns the state value string
//! - `states.light.desk` returns a state object
//! - `states.light()` lists all state objects in a domain

use hearth_core::State;
use hearth_state_store::StateStore;
use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct StatesObject {
    store: Arc<StateStore>,
}

impl std::fmt::Debug for StatesObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatesObject").finish_non_exhaustive()
    }
}

impl StatesObject {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// State value string for an entity
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.store.get_state(entity_id)
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.store.is_state(entity_id, state)
    }

    /// Attribute value, UNDEFINED when the entity or attribute is missing
    pub fn state_attr(&self, entity_id: &str, attribute: &str) -> Value {
        self.store
            .get(entity_id)
            .and_then(|s| s.attributes.get(attribute).cloned())
            .map(json_to_value)
            .unwrap_or(Value::UNDEFINED)
    }

    /// Whether the entity exists and is not unknown/unavailable
    pub fn has_value(&self, entity_id: &str) -> bool {
        self.store
            .get(entity_id)
            .map(|s| !s.is_unavailable() && !s.is_unknown())
            .unwrap_or(false)
    }
}

impl Object for StatesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;

        if key.contains('.') {
            return self.store.get(key).map(state_to_value);
        }

        Some(Value::from_object(DomainProxy {
            domain: key.to_string(),
            store: self.store.clone(),
        }))
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, args: &[Value]) -> Result<Value, Error> {
        let entity_id = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "states() requires entity_id")
        })?;

        Ok(self
            .get_state(entity_id)
            .map(Value::from)
            .unwrap_or(Value::UNDEFINED))
    }
}

/// Proxy enabling `states.domain.object_id`
#[derive(Clone)]
struct DomainProxy {
    domain: String,
    store: Arc<StateStore>,
}

impl std::fmt::Debug for DomainProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainProxy")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl Object for DomainProxy {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let object_id = key.as_str()?;
        let entity_id = format!("{}.{}", self.domain, object_id);
        self.store.get(&entity_id).map(state_to_value)
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, _args: &[Value]) -> Result<Value, Error> {
        let entities: Vec<Value> = self
            .store
            .domain_states(&self.domain)
            .into_iter()
            .map(state_to_value)
            .collect();
        Ok(Value::from(entities))
    }
}

fn state_to_value(state: State) -> Value {
    Value::from_object(StateWrapper(state))
}

/// Wrapper exposing a State to templates
#[derive(Debug, Clone)]
pub struct StateWrapper(pub State);

impl Object for StateWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn render(self: &Arc<Self>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.state)
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        match key {
            "state" => Some(Value::from(self.0.state.as_str())),
            "entity_id" => Some(Value::from(self.0.entity_id.to_string())),
            "domain" => Some(Value::from(self.0.entity_id.domain())),
            "object_id" => Some(Value::from(self.0.entity_id.object_id())),
            "name" => self
                .0
                .attributes
                .get("friendly_name")
                .and_then(|v| v.as_str().map(Value::from))
                .or_else(|| Some(Value::from(self.0.entity_id.object_id()))),
            "last_changed" => Some(Value::from(self.0.last_changed.to_rfc3339())),
            "last_updated" => Some(Value::from(self.0.last_updated.to_rfc3339())),
            "last_reported" => Some(Value::from(self.0.last_reported.to_rfc3339())),
            "attributes" => {
                let attrs: HashMap<String, Value> = self
                    .0
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), json_to_value(v.clone())))
                    .collect();
                Some(Value::from(attrs))
            }
            _ => None,
        }
    }
}

/// Convert a serde_json value into a template value
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::from(()),
        serde_json::Value::Bool(b) => Value::from(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(f) = n.as_f64() {
                Value::from(f)
            } else {
                Value::UNDEFINED
            }
        }
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            Value::from(items.into_iter().map(json_to_value).collect::<Vec<_>>())
        }
        serde_json::Value::Object(map) => {
            let converted: HashMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect();
            Value::from(converted)
        }
    }
}
