//! Discovery message processing

use dashmap::DashMap;
use hearth_core::{Context, EntityId, ExpressionEvaluator};
use hearth_state_store::StateStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

use crate::config::{Component, DiscoveryConfig};
use crate::registry::TopicSubscriptionRegistry;

pub const DEFAULT_DISCOVERY_PREFIX: &str = "hearth";

const STATE_UNKNOWN: &str = "unknown";
const STATE_UNAVAILABLE: &str = "unavailable";

/// Vendor payload tokens mapped to canonical lowercase state values.
/// Applied only after any value template has run.
const VENDOR_TOKENS: &[(&str, &str)] = &[
    ("ON", "on"),
    ("OFF", "off"),
    ("TRUE", "true"),
    ("FALSE", "false"),
    ("OPEN", "open"),
    ("CLOSED", "closed"),
    ("LOCKED", "locked"),
    ("UNLOCKED", "unlocked"),
    ("ONLINE", "online"),
    ("OFFLINE", "offline"),
    ("NONE", "none"),
];

fn normalize_vendor_token(value: &str) -> &str {
    let trimmed = value.trim();
    for (raw, canonical) in VENDOR_TOKENS {
        if trimmed == *raw {
            return canonical;
        }
    }
    trimmed
}

struct DiscoveredEntity {
    config: DiscoveryConfig,
    attributes: HashMap<String, Value>,
    last_value: Option<String>,
}

/// Turns inbound broker messages into live entities.
///
/// Config announcements upsert entities and register their topics in
/// the [`TopicSubscriptionRegistry`]; state and availability messages
/// are routed back through that registry to the entities that care.
/// The broker transport itself lives outside this crate, a client just
/// feeds `(topic, payload, retained)` tuples into [`handle_message`].
///
/// [`handle_message`]: DiscoveryProcessor::handle_message
pub struct DiscoveryProcessor {
    store: Arc<StateStore>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    registry: Arc<TopicSubscriptionRegistry>,
    prefix: String,
    entities: DashMap<EntityId, DiscoveredEntity>,
    config_topics: DashMap<String, EntityId>,
}

impl DiscoveryProcessor {
    pub fn new(
        store: Arc<StateStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            evaluator,
            registry: Arc::new(TopicSubscriptionRegistry::new()),
            prefix: prefix.into(),
            entities: DashMap::new(),
            config_topics: DashMap::new(),
        }
    }

    pub fn registry(&self) -> Arc<TopicSubscriptionRegistry> {
        self.registry.clone()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Process one inbound broker message.
    ///
    /// Malformed payloads are logged and dropped; they never propagate
    /// an error to the transport.
    #[instrument(skip(self, payload), fields(topic = %topic))]
    pub async fn handle_message(&self, topic: &str, payload: &str, retained: bool) {
        if retained {
            trace!("processing retained message");
        }

        if let Some(component) = self.config_topic_component(topic) {
            self.handle_config(topic, component, payload);
            return;
        }

        for entity_id in self.registry.entities_for(topic) {
            self.route_to_entity(&entity_id, topic, payload).await;
        }
    }

    /// `<prefix>/<component>/<object_id>/config`
    fn config_topic_component(&self, topic: &str) -> Option<Component> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let mut segments = rest.split('/');
        let component = segments.next()?;
        let _object_id = segments.next()?;
        if segments.next() != Some("config") || segments.next().is_some() {
            return None;
        }
        match Component::parse(component) {
            Ok(component) => Some(component),
            Err(err) => {
                warn!(error = %err, "discovery announcement for unsupported component");
                None
            }
        }
    }

    fn handle_config(&self, topic: &str, component: Component, payload: &str) {
        if payload.trim().is_empty() {
            self.remove_by_config_topic(topic);
            return;
        }

        let config: DiscoveryConfig = match serde_json::from_str(payload) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "ignoring malformed discovery payload");
                return;
            }
        };
        let entity_id = match config.entity_id(component) {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "ignoring discovery payload without usable entity id");
                return;
            }
        };

        // A re-announcement may have moved topics; scrub the old
        // registrations before adding the new ones. Identical payloads
        // land on the same sets and leave the counts untouched.
        if self.entities.contains_key(&entity_id) {
            self.registry.unsubscribe_entity(&entity_id);
        }
        // The same config topic may now describe a different entity id;
        // the superseded entity goes away entirely.
        if let Some(previous) = self
            .config_topics
            .insert(topic.to_string(), entity_id.clone())
        {
            if previous != entity_id {
                debug!(entity_id = %previous, "config re-announcement superseded entity");
                self.entities.remove(&previous);
                self.registry.unsubscribe_entity(&previous);
                self.store.remove(&previous, Context::new());
            }
        }
        self.registry.subscribe(config.state_topic.clone(), entity_id.clone());
        if let Some(availability) = &config.availability_topic {
            self.registry.subscribe(availability.clone(), entity_id.clone());
        }

        let mut attributes = HashMap::new();
        attributes.insert("friendly_name".to_string(), json!(config.name));
        if let Some(device) = &config.device {
            if let Some(manufacturer) = &device.manufacturer {
                attributes.insert("manufacturer".to_string(), json!(manufacturer));
            }
            if let Some(model) = &device.model {
                attributes.insert("model".to_string(), json!(model));
            }
        }

        if self.store.get(&entity_id.to_string()).is_none() {
            self.store.set(
                entity_id.clone(),
                STATE_UNKNOWN,
                attributes.clone(),
                Context::new(),
            );
        }

        debug!(entity_id = %entity_id, "discovered entity");
        self.entities.insert(
            entity_id,
            DiscoveredEntity {
                config,
                attributes,
                last_value: None,
            },
        );
    }

    fn remove_by_config_topic(&self, topic: &str) {
        let Some((_, entity_id)) = self.config_topics.remove(topic) else {
            trace!("empty config payload for unknown topic");
            return;
        };

        debug!(entity_id = %entity_id, "removing discovered entity");
        self.entities.remove(&entity_id);
        self.registry.unsubscribe_entity(&entity_id);
        self.store.remove(&entity_id, Context::new());
    }

    async fn route_to_entity(&self, entity_id: &EntityId, topic: &str, payload: &str) {
        // Clone what we need up front; the evaluator call suspends and
        // no map guard may be held across it.
        let (config, attributes) = match self.entities.get(entity_id) {
            Some(record) => (record.config.clone(), record.attributes.clone()),
            None => return,
        };

        if config.availability_topic.as_deref() == Some(topic) {
            self.apply_availability(entity_id, attributes, payload);
        } else if config.state_topic == topic {
            self.apply_state(entity_id, &config, attributes, payload).await;
        }
    }

    async fn apply_state(
        &self,
        entity_id: &EntityId,
        config: &DiscoveryConfig,
        attributes: HashMap<String, Value>,
        payload: &str,
    ) {
        // Template extraction first, vendor-token normalization second.
        // Normalizing the raw payload would corrupt JSON payloads the
        // template needs intact.
        let extracted = match &config.value_template {
            Some(template) => {
                let context = json!({
                    "value": payload,
                    "value_json": serde_json::from_str::<Value>(payload).ok(),
                });
                match self.evaluator.render(template, &context).await {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(entity_id = %entity_id, error = %err, "value template failed");
                        return;
                    }
                }
            }
            None => payload.to_string(),
        };
        let value = normalize_vendor_token(&extracted).to_string();

        self.store
            .set(entity_id.clone(), value.clone(), attributes, Context::new());
        if let Some(mut record) = self.entities.get_mut(entity_id) {
            record.last_value = Some(value);
        }
    }

    fn apply_availability(
        &self,
        entity_id: &EntityId,
        attributes: HashMap<String, Value>,
        payload: &str,
    ) {
        match normalize_vendor_token(payload) {
            "offline" => {
                self.store
                    .set(entity_id.clone(), STATE_UNAVAILABLE, attributes, Context::new());
            }
            "online" => {
                let restored = self
                    .entities
                    .get(entity_id)
                    .and_then(|record| record.last_value.clone())
                    .unwrap_or_else(|| STATE_UNKNOWN.to_string());
                self.store
                    .set(entity_id.clone(), restored, attributes, Context::new());
            }
            other => {
                debug!(entity_id = %entity_id, payload = other, "unrecognized availability payload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_leaves_lowercase_alone() {
        assert_eq!(normalize_vendor_token("on"), "on");
        assert_eq!(normalize_vendor_token("ON"), "on");
        assert_eq!(normalize_vendor_token("CLOSED"), "closed");
        assert_eq!(normalize_vendor_token("21.5"), "21.5");
        // Mixed case is not a vendor token.
        assert_eq!(normalize_vendor_token("On"), "On");
    }
}
