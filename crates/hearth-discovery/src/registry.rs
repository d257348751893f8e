//! Topic to entity subscription registry

use dashmap::DashMap;
use hearth_core::EntityId;
use std::collections::HashSet;

/// Maps broker topics to the set of entities interested in them.
///
/// Membership is set-based so re-announcing a device never grows a
/// topic's entry, and removing an entity scrubs it from every topic.
#[derive(Default)]
pub struct TopicSubscriptionRegistry {
    topics: DashMap<String, HashSet<EntityId>>,
}

impl TopicSubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity's interest in a topic. Returns whether the
    /// entity was newly added.
    pub fn subscribe(&self, topic: impl Into<String>, entity: EntityId) -> bool {
        self.topics.entry(topic.into()).or_default().insert(entity)
    }

    /// Remove an entity from every topic set, dropping sets that end
    /// up empty.
    pub fn unsubscribe_entity(&self, entity: &EntityId) {
        self.topics.retain(|_, entities| {
            entities.remove(entity);
            !entities.is_empty()
        });
    }

    pub fn entities_for(&self, topic: &str) -> Vec<EntityId> {
        self.topics
            .get(topic)
            .map(|entities| entities.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total entity registrations across all topics.
    pub fn subscription_count(&self) -> usize {
        self.topics.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(s: &str) -> EntityId {
        s.parse().unwrap()
    }

    #[test]
    fn repeated_subscribe_is_a_noop() {
        let registry = TopicSubscriptionRegistry::new();
        assert!(registry.subscribe("zigbee/hall/state", entity("binary_sensor.hall")));
        assert!(!registry.subscribe("zigbee/hall/state", entity("binary_sensor.hall")));

        assert_eq!(registry.topic_count(), 1);
        assert_eq!(registry.subscription_count(), 1);
    }

    #[test]
    fn unsubscribe_scrubs_every_topic() {
        let registry = TopicSubscriptionRegistry::new();
        registry.subscribe("zigbee/hall/state", entity("binary_sensor.hall"));
        registry.subscribe("zigbee/hall/availability", entity("binary_sensor.hall"));
        registry.subscribe("zigbee/hall/state", entity("sensor.hall_lux"));

        registry.unsubscribe_entity(&entity("binary_sensor.hall"));

        assert_eq!(registry.entities_for("zigbee/hall/state"), vec![entity("sensor.hall_lux")]);
        assert!(registry.entities_for("zigbee/hall/availability").is_empty());
        // The availability topic's empty set is gone entirely.
        assert_eq!(registry.topic_count(), 1);
    }

    #[test]
    fn entities_for_unknown_topic_is_empty() {
        let registry = TopicSubscriptionRegistry::new();
        assert!(registry.entities_for("nothing/here").is_empty());
    }
}
