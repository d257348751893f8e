//! Discovery payload shapes

use hearth_core::EntityId;
use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, DiscoveryResult};

/// The component kind announced in the discovery topic.
///
/// The component doubles as the entity's domain, so only domains the
/// runtime knows how to model are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Sensor,
    BinarySensor,
    Switch,
    Light,
    Cover,
}

impl Component {
    pub fn domain(&self) -> &'static str {
        match self {
            Component::Sensor => "sensor",
            Component::BinarySensor => "binary_sensor",
            Component::Switch => "switch",
            Component::Light => "light",
            Component::Cover => "cover",
        }
    }

    pub fn parse(segment: &str) -> DiscoveryResult<Self> {
        match segment {
            "sensor" => Ok(Component::Sensor),
            "binary_sensor" => Ok(Component::BinarySensor),
            "switch" => Ok(Component::Switch),
            "light" => Ok(Component::Light),
            "cover" => Ok(Component::Cover),
            other => Err(DiscoveryError::UnsupportedComponent(other.to_string())),
        }
    }
}

/// Device metadata carried alongside a discovery announcement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sw_version: Option<String>,
}

/// A parsed discovery config payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub name: String,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub unique_id: Option<String>,
    pub state_topic: String,
    #[serde(default)]
    pub command_topic: Option<String>,
    #[serde(default)]
    pub value_template: Option<String>,
    #[serde(default)]
    pub availability_topic: Option<String>,
    #[serde(default)]
    pub device: Option<DeviceInfo>,
}

impl DiscoveryConfig {
    /// Derive the entity id under the component's domain.
    ///
    /// An explicit `object_id` wins; otherwise the display name is
    /// slugified with underscores.
    pub fn entity_id(&self, component: Component) -> DiscoveryResult<EntityId> {
        let object_id = match &self.object_id {
            Some(id) => id.clone(),
            None => slug::slugify(&self.name).replace('-', "_"),
        };
        Ok(EntityId::new(component.domain(), object_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_prefers_object_id() {
        let config: DiscoveryConfig = serde_json::from_str(
            r#"{"name": "Hall Motion", "object_id": "hall_pir", "state_topic": "zigbee/hall/state"}"#,
        )
        .unwrap();

        let id = config.entity_id(Component::BinarySensor).unwrap();
        assert_eq!(id.to_string(), "binary_sensor.hall_pir");
    }

    #[test]
    fn entity_id_slugifies_name() {
        let config: DiscoveryConfig = serde_json::from_str(
            r#"{"name": "Kitchen Temp & Humidity", "state_topic": "zigbee/kitchen/state"}"#,
        )
        .unwrap();

        let id = config.entity_id(Component::Sensor).unwrap();
        assert_eq!(id.to_string(), "sensor.kitchen_temp_humidity");
    }

    #[test]
    fn unknown_component_is_rejected() {
        assert!(matches!(
            Component::parse("vacuum"),
            Err(DiscoveryError::UnsupportedComponent(_))
        ));
    }

    #[test]
    fn optional_fields_default() {
        let config: DiscoveryConfig =
            serde_json::from_str(r#"{"name": "Desk Lamp", "state_topic": "desk/state"}"#).unwrap();
        assert!(config.value_template.is_none());
        assert!(config.availability_topic.is_none());
        assert!(config.device.is_none());
    }
}
